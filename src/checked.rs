//! Validating wrappers around the scoring kernels.
//!
//! The kernels trust their inputs. These wrappers check shapes and ids once per
//! call, then hand the untouched slices to a [`ScoreKernel`] (usually
//! [`process_dispatcher`](crate::process_dispatcher)).

use crate::backend::ScoreKernel;
use crate::quant::QuantParams;

/// Malformed scoring input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoreError {
    #[error("dimension must be non-zero")]
    ZeroDimension,

    #[error("query has {actual} values, expected {expected}")]
    QueryLength { expected: usize, actual: usize },

    #[error("candidate has {actual} values, expected {expected}")]
    CandidateLength { expected: usize, actual: usize },

    #[error("matrix of {len} values is not a whole number of rows of {dim}")]
    MatrixShape { len: usize, dim: usize },

    #[error("id {id} at position {position} is out of range for {rows} rows")]
    IndexOutOfRange { position: usize, id: u32, rows: usize },

    #[error("output has {actual} slots for {expected} ids")]
    OutputLength { expected: usize, actual: usize },
}

/// Checks a batch against a matrix of `matrix_len` values; returns the row count.
pub fn validate_batch(
    query: &[f32],
    matrix_len: usize,
    dim: usize,
    ids: &[u32],
    out: &[f32],
) -> Result<usize, ScoreError> {
    if dim == 0 {
        return Err(ScoreError::ZeroDimension);
    }
    if query.len() != dim {
        return Err(ScoreError::QueryLength {
            expected: dim,
            actual: query.len(),
        });
    }
    if matrix_len % dim != 0 {
        return Err(ScoreError::MatrixShape {
            len: matrix_len,
            dim,
        });
    }
    if out.len() != ids.len() {
        return Err(ScoreError::OutputLength {
            expected: ids.len(),
            actual: out.len(),
        });
    }

    let rows = matrix_len / dim;
    if let Some((position, &id)) = ids.iter().enumerate().find(|&(_, &id)| id as usize >= rows) {
        return Err(ScoreError::IndexOutOfRange { position, id, rows });
    }
    Ok(rows)
}

pub fn checked_dot_product(
    kernel: &dyn ScoreKernel,
    query: &[f32],
    candidate: &[f32],
) -> Result<f32, ScoreError> {
    if candidate.len() != query.len() {
        return Err(ScoreError::CandidateLength {
            expected: query.len(),
            actual: candidate.len(),
        });
    }
    Ok(kernel.dot(query, candidate))
}

pub fn checked_multi_dot_product(
    kernel: &dyn ScoreKernel,
    query: &[f32],
    matrix: &[f32],
    dim: usize,
    ids: &[u32],
    out: &mut [f32],
) -> Result<(), ScoreError> {
    validate_batch(query, matrix.len(), dim, ids, out)?;
    kernel.multi_dot(query, matrix, dim, ids, out);
    Ok(())
}

pub fn checked_packed_multi_dot_product(
    kernel: &dyn ScoreKernel,
    query: &[f32],
    packed: &[u8],
    dim: usize,
    ids: &[u32],
    params: QuantParams,
    out: &mut [f32],
) -> Result<(), ScoreError> {
    validate_batch(query, packed.len(), dim, ids, out)?;
    kernel.packed_multi_dot(query, packed, dim, ids, params, out);
    Ok(())
}
