//! Backend tags and the resolved kernel table for each of them.
//!
//! A [`Backend`] fixes the vector width a kernel family works with. The five tags
//! share one parametrized portable algorithm ([`dot_lanes`](crate::dot_lanes),
//! [`multi_dot_lanes`](crate::multi_dot_lanes),
//! [`packed_multi_dot_lanes`](crate::packed_multi_dot_lanes)) and an intrinsic
//! kernel set: x86_64 kernels are only handed out after runtime detection, and
//! the 4-lane tag runs NEON on aarch64.
//!
//! | Backend | Lanes | Native kernels |
//! |---------|-------|----------------|
//! | [`Backend::Scalar`] | 1 | none, sequential reference |
//! | [`Backend::Sse`] | 4 | NEON FMA and u8 widening on aarch64, portable elsewhere |
//! | [`Backend::Avx`] | 8 | mul + add, float only |
//! | [`Backend::Avx2`] | 8 | FMA, u8 widening |
//! | [`Backend::Avx512`] | 16 | FMA, u8 widening |

use std::fmt;

use crate::dot::{dot_lanes, dot_naive, native_dot};
use crate::multidot::{DEFAULT_GROUP, multi_dot_lanes, multi_dot_stepped, native_multi_dot};
use crate::packed::{native_packed, packed_multi_dot_factored, packed_multi_dot_lanes};
use crate::quant::QuantParams;

/// Single-pair kernel: `Σ a[i]·b[i]`.
pub type DotFn = fn(&[f32], &[f32]) -> f32;

/// Batched kernel: `(query, matrix, dim, ids, out)`.
pub type MultiDotFn = fn(&[f32], &[f32], usize, &[u32], &mut [f32]);

/// Batched kernel over u8 rows: `(query, packed, dim, ids, params, out)`.
pub type PackedMultiDotFn = fn(&[f32], &[u8], usize, &[u32], QuantParams, &mut [f32]);

/// Vector width family of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Backend {
    Scalar,
    Sse,
    Avx,
    Avx2,
    Avx512,
}

impl Backend {
    pub const ALL: [Backend; 5] = [
        Backend::Scalar,
        Backend::Sse,
        Backend::Avx,
        Backend::Avx2,
        Backend::Avx512,
    ];

    /// Position in [`Backend::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Number of f32 lanes per vector step.
    pub const fn lanes(self) -> usize {
        match self {
            Backend::Scalar => 1,
            Backend::Sse => 4,
            Backend::Avx | Backend::Avx2 => 8,
            Backend::Avx512 => 16,
        }
    }

    /// Whether the accumulator needs a horizontal reduction at the end.
    pub const fn needs_reduction(self) -> bool {
        self.lanes() > 1
    }

    /// Candidates scored together by the batched kernels.
    pub const fn group_size(self) -> usize {
        DEFAULT_GROUP
    }

    /// Whether the host can run this backend's intrinsic kernels.
    ///
    /// Scalar never does. Sse is native on aarch64, where NEON is always present.
    pub fn is_native(self) -> bool {
        #[cfg(target_arch = "x86_64")]
        {
            match self {
                Backend::Scalar | Backend::Sse => false,
                Backend::Avx => std::arch::is_x86_feature_detected!("avx"),
                Backend::Avx2 => {
                    std::arch::is_x86_feature_detected!("avx2")
                        && std::arch::is_x86_feature_detected!("fma")
                }
                Backend::Avx512 => std::arch::is_x86_feature_detected!("avx512f"),
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            matches!(self, Backend::Sse)
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            false
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Backend::Scalar => "scalar",
            Backend::Sse => "sse",
            Backend::Avx => "avx",
            Backend::Avx2 => "avx2",
            Backend::Avx512 => "avx512",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Uniform interface over a backend's kernels.
///
/// Implementations skip validation: `query.len() == dim`, every id addresses a
/// row inside the matrix and `out.len() == ids.len()` are the caller's job (see
/// [`checked`](crate::checked_multi_dot_product) for the validating layer).
pub trait ScoreKernel: Send + Sync + fmt::Debug {
    fn backend(&self) -> Backend;

    fn dot(&self, a: &[f32], b: &[f32]) -> f32;

    fn multi_dot(&self, query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]);

    fn packed_multi_dot(
        &self,
        query: &[f32],
        packed: &[u8],
        dim: usize,
        ids: &[u32],
        params: QuantParams,
        out: &mut [f32],
    );
}

/// Function pointers for one backend, resolved once.
#[derive(Clone, Copy)]
pub struct KernelSet {
    backend: Backend,
    native: bool,
    dot: DotFn,
    multi_dot: MultiDotFn,
    packed: PackedMultiDotFn,
}

impl KernelSet {
    /// Resolves the kernels for `backend`.
    ///
    /// Intrinsic kernels are used when the host supports them; otherwise the
    /// portable kernel of the same lane width stands in, so any backend can be
    /// resolved on any host.
    pub fn resolve(backend: Backend) -> Self {
        let (dot, multi_dot, packed): (DotFn, MultiDotFn, PackedMultiDotFn) = match backend {
            Backend::Scalar => (
                dot_naive as DotFn,
                multi_dot_stepped::<DEFAULT_GROUP> as MultiDotFn,
                packed_multi_dot_factored as PackedMultiDotFn,
            ),
            Backend::Sse => (
                dot_lanes::<4> as DotFn,
                multi_dot_lanes::<4, DEFAULT_GROUP> as MultiDotFn,
                packed_multi_dot_lanes::<4, DEFAULT_GROUP> as PackedMultiDotFn,
            ),
            Backend::Avx | Backend::Avx2 => (
                dot_lanes::<8> as DotFn,
                multi_dot_lanes::<8, DEFAULT_GROUP> as MultiDotFn,
                packed_multi_dot_lanes::<8, DEFAULT_GROUP> as PackedMultiDotFn,
            ),
            Backend::Avx512 => (
                dot_lanes::<16> as DotFn,
                multi_dot_lanes::<16, DEFAULT_GROUP> as MultiDotFn,
                packed_multi_dot_lanes::<16, DEFAULT_GROUP> as PackedMultiDotFn,
            ),
        };

        Self {
            backend,
            native: backend.is_native(),
            dot: native_dot(backend).unwrap_or(dot),
            multi_dot: native_multi_dot(backend).unwrap_or(multi_dot),
            packed: native_packed(backend).unwrap_or(packed),
        }
    }

    /// Whether intrinsic kernels back this set.
    pub fn is_native(&self) -> bool {
        self.native
    }

    pub fn dot_fn(&self) -> DotFn {
        self.dot
    }

    pub fn multi_dot_fn(&self) -> MultiDotFn {
        self.multi_dot
    }

    pub fn packed_multi_dot_fn(&self) -> PackedMultiDotFn {
        self.packed
    }
}

impl fmt::Debug for KernelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelSet")
            .field("backend", &self.backend)
            .field("native", &self.native)
            .finish()
    }
}

impl ScoreKernel for KernelSet {
    fn backend(&self) -> Backend {
        self.backend
    }

    #[inline]
    fn dot(&self, a: &[f32], b: &[f32]) -> f32 {
        (self.dot)(a, b)
    }

    #[inline]
    fn multi_dot(&self, query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
        (self.multi_dot)(query, matrix, dim, ids, out)
    }

    #[inline]
    fn packed_multi_dot(
        &self,
        query: &[f32],
        packed: &[u8],
        dim: usize,
        ids: &[u32],
        params: QuantParams,
        out: &mut [f32],
    ) {
        (self.packed)(query, packed, dim, ids, params, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_widths_match_tags() {
        let lanes: Vec<usize> = Backend::ALL.iter().map(|b| b.lanes()).collect();
        assert_eq!(lanes, [1, 4, 8, 8, 16]);
        assert!(!Backend::Scalar.needs_reduction());
        assert!(Backend::Avx512.needs_reduction());
        for (idx, backend) in Backend::ALL.iter().enumerate() {
            assert_eq!(backend.index(), idx);
        }
    }

    #[test]
    fn native_backends_follow_the_architecture() {
        assert!(!Backend::Scalar.is_native());
        assert_eq!(Backend::Sse.is_native(), cfg!(target_arch = "aarch64"));
        if !cfg!(target_arch = "x86_64") {
            assert!(!Backend::Avx.is_native());
            assert!(!Backend::Avx512.is_native());
        }
        let sse = KernelSet::resolve(Backend::Sse);
        assert_eq!(sse.is_native(), cfg!(target_arch = "aarch64"));
    }

    #[test]
    fn every_backend_resolves_and_agrees() {
        let dim = 19;
        let query: Vec<f32> = (0..dim).map(|i| (i as f32 * 0.37).sin()).collect();
        let matrix: Vec<f32> = (0..dim * 6).map(|i| (i as f32 * 0.11).cos()).collect();
        let packed: Vec<u8> = (0..dim * 6).map(|i| (i * 37 % 256) as u8).collect();
        let ids = [5u32, 0, 3, 3, 1];
        let params = QuantParams::new(-0.5, 1.0 / 128.0);

        let reference = KernelSet::resolve(Backend::Scalar);
        let mut expected = [0.0f32; 5];
        let mut expected_packed = [0.0f32; 5];
        reference.multi_dot(&query, &matrix, dim, &ids, &mut expected);
        reference.packed_multi_dot(&query, &packed, dim, &ids, params, &mut expected_packed);

        for backend in Backend::ALL {
            let set = KernelSet::resolve(backend);
            assert_eq!(set.backend(), backend);
            assert_eq!(set.is_native(), backend.is_native());

            let mut out = [0.0f32; 5];
            set.multi_dot(&query, &matrix, dim, &ids, &mut out);
            for (got, want) in out.iter().zip(&expected) {
                assert!((got - want).abs() < 1e-4, "{backend}: {got} vs {want}");
            }

            set.packed_multi_dot(&query, &packed, dim, &ids, params, &mut out);
            for (got, want) in out.iter().zip(&expected_packed) {
                assert!((got - want).abs() < 1e-3, "{backend}: {got} vs {want}");
            }

            let single = set.dot(&query, &matrix[..dim]);
            assert!((single - reference.dot(&query, &matrix[..dim])).abs() < 1e-4);
        }
    }
}
