//! Batched similarity scoring: one query against many index-selected matrix rows.
//!
//! This crate is the scoring primitive under nearest-neighbor style retrieval. Given
//! a query vector, a row-major matrix and a list of row ids, it writes one dot
//! product per id. The interesting part is doing that at scale: rows are gathered
//! by index, query loads are amortized across groups of candidates, accumulation
//! runs on wide vectors, and 8-bit quantized rows are scored without building a
//! decompressed copy.
//!
//! # Kernels
//!
//! - **Dot** ([`dot_naive`], [`dot_by4`], [`dot_lanes`], etc.): single-pair accumulation strategies
//! - **Multi-dot** ([`multi_dot_stepped`], [`multi_dot_lanes`], etc.): grouped batch scoring
//! - **Packed** ([`packed_multi_dot_factored`], [`packed_multi_dot_lanes`], etc.): u8 rows with
//!   `value = coeff * byte + bias` ([`QuantParams`])
//!
//! # Dispatch
//!
//! [`detect_capability_level`] classifies the CPU as baseline, AVX, AVX2 or
//! AVX-512. A [`Dispatcher`] maps that level to a [`Backend`] under one of four
//! [`Policy`] variants and resolves the matching kernels once. The process-wide
//! entry points [`dot_product`], [`multi_dot_product`] and
//! [`packed_multi_dot_product`] use a dispatcher built on first use. Setting
//! `MULTIDOT_MAX_LEVEL=avx2` (or `baseline`, `avx`) caps the detected level.
//!
//! Kernels do not validate their inputs; [`checked_multi_dot_product`] and the
//! other `checked_*` functions return a [`ScoreError`] instead of panicking.
//!
//! # References
//!
//! - [Algorithms for Modern Hardware](https://en.algorithmica.org/hpc/)

mod backend;
mod capability;
mod checked;
mod dispatch;
mod dot;
mod multidot;
mod packed;
mod quant;

pub use backend::*;
pub use capability::*;
pub use checked::*;
pub use dispatch::*;
pub use dot::*;
pub use multidot::*;
pub use packed::*;
pub use quant::*;
