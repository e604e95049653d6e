//! Single-pair dot products, `Σ a[i]·b[i]`.
//!
//! Every batched kernel in this crate bottoms out in one of these, either for the
//! remainder of a group or as the building block of a naive batch.
//!
//! # Strategies
//!
//! | Function | Strategy | Best For |
//! |----------|----------|----------|
//! | [`dot_naive`] | One sequential accumulator | Reference, tiny vectors |
//! | [`dot_by4`] | Four interleaved partial sums, `s0+s1+s2+s3` | Breaking the add dependency chain |
//! | [`dot_by4_paired`] | Four partial sums, `(s0+s2)+(s1+s3)` | Same, with a tree-shaped combine |
//! | [`dot_fixed`] | Dimension fixed at compile time | Known embedding sizes (fully unrolled) |
//! | [`dot_pair`] | One query against two rows per pass | Halving query loads |
//! | [`dot_lanes`] | `L`-lane accumulator, one horizontal reduction | Portable wide-vector form |
//!
//! On x86_64 the AVX (mul + add), AVX2 (FMA) and AVX-512 (FMA) kernels are listed
//! by [`dot_variants`] when the host supports them.
//!
//! # Floating point
//!
//! Each strategy sums in a different order, so results agree only up to rounding.
//! For `dim <= 1024` with inputs of magnitude around one, the relative gap to the
//! sequential sum stays below `1e-4`.
//!
//! # References
//!
//! - [SIMD reductions](https://en.algorithmica.org/hpc/simd/reduction/)
//! - [Instruction-level parallelism](https://en.algorithmica.org/hpc/pipelining/throughput/)

use crate::backend::{Backend, DotFn};

#[inline]
fn check_dims(a: &[f32], b: &[f32]) {
    debug_assert_eq!(a.len(), b.len());
}

/// Sequential dot product.
pub fn dot_naive(a: &[f32], b: &[f32]) -> f32 {
    check_dims(a, b);
    let mut sum = 0.0f32;
    for (&x, &y) in a.iter().zip(b) {
        sum += x * y;
    }
    sum
}

/// Dot product with four independent partial sums.
///
/// A single accumulator makes every add wait for the previous one. Four sums let
/// the adds of consecutive elements overlap in the pipeline.
pub fn dot_by4(a: &[f32], b: &[f32]) -> f32 {
    check_dims(a, b);
    let (s0, s1, s2, s3, tail) = partial_sums4(a, b);
    s0 + s1 + s2 + s3 + tail
}

/// Like [`dot_by4`] but combines the partial sums pairwise.
pub fn dot_by4_paired(a: &[f32], b: &[f32]) -> f32 {
    check_dims(a, b);
    let (s0, s1, s2, s3, tail) = partial_sums4(a, b);
    ((s0 + s2) + (s1 + s3)) + tail
}

#[inline(always)]
fn partial_sums4(a: &[f32], b: &[f32]) -> (f32, f32, f32, f32, f32) {
    let (mut s0, mut s1, mut s2, mut s3) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
    let a_chunks = a.chunks_exact(4);
    let b_chunks = b.chunks_exact(4);
    let (a_tail, b_tail) = (a_chunks.remainder(), b_chunks.remainder());
    for (x, y) in a_chunks.zip(b_chunks) {
        s0 += x[0] * y[0];
        s1 += x[1] * y[1];
        s2 += x[2] * y[2];
        s3 += x[3] * y[3];
    }
    let tail = a_tail.iter().zip(b_tail).map(|(&x, &y)| x * y).sum();
    (s0, s1, s2, s3, tail)
}

/// Dot product over exactly `DIM` elements.
///
/// Panics if either slice is shorter than `DIM`; extra elements are ignored.
pub fn dot_fixed<const DIM: usize>(a: &[f32], b: &[f32]) -> f32 {
    let (a, b) = (&a[..DIM], &b[..DIM]);
    let mut sum = 0.0f32;
    for i in 0..DIM {
        sum += a[i] * b[i];
    }
    sum
}

/// Scores one query against two rows in a single pass.
///
/// Each query element is loaded once and used twice.
pub fn dot_pair(query: &[f32], row0: &[f32], row1: &[f32]) -> (f32, f32) {
    check_dims(query, row0);
    check_dims(query, row1);
    let (mut s0, mut s1) = (0.0f32, 0.0f32);
    for ((&q, &x), &y) in query.iter().zip(row0).zip(row1) {
        s0 += q * x;
        s1 += q * y;
    }
    (s0, s1)
}

/// Portable `L`-lane dot product.
///
/// Keeps `L` running sums, one per lane, and reduces them once at the end. This
/// is the shape of every SIMD kernel here, written so the compiler can map the
/// lane loop onto whatever vector registers the target has.
pub fn dot_lanes<const L: usize>(a: &[f32], b: &[f32]) -> f32 {
    const { assert!(L > 0, "lane count must be non-zero") };
    check_dims(a, b);
    let mut acc = [0.0f32; L];
    let a_chunks = a.chunks_exact(L);
    let b_chunks = b.chunks_exact(L);
    let (a_tail, b_tail) = (a_chunks.remainder(), b_chunks.remainder());
    for (x, y) in a_chunks.zip(b_chunks) {
        for lane in 0..L {
            acc[lane] += x[lane] * y[lane];
        }
    }
    let mut sum = reduce_lanes(&acc);
    for (&x, &y) in a_tail.iter().zip(b_tail) {
        sum += x * y;
    }
    sum
}

/// Horizontal reduction of a lane accumulator.
#[inline(always)]
pub(crate) fn reduce_lanes<const L: usize>(acc: &[f32; L]) -> f32 {
    acc.iter().sum()
}

/// Named single-pair kernels available on this host, portable ones first.
pub fn dot_variants() -> Vec<(&'static str, DotFn)> {
    let mut variants: Vec<(&'static str, DotFn)> = vec![
        ("dot_naive", dot_naive as DotFn),
        ("dot_by4", dot_by4 as DotFn),
        ("dot_by4_paired", dot_by4_paired as DotFn),
        ("dot_lanes4", dot_lanes::<4> as DotFn),
        ("dot_lanes8", dot_lanes::<8> as DotFn),
        ("dot_lanes16", dot_lanes::<16> as DotFn),
    ];
    for (name, backend) in [
        ("dot_avx", Backend::Avx),
        ("dot_avx2", Backend::Avx2),
        ("dot_avx512", Backend::Avx512),
        ("dot_neon", Backend::Sse),
    ] {
        if let Some(kernel) = native_dot(backend) {
            variants.push((name, kernel));
        }
    }
    variants
}

/// Intrinsic kernel for `backend`, if it has one and the host can run it.
pub(crate) fn native_dot(backend: Backend) -> Option<DotFn> {
    if !backend.is_native() {
        return None;
    }

    #[cfg(target_arch = "x86_64")]
    {
        match backend {
            Backend::Avx => Some(dot_avx_entry as DotFn),
            Backend::Avx2 => Some(dot_avx2_entry as DotFn),
            Backend::Avx512 => Some(dot_avx512_entry as DotFn),
            Backend::Scalar | Backend::Sse => None,
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        match backend {
            Backend::Sse => Some(dot_neon_entry as DotFn),
            _ => None,
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        None
    }
}

// Entry points below are only reachable through `native_dot`, after detection.

#[cfg(target_arch = "aarch64")]
fn dot_neon_entry(a: &[f32], b: &[f32]) -> f32 {
    check_dims(a, b);
    // SAFETY: aarch64 guarantees NEON availability.
    unsafe { aarch64_neon::dot_neon(a, b) }
}

#[cfg(target_arch = "x86_64")]
fn dot_avx_entry(a: &[f32], b: &[f32]) -> f32 {
    check_dims(a, b);
    // SAFETY: guarded by AVX runtime detection in `native_dot`.
    unsafe { x86_avx::dot_avx(a, b) }
}

#[cfg(target_arch = "x86_64")]
fn dot_avx2_entry(a: &[f32], b: &[f32]) -> f32 {
    check_dims(a, b);
    // SAFETY: guarded by AVX2 + FMA runtime detection in `native_dot`.
    unsafe { x86_avx2::dot_avx2(a, b) }
}

#[cfg(target_arch = "x86_64")]
fn dot_avx512_entry(a: &[f32], b: &[f32]) -> f32 {
    check_dims(a, b);
    // SAFETY: guarded by AVX-512 runtime detection in `native_dot`.
    unsafe { x86_avx512::dot_avx512(a, b) }
}

/// AVX implementations (no FMA).
#[cfg(target_arch = "x86_64")]
#[allow(unsafe_op_in_unsafe_fn)]
pub(crate) mod x86_avx {
    use std::arch::x86_64 as arch;

    use arch::{
        __m256, _mm256_add_ps, _mm256_loadu_ps, _mm256_mul_ps, _mm256_setzero_ps, _mm256_storeu_ps,
    };

    /// Sums the eight lanes of `v`.
    #[target_feature(enable = "avx")]
    pub unsafe fn hsum256(v: __m256) -> f32 {
        let mut tmp = [0.0f32; 8];
        _mm256_storeu_ps(tmp.as_mut_ptr(), v);
        tmp.iter().sum()
    }

    /// Two 8-lane accumulators, 16 elements per iteration.
    #[target_feature(enable = "avx")]
    pub unsafe fn dot_avx(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len().min(b.len());
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut acc0 = _mm256_setzero_ps();
        let mut acc1 = _mm256_setzero_ps();
        let mut i = 0usize;

        while i + 16 <= len {
            let x0 = _mm256_loadu_ps(pa.add(i));
            let y0 = _mm256_loadu_ps(pb.add(i));
            let x1 = _mm256_loadu_ps(pa.add(i + 8));
            let y1 = _mm256_loadu_ps(pb.add(i + 8));
            acc0 = _mm256_add_ps(acc0, _mm256_mul_ps(x0, y0));
            acc1 = _mm256_add_ps(acc1, _mm256_mul_ps(x1, y1));
            i += 16;
        }

        while i + 8 <= len {
            let x = _mm256_loadu_ps(pa.add(i));
            let y = _mm256_loadu_ps(pb.add(i));
            acc0 = _mm256_add_ps(acc0, _mm256_mul_ps(x, y));
            i += 8;
        }

        let mut sum = hsum256(_mm256_add_ps(acc0, acc1));
        while i < len {
            sum += *pa.add(i) * *pb.add(i);
            i += 1;
        }
        sum
    }
}

/// AVX2 + FMA implementations.
#[cfg(target_arch = "x86_64")]
#[allow(unsafe_op_in_unsafe_fn)]
pub(crate) mod x86_avx2 {
    use std::arch::x86_64 as arch;

    use arch::{_mm256_add_ps, _mm256_fmadd_ps, _mm256_loadu_ps, _mm256_setzero_ps};

    use super::x86_avx::hsum256;

    /// Fused multiply-add halves the instruction count of the AVX kernel.
    #[target_feature(enable = "avx2,fma")]
    pub unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len().min(b.len());
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut acc0 = _mm256_setzero_ps();
        let mut acc1 = _mm256_setzero_ps();
        let mut i = 0usize;

        while i + 16 <= len {
            acc0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)), acc0);
            acc1 = _mm256_fmadd_ps(
                _mm256_loadu_ps(pa.add(i + 8)),
                _mm256_loadu_ps(pb.add(i + 8)),
                acc1,
            );
            i += 16;
        }

        while i + 8 <= len {
            acc0 = _mm256_fmadd_ps(_mm256_loadu_ps(pa.add(i)), _mm256_loadu_ps(pb.add(i)), acc0);
            i += 8;
        }

        let mut sum = hsum256(_mm256_add_ps(acc0, acc1));
        while i < len {
            sum += *pa.add(i) * *pb.add(i);
            i += 1;
        }
        sum
    }
}

/// AVX-512 implementations.
#[cfg(target_arch = "x86_64")]
#[allow(unsafe_op_in_unsafe_fn)]
pub(crate) mod x86_avx512 {
    use std::arch::x86_64 as arch;

    use arch::{
        _mm512_add_ps, _mm512_fmadd_ps, _mm512_loadu_ps, _mm512_reduce_add_ps, _mm512_setzero_ps,
    };

    #[target_feature(enable = "avx512f")]
    pub unsafe fn dot_avx512(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len().min(b.len());
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut acc0 = _mm512_setzero_ps();
        let mut acc1 = _mm512_setzero_ps();
        let mut i = 0usize;

        while i + 32 <= len {
            acc0 = _mm512_fmadd_ps(_mm512_loadu_ps(pa.add(i)), _mm512_loadu_ps(pb.add(i)), acc0);
            acc1 = _mm512_fmadd_ps(
                _mm512_loadu_ps(pa.add(i + 16)),
                _mm512_loadu_ps(pb.add(i + 16)),
                acc1,
            );
            i += 32;
        }

        while i + 16 <= len {
            acc0 = _mm512_fmadd_ps(_mm512_loadu_ps(pa.add(i)), _mm512_loadu_ps(pb.add(i)), acc0);
            i += 16;
        }

        let mut sum = _mm512_reduce_add_ps(_mm512_add_ps(acc0, acc1));
        while i < len {
            sum += *pa.add(i) * *pb.add(i);
            i += 1;
        }
        sum
    }
}

/// NEON kernels for aarch64, four lanes per register.
#[cfg(target_arch = "aarch64")]
#[allow(unsafe_op_in_unsafe_fn)]
pub(crate) mod aarch64_neon {
    use std::arch::aarch64::{float32x4_t, vaddq_f32, vdupq_n_f32, vfmaq_f32, vld1q_f32, vst1q_f32};

    /// Sums the four lanes of `v`.
    #[target_feature(enable = "neon")]
    pub unsafe fn hsum128(v: float32x4_t) -> f32 {
        let mut tmp = [0.0f32; 4];
        vst1q_f32(tmp.as_mut_ptr(), v);
        tmp.iter().sum()
    }

    /// Two 4-lane FMA accumulators, 8 elements per iteration.
    #[target_feature(enable = "neon")]
    pub unsafe fn dot_neon(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len().min(b.len());
        let (pa, pb) = (a.as_ptr(), b.as_ptr());
        let mut acc0 = vdupq_n_f32(0.0);
        let mut acc1 = vdupq_n_f32(0.0);
        let mut i = 0usize;

        while i + 8 <= len {
            acc0 = vfmaq_f32(acc0, vld1q_f32(pa.add(i)), vld1q_f32(pb.add(i)));
            acc1 = vfmaq_f32(acc1, vld1q_f32(pa.add(i + 4)), vld1q_f32(pb.add(i + 4)));
            i += 8;
        }
        if i + 4 <= len {
            acc0 = vfmaq_f32(acc0, vld1q_f32(pa.add(i)), vld1q_f32(pb.add(i)));
            i += 4;
        }

        let mut sum = hsum128(vaddq_f32(acc0, acc1));
        while i < len {
            sum += *pa.add(i) * *pb.add(i);
            i += 1;
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reference_dot(a: &[f32], b: &[f32]) -> (f64, f64) {
        let sum = a.iter().zip(b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum();
        let magnitude = a.iter().zip(b).map(|(&x, &y)| (f64::from(x) * f64::from(y)).abs()).sum();
        (sum, magnitude)
    }

    fn vector_pair() -> impl Strategy<Value = (Vec<f32>, Vec<f32>)> {
        (0usize..=1024).prop_flat_map(|len| {
            (
                proptest::collection::vec(-1.0f32..1.0, len),
                proptest::collection::vec(-1.0f32..1.0, len),
            )
        })
    }

    proptest! {
        #[test]
        fn dot_variants_match_reference((a, b) in vector_pair()) {
            let (expected, magnitude) = reference_dot(&a, &b);
            let tolerance = 1e-4 * magnitude + 1e-6;
            for (name, kernel) in dot_variants() {
                let got = f64::from(kernel(&a, &b));
                prop_assert!((got - expected).abs() <= tolerance, "{name}: {got} vs {expected}");
            }
        }

        #[test]
        fn dot_pair_matches_two_single_dots(
            (query, row0) in vector_pair(),
            seed in any::<u32>(),
        ) {
            let row1: Vec<f32> = row0.iter().enumerate().map(|(i, &x)| x * ((seed as usize + i) % 7) as f32).collect();
            let (s0, s1) = dot_pair(&query, &row0, &row1);
            prop_assert_eq!(s0, dot_naive(&query, &row0));
            prop_assert_eq!(s1, dot_naive(&query, &row1));
        }
    }

    #[test]
    fn dot_basic_cases() {
        let query = [0.5f32; 64];
        let row = [1.0f32; 64];
        for (name, kernel) in dot_variants() {
            assert_eq!(kernel(&query, &row), 32.0, "{name}");
        }
        assert_eq!(dot_fixed::<64>(&query, &row), 32.0);

        let empty: [f32; 0] = [];
        assert_eq!(dot_naive(&empty, &empty), 0.0);
        assert_eq!(dot_lanes::<16>(&empty, &empty), 0.0);
    }

    #[test]
    fn odd_lengths_use_scalar_tail() {
        let a: Vec<f32> = (1..=19).map(|i| i as f32).collect();
        let b = vec![1.0f32; 19];
        for (name, kernel) in dot_variants() {
            assert_eq!(kernel(&a, &b), 190.0, "{name}");
        }
        assert_eq!(dot_fixed::<3>(&a, &b), 6.0);
    }
}
