//! Batched scoring against 8-bit quantized rows.
//!
//! A packed matrix stores one `u8` per element, decoded with a single
//! [`QuantParams`] as `coeff * byte + bias`. Scores are computed without building
//! a decompressed copy of the matrix:
//!
//! ```text
//! Σ q[i] * (coeff * b[i] + bias) = coeff * Σ q[i] * b[i] + bias * Σ q[i]
//! ```
//!
//! `Σ q[i]` is computed once per call, so each row costs one widening
//! multiply-accumulate per byte and a single affine fix-up at the end.
//!
//! # Strategies
//!
//! | Function | Strategy | Best For |
//! |----------|----------|----------|
//! | [`packed_multi_dot_unpack`] | Dequantize each row into a buffer, then dot | Reusing a float kernel |
//! | [`packed_multi_dot_inlined`] | Dequantize every element inside the loop | Reference |
//! | [`packed_multi_dot_factored`] | Raw byte dot, affine fix-up per row | Scalar targets |
//! | [`packed_multi_dot_lanes`] | Factored, `L` lanes, `G` rows per group | Portable wide-vector form |
//!
//! On x86_64, [`packed_multi_dot_variants`] also lists the AVX2 and AVX-512
//! group-of-four kernels and an AVX-512 single-row kernel that consumes 64 bytes
//! per step. Bytes are widened to `i32` and converted to `f32` before the
//! multiply, so no integer arithmetic can overflow.

use crate::backend::{Backend, DotFn, PackedMultiDotFn};
use crate::dot::{dot_naive, reduce_lanes};
use crate::multidot::{MAX_GROUP, row};
use crate::quant::QuantParams;

#[inline]
fn check_batch(query: &[f32], dim: usize, ids: &[u32], out: &[f32]) {
    debug_assert_eq!(query.len(), dim);
    debug_assert_eq!(ids.len(), out.len());
}

/// `Σ q[i]`, the bias term shared by every row of a call.
#[inline]
pub fn query_sum(query: &[f32]) -> f32 {
    query.iter().sum()
}

/// `Σ q[i] * b[i]` with bytes promoted to `f32`.
#[inline]
fn raw_dot(query: &[f32], bytes: &[u8]) -> f32 {
    let mut sum = 0.0f32;
    for (&q, &b) in query.iter().zip(bytes) {
        sum += q * f32::from(b);
    }
    sum
}

/// Dequantizes each row into a reusable buffer, then scores it with `kernel`.
///
/// The buffer is allocated once per call.
pub fn packed_multi_dot_unpack(
    kernel: DotFn,
    query: &[f32],
    packed: &[u8],
    dim: usize,
    ids: &[u32],
    params: QuantParams,
    out: &mut [f32],
) {
    check_batch(query, dim, ids, out);
    let mut buffer = vec![0.0f32; dim];
    for (slot, &id) in out.iter_mut().zip(ids) {
        params.dequantize_into(row(packed, dim, id), &mut buffer);
        *slot = kernel(query, &buffer);
    }
}

/// Dequantizes element by element inside the accumulation loop.
pub fn packed_multi_dot_inlined(
    query: &[f32],
    packed: &[u8],
    dim: usize,
    ids: &[u32],
    params: QuantParams,
    out: &mut [f32],
) {
    check_batch(query, dim, ids, out);
    for (slot, &id) in out.iter_mut().zip(ids) {
        let mut sum = 0.0f32;
        for (&q, &b) in query.iter().zip(row(packed, dim, id)) {
            sum += q * params.dequantize(b);
        }
        *slot = sum;
    }
}

/// Raw byte dot per row, finished with `coeff * raw + bias * Σq`.
pub fn packed_multi_dot_factored(
    query: &[f32],
    packed: &[u8],
    dim: usize,
    ids: &[u32],
    params: QuantParams,
    out: &mut [f32],
) {
    check_batch(query, dim, ids, out);
    let qsum = query_sum(query);
    for (slot, &id) in out.iter_mut().zip(ids) {
        *slot = params.combine(raw_dot(query, row(packed, dim, id)), qsum);
    }
}

/// Factored form with an `L`-lane accumulator per row and `G` rows per group.
pub fn packed_multi_dot_lanes<const L: usize, const G: usize>(
    query: &[f32],
    packed: &[u8],
    dim: usize,
    ids: &[u32],
    params: QuantParams,
    out: &mut [f32],
) {
    const { assert!(L > 0 && G > 0 && G <= MAX_GROUP, "invalid lane or group count") };
    check_batch(query, dim, ids, out);
    let query = &query[..dim];
    let qsum = query_sum(query);
    let blocks = dim / L * L;

    let mut id_chunks = ids.chunks_exact(G);
    let mut out_chunks = out.chunks_exact_mut(G);
    for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
        let rows: [&[u8]; G] = std::array::from_fn(|k| row(packed, dim, chunk[k]));
        let mut acc = [[0.0f32; L]; G];
        for base in (0..blocks).step_by(L) {
            let q = &query[base..base + L];
            for (lanes, r) in acc.iter_mut().zip(&rows) {
                let r = &r[base..base + L];
                for lane in 0..L {
                    lanes[lane] += q[lane] * f32::from(r[lane]);
                }
            }
        }
        for ((slot, lanes), r) in slots.iter_mut().zip(&acc).zip(&rows) {
            let raw = reduce_lanes(lanes) + raw_dot(&query[blocks..], &r[blocks..]);
            *slot = params.combine(raw, qsum);
        }
    }

    for (slot, &id) in out_chunks.into_remainder().iter_mut().zip(id_chunks.remainder()) {
        *slot = params.combine(raw_dot(query, row(packed, dim, id)), qsum);
    }
}

/// Named packed kernels available on this host.
pub fn packed_multi_dot_variants() -> Vec<(&'static str, PackedMultiDotFn)> {
    let mut variants: Vec<(&'static str, PackedMultiDotFn)> = vec![
        ("packed_unpack", packed_unpack_naive as PackedMultiDotFn),
        ("packed_inlined", packed_multi_dot_inlined as PackedMultiDotFn),
        ("packed_factored", packed_multi_dot_factored as PackedMultiDotFn),
        ("packed_lanes4", packed_multi_dot_lanes::<4, 4> as PackedMultiDotFn),
        ("packed_lanes8", packed_multi_dot_lanes::<8, 4> as PackedMultiDotFn),
        ("packed_lanes16", packed_multi_dot_lanes::<16, 4> as PackedMultiDotFn),
    ];
    for (name, backend) in [
        ("packed_avx2", Backend::Avx2),
        ("packed_avx512", Backend::Avx512),
        ("packed_neon", Backend::Sse),
    ] {
        if let Some(kernel) = native_packed(backend) {
            variants.push((name, kernel));
        }
    }
    #[cfg(target_arch = "x86_64")]
    if Backend::Avx512.is_native() {
        variants.push(("packed_avx512_wide", packed_avx512_wide_entry as PackedMultiDotFn));
    }
    variants
}

fn packed_unpack_naive(
    query: &[f32],
    packed: &[u8],
    dim: usize,
    ids: &[u32],
    params: QuantParams,
    out: &mut [f32],
) {
    packed_multi_dot_unpack(dot_naive, query, packed, dim, ids, params, out);
}

/// Intrinsic packed kernel for `backend`, if it has one and the host can run it.
///
/// AVX has no 256-bit integer widening, so it keeps the portable kernel. On
/// aarch64 the 4-lane tag widens with NEON.
pub(crate) fn native_packed(backend: Backend) -> Option<PackedMultiDotFn> {
    if !backend.is_native() {
        return None;
    }

    #[cfg(target_arch = "x86_64")]
    {
        match backend {
            Backend::Avx2 => Some(packed_avx2_entry as PackedMultiDotFn),
            Backend::Avx512 => Some(packed_avx512_entry as PackedMultiDotFn),
            Backend::Scalar | Backend::Sse | Backend::Avx => None,
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        match backend {
            Backend::Sse => Some(packed_neon_entry as PackedMultiDotFn),
            _ => None,
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        None
    }
}

#[cfg(target_arch = "aarch64")]
fn packed_neon_entry(
    query: &[f32],
    packed: &[u8],
    dim: usize,
    ids: &[u32],
    params: QuantParams,
    out: &mut [f32],
) {
    check_batch(query, dim, ids, out);
    // SAFETY: aarch64 guarantees NEON availability.
    unsafe { aarch64_neon::packed4_neon(query, packed, dim, ids, params, out) }
}

#[cfg(target_arch = "x86_64")]
fn packed_avx2_entry(
    query: &[f32],
    packed: &[u8],
    dim: usize,
    ids: &[u32],
    params: QuantParams,
    out: &mut [f32],
) {
    check_batch(query, dim, ids, out);
    // SAFETY: guarded by AVX2 + FMA runtime detection in `native_packed`.
    unsafe { x86::packed4_avx2(query, packed, dim, ids, params, out) }
}

#[cfg(target_arch = "x86_64")]
fn packed_avx512_entry(
    query: &[f32],
    packed: &[u8],
    dim: usize,
    ids: &[u32],
    params: QuantParams,
    out: &mut [f32],
) {
    check_batch(query, dim, ids, out);
    // SAFETY: guarded by AVX-512 runtime detection in `native_packed`.
    unsafe { x86::packed4_avx512(query, packed, dim, ids, params, out) }
}

#[cfg(target_arch = "x86_64")]
fn packed_avx512_wide_entry(
    query: &[f32],
    packed: &[u8],
    dim: usize,
    ids: &[u32],
    params: QuantParams,
    out: &mut [f32],
) {
    check_batch(query, dim, ids, out);
    // SAFETY: only listed by `packed_multi_dot_variants` after AVX-512 runtime detection.
    unsafe { x86::packed_wide_avx512(query, packed, dim, ids, params, out) }
}

/// Widening kernels for x86_64: 8 or 16 bytes are zero-extended to `i32` lanes,
/// converted to `f32` and fed to an FMA against the matching query lanes.
#[cfg(target_arch = "x86_64")]
#[allow(unsafe_op_in_unsafe_fn)]
mod x86 {
    use std::arch::x86_64 as arch;

    use arch::{
        __m128i, __m256, __m512, __m512i, _mm_loadl_epi64, _mm_loadu_si128, _mm256_cvtepi32_ps,
        _mm256_cvtepu8_epi32, _mm256_fmadd_ps, _mm256_loadu_ps, _mm256_setzero_ps,
        _mm512_add_ps, _mm512_cvtepi32_ps, _mm512_cvtepu8_epi32, _mm512_extracti32x4_epi32,
        _mm512_fmadd_ps, _mm512_loadu_ps, _mm512_loadu_si512, _mm512_reduce_add_ps,
        _mm512_setzero_ps,
    };

    use super::{query_sum, raw_dot};
    use crate::dot::x86_avx::hsum256;
    use crate::multidot::row;
    use crate::quant::QuantParams;

    #[inline(always)]
    fn group_rows(packed: &[u8], dim: usize, chunk: &[u32]) -> [*const u8; 4] {
        [
            row(packed, dim, chunk[0]).as_ptr(),
            row(packed, dim, chunk[1]).as_ptr(),
            row(packed, dim, chunk[2]).as_ptr(),
            row(packed, dim, chunk[3]).as_ptr(),
        ]
    }

    #[inline(always)]
    unsafe fn raw_tail(qp: *const f32, rp: *const u8, from: usize, len: usize) -> f32 {
        let mut sum = 0.0f32;
        for j in from..len {
            sum += *qp.add(j) * f32::from(*rp.add(j));
        }
        sum
    }

    /// Eight bytes per row per step.
    #[target_feature(enable = "avx2,fma")]
    pub unsafe fn packed4_avx2(
        query: &[f32],
        packed: &[u8],
        dim: usize,
        ids: &[u32],
        params: QuantParams,
        out: &mut [f32],
    ) {
        let len = dim.min(query.len());
        let query = &query[..len];
        let qp = query.as_ptr();
        let qsum = query_sum(query);

        let mut id_chunks = ids.chunks_exact(4);
        let mut out_chunks = out.chunks_exact_mut(4);
        for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
            let rows = group_rows(packed, dim, chunk);
            let mut acc: [__m256; 4] = [_mm256_setzero_ps(); 4];
            let mut i = 0usize;
            while i + 8 <= len {
                let q = _mm256_loadu_ps(qp.add(i));
                for k in 0..4 {
                    let bytes = _mm_loadl_epi64(rows[k].add(i) as *const __m128i);
                    let values = _mm256_cvtepi32_ps(_mm256_cvtepu8_epi32(bytes));
                    acc[k] = _mm256_fmadd_ps(q, values, acc[k]);
                }
                i += 8;
            }
            for k in 0..4 {
                let raw = hsum256(acc[k]) + raw_tail(qp, rows[k], i, len);
                slots[k] = params.combine(raw, qsum);
            }
        }

        for (slot, &id) in out_chunks.into_remainder().iter_mut().zip(id_chunks.remainder()) {
            *slot = params.combine(raw_dot(query, row(packed, dim, id)), qsum);
        }
    }

    /// Sixteen bytes per row per step.
    #[target_feature(enable = "avx512f")]
    pub unsafe fn packed4_avx512(
        query: &[f32],
        packed: &[u8],
        dim: usize,
        ids: &[u32],
        params: QuantParams,
        out: &mut [f32],
    ) {
        let len = dim.min(query.len());
        let query = &query[..len];
        let qp = query.as_ptr();
        let qsum = query_sum(query);

        let mut id_chunks = ids.chunks_exact(4);
        let mut out_chunks = out.chunks_exact_mut(4);
        for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
            let rows = group_rows(packed, dim, chunk);
            let mut acc: [__m512; 4] = [_mm512_setzero_ps(); 4];
            let mut i = 0usize;
            while i + 16 <= len {
                let q = _mm512_loadu_ps(qp.add(i));
                for k in 0..4 {
                    let bytes = _mm_loadu_si128(rows[k].add(i) as *const __m128i);
                    let values = _mm512_cvtepi32_ps(_mm512_cvtepu8_epi32(bytes));
                    acc[k] = _mm512_fmadd_ps(q, values, acc[k]);
                }
                i += 16;
            }
            for k in 0..4 {
                let raw = _mm512_reduce_add_ps(acc[k]) + raw_tail(qp, rows[k], i, len);
                slots[k] = params.combine(raw, qsum);
            }
        }

        for (slot, &id) in out_chunks.into_remainder().iter_mut().zip(id_chunks.remainder()) {
            *slot = params.combine(raw_dot(query, row(packed, dim, id)), qsum);
        }
    }

    /// One row at a time, 64 bytes per step split across four accumulators.
    #[target_feature(enable = "avx512f")]
    pub unsafe fn packed_wide_avx512(
        query: &[f32],
        packed: &[u8],
        dim: usize,
        ids: &[u32],
        params: QuantParams,
        out: &mut [f32],
    ) {
        let len = dim.min(query.len());
        let query = &query[..len];
        let qp = query.as_ptr();
        let qsum = query_sum(query);

        for (slot, &id) in out.iter_mut().zip(ids) {
            let rp = row(packed, dim, id).as_ptr();
            let mut acc: [__m512; 4] = [_mm512_setzero_ps(); 4];
            let mut i = 0usize;
            while i + 64 <= len {
                let bytes = _mm512_loadu_si512(rp.add(i) as *const __m512i);
                let parts: [__m128i; 4] = [
                    _mm512_extracti32x4_epi32::<0>(bytes),
                    _mm512_extracti32x4_epi32::<1>(bytes),
                    _mm512_extracti32x4_epi32::<2>(bytes),
                    _mm512_extracti32x4_epi32::<3>(bytes),
                ];
                for k in 0..4 {
                    let q = _mm512_loadu_ps(qp.add(i + 16 * k));
                    let values = _mm512_cvtepi32_ps(_mm512_cvtepu8_epi32(parts[k]));
                    acc[k] = _mm512_fmadd_ps(q, values, acc[k]);
                }
                i += 64;
            }
            let total = _mm512_add_ps(_mm512_add_ps(acc[0], acc[1]), _mm512_add_ps(acc[2], acc[3]));
            let raw = _mm512_reduce_add_ps(total) + raw_tail(qp, rp, i, len);
            *slot = params.combine(raw, qsum);
        }
    }
}

/// NEON widening for aarch64: eight bytes go `u8 -> u16 -> u32 -> f32` in two
/// halves of four lanes.
#[cfg(target_arch = "aarch64")]
#[allow(unsafe_op_in_unsafe_fn)]
mod aarch64_neon {
    use std::arch::aarch64::{
        float32x4_t, vcvtq_f32_u32, vdupq_n_f32, vfmaq_f32, vget_high_u16, vget_low_u16, vld1_u8,
        vld1q_f32, vmovl_u8, vmovl_u16,
    };

    use super::{query_sum, raw_dot};
    use crate::dot::aarch64_neon::hsum128;
    use crate::multidot::row;
    use crate::quant::QuantParams;

    #[target_feature(enable = "neon")]
    pub unsafe fn packed4_neon(
        query: &[f32],
        packed: &[u8],
        dim: usize,
        ids: &[u32],
        params: QuantParams,
        out: &mut [f32],
    ) {
        let len = dim.min(query.len());
        let query = &query[..len];
        let qp = query.as_ptr();
        let qsum = query_sum(query);

        let mut id_chunks = ids.chunks_exact(4);
        let mut out_chunks = out.chunks_exact_mut(4);
        for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
            let rows: [*const u8; 4] = [
                row(packed, dim, chunk[0]).as_ptr(),
                row(packed, dim, chunk[1]).as_ptr(),
                row(packed, dim, chunk[2]).as_ptr(),
                row(packed, dim, chunk[3]).as_ptr(),
            ];
            let mut acc: [float32x4_t; 4] = [vdupq_n_f32(0.0); 4];
            let mut i = 0usize;
            while i + 8 <= len {
                let q_lo = vld1q_f32(qp.add(i));
                let q_hi = vld1q_f32(qp.add(i + 4));
                for k in 0..4 {
                    let wide = vmovl_u8(vld1_u8(rows[k].add(i)));
                    let lo = vcvtq_f32_u32(vmovl_u16(vget_low_u16(wide)));
                    let hi = vcvtq_f32_u32(vmovl_u16(vget_high_u16(wide)));
                    acc[k] = vfmaq_f32(vfmaq_f32(acc[k], q_lo, lo), q_hi, hi);
                }
                i += 8;
            }
            for k in 0..4 {
                let mut raw = hsum128(acc[k]);
                for j in i..len {
                    raw += *qp.add(j) * f32::from(*rows[k].add(j));
                }
                slots[k] = params.combine(raw, qsum);
            }
        }

        for (slot, &id) in out_chunks.into_remainder().iter_mut().zip(id_chunks.remainder()) {
            *slot = params.combine(raw_dot(query, row(packed, dim, id)), qsum);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reference_packed(
        query: &[f32],
        packed: &[u8],
        dim: usize,
        ids: &[u32],
        params: QuantParams,
    ) -> Vec<f64> {
        ids.iter()
            .map(|&id| {
                row(packed, dim, id)
                    .iter()
                    .zip(query)
                    .map(|(&b, &q)| f64::from(q) * f64::from(params.dequantize(b)))
                    .sum()
            })
            .collect()
    }

    fn tolerance(query: &[f32], params: QuantParams) -> f64 {
        let magnitude: f64 = query.iter().map(|q| f64::from(q.abs())).sum();
        let scale = 255.0 * f64::from(params.coeff.abs()) + f64::from(params.bias.abs());
        1e-4 * magnitude * scale + 1e-4
    }

    fn packed_batch() -> impl Strategy<Value = (usize, Vec<f32>, Vec<u8>, Vec<u32>)> {
        (1usize..=150, 1usize..=12, 0usize..=20).prop_flat_map(|(dim, rows, count)| {
            (
                Just(dim),
                proptest::collection::vec(-1.0f32..1.0, dim),
                proptest::collection::vec(any::<u8>(), dim * rows),
                proptest::collection::vec(0..rows as u32, count),
            )
        })
    }

    proptest! {
        #[test]
        fn packed_variants_match_dequantized_rows(
            (dim, query, packed, ids) in packed_batch(),
            bias in -1.0f32..1.0,
            coeff in -0.02f32..0.02,
        ) {
            let params = QuantParams::new(bias, coeff);
            let expected = reference_packed(&query, &packed, dim, &ids, params);
            let tol = tolerance(&query, params);
            let mut out = vec![f32::NAN; ids.len()];
            for (name, kernel) in packed_multi_dot_variants() {
                out.fill(f32::NAN);
                kernel(&query, &packed, dim, &ids, params, &mut out);
                for (g, w) in out.iter().zip(&expected) {
                    prop_assert!((f64::from(*g) - w).abs() <= tol, "{}: {} vs {}", name, g, w);
                }
            }
        }

        #[test]
        fn shuffled_ids_shuffle_the_scores(
            ((dim, query, packed, ids), perm) in packed_batch().prop_flat_map(|b| {
                let count = b.3.len();
                (Just(b), Just((0..count).collect::<Vec<usize>>()).prop_shuffle())
            }),
            bias in -1.0f32..1.0,
            coeff in -0.02f32..0.02,
        ) {
            let params = QuantParams::new(bias, coeff);
            let tol = tolerance(&query, params) as f32;
            let shuffled: Vec<u32> = perm.iter().map(|&p| ids[p]).collect();
            let mut out = vec![f32::NAN; ids.len()];
            let mut shuffled_out = vec![f32::NAN; ids.len()];
            for (name, kernel) in packed_multi_dot_variants() {
                kernel(&query, &packed, dim, &ids, params, &mut out);
                kernel(&query, &packed, dim, &shuffled, params, &mut shuffled_out);
                for (e, &p) in perm.iter().enumerate() {
                    let (g, w) = (shuffled_out[e], out[p]);
                    prop_assert!((g - w).abs() <= 2.0 * tol, "{}[{}]: {} vs {}", name, e, g, w);
                }
            }
        }

        #[test]
        fn quantized_round_trip_matches_float_rows(
            (dim, query, packed, ids) in packed_batch(),
        ) {
            let params = QuantParams::from_range(-1.0, 1.0);
            let mut floats = vec![0.0f32; packed.len()];
            params.dequantize_into(&packed, &mut floats);

            let mut from_bytes = vec![0.0f32; ids.len()];
            let mut from_floats = vec![0.0f32; ids.len()];
            packed_multi_dot_factored(&query, &packed, dim, &ids, params, &mut from_bytes);
            crate::multidot::multi_dot_from_single(dot_naive, &query, &floats, dim, &ids, &mut from_floats);

            let tol = tolerance(&query, params) as f32;
            for (a, b) in from_bytes.iter().zip(&from_floats) {
                prop_assert!((a - b).abs() <= tol);
            }
        }
    }

    #[test]
    fn saturated_bytes_match_float_rows() {
        let dim = 64;
        let packed = vec![255u8; dim * 3];
        let floats = vec![255.0f32; dim * 3];
        let query = vec![0.5f32; dim];
        let ids = [2u32, 0, 1];

        let mut float_out = [0.0f32; 3];
        crate::multidot::multi_dot_rows4(&query, &floats, dim, &ids, &mut float_out);
        assert_eq!(float_out, [8160.0; 3]);

        for (name, kernel) in packed_multi_dot_variants() {
            let mut out = [f32::NAN; 3];
            kernel(&query, &packed, dim, &ids, QuantParams::IDENTITY, &mut out);
            assert_eq!(out, float_out, "{name}");
        }
    }

    #[test]
    fn bias_only_scores_scale_query_sum() {
        let dim = 20;
        let packed = vec![0u8; dim * 2];
        let query: Vec<f32> = (0..dim).map(|i| i as f32).collect();
        let params = QuantParams::new(2.0, 0.25);
        let mut out = [0.0f32; 5];
        packed_multi_dot_lanes::<8, 4>(&query, &packed, dim, &[0, 1, 1, 0, 1], params, &mut out);
        assert_eq!(out, [380.0; 5]);
        assert_eq!(query_sum(&query), 190.0);
    }

    #[test]
    fn wide_rows_cover_every_step_size() {
        // 64-byte steps, then 16, then 8, then a scalar tail.
        let dim = 64 + 16 + 8 + 3;
        let packed: Vec<u8> = (0..dim * 5).map(|i| (i % 251) as u8).collect();
        let query: Vec<f32> = (0..dim).map(|i| if i % 2 == 0 { 1.0 } else { -0.5 }).collect();
        let ids = [4u32, 1, 3, 0, 2];
        let params = QuantParams::new(0.0, 1.0);
        let expected = reference_packed(&query, &packed, dim, &ids, params);

        for (name, kernel) in packed_multi_dot_variants() {
            let mut out = [f32::NAN; 5];
            kernel(&query, &packed, dim, &ids, params, &mut out);
            for (g, w) in out.iter().zip(&expected) {
                assert!((f64::from(*g) - w).abs() < 1e-2, "{name}: {g} vs {w}");
            }
        }
    }
}
