//! Batched ("multi-dot") scoring of index-selected matrix rows.
//!
//! Every kernel computes `out[e] = dot(query, row(ids[e]))` for each entry of the
//! index list, in order. The matrix is row-major with `dim` values per row, so row
//! `i` lives at `matrix[i * dim..(i + 1) * dim]`.
//!
//! # Strategies
//!
//! | Function | Strategy | Best For |
//! |----------|----------|----------|
//! | [`multi_dot_from_single`] | One single-pair call per candidate | Baseline, any dot kernel |
//! | [`multi_dot_all`] | Dimension-major over the whole list | Short lists, short rows |
//! | [`multi_dot_grouped`] | Runtime group, accumulate in the output | Odd group sizes |
//! | [`multi_dot_grouped_scratch`] | Runtime group, per-group scratch | Routes {2, 4, 8, 16} to [`multi_dot_stepped`] |
//! | [`multi_dot_stepped`] | Const-generic group with scratch | Compile-time unrolling |
//! | [`multi_dot_rows4`] | Groups of four, row-major inside the group | Four independent sums in flight |
//! | [`multi_dot_lanes`] | `L`-lane accumulator per row, group of `G` | Portable wide-vector form |
//!
//! On x86_64 the group-of-four AVX, AVX2 and AVX-512 kernels (plus an AVX-512
//! variant that prefetches the next group), and on aarch64 a NEON group-of-four
//! kernel, are listed by [`multi_dot_variants`].
//!
//! # Why Group
//!
//! Scoring rows one by one reloads the query for every candidate. Scoring a group
//! of `G` rows per pass loads each query element once and feeds `G` independent
//! accumulators, which both amortizes the load and hides the add latency. Ids that
//! do not fill a last group are scored one at a time with the single-pair kernel.
//!
//! # References
//!
//! - [Throughput computing](https://en.algorithmica.org/hpc/pipelining/throughput/)
//! - [Prefetching](https://en.algorithmica.org/hpc/cpu-cache/prefetching/)

use crate::backend::{Backend, DotFn, MultiDotFn};
use crate::dot::{dot_lanes, dot_naive, reduce_lanes};

/// Largest group size accepted by the runtime-group kernels.
pub const MAX_GROUP: usize = 16;
/// Group size used by every backend.
pub const DEFAULT_GROUP: usize = 4;

/// Row `id` of a row-major matrix with `dim` columns.
///
/// Bounds are checked once for the whole row.
#[inline(always)]
pub(crate) fn row<T>(matrix: &[T], dim: usize, id: u32) -> &[T] {
    let start = id as usize * dim;
    &matrix[start..start + dim]
}

#[inline]
fn check_batch(query: &[f32], dim: usize, ids: &[u32], out: &[f32]) {
    debug_assert_eq!(query.len(), dim);
    debug_assert_eq!(ids.len(), out.len());
}

/// Scores each candidate with `kernel`, one call per id.
pub fn multi_dot_from_single(
    kernel: DotFn,
    query: &[f32],
    matrix: &[f32],
    dim: usize,
    ids: &[u32],
    out: &mut [f32],
) {
    check_batch(query, dim, ids, out);
    for (slot, &id) in out.iter_mut().zip(ids) {
        *slot = kernel(query, row(matrix, dim, id));
    }
}

/// Query elements consumed per step by the dimension-major kernels.
///
/// Row slices are bounds-checked once per block, and the block itself is walked
/// with `zip`, so the per-element loop carries no checks.
const DIM_BLOCK: usize = 8;

/// Adds `q · row[start..start + q.len()]` into `sums[k]` for each row `k`.
#[inline(always)]
fn accumulate_block(sums: &mut [f32], rows: &[&[f32]], q: &[f32], start: usize) {
    for (sum, r) in sums.iter_mut().zip(rows) {
        for (&x, &y) in q.iter().zip(&r[start..]) {
            *sum += x * y;
        }
    }
}

/// Dimension-major accumulation over the whole index list.
///
/// Walks the query once, one block at a time; every block is added into every
/// output slot before the next block is loaded. Nothing is allocated.
pub fn multi_dot_all(query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
    check_batch(query, dim, ids, out);
    out.fill(0.0);
    for (block, q) in query[..dim].chunks(DIM_BLOCK).enumerate() {
        let start = block * DIM_BLOCK;
        for (slot, &id) in out.iter_mut().zip(ids) {
            for (&x, &y) in q.iter().zip(&row(matrix, dim, id)[start..]) {
                *slot += x * y;
            }
        }
    }
}

/// Runtime group size, accumulating directly into the output slots.
///
/// `group` is clamped to `1..=MAX_GROUP`.
pub fn multi_dot_grouped(
    query: &[f32],
    matrix: &[f32],
    dim: usize,
    ids: &[u32],
    out: &mut [f32],
    group: usize,
) {
    check_batch(query, dim, ids, out);
    debug_assert!((1..=MAX_GROUP).contains(&group));
    let group = group.clamp(1, MAX_GROUP);
    let query = &query[..dim];

    let mut rows: [&[f32]; MAX_GROUP] = [&[]; MAX_GROUP];
    let mut id_chunks = ids.chunks_exact(group);
    let mut out_chunks = out.chunks_exact_mut(group);
    for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
        for (r, &id) in rows.iter_mut().zip(chunk) {
            *r = row(matrix, dim, id);
        }
        slots.fill(0.0);
        for (block, q) in query.chunks(DIM_BLOCK).enumerate() {
            accumulate_block(slots, &rows[..group], q, block * DIM_BLOCK);
        }
    }

    multi_dot_from_single(
        dot_naive,
        query,
        matrix,
        dim,
        id_chunks.remainder(),
        out_chunks.into_remainder(),
    );
}

/// Runtime group size, accumulating into a scratch array per group.
///
/// Groups of 2, 4, 8 and 16 take the const-generic [`multi_dot_stepped`] path;
/// other sizes run the same algorithm with a runtime bound.
pub fn multi_dot_grouped_scratch(
    query: &[f32],
    matrix: &[f32],
    dim: usize,
    ids: &[u32],
    out: &mut [f32],
    group: usize,
) {
    debug_assert!((1..=MAX_GROUP).contains(&group));
    match group {
        2 => return multi_dot_stepped::<2>(query, matrix, dim, ids, out),
        4 => return multi_dot_stepped::<4>(query, matrix, dim, ids, out),
        8 => return multi_dot_stepped::<8>(query, matrix, dim, ids, out),
        16 => return multi_dot_stepped::<16>(query, matrix, dim, ids, out),
        _ => {}
    }

    check_batch(query, dim, ids, out);
    let group = group.clamp(1, MAX_GROUP);
    let query = &query[..dim];
    let mut rows: [&[f32]; MAX_GROUP] = [&[]; MAX_GROUP];
    let mut id_chunks = ids.chunks_exact(group);
    let mut out_chunks = out.chunks_exact_mut(group);
    for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
        for (r, &id) in rows.iter_mut().zip(chunk) {
            *r = row(matrix, dim, id);
        }
        let mut acc = [0.0f32; MAX_GROUP];
        for (block, q) in query.chunks(DIM_BLOCK).enumerate() {
            accumulate_block(&mut acc[..group], &rows[..group], q, block * DIM_BLOCK);
        }
        slots.copy_from_slice(&acc[..group]);
    }

    multi_dot_from_single(
        dot_naive,
        query,
        matrix,
        dim,
        id_chunks.remainder(),
        out_chunks.into_remainder(),
    );
}

/// Const-generic group of `G` rows with a scratch accumulator.
pub fn multi_dot_stepped<const G: usize>(
    query: &[f32],
    matrix: &[f32],
    dim: usize,
    ids: &[u32],
    out: &mut [f32],
) {
    const { assert!(G > 0 && G <= MAX_GROUP, "group size must be in 1..=16") };
    check_batch(query, dim, ids, out);
    let query = &query[..dim];

    let mut id_chunks = ids.chunks_exact(G);
    let mut out_chunks = out.chunks_exact_mut(G);
    for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
        let rows: [&[f32]; G] = std::array::from_fn(|k| row(matrix, dim, chunk[k]));
        let mut acc = [0.0f32; G];
        for (block, q) in query.chunks(DIM_BLOCK).enumerate() {
            accumulate_block(&mut acc, &rows, q, block * DIM_BLOCK);
        }
        slots.copy_from_slice(&acc);
    }

    multi_dot_from_single(
        dot_naive,
        query,
        matrix,
        dim,
        id_chunks.remainder(),
        out_chunks.into_remainder(),
    );
}

/// Groups of four rows, walked row-major within the group.
///
/// The four accumulators are reset at the start of every group.
pub fn multi_dot_rows4(query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
    check_batch(query, dim, ids, out);

    let mut id_chunks = ids.chunks_exact(4);
    let mut out_chunks = out.chunks_exact_mut(4);
    for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
        let r0 = row(matrix, dim, chunk[0]);
        let r1 = row(matrix, dim, chunk[1]);
        let r2 = row(matrix, dim, chunk[2]);
        let r3 = row(matrix, dim, chunk[3]);
        let (mut s0, mut s1, mut s2, mut s3) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
        for ((((&q, &a), &b), &c), &e) in query.iter().zip(r0).zip(r1).zip(r2).zip(r3) {
            s0 += q * a;
            s1 += q * b;
            s2 += q * c;
            s3 += q * e;
        }
        slots.copy_from_slice(&[s0, s1, s2, s3]);
    }

    multi_dot_from_single(
        dot_naive,
        query,
        matrix,
        dim,
        id_chunks.remainder(),
        out_chunks.into_remainder(),
    );
}

/// Portable wide form: one `L`-lane accumulator per row, `G` rows per group.
///
/// Each group does a single horizontal reduction per row. Elements past the last
/// full lane block, and ids past the last full group, go through
/// [`dot_lanes`].
pub fn multi_dot_lanes<const L: usize, const G: usize>(
    query: &[f32],
    matrix: &[f32],
    dim: usize,
    ids: &[u32],
    out: &mut [f32],
) {
    const { assert!(L > 0 && G > 0 && G <= MAX_GROUP, "invalid lane or group count") };
    check_batch(query, dim, ids, out);
    let query = &query[..dim];
    let blocks = dim / L * L;

    let mut id_chunks = ids.chunks_exact(G);
    let mut out_chunks = out.chunks_exact_mut(G);
    for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
        let rows: [&[f32]; G] = std::array::from_fn(|k| row(matrix, dim, chunk[k]));
        let mut acc = [[0.0f32; L]; G];
        for base in (0..blocks).step_by(L) {
            let q = &query[base..base + L];
            for (lanes, r) in acc.iter_mut().zip(&rows) {
                let r = &r[base..base + L];
                for lane in 0..L {
                    lanes[lane] += q[lane] * r[lane];
                }
            }
        }
        for ((slot, lanes), r) in slots.iter_mut().zip(&acc).zip(&rows) {
            let tail: f32 = query[blocks..]
                .iter()
                .zip(&r[blocks..])
                .map(|(&q, &x)| q * x)
                .sum();
            *slot = reduce_lanes(lanes) + tail;
        }
    }

    multi_dot_from_single(
        dot_lanes::<L>,
        query,
        matrix,
        dim,
        id_chunks.remainder(),
        out_chunks.into_remainder(),
    );
}

/// Named batched kernels available on this host.
pub fn multi_dot_variants() -> Vec<(&'static str, MultiDotFn)> {
    let mut variants: Vec<(&'static str, MultiDotFn)> = vec![
        ("multi_dot_single", multi_dot_single_naive as MultiDotFn),
        ("multi_dot_all", multi_dot_all as MultiDotFn),
        ("multi_dot_grouped3", multi_dot_grouped3 as MultiDotFn),
        ("multi_dot_scratch5", multi_dot_scratch5 as MultiDotFn),
        ("multi_dot_stepped4", multi_dot_stepped::<4> as MultiDotFn),
        ("multi_dot_rows4", multi_dot_rows4 as MultiDotFn),
        ("multi_dot_lanes4", multi_dot_lanes::<4, 4> as MultiDotFn),
        ("multi_dot_lanes8", multi_dot_lanes::<8, 4> as MultiDotFn),
        ("multi_dot_lanes16", multi_dot_lanes::<16, 4> as MultiDotFn),
    ];
    for (name, backend) in [
        ("multi_dot_avx", Backend::Avx),
        ("multi_dot_avx2", Backend::Avx2),
        ("multi_dot_avx512", Backend::Avx512),
        ("multi_dot_neon", Backend::Sse),
    ] {
        if let Some(kernel) = native_multi_dot(backend) {
            variants.push((name, kernel));
        }
    }
    #[cfg(target_arch = "x86_64")]
    if Backend::Avx512.is_native() {
        variants.push((
            "multi_dot_avx512_prefetch",
            multi_dot_avx512_prefetch_entry as MultiDotFn,
        ));
    }
    variants
}

fn multi_dot_single_naive(query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
    multi_dot_from_single(dot_naive, query, matrix, dim, ids, out);
}

fn multi_dot_grouped3(query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
    multi_dot_grouped(query, matrix, dim, ids, out, 3);
}

fn multi_dot_scratch5(query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
    multi_dot_grouped_scratch(query, matrix, dim, ids, out, 5);
}

/// Intrinsic group-of-four kernel for `backend`, if the host can run it.
pub(crate) fn native_multi_dot(backend: Backend) -> Option<MultiDotFn> {
    if !backend.is_native() {
        return None;
    }

    #[cfg(target_arch = "x86_64")]
    {
        match backend {
            Backend::Avx => Some(multi_dot_avx_entry as MultiDotFn),
            Backend::Avx2 => Some(multi_dot_avx2_entry as MultiDotFn),
            Backend::Avx512 => Some(multi_dot_avx512_entry as MultiDotFn),
            Backend::Scalar | Backend::Sse => None,
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        match backend {
            Backend::Sse => Some(multi_dot_neon_entry as MultiDotFn),
            _ => None,
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        None
    }
}

#[cfg(target_arch = "aarch64")]
fn multi_dot_neon_entry(query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
    check_batch(query, dim, ids, out);
    // SAFETY: aarch64 guarantees NEON availability.
    unsafe { aarch64_neon::multi_dot4_neon(query, matrix, dim, ids, out) }
}

#[cfg(target_arch = "x86_64")]
fn multi_dot_avx_entry(query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
    check_batch(query, dim, ids, out);
    // SAFETY: guarded by AVX runtime detection in `native_multi_dot`.
    unsafe { x86::multi_dot4_avx(query, matrix, dim, ids, out) }
}

#[cfg(target_arch = "x86_64")]
fn multi_dot_avx2_entry(query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
    check_batch(query, dim, ids, out);
    // SAFETY: guarded by AVX2 + FMA runtime detection in `native_multi_dot`.
    unsafe { x86::multi_dot4_avx2(query, matrix, dim, ids, out) }
}

#[cfg(target_arch = "x86_64")]
fn multi_dot_avx512_entry(query: &[f32], matrix: &[f32], dim: usize, ids: &[u32], out: &mut [f32]) {
    check_batch(query, dim, ids, out);
    // SAFETY: guarded by AVX-512 runtime detection in `native_multi_dot`.
    unsafe { x86::multi_dot4_avx512(query, matrix, dim, ids, out) }
}

#[cfg(target_arch = "x86_64")]
fn multi_dot_avx512_prefetch_entry(
    query: &[f32],
    matrix: &[f32],
    dim: usize,
    ids: &[u32],
    out: &mut [f32],
) {
    check_batch(query, dim, ids, out);
    // SAFETY: only listed by `multi_dot_variants` after AVX-512 runtime detection.
    unsafe { x86::multi_dot4_avx512_prefetch(query, matrix, dim, ids, out) }
}

/// Group-of-four intrinsic kernels for x86_64.
///
/// Row slices are bounds-checked once per row; the vector loops then read at most
/// `min(dim, query.len())` elements from each pointer.
#[cfg(target_arch = "x86_64")]
#[allow(unsafe_op_in_unsafe_fn)]
mod x86 {
    use std::arch::x86_64 as arch;

    use arch::{
        __m256, __m512, _MM_HINT_T0, _mm_prefetch, _mm256_add_ps, _mm256_fmadd_ps,
        _mm256_loadu_ps, _mm256_mul_ps, _mm256_setzero_ps, _mm512_fmadd_ps, _mm512_loadu_ps,
        _mm512_reduce_add_ps, _mm512_setzero_ps,
    };

    use super::row;
    use crate::dot::x86_avx::{dot_avx, hsum256};
    use crate::dot::x86_avx2::dot_avx2;
    use crate::dot::x86_avx512::dot_avx512;

    #[inline(always)]
    unsafe fn scalar_tail(qp: *const f32, rp: *const f32, from: usize, len: usize) -> f32 {
        let mut sum = 0.0f32;
        for j in from..len {
            sum += *qp.add(j) * *rp.add(j);
        }
        sum
    }

    #[inline(always)]
    fn group_rows(matrix: &[f32], dim: usize, chunk: &[u32]) -> [*const f32; 4] {
        [
            row(matrix, dim, chunk[0]).as_ptr(),
            row(matrix, dim, chunk[1]).as_ptr(),
            row(matrix, dim, chunk[2]).as_ptr(),
            row(matrix, dim, chunk[3]).as_ptr(),
        ]
    }

    #[target_feature(enable = "avx")]
    pub unsafe fn multi_dot4_avx(
        query: &[f32],
        matrix: &[f32],
        dim: usize,
        ids: &[u32],
        out: &mut [f32],
    ) {
        let len = dim.min(query.len());
        let qp = query.as_ptr();
        let mut id_chunks = ids.chunks_exact(4);
        let mut out_chunks = out.chunks_exact_mut(4);
        for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
            let rows = group_rows(matrix, dim, chunk);
            let mut acc = [_mm256_setzero_ps(); 4];
            let mut i = 0usize;
            while i + 8 <= len {
                let q = _mm256_loadu_ps(qp.add(i));
                for k in 0..4 {
                    let r = _mm256_loadu_ps(rows[k].add(i));
                    acc[k] = _mm256_add_ps(acc[k], _mm256_mul_ps(q, r));
                }
                i += 8;
            }
            for k in 0..4 {
                slots[k] = hsum256(acc[k]) + scalar_tail(qp, rows[k], i, len);
            }
        }

        for (slot, &id) in out_chunks.into_remainder().iter_mut().zip(id_chunks.remainder()) {
            *slot = dot_avx(&query[..len], row(matrix, dim, id));
        }
    }

    #[target_feature(enable = "avx2,fma")]
    pub unsafe fn multi_dot4_avx2(
        query: &[f32],
        matrix: &[f32],
        dim: usize,
        ids: &[u32],
        out: &mut [f32],
    ) {
        let len = dim.min(query.len());
        let qp = query.as_ptr();
        let mut id_chunks = ids.chunks_exact(4);
        let mut out_chunks = out.chunks_exact_mut(4);
        for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
            let rows = group_rows(matrix, dim, chunk);
            let mut acc: [__m256; 4] = [_mm256_setzero_ps(); 4];
            let mut i = 0usize;
            while i + 8 <= len {
                let q = _mm256_loadu_ps(qp.add(i));
                for k in 0..4 {
                    acc[k] = _mm256_fmadd_ps(q, _mm256_loadu_ps(rows[k].add(i)), acc[k]);
                }
                i += 8;
            }
            for k in 0..4 {
                slots[k] = hsum256(acc[k]) + scalar_tail(qp, rows[k], i, len);
            }
        }

        for (slot, &id) in out_chunks.into_remainder().iter_mut().zip(id_chunks.remainder()) {
            *slot = dot_avx2(&query[..len], row(matrix, dim, id));
        }
    }

    #[target_feature(enable = "avx512f")]
    pub unsafe fn multi_dot4_avx512(
        query: &[f32],
        matrix: &[f32],
        dim: usize,
        ids: &[u32],
        out: &mut [f32],
    ) {
        let len = dim.min(query.len());
        let qp = query.as_ptr();
        let mut id_chunks = ids.chunks_exact(4);
        let mut out_chunks = out.chunks_exact_mut(4);
        for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
            let rows = group_rows(matrix, dim, chunk);
            let mut acc: [__m512; 4] = [_mm512_setzero_ps(); 4];
            let mut i = 0usize;
            while i + 16 <= len {
                let q = _mm512_loadu_ps(qp.add(i));
                for k in 0..4 {
                    acc[k] = _mm512_fmadd_ps(q, _mm512_loadu_ps(rows[k].add(i)), acc[k]);
                }
                i += 16;
            }
            for k in 0..4 {
                slots[k] = _mm512_reduce_add_ps(acc[k]) + scalar_tail(qp, rows[k], i, len);
            }
        }

        for (slot, &id) in out_chunks.into_remainder().iter_mut().zip(id_chunks.remainder()) {
            *slot = dot_avx512(&query[..len], row(matrix, dim, id));
        }
    }

    /// Same as [`multi_dot4_avx512`], prefetching the next group's rows one cache
    /// line (16 floats) at a time while the current group is scored.
    #[target_feature(enable = "avx512f")]
    pub unsafe fn multi_dot4_avx512_prefetch(
        query: &[f32],
        matrix: &[f32],
        dim: usize,
        ids: &[u32],
        out: &mut [f32],
    ) {
        let len = dim.min(query.len());
        let qp = query.as_ptr();
        let groups = ids.len() / 4;

        for g in 0..groups {
            let chunk = &ids[g * 4..g * 4 + 4];
            let rows = group_rows(matrix, dim, chunk);

            let next_ids = &ids[(g + 1) * 4..ids.len().min((g + 2) * 4)];
            let mut next = [std::ptr::null::<f32>(); 4];
            for (slot, &id) in next.iter_mut().zip(next_ids) {
                *slot = row(matrix, dim, id).as_ptr();
            }
            let next = &next[..next_ids.len()];

            let mut acc: [__m512; 4] = [_mm512_setzero_ps(); 4];
            let mut i = 0usize;
            while i + 16 <= len {
                for &p in next {
                    _mm_prefetch(p.add(i) as *const i8, _MM_HINT_T0);
                }
                let q = _mm512_loadu_ps(qp.add(i));
                for k in 0..4 {
                    acc[k] = _mm512_fmadd_ps(q, _mm512_loadu_ps(rows[k].add(i)), acc[k]);
                }
                i += 16;
            }
            for k in 0..4 {
                out[g * 4 + k] = _mm512_reduce_add_ps(acc[k]) + scalar_tail(qp, rows[k], i, len);
            }
        }

        for e in groups * 4..ids.len() {
            out[e] = dot_avx512(&query[..len], row(matrix, dim, ids[e]));
        }
    }
}

/// Group-of-four NEON kernel for aarch64.
#[cfg(target_arch = "aarch64")]
#[allow(unsafe_op_in_unsafe_fn)]
mod aarch64_neon {
    use std::arch::aarch64::{float32x4_t, vdupq_n_f32, vfmaq_f32, vld1q_f32};

    use super::row;
    use crate::dot::aarch64_neon::{dot_neon, hsum128};

    #[target_feature(enable = "neon")]
    pub unsafe fn multi_dot4_neon(
        query: &[f32],
        matrix: &[f32],
        dim: usize,
        ids: &[u32],
        out: &mut [f32],
    ) {
        let len = dim.min(query.len());
        let qp = query.as_ptr();
        let mut id_chunks = ids.chunks_exact(4);
        let mut out_chunks = out.chunks_exact_mut(4);
        for (chunk, slots) in (&mut id_chunks).zip(&mut out_chunks) {
            let rows: [*const f32; 4] = [
                row(matrix, dim, chunk[0]).as_ptr(),
                row(matrix, dim, chunk[1]).as_ptr(),
                row(matrix, dim, chunk[2]).as_ptr(),
                row(matrix, dim, chunk[3]).as_ptr(),
            ];
            let mut acc: [float32x4_t; 4] = [vdupq_n_f32(0.0); 4];
            let mut i = 0usize;
            while i + 4 <= len {
                let q = vld1q_f32(qp.add(i));
                for k in 0..4 {
                    acc[k] = vfmaq_f32(acc[k], q, vld1q_f32(rows[k].add(i)));
                }
                i += 4;
            }
            for k in 0..4 {
                let mut sum = hsum128(acc[k]);
                for j in i..len {
                    sum += *qp.add(j) * *rows[k].add(j);
                }
                slots[k] = sum;
            }
        }

        for (slot, &id) in out_chunks.into_remainder().iter_mut().zip(id_chunks.remainder()) {
            *slot = dot_neon(&query[..len], row(matrix, dim, id));
        }
    }
}
