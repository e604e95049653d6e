use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use multidot::{MultiDotFn, multi_dot_grouped, multi_dot_product, multi_dot_variants};

/// `(label, dim, rows in matrix, ids per call)`.
const INPUT_SIZES: &[(&str, usize, usize, usize)] = &[
    ("d128_l2", 128, 2 * 1024, 256),
    ("d768_l3", 768, 4 * 1024, 256),
    ("d768_dram", 768, 64 * 1024, 1024),
];

#[inline]
fn next_u64(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    *state = x;
    x.wrapping_mul(0x2545_F491_4F6C_DD1D)
}

fn make_matrix(len: usize, seed: u64) -> Vec<f32> {
    let mut state = seed;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        let v = (next_u64(&mut state) & 0xFF) as f32;
        out.push(v / 255.0);
    }
    out
}

fn make_ids(count: usize, rows: usize, seed: u64) -> Vec<u32> {
    let mut state = seed;
    (0..count)
        .map(|_| (next_u64(&mut state) % rows as u64) as u32)
        .collect()
}

fn bench_variant(c: &mut Criterion, name: &str, func: MultiDotFn) {
    let mut group = c.benchmark_group(name);
    for &(label, dim, rows, count) in INPUT_SIZES {
        group.throughput(Throughput::Elements((dim * count) as u64));

        let matrix = make_matrix(dim * rows, 0xC0FF_EE42_1234_5678u64 ^ rows as u64);
        let query = make_matrix(dim, 0xBADC_0FFE_EE11_D00Du64 ^ dim as u64);
        let ids = make_ids(count, rows, 0x9E37_79B9_7F4A_7C15u64 ^ count as u64);
        let mut out = vec![0.0f32; count];

        group.bench_function(BenchmarkId::new("random", label), |bench| {
            bench.iter(|| {
                func(black_box(&query), black_box(&matrix), dim, black_box(&ids), black_box(&mut out));
                black_box(out[count / 2]);
            });
        });
    }
    group.finish();
}

fn bench_multi_dot(c: &mut Criterion) {
    for (name, func) in multi_dot_variants() {
        bench_variant(c, name, func);
    }
    bench_variant(c, "multi_dot_grouped8", |q, m, d, ids, out| {
        multi_dot_grouped(q, m, d, ids, out, 8)
    });
    bench_variant(c, "multi_dot_product", multi_dot_product);
}

criterion_group!(benches, bench_multi_dot);
criterion_main!(benches);
