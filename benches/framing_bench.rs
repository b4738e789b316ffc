use blockvault::framing;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_framing(c: &mut Criterion) {
    let value = vec![0xABu8; 1 << 20];
    let block_size = value.len() as u32;
    let packed = framing::pack(&value, block_size).unwrap();

    c.bench_function("framing_pack_1mb", |b| {
        b.iter(|| framing::pack(black_box(&value), block_size).unwrap())
    });

    c.bench_function("framing_unpack_1mb", |b| {
        b.iter(|| framing::unpack(black_box(&packed)).unwrap())
    });

    let small = vec![0xCDu8; 64];
    c.bench_function("framing_pack_64b", |b| {
        b.iter(|| framing::pack(black_box(&small), 64).unwrap())
    });
}

criterion_group!(benches, bench_framing);
criterion_main!(benches);
