use divan::black_box;
use oxtsse_common::bloom::{BloomFilter, digest_to_index, probe_message};
use oxtsse_common::primitives;

fn main() {
    divan::main();
}

const SCALAR_A: [u8; 32] = [0x11; 32];
const SCALAR_B: [u8; 32] = [0x07; 32];
const BLOCK: [u8; 16] = [0x2b; 16];

#[divan::bench]
fn prf_eval() -> [u8; 16] {
    primitives::prf(black_box(&BLOCK), black_box(&BLOCK))
}

#[divan::bench]
fn probe_digest() -> [u8; 64] {
    primitives::digest(black_box(&BLOCK))
}

#[divan::bench]
fn field_mul() -> [u8; 32] {
    primitives::field_mul(black_box(&SCALAR_A), black_box(&SCALAR_B))
}

#[divan::bench]
fn field_inverse() -> [u8; 32] {
    primitives::field_inverse(black_box(&SCALAR_A))
}

#[divan::bench]
fn fixed_base_scalar_mul() -> [u8; 32] {
    primitives::scalar_mul_fixed_base(black_box(&SCALAR_A))
}

#[divan::bench]
fn arbitrary_base_scalar_mul() -> [u8; 32] {
    primitives::scalar_mul(black_box(&SCALAR_A), black_box(&SCALAR_B))
}

#[divan::bench]
fn membership_probe(bencher: divan::Bencher) {
    let mut filter = BloomFilter::build(1 << 16, 16, 4).unwrap();
    let point = [0x42u8; 32];
    let indices: Vec<u32> = (0..4u8).map(|j| digest_to_index(&primitives::keyed_digest(&probe_message(&point, j)), 16)).collect();
    filter.insert_indices(&indices);

    bencher.bench_local(|| filter.query_all(black_box(std::slice::from_ref(&indices))));
}
