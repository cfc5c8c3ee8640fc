#![allow(dead_code)]

pub mod reference;

use rand::{rngs::StdRng, Rng, SeedableRng};

pub fn random_vec(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}
