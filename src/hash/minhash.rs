use super::{HashFamily, HashFunction};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// The splitmix64 finaliser; a bijection on `u64`, so distinct tokens never tie.
fn mix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A MinHash function: the member with the smallest keyed rank, re-mixed down to a few bits.
pub struct MinHashFunction {
    key: u64,
    mix: u64,
    bits: u32,
}

impl MinHashFunction {
    fn rank(&self, token: u64) -> u64 {
        mix64(token ^ self.key)
    }
}

impl HashFunction for MinHashFunction {
    type Element = u8;

    fn hash(&self, point: &[u8]) -> u64 {
        let mut minimum = (u64::MAX, 0u64);
        for (index, &byte) in point.iter().enumerate() {
            let mut remaining = byte;
            while remaining != 0 {
                let token = (index * 8 + remaining.trailing_zeros() as usize) as u64;
                remaining &= remaining - 1;
                let rank = self.rank(token);
                if rank < minimum.0 {
                    minimum = (rank, token);
                }
            }
        }
        mix64(minimum.1 ^ self.mix) >> (64 - self.bits)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// MinHash over bitsets; two sets collide on a function with probability `J + (1 − J)/2^bits`.
pub struct MinHashFamily {
    universe: usize,
    bits: u32,
}

impl MinHashFamily {
    /// Create a family over subsets of `0..universe`.
    ///
    /// # Arguments
    ///
    /// * `universe` - The number of distinct tokens.
    ///
    /// * `bits` - The number of bits each function produces.
    pub fn new(universe: usize, bits: u32) -> Self {
        Self { universe, bits }
    }

    /// The number of distinct tokens.
    pub fn universe(&self) -> usize {
        self.universe
    }
}

impl HashFamily for MinHashFamily {
    type Element = u8;
    type Function = MinHashFunction;

    fn bits_per_function(&self) -> u32 {
        self.bits
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> MinHashFunction {
        MinHashFunction {
            key: rng.random(),
            mix: rng.random(),
            bits: self.bits,
        }
    }

    fn collision_probability(&self, similarity: f32, num_bits: u32) -> f32 {
        let similarity = similarity.clamp(0.0, 1.0);
        let per_function = similarity + (1.0 - similarity) / (1u64 << self.bits) as f32;
        per_function.powf(num_bits as f32 / self.bits as f32)
    }

    fn icollision_probability(&self, probability: f32) -> f32 {
        let chance = 1.0 / (1u64 << self.bits) as f32;
        ((probability - chance) / (1.0 - chance)).clamp(0.0, 1.0)
    }

    fn function_memory(&self) -> usize {
        size_of::<MinHashFunction>()
    }

    fn is_compatible(&self, function: &MinHashFunction) -> bool {
        function.bits == self.bits
    }
}
