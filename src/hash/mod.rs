use rand::Rng;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// Random-projection (SimHash) hashing for angular similarity.
pub mod simhash;
/// Bucketed random-projection hashing for Euclidean similarity.
pub mod l2;
/// MinHash for Jaccard similarity over sets.
pub mod minhash;
/// Strategies for producing one hash per table from a hash family.
pub mod source;

/// The number of bits in the hash stored for each table.
pub const HASH_LENGTH: u32 = 24;

/// The number of bits produced by each hash function; shortening a prefix removes one function's worth of bits.
pub const BITS_PER_FUNCTION: u32 = 4;

/// The number of independent sketches kept for every point.
pub const NUM_SKETCHES: usize = 32;

/// The number of bits in each sketch.
pub const SKETCH_BITS: u32 = 64;

/// A function sampled from a [`HashFamily`].
pub trait HashFunction: Debug + Clone + Serialize + DeserializeOwned + Send + Sync {
    /// The storage element type of hashed points.
    type Element: Send + Sync;

    /// Hash a stored point.
    ///
    /// # Arguments
    ///
    /// * `point` - The packed storage of the point.
    ///
    /// # Returns
    ///
    /// A value using at most the family's `bits_per_function` low bits.
    fn hash(&self, point: &[Self::Element]) -> u64;
}

/// A family of locality-sensitive hash functions, whose collision probability is an invertible function of similarity.
pub trait HashFamily: Debug + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The storage element type of hashed points.
    type Element: Send + Sync;

    /// The functions sampled from this family.
    type Function: HashFunction<Element = Self::Element>;

    /// The number of bits each sampled function produces.
    fn bits_per_function(&self) -> u32;

    /// Sample a function from the family.
    ///
    /// # Arguments
    ///
    /// * `rng` - The source of randomness.
    ///
    /// # Returns
    ///
    /// A hash function.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Function;

    /// The probability that two points agree on `num_bits` concatenated bits.
    ///
    /// # Arguments
    ///
    /// * `similarity` - The similarity of the two points, in `[0, 1]`.
    ///
    /// * `num_bits` - The number of hash bits compared.
    ///
    /// # Returns
    ///
    /// A probability, non-decreasing in `similarity`.
    fn collision_probability(&self, similarity: f32, num_bits: u32) -> f32;

    /// The similarity at which a single sampled function collides with the given probability.
    ///
    /// The default inverts [`HashFamily::collision_probability`] by bisection.
    fn icollision_probability(&self, probability: f32) -> f32 {
        let target = probability.clamp(0.0, 1.0);
        let (mut low, mut high) = (0.0f32, 1.0f32);
        for _ in 0..48 {
            let mid = (low + high) / 2.0;
            match self.collision_probability(mid, self.bits_per_function()) < target {
                true => low = mid,
                false => high = mid,
            }
        }
        high
    }

    /// The number of bytes one sampled function occupies.
    fn function_memory(&self) -> usize;

    /// Whether a (deserialized) function could have been sampled from this family.
    fn is_compatible(&self, function: &Self::Function) -> bool;
}

/// Concatenate function outputs into one hash, keeping the `hash_length` most significant bits.
pub(crate) fn concatenate_hashes(
    values: impl Iterator<Item = u64>,
    bits_per_function: u32,
    bits_to_cut: u32,
) -> u64 {
    let mut hash = 0u64;
    for value in values {
        hash = (hash << bits_per_function) | value;
    }
    hash >> bits_to_cut
}

/// The error function, after Abramowitz & Stegun 7.1.26 (absolute error below 1.5e-7).
pub(crate) fn erf(x: f64) -> f64 {
    let sign = x.signum();
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}
