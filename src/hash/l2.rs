use super::{erf, HashFamily, HashFunction};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use simsimd::SpatialSimilarity;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
/// How a bucket number is reduced to the bits of a hash.
pub enum Bucketing {
    /// Shift the bucket into the middle of the representable range and clamp, keeping the map monotone.
    Clamp,
    /// Keep only the lowest bit of the bucket number.
    Parity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A projection onto a random Gaussian direction, cut into buckets of a fixed width.
pub struct L2HashFunction {
    direction: Vec<f32>,
    offset: f32,
    width: f32,
    bits: u32,
    bucketing: Bucketing,
}

impl L2HashFunction {
    /// The unreduced bucket a point falls into.
    pub fn bucket(&self, point: &[f32]) -> i64 {
        let projection = f32::dot(&self.direction, point).unwrap_or_default();
        ((projection + self.offset as f64) / self.width as f64).floor() as i64
    }
}

impl HashFunction for L2HashFunction {
    type Element = f32;

    fn hash(&self, point: &[f32]) -> u64 {
        let bucket = self.bucket(point);
        match self.bucketing {
            Bucketing::Clamp => {
                let max = (1i64 << self.bits) - 1;
                bucket
                    .saturating_add(1i64 << (self.bits - 1))
                    .clamp(0, max) as u64
            }
            Bucketing::Parity => (bucket & 1) as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Euclidean LSH after Datar et al., with similarities mapped to distances through `d = 1/s − 1`.
pub struct L2HashFamily {
    dimensions: usize,
    bits: u32,
    width: f32,
    bucketing: Bucketing,
}

impl L2HashFamily {
    /// Create a family over vectors of the given (storage) dimensionality.
    ///
    /// # Arguments
    ///
    /// * `dimensions` - The length of the stored vectors.
    ///
    /// * `bits` - The number of bits each function produces.
    ///
    /// * `width` - The bucket width.
    ///
    /// * `bucketing` - How bucket numbers become hash values.
    pub fn new(dimensions: usize, bits: u32, width: f32, bucketing: Bucketing) -> Self {
        Self {
            dimensions,
            bits,
            width,
            bucketing,
        }
    }

    /// The probability that two points at Euclidean distance `distance` share a bucket.
    pub fn bucket_collision_probability(&self, distance: f32) -> f32 {
        if distance <= 0.0 {
            return 1.0;
        }
        if !distance.is_finite() {
            return 0.0;
        }
        let c = (distance / self.width) as f64;
        let probability = erf(1.0 / (std::f64::consts::SQRT_2 * c))
            - c * (2.0 / std::f64::consts::PI).sqrt() * (1.0 - (-1.0 / (2.0 * c * c)).exp());
        probability.clamp(0.0, 1.0) as f32
    }
}

impl HashFamily for L2HashFamily {
    type Element = f32;
    type Function = L2HashFunction;

    fn bits_per_function(&self) -> u32 {
        self.bits
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> L2HashFunction {
        let direction = (0..self.dimensions)
            .map(|_| rng.sample(StandardNormal))
            .collect();
        let offset = self.width * rng.sample::<f32, _>(StandardNormal);
        L2HashFunction {
            direction,
            offset,
            width: self.width,
            bits: self.bits,
            bucketing: self.bucketing,
        }
    }

    /// Clamping only merges buckets, and equal buckets give equal parities, so for both reductions this is a lower bound.
    fn collision_probability(&self, similarity: f32, num_bits: u32) -> f32 {
        let distance = match similarity > 0.0 {
            true => (1.0 / similarity - 1.0).max(0.0),
            false => f32::INFINITY,
        };
        let functions = num_bits as f32 / self.bits as f32;
        self.bucket_collision_probability(distance).powf(functions)
    }

    fn function_memory(&self) -> usize {
        size_of::<L2HashFunction>() + self.dimensions * size_of::<f32>()
    }

    fn is_compatible(&self, function: &L2HashFunction) -> bool {
        function.direction.len() == self.dimensions
            && function.bits == self.bits
            && function.bucketing == self.bucketing
            && function.width == self.width
            && function.offset.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn clamped_hash_stays_in_range_and_is_monotone() {
        let family = L2HashFamily::new(4, 4, 4.0, Bucketing::Clamp);
        let mut rng = StdRng::seed_from_u64(3);
        let function = family.sample(&mut rng);
        let mut previous = 0;
        for step in -2000..=2000 {
            let scale = step as f32;
            let point: Vec<f32> = function.direction.iter().map(|x| x * scale).collect();
            let hash = function.hash(&point);
            assert!(hash < 16);
            assert!(hash >= previous);
            previous = hash;
        }
        assert_eq!(previous, 15);
    }

    #[test]
    fn extreme_coordinates_saturate_at_the_range_ends() {
        let family = L2HashFamily::new(4, 4, 4.0, Bucketing::Clamp);
        let mut rng = StdRng::seed_from_u64(9);
        let function = family.sample(&mut rng);
        let far: Vec<f32> = function.direction.iter().map(|x| x.signum() * 3.0e38).collect();
        let near: Vec<f32> = far.iter().map(|x| -x).collect();
        assert_eq!(function.hash(&far), 15);
        assert_eq!(function.hash(&near), 0);
        assert!(function.hash(&[3.0e38, 3.0e38, -3.0e38, 3.0e38]) < 16);
    }

    #[test]
    fn parity_is_one_bit() {
        let family = L2HashFamily::new(4, 1, 4.0, Bucketing::Parity);
        let mut rng = StdRng::seed_from_u64(5);
        let function = family.sample(&mut rng);
        for step in -50..50 {
            let point = [step as f32, 1.0, -1.0, 0.5];
            assert!(function.hash(&point) <= 1);
        }
    }

    #[test]
    fn collision_probability_decreases_with_distance() {
        let family = L2HashFamily::new(4, 4, 4.0, Bucketing::Clamp);
        assert_eq!(family.bucket_collision_probability(0.0), 1.0);
        let mut previous = 1.0;
        for distance in [0.1f32, 0.5, 1.0, 2.0, 4.0, 8.0, 32.0] {
            let probability = family.bucket_collision_probability(distance);
            assert!(probability <= previous);
            previous = probability;
        }
        assert!(previous < 0.2);
        assert_eq!(family.collision_probability(0.0, 4), 0.0);
    }

    #[test]
    fn collision_probability_inverts_by_bisection() {
        let family = L2HashFamily::new(4, 4, 4.0, Bucketing::Clamp);
        for similarity in [0.2f32, 0.5, 0.8] {
            let probability = family.collision_probability(similarity, 4);
            let recovered = family.icollision_probability(probability);
            assert!((recovered - similarity).abs() < 1e-3);
        }
    }
}
