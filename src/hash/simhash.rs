use super::{HashFamily, HashFunction};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use simsimd::SpatialSimilarity;
use std::f32::consts::PI;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A hyperplane through the origin; a hyperplane is a generalisation of a line (which has one dimension) or plane (which has two dimensions).
///
/// It is defined when the dot product of its normal vector and some other vector equals zero.
pub struct Hyperplane {
    /// The vector normal to the hyperplane.
    pub coefficients: Vec<f32>,
}

impl Hyperplane {
    /// Calculates if a point is 'above' the hyperplane.
    ///
    /// A point is 'above' a hyperplane when it is pointing in the same direction as the hyperplane's normal vector.
    ///
    /// # Arguments
    ///
    /// * `point` - The point which may be above, on, or below the hyperplane.
    ///
    /// # Returns
    ///
    /// If the given point is above the hyperplane.
    pub fn point_is_above(&self, point: &[f32]) -> bool {
        f32::dot(&self.coefficients, point).unwrap_or_default() >= 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A SimHash function: one bit per hyperplane, the first hyperplane giving the most significant bit.
pub struct SimHashFunction {
    hyperplanes: Vec<Hyperplane>,
}

impl HashFunction for SimHashFunction {
    type Element = f32;

    fn hash(&self, point: &[f32]) -> u64 {
        self.hyperplanes
            .iter()
            .fold(0, |hash, plane| (hash << 1) | plane.point_is_above(point) as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Random-hyperplane hashing; two vectors at angle θ land on the same side of a Gaussian hyperplane with probability `1 − θ/π`.
pub struct SimHashFamily {
    dimensions: usize,
    bits: u32,
}

impl SimHashFamily {
    /// Create a family over vectors of the given (storage) dimensionality.
    ///
    /// # Arguments
    ///
    /// * `dimensions` - The length of the stored vectors.
    ///
    /// * `bits` - The number of hyperplanes, and thus bits, in each function.
    pub fn new(dimensions: usize, bits: u32) -> Self {
        Self { dimensions, bits }
    }

    fn bit_collision_probability(similarity: f32) -> f32 {
        let angle = (2.0 * similarity - 1.0).clamp(-1.0, 1.0).acos();
        (1.0 - angle / PI).clamp(0.0, 1.0)
    }
}

impl HashFamily for SimHashFamily {
    type Element = f32;
    type Function = SimHashFunction;

    fn bits_per_function(&self) -> u32 {
        self.bits
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> SimHashFunction {
        let hyperplanes = (0..self.bits)
            .map(|_| Hyperplane {
                coefficients: (0..self.dimensions)
                    .map(|_| rng.sample(StandardNormal))
                    .collect(),
            })
            .collect();
        SimHashFunction { hyperplanes }
    }

    fn collision_probability(&self, similarity: f32, num_bits: u32) -> f32 {
        Self::bit_collision_probability(similarity).powi(num_bits as i32)
    }

    fn icollision_probability(&self, probability: f32) -> f32 {
        let per_bit = probability.clamp(0.0, 1.0).powf(1.0 / self.bits as f32);
        let angle = PI * (1.0 - per_bit);
        (1.0 + angle.cos()) / 2.0
    }

    fn function_memory(&self) -> usize {
        size_of::<SimHashFunction>()
            + self.bits as usize * (size_of::<Hyperplane>() + self.dimensions * size_of::<f32>())
    }

    fn is_compatible(&self, function: &SimHashFunction) -> bool {
        function.hyperplanes.len() == self.bits as usize
            && function
                .hyperplanes
                .iter()
                .all(|plane| plane.coefficients.len() == self.dimensions)
    }
}
