use crate::dataset::Dataset;
use crate::distance::Similarity;
use crate::error::{LshError, Result};
use crate::hash::{
    source::{HashSource, HashSourceOptions},
    HashFamily, NUM_SKETCHES, SKETCH_BITS,
};
use rand::Rng;
use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::ParallelSliceMut,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
/// Short one-bit-per-function sketches of every point, used to discard unpromising candidates before evaluating their similarity.
pub struct SketchFilter<F: HashFamily> {
    source: HashSource<F>,
    sketches: Vec<u64>,
}

#[derive(Debug, Clone, Copy)]
/// The Hamming threshold for one similarity, kept between candidates until the similarity changes.
pub struct SketchThreshold {
    similarity: f32,
    max_distance: u32,
}

impl<F: HashFamily> SketchFilter<F> {
    /// Sample the sketch functions.
    ///
    /// # Arguments
    ///
    /// * `family` - A one-bit family matching the indexed similarity.
    ///
    /// * `rng` - The source of randomness.
    pub fn new<R: Rng + ?Sized>(family: F, rng: &mut R) -> Result<Self> {
        if family.bits_per_function() != 1 {
            return Err(LshError::invalid("sketches need one bit per function"));
        }
        Ok(Self {
            source: HashSource::build(
                HashSourceOptions::Independent,
                family,
                NUM_SKETCHES,
                SKETCH_BITS,
                rng,
            )?,
            sketches: Vec::new(),
        })
    }

    /// The family the sketch functions were sampled from.
    pub fn family(&self) -> &F {
        self.source.family()
    }

    /// The number of sketched points.
    pub fn len(&self) -> usize {
        self.sketches.len() / NUM_SKETCHES
    }

    /// Whether no points have been sketched.
    pub fn is_empty(&self) -> bool {
        self.sketches.is_empty()
    }

    /// Sketch every point of the dataset that has not been sketched yet.
    pub fn extend<S: Similarity<Element = F::Element>>(&mut self, dataset: &Dataset<S>) {
        let start = self.len();
        let end = dataset.len();
        if end <= start {
            return;
        }
        self.sketches.resize(end * NUM_SKETCHES, 0);
        let source = &self.source;
        self.sketches[start * NUM_SKETCHES..]
            .par_chunks_mut(NUM_SKETCHES)
            .enumerate()
            .for_each_init(Vec::new, |hashes, (offset, sketches)| {
                source.hash_repetitions(dataset.point((start + offset) as u32), hashes);
                sketches.copy_from_slice(hashes);
            });
    }

    /// Sketch a packed query.
    pub fn sketch(&self, point: &[F::Element]) -> Vec<u64> {
        let mut sketches = Vec::with_capacity(NUM_SKETCHES);
        self.source.hash_repetitions(point, &mut sketches);
        sketches
    }

    /// The Hamming distance between a point's sketch and the query's, using the sketch assigned to `table`.
    pub fn distance(&self, query: &[u64], id: u32, table: usize) -> u32 {
        let which = table % NUM_SKETCHES;
        (self.sketches[id as usize * NUM_SKETCHES + which] ^ query[which]).count_ones()
    }

    /// The largest Hamming distance a point of the given similarity exceeds with probability at most `failure`.
    ///
    /// # Arguments
    ///
    /// * `similarity` - The similarity a kept candidate must be able to have.
    ///
    /// * `failure` - The tolerated probability of discarding such a candidate.
    pub fn max_distance(&self, similarity: f32, failure: f32) -> u32 {
        if failure <= 0.0 {
            return SKETCH_BITS;
        }
        let differ = 1.0 - self.source.collision_probability(similarity, 1) as f64;
        if differ <= 0.0 {
            return 0;
        }
        if differ >= 1.0 {
            return SKETCH_BITS;
        }
        let n = SKETCH_BITS as f64;
        let mut log_choose = 0.0f64;
        let mut cumulative = 0.0f64;
        for distance in 0..SKETCH_BITS {
            let d = distance as f64;
            if distance > 0 {
                log_choose += ((n - d + 1.0) / d).ln();
            }
            cumulative += (log_choose + d * differ.ln() + (n - d) * (1.0 - differ).ln()).exp();
            if 1.0 - cumulative <= failure as f64 {
                return distance;
            }
        }
        SKETCH_BITS
    }

    /// The threshold for `similarity`, reusing `cached` when the similarity has not changed.
    pub fn threshold(&self, cached: &mut Option<SketchThreshold>, similarity: f32, failure: f32) -> u32 {
        match cached {
            Some(threshold) if threshold.similarity == similarity => threshold.max_distance,
            _ => {
                let max_distance = self.max_distance(similarity, failure);
                *cached = Some(SketchThreshold {
                    similarity,
                    max_distance,
                });
                max_distance
            }
        }
    }

    /// The number of bytes the sketches of `len` points and their functions occupy.
    pub fn memory_usage_for(family: &F, len: usize) -> usize {
        size_of::<Self>()
            + HashSourceOptions::Independent.memory_usage(family, NUM_SKETCHES, SKETCH_BITS)
            + len * NUM_SKETCHES * size_of::<u64>()
    }

    /// Check the structural invariants of deserialized sketches.
    pub fn validate(&self, num_points: usize) -> Result<()> {
        self.source.validate()?;
        if self.source.num_tables() != NUM_SKETCHES || self.source.hash_length() != SKETCH_BITS {
            return Err(LshError::corrupt("sketch functions have the wrong shape"));
        }
        if self.sketches.len() % NUM_SKETCHES != 0 || self.len() > num_points {
            return Err(LshError::corrupt("sketch count does not match the dataset"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::AngularSimilarity;
    use rand::{rngs::StdRng, SeedableRng};

    fn filter() -> Result<SketchFilter<<AngularSimilarity as Similarity>::Sketch>> {
        SketchFilter::new(AngularSimilarity::sketch_family(16), &mut StdRng::seed_from_u64(21))
    }

    #[test]
    fn identical_points_have_identical_sketches() -> Result<()> {
        let mut dataset = Dataset::<AngularSimilarity>::new(16)?;
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..20 {
            let point = dataset.random_input(&mut rng);
            dataset.store(&point)?;
        }
        let mut sketches = filter()?;
        sketches.extend(&dataset);
        assert_eq!(sketches.len(), 20);
        let query = sketches.sketch(dataset.point(5));
        for table in 0..40 {
            assert_eq!(sketches.distance(&query, 5, table), 0);
        }
        assert!((0..20).any(|id| sketches.distance(&query, id, 0) > 0));
        sketches.validate(20)?;
        Ok(())
    }

    #[test]
    fn threshold_grows_as_similarity_falls() -> Result<()> {
        let sketches = filter()?;
        let close = sketches.max_distance(0.95, 0.01);
        let far = sketches.max_distance(0.6, 0.01);
        assert!(close < far);
        assert!(far <= SKETCH_BITS);
        assert_eq!(sketches.max_distance(1.0, 0.01), 0);
        assert_eq!(sketches.max_distance(0.9, 0.0), SKETCH_BITS);
        let looser = sketches.max_distance(0.6, 0.001);
        assert!(looser >= far);
        Ok(())
    }

    #[test]
    fn threshold_is_cached_per_similarity() -> Result<()> {
        let sketches = filter()?;
        let mut cached = None;
        let first = sketches.threshold(&mut cached, 0.7, 0.05);
        assert_eq!(sketches.threshold(&mut cached, 0.7, 0.05), first);
        assert!(sketches.threshold(&mut cached, 0.99, 0.05) <= first);
        Ok(())
    }
}
