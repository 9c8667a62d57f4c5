use crate::distance::Similarity;
use crate::error::{LshError, Result};
use crate::metrics::DistanceCounter;
use rand::Rng;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
/// Packed storage of points under a similarity measure, addressed by dense point ids.
///
/// Every similarity or distance evaluated through a dataset is recorded by its [`DistanceCounter`].
pub struct Dataset<S: Similarity> {
    dimensions: usize,
    storage_len: usize,
    storage: Vec<S::Element>,
    #[serde(skip, default = "DistanceCounter::global")]
    counter: DistanceCounter,
}

impl<S: Similarity> Dataset<S> {
    /// Create an empty dataset.
    ///
    /// # Arguments
    ///
    /// * `dimensions` - The dimensionality of vectors, or the universe size of sets.
    ///
    /// # Returns
    ///
    /// An empty dataset reporting to the process-wide distance counter.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(LshError::invalid("dimensions must be positive"));
        }
        Ok(Self {
            dimensions,
            storage_len: S::storage_len(dimensions),
            storage: Vec::new(),
            counter: DistanceCounter::global(),
        })
    }

    /// Report distance computations to the given counter instead.
    pub fn with_counter(mut self, counter: DistanceCounter) -> Self {
        self.counter = counter;
        self
    }

    /// The counter distance computations are reported to.
    pub fn counter(&self) -> &DistanceCounter {
        &self.counter
    }

    pub(crate) fn set_counter(&mut self, counter: DistanceCounter) {
        self.counter = counter;
    }

    /// The dimensionality (or universe size) of the points.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The number of storage elements per point.
    pub fn storage_len(&self) -> usize {
        self.storage_len
    }

    /// The number of stored points.
    pub fn len(&self) -> usize {
        self.storage.len() / self.storage_len
    }

    /// Whether no points are stored.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Convert a point into packed storage without storing it.
    ///
    /// # Arguments
    ///
    /// * `input` - The point as given by the caller.
    ///
    /// # Returns
    ///
    /// The packed point, ready to be compared against stored points.
    pub fn prepare(&self, input: &[S::Scalar]) -> Result<Vec<S::Element>> {
        let mut packed = vec![S::Element::default(); self.storage_len];
        S::store(input, self.dimensions, &mut packed)?;
        Ok(packed)
    }

    /// Store a point.
    ///
    /// # Arguments
    ///
    /// * `input` - The point as given by the caller.
    ///
    /// # Returns
    ///
    /// The id of the stored point.
    pub fn store(&mut self, input: &[S::Scalar]) -> Result<u32> {
        let packed = self.prepare(input)?;
        self.push_packed(&packed)
    }

    /// Store an already packed point, such as one taken from another dataset of the same shape.
    pub(crate) fn push_packed(&mut self, packed: &[S::Element]) -> Result<u32> {
        if packed.len() != self.storage_len {
            return Err(LshError::invalid(format!(
                "expected {} storage elements, got {}",
                self.storage_len,
                packed.len()
            )));
        }
        let id = u32::try_from(self.len())
            .map_err(|_| LshError::invalid("a dataset holds at most 2^32 points"))?;
        self.storage.extend_from_slice(packed);
        Ok(id)
    }

    /// The packed storage of a point.
    ///
    /// # Panics
    ///
    /// If `id` is not a stored point.
    pub fn point(&self, id: u32) -> &[S::Element] {
        let start = id as usize * self.storage_len;
        &self.storage[start..start + self.storage_len]
    }

    /// The packed storage of a point, if it exists.
    pub fn get(&self, id: u32) -> Option<&[S::Element]> {
        let start = id as usize * self.storage_len;
        self.storage.get(start..start + self.storage_len)
    }

    fn checked_point(&self, id: u32) -> Result<&[S::Element]> {
        self.get(id)
            .ok_or_else(|| LshError::invalid(format!("point {id} does not exist")))
    }

    /// The similarity of two stored points.
    pub fn similarity(&self, a: u32, b: u32) -> Result<f32> {
        self.counter.increment();
        S::similarity(self.checked_point(a)?, self.checked_point(b)?)
    }

    /// The similarity of a packed query to a stored point.
    pub fn similarity_to(&self, query: &[S::Element], id: u32) -> Result<f32> {
        self.counter.increment();
        S::similarity(query, self.checked_point(id)?)
    }

    /// The metric distance between two stored points.
    pub fn distance(&self, a: u32, b: u32) -> Result<f32> {
        self.similarity(a, b).map(S::distance_from_similarity)
    }

    /// The metric distance between a packed query and a stored point.
    pub fn distance_to(&self, query: &[S::Element], id: u32) -> Result<f32> {
        self.similarity_to(query, id).map(S::distance_from_similarity)
    }

    /// The distances from one stored point to every stored point, computed in parallel.
    pub fn all_distances(&self, id: u32) -> Result<Vec<f32>> {
        let query = self.checked_point(id)?;
        (0..self.len() as u32)
            .into_par_iter()
            .map(|other| self.distance_to(query, other))
            .collect()
    }

    /// A new dataset holding copies of the given points, in the given order.
    pub fn subset(&self, ids: &[u32]) -> Result<Self> {
        let mut storage = Vec::with_capacity(ids.len() * self.storage_len);
        for &id in ids {
            storage.extend_from_slice(self.checked_point(id)?);
        }
        Ok(Self {
            dimensions: self.dimensions,
            storage_len: self.storage_len,
            storage,
            counter: self.counter.clone(),
        })
    }

    /// Generate a random point of this dataset's shape.
    pub fn random_input<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<S::Scalar> {
        S::random_input(self.dimensions, rng)
    }

    /// The number of bytes `len` points occupy.
    pub fn memory_usage_for(dimensions: usize, len: usize) -> usize {
        size_of::<Self>() + len * S::storage_len(dimensions) * size_of::<S::Element>()
    }

    /// The number of bytes this dataset occupies.
    pub fn memory_usage(&self) -> usize {
        Self::memory_usage_for(self.dimensions, self.len())
    }

    /// Encode the dataset on its own.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::legacy(),
        )?)
    }

    /// Decode a dataset written by [`Dataset::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (dataset, read): (Self, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::legacy())?;
        if read != bytes.len() {
            return Err(LshError::corrupt("trailing bytes after dataset"));
        }
        dataset.validate()?;
        Ok(dataset)
    }

    /// Check the structural invariants of a deserialized dataset.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 || self.storage_len != S::storage_len(self.dimensions) {
            return Err(LshError::corrupt(format!(
                "storage length {} does not fit {} dimensions",
                self.storage_len, self.dimensions
            )));
        }
        if self.storage.len() % self.storage_len != 0 {
            return Err(LshError::corrupt("dataset storage ends in a partial point"));
        }
        if self.len() > u32::MAX as usize {
            return Err(LshError::corrupt("dataset holds too many points"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::{AngularSimilarity, EuclideanSimilarity, JaccardSimilarity};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn store_assigns_dense_ids() -> Result<()> {
        let mut dataset = Dataset::<EuclideanSimilarity>::new(3)?;
        assert_eq!(dataset.store(&[0.0, 0.0, 0.0])?, 0);
        assert_eq!(dataset.store(&[1.0, 0.0, 0.0])?, 1);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.point(1)[..3], [1.0, 0.0, 0.0]);
        assert!(dataset.get(2).is_none());
        assert!(matches!(
            dataset.store(&[1.0, 2.0]),
            Err(LshError::InvalidArgument(_))
        ));
        assert_eq!(dataset.len(), 2);
        Ok(())
    }

    #[test]
    fn evaluations_are_counted() -> Result<()> {
        let counter = DistanceCounter::new();
        let mut dataset = Dataset::<AngularSimilarity>::new(4)?.with_counter(counter.clone());
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..10 {
            let point = dataset.random_input(&mut rng);
            dataset.store(&point)?;
        }
        dataset.similarity(0, 1)?;
        let distances = dataset.all_distances(3)?;
        assert_eq!(distances.len(), 10);
        assert!(distances[3].abs() < 1e-3);
        assert_eq!(counter.get(), 11);
        Ok(())
    }

    #[test]
    fn subset_copies_points_in_order() -> Result<()> {
        let mut dataset = Dataset::<JaccardSimilarity>::new(50)?;
        dataset.store(&[1, 2, 3])?;
        dataset.store(&[4, 5])?;
        dataset.store(&[6])?;
        let subset = dataset.subset(&[2, 0])?;
        assert_eq!(subset.len(), 2);
        assert_eq!(subset.point(0), dataset.point(2));
        assert_eq!(subset.point(1), dataset.point(0));
        assert!(subset.counter().shares_count_with(dataset.counter()));
        assert!(matches!(dataset.subset(&[3]), Err(LshError::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn bytes_round_trip() -> Result<()> {
        let mut dataset = Dataset::<EuclideanSimilarity>::new(2)?;
        dataset.store(&[1.5, -2.0])?;
        let restored = Dataset::<EuclideanSimilarity>::from_bytes(&dataset.to_bytes()?)?;
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.point(0), dataset.point(0));
        let bytes = dataset.to_bytes()?;
        assert!(matches!(
            Dataset::<EuclideanSimilarity>::from_bytes(&bytes[..bytes.len() - 3]),
            Err(LshError::CorruptState(_))
        ));
        Ok(())
    }
}
