use crate::error::{LshError, Result};
use crate::hash::{
    l2::{Bucketing, L2HashFamily},
    minhash::MinHashFamily,
    simhash::SimHashFamily,
    HashFamily, BITS_PER_FUNCTION,
};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use simsimd::{BinarySimilarity, SpatialSimilarity};
use std::fmt::{Debug, Display};
use std::str::FromStr;

/// Stored points are padded to a multiple of this many bytes.
pub const STORAGE_ALIGNMENT: usize = 32;

/// The width of the buckets used when hashing Euclidean points.
pub const L2_BUCKET_WIDTH: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// The similarity measures an index can be built over.
pub enum SimilarityKind {
    /// Cosine similarity between real vectors.
    Angular,
    /// Similarity derived from the Euclidean distance between real vectors.
    Euclidean,
    /// Jaccard similarity between sets of tokens.
    Jaccard,
}

impl FromStr for SimilarityKind {
    type Err = LshError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "angular" | "cosine" => Ok(Self::Angular),
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "jaccard" => Ok(Self::Jaccard),
            other => Err(LshError::invalid(format!("unknown similarity kind `{other}`"))),
        }
    }
}

impl Display for SimilarityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Angular => "angular",
            Self::Euclidean => "euclidean",
            Self::Jaccard => "jaccard",
        };
        f.write_str(name)
    }
}

/// A similarity measure, together with the storage format and hash families it is searched with.
///
/// Similarities lie in `[0, 1]`, with higher values meaning closer points.
pub trait Similarity:
    Debug + Default + Clone + Copy + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The packed storage element.
    type Element: Copy + Default + Debug + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// The element type of caller-supplied points.
    type Scalar: Copy + Debug + Send + Sync + 'static;

    /// The family used for the per-table hashes.
    type Hash: HashFamily<Element = Self::Element>;

    /// The one-bit family used for sketches.
    type Sketch: HashFamily<Element = Self::Element>;

    /// The kind tag of this measure.
    const KIND: SimilarityKind;

    /// The number of storage elements per point for the given dimensionality.
    fn storage_len(dimensions: usize) -> usize;

    /// Convert a caller-supplied point into its packed storage.
    ///
    /// # Arguments
    ///
    /// * `input` - The point as given by the caller.
    ///
    /// * `dimensions` - The dimensionality (or universe size) of the dataset.
    ///
    /// * `storage` - A zeroed slice of `storage_len(dimensions)` elements to write into.
    fn store(input: &[Self::Scalar], dimensions: usize, storage: &mut [Self::Element]) -> Result<()>;

    /// The similarity of two stored points.
    fn similarity(a: &[Self::Element], b: &[Self::Element]) -> Result<f32>;

    /// A metric distance that decreases as the similarity increases.
    fn distance_from_similarity(similarity: f32) -> f32;

    /// Generate a random point of the given dimensionality.
    fn random_input<R: Rng + ?Sized>(dimensions: usize, rng: &mut R) -> Vec<Self::Scalar>;

    /// The per-table hash family for points of the given dimensionality.
    fn hash_family(dimensions: usize) -> Self::Hash;

    /// The sketch family for points of the given dimensionality.
    fn sketch_family(dimensions: usize) -> Self::Sketch;
}

fn padded_len(elements: usize, element_size: usize) -> usize {
    let per_block = STORAGE_ALIGNMENT / element_size;
    elements.div_ceil(per_block).max(1) * per_block
}

fn checked_similarity(value: Option<f64>, name: &str) -> Result<f64> {
    match value {
        Some(value) if value.is_finite() => Ok(value),
        Some(value) => Err(LshError::corrupt(format!("{name} produced {value}"))),
        None => Err(LshError::corrupt(format!("{name} could not be computed"))),
    }
}

fn check_dimensions(given: usize, expected: usize) -> Result<()> {
    match given == expected {
        true => Ok(()),
        false => Err(LshError::invalid(format!(
            "expected {expected} dimensions, got {given}"
        ))),
    }
}

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize)]
/// Angular similarity, `(1 + cos θ) / 2`. Vectors are normalised to unit length when stored.
pub struct AngularSimilarity;

impl Similarity for AngularSimilarity {
    type Element = f32;
    type Scalar = f32;
    type Hash = SimHashFamily;
    type Sketch = SimHashFamily;
    const KIND: SimilarityKind = SimilarityKind::Angular;

    fn storage_len(dimensions: usize) -> usize {
        padded_len(dimensions, size_of::<f32>())
    }

    fn store(input: &[f32], dimensions: usize, storage: &mut [f32]) -> Result<()> {
        check_dimensions(input.len(), dimensions)?;
        if input.iter().any(|x| !x.is_finite()) {
            return Err(LshError::invalid("vector contains a non-finite value"));
        }
        let norm = f32::dot(input, input).unwrap_or_default().sqrt() as f32;
        if norm == 0.0 || !norm.is_finite() {
            return Err(LshError::invalid("cannot store a zero vector under angular similarity"));
        }
        for (slot, x) in storage.iter_mut().zip(input) {
            *slot = x / norm;
        }
        Ok(())
    }

    fn similarity(a: &[f32], b: &[f32]) -> Result<f32> {
        let cosine = checked_similarity(f32::dot(a, b), "dot product")?.clamp(-1.0, 1.0);
        Ok(((1.0 + cosine) / 2.0) as f32)
    }

    fn distance_from_similarity(similarity: f32) -> f32 {
        (2.0 * similarity - 1.0).clamp(-1.0, 1.0).acos()
    }

    fn random_input<R: Rng + ?Sized>(dimensions: usize, rng: &mut R) -> Vec<f32> {
        (0..dimensions).map(|_| rng.sample(StandardNormal)).collect()
    }

    fn hash_family(dimensions: usize) -> SimHashFamily {
        SimHashFamily::new(Self::storage_len(dimensions), BITS_PER_FUNCTION)
    }

    fn sketch_family(dimensions: usize) -> SimHashFamily {
        SimHashFamily::new(Self::storage_len(dimensions), 1)
    }
}

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize)]
/// Euclidean similarity, `1 / (1 + ‖a − b‖)`.
pub struct EuclideanSimilarity;

impl Similarity for EuclideanSimilarity {
    type Element = f32;
    type Scalar = f32;
    type Hash = L2HashFamily;
    type Sketch = L2HashFamily;
    const KIND: SimilarityKind = SimilarityKind::Euclidean;

    fn storage_len(dimensions: usize) -> usize {
        padded_len(dimensions, size_of::<f32>())
    }

    fn store(input: &[f32], dimensions: usize, storage: &mut [f32]) -> Result<()> {
        check_dimensions(input.len(), dimensions)?;
        if input.iter().any(|x| !x.is_finite()) {
            return Err(LshError::invalid("vector contains a non-finite value"));
        }
        storage[..input.len()].copy_from_slice(input);
        Ok(())
    }

    fn similarity(a: &[f32], b: &[f32]) -> Result<f32> {
        let squared = checked_similarity(f32::sqeuclidean(a, b), "squared Euclidean distance")?;
        Ok((1.0 / (1.0 + squared.max(0.0).sqrt())) as f32)
    }

    fn distance_from_similarity(similarity: f32) -> f32 {
        match similarity > 0.0 {
            true => (1.0 / similarity - 1.0).max(0.0),
            false => f32::INFINITY,
        }
    }

    fn random_input<R: Rng + ?Sized>(dimensions: usize, rng: &mut R) -> Vec<f32> {
        (0..dimensions).map(|_| rng.sample(StandardNormal)).collect()
    }

    fn hash_family(dimensions: usize) -> L2HashFamily {
        L2HashFamily::new(
            Self::storage_len(dimensions),
            BITS_PER_FUNCTION,
            L2_BUCKET_WIDTH,
            Bucketing::Clamp,
        )
    }

    fn sketch_family(dimensions: usize) -> L2HashFamily {
        L2HashFamily::new(Self::storage_len(dimensions), 1, L2_BUCKET_WIDTH, Bucketing::Parity)
    }
}

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize)]
/// Jaccard similarity, `|A ∩ B| / |A ∪ B|`, over sets of tokens from `0..universe`.
///
/// Sets are stored as bitsets.
pub struct JaccardSimilarity;

impl Similarity for JaccardSimilarity {
    type Element = u8;
    type Scalar = u32;
    type Hash = MinHashFamily;
    type Sketch = MinHashFamily;
    const KIND: SimilarityKind = SimilarityKind::Jaccard;

    fn storage_len(universe: usize) -> usize {
        padded_len(universe.div_ceil(8), size_of::<u8>())
    }

    fn store(input: &[u32], universe: usize, storage: &mut [u8]) -> Result<()> {
        if input.is_empty() {
            return Err(LshError::invalid("cannot store an empty set"));
        }
        for &token in input {
            let token = token as usize;
            if token >= universe {
                return Err(LshError::invalid(format!(
                    "token {token} lies outside the universe of {universe} tokens"
                )));
            }
            storage[token / 8] |= 1 << (token % 8);
        }
        Ok(())
    }

    fn similarity(a: &[u8], b: &[u8]) -> Result<f32> {
        let distance = checked_similarity(u8::jaccard(a, b), "Jaccard distance")?;
        Ok((1.0 - distance).clamp(0.0, 1.0) as f32)
    }

    fn distance_from_similarity(similarity: f32) -> f32 {
        (1.0 - similarity).clamp(0.0, 1.0)
    }

    fn random_input<R: Rng + ?Sized>(universe: usize, rng: &mut R) -> Vec<u32> {
        let mut tokens: Vec<u32> = (0..universe as u32)
            .filter(|_| rng.random_bool(0.1))
            .collect();
        if tokens.is_empty() && universe > 0 {
            tokens.push(rng.random_range(0..universe as u32));
        }
        tokens
    }

    fn hash_family(universe: usize) -> MinHashFamily {
        MinHashFamily::new(universe, BITS_PER_FUNCTION)
    }

    fn sketch_family(universe: usize) -> MinHashFamily {
        MinHashFamily::new(universe, 1)
    }
}
