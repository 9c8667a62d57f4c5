use super::default::{AngularIndex, EuclideanIndex, JaccardIndex};
use crate::distance::SimilarityKind;
use crate::error::{LshError, Result};
use crate::index::{
    lsh::{IndexOptions, LshIndex},
    read_header, INDEX_MAGIC,
};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq)]
/// A point passed to an index whose similarity measure is only known at runtime.
pub enum Point<'a> {
    /// A real vector, for angular and Euclidean indexes.
    Vector(&'a [f32]),
    /// A set of token ids, for Jaccard indexes.
    Set(&'a [u32]),
}

impl<'a> From<&'a [f32]> for Point<'a> {
    fn from(vector: &'a [f32]) -> Self {
        Self::Vector(vector)
    }
}

impl<'a> From<&'a [u32]> for Point<'a> {
    fn from(set: &'a [u32]) -> Self {
        Self::Set(set)
    }
}

#[derive(Debug, Clone)]
/// An index over one of the supported similarity measures, chosen by name.
pub enum AnyIndex {
    /// An index using cosine similarity.
    Angular(AngularIndex),
    /// An index using Euclidean distance.
    Euclidean(EuclideanIndex),
    /// An index using Jaccard similarity.
    Jaccard(JaccardIndex),
}

fn mismatch(kind: SimilarityKind, point: &Point) -> LshError {
    let given = match point {
        Point::Vector(_) => "a vector",
        Point::Set(_) => "a set",
    };
    LshError::invalid(format!("{kind} indexes cannot take {given}"))
}

impl AnyIndex {
    /// Create an empty index.
    ///
    /// # Arguments
    ///
    /// * `kind` - The name of the similarity measure: `angular`, `euclidean`, or `jaccard`.
    ///
    /// * `dimensions` - The dimensionality of vectors, or the universe size of sets.
    ///
    /// * `memory_limit` - The number of bytes the index may occupy when choosing its table count.
    pub fn create(kind: &str, dimensions: usize, memory_limit: usize) -> Result<Self> {
        let options = IndexOptions {
            memory_limit,
            ..Default::default()
        };
        Self::with_options(kind.parse()?, dimensions, options)
    }

    /// Create an empty index of the given measure with full control over its options.
    pub fn with_options(kind: SimilarityKind, dimensions: usize, options: IndexOptions) -> Result<Self> {
        Ok(match kind {
            SimilarityKind::Angular => Self::Angular(LshIndex::new(dimensions, options)?),
            SimilarityKind::Euclidean => Self::Euclidean(LshIndex::new(dimensions, options)?),
            SimilarityKind::Jaccard => Self::Jaccard(LshIndex::new(dimensions, options)?),
        })
    }

    /// The similarity measure of the index.
    pub fn kind(&self) -> SimilarityKind {
        match self {
            Self::Angular(_) => SimilarityKind::Angular,
            Self::Euclidean(_) => SimilarityKind::Euclidean,
            Self::Jaccard(_) => SimilarityKind::Jaccard,
        }
    }

    /// The number of stored points.
    pub fn len(&self) -> usize {
        match self {
            Self::Angular(index) => index.len(),
            Self::Euclidean(index) => index.len(),
            Self::Jaccard(index) => index.len(),
        }
    }

    /// Whether no points are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a point; it becomes searchable after the next rebuild.
    pub fn insert<'a>(&mut self, point: impl Into<Point<'a>>) -> Result<u32> {
        let point = point.into();
        let kind = self.kind();
        match (self, point) {
            (Self::Angular(index), Point::Vector(vector)) => index.insert(vector),
            (Self::Euclidean(index), Point::Vector(vector)) => index.insert(vector),
            (Self::Jaccard(index), Point::Set(set)) => index.insert(set),
            _ => Err(mismatch(kind, &point)),
        }
    }

    /// Make every stored point searchable.
    ///
    /// # Returns
    ///
    /// The number of bytes the index occupies.
    pub fn rebuild(&mut self, num_tables: Option<usize>) -> Result<usize> {
        match self {
            Self::Angular(index) => index.rebuild(num_tables),
            Self::Euclidean(index) => index.rebuild(num_tables),
            Self::Jaccard(index) => index.rebuild(num_tables),
        }
    }

    /// Search for the points most similar to a query.
    ///
    /// # Returns
    ///
    /// At most `k` point ids, most similar first.
    pub fn search<'a>(
        &self,
        query: impl Into<Point<'a>>,
        k: usize,
        recall: f32,
        max_sim: f32,
    ) -> Result<Vec<u32>> {
        let query = query.into();
        match (self, query) {
            (Self::Angular(index), Point::Vector(vector)) => index.search(vector, k, recall, max_sim),
            (Self::Euclidean(index), Point::Vector(vector)) => index.search(vector, k, recall, max_sim),
            (Self::Jaccard(index), Point::Set(set)) => index.search(set, k, recall, max_sim),
            _ => Err(mismatch(self.kind(), &query)),
        }
    }

    /// The number of bytes the index occupies.
    pub fn memory_usage(&self) -> usize {
        match self {
            Self::Angular(index) => index.memory_usage(),
            Self::Euclidean(index) => index.memory_usage(),
            Self::Jaccard(index) => index.memory_usage(),
        }
    }

    /// Encode the index; the bytes are the same as those of the underlying [LshIndex].
    pub fn serialize(&self) -> Result<Vec<u8>> {
        match self {
            Self::Angular(index) => index.serialize(),
            Self::Euclidean(index) => index.serialize(),
            Self::Jaccard(index) => index.serialize(),
        }
    }

    /// Decode an index of any measure, dispatching on the measure named in its header.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (kind, body) = read_header(INDEX_MAGIC, bytes)?;
        Ok(match kind {
            SimilarityKind::Angular => Self::Angular(LshIndex::deserialize_body(body)?),
            SimilarityKind::Euclidean => Self::Euclidean(LshIndex::deserialize_body(body)?),
            SimilarityKind::Jaccard => Self::Jaccard(LshIndex::deserialize_body(body)?),
        })
    }
}

/// Create an index, logging the failure instead of returning it.
///
/// # Returns
///
/// The index, or `None` if the measure is unknown or the arguments are unusable.
pub fn create_or_report(kind: &str, dimensions: usize, memory_limit: usize) -> Option<AnyIndex> {
    match AnyIndex::create(kind, dimensions, memory_limit) {
        Ok(index) => Some(index),
        Err(e) => {
            error!(kind, dimensions, memory_limit, "could not create index: {e}");
            None
        }
    }
}
