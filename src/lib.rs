//! Clustered locality-sensitive hashing for approximate nearest neighbour search that stops once a requested recall is met.

/// Errors raised by the crate.
pub mod error;
/// Counting of distance computations.
pub mod metrics;
/// Similarity measures and the storage formats of points.
pub mod distance;
/// Packed, append-only storage of points.
pub mod dataset;
/// Locality-sensitive hash families and the sources that combine them into per-table hashes.
pub mod hash;
/// Locality-sensitive hashing indexes with recall-targeted search.
pub mod index;
/// Clustered databases of indexes, and indexes chosen at runtime.
pub mod database;

pub use database::any::{create_or_report, AnyIndex, Point};
pub use database::core::{Cluster, ClusterOptions, Database};
pub use dataset::Dataset;
pub use distance::{AngularSimilarity, EuclideanSimilarity, JaccardSimilarity, Similarity, SimilarityKind};
pub use error::{LshError, Result};
pub use hash::source::HashSourceOptions;
pub use index::lsh::{IndexOptions, IndexState, LshIndex};
pub use metrics::{clear_distance_computations, get_distance_computations, DistanceCounter};
