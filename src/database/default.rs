use crate::{
    database::core::Database,
    distance::{AngularSimilarity, EuclideanSimilarity, JaccardSimilarity},
    index::lsh::LshIndex,
};

/// An index over real vectors compared by cosine similarity.
pub type AngularIndex = LshIndex<AngularSimilarity>;

/// An index over real vectors compared by Euclidean distance.
pub type EuclideanIndex = LshIndex<EuclideanSimilarity>;

/// An index over sets of tokens compared by Jaccard similarity.
pub type JaccardIndex = LshIndex<JaccardSimilarity>;

/// A clustered database of real vectors compared by cosine similarity.
pub type AngularDatabase = Database<AngularSimilarity>;

/// A clustered database of real vectors compared by Euclidean distance.
pub type EuclideanDatabase = Database<EuclideanSimilarity>;

/// A clustered database of sets of tokens compared by Jaccard similarity.
pub type JaccardDatabase = Database<JaccardSimilarity>;
