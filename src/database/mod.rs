/// Core implementation of a clustered database.
pub mod core;
/// Partitioning points into clusters around farthest-first centers.
pub mod partition;
/// Databases and indexes over the default similarity measures.
pub mod default;
/// Indexes whose similarity measure is chosen at runtime.
pub mod any;
