use super::partition::partition;
use crate::dataset::Dataset;
use crate::distance::Similarity;
use crate::error::{LshError, Result};
use crate::index::{
    buffer::TopK,
    check_search_arguments, decode_exact, encode_with_header,
    lsh::{IndexOptions, LshIndex},
    read_header, DATABASE_MAGIC,
};
use crate::metrics::DistanceCounter;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// Options for constructing a [Database].
pub struct ClusterOptions {
    /// The number of bytes the database may use per stored point, shared among the clusters' indexes.
    pub memory_per_point: usize,
    /// The target number of clusters is this factor times the square root of the number of points.
    pub num_clusters_factor: f32,
    /// The number of points cluster centers are chosen among.
    pub sample_size: usize,
    /// The most clusters a single search visits; all of them when absent.
    pub max_clusters_probed: Option<usize>,
    /// Options for each cluster's index; the memory limit is replaced by the cluster's share.
    pub index: IndexOptions,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            memory_per_point: 8 * 1024,
            num_clusters_factor: 1.0,
            sample_size: 10_000,
            max_clusters_probed: None,
            index: IndexOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A cluster of points around a center, searched through its own index.
pub struct Cluster {
    /// The global id of the point at the center.
    pub center: u32,
    /// The largest distance from the center to a member.
    pub radius: f32,
    /// The global id of each member; a member's position is its id within the cluster's index.
    pub members: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
/// A database of points partitioned into clusters, each with its own locality-sensitive hashing index.
///
/// Searches visit clusters nearest first and merge their results.
///
/// # Arguments
///
/// * `S` - The similarity measure the database is built over.
pub struct Database<S: Similarity> {
    options: ClusterOptions,
    dimensions: usize,
    clusters: Vec<Cluster>,
    centers: Dataset<S>,
    indexes: Vec<LshIndex<S>>,
    pending: Dataset<S>,
    seed: u64,
    generation: u64,
    #[serde(skip, default = "DistanceCounter::global")]
    counter: DistanceCounter,
}

impl<S: Similarity> Database<S> {
    /// Construct a new, empty [Database].
    ///
    /// # Arguments
    ///
    /// * `dimensions` - The dimensionality of vectors, or the universe size of sets.
    ///
    /// * `options` - The creation options for the database.
    pub fn new(dimensions: usize, options: ClusterOptions) -> Result<Self> {
        if options.memory_per_point == 0 {
            return Err(LshError::invalid("memory per point must be positive"));
        }
        if !(options.num_clusters_factor.is_finite() && options.num_clusters_factor > 0.0) {
            return Err(LshError::invalid("the cluster count factor must be positive"));
        }
        if options.sample_size == 0 {
            return Err(LshError::invalid("the center sample must not be empty"));
        }
        if options.max_clusters_probed == Some(0) {
            return Err(LshError::invalid("searches must probe at least one cluster"));
        }
        if options.index.max_rounds == 0 {
            return Err(LshError::invalid("at least one widening round is needed"));
        }
        let counter = DistanceCounter::global();
        Ok(Self {
            options,
            dimensions,
            clusters: Vec::new(),
            centers: Dataset::new(dimensions)?,
            indexes: Vec::new(),
            pending: Dataset::new(dimensions)?,
            seed: options.index.seed.unwrap_or_else(|| rand::rng().random()),
            generation: 0,
            counter,
        })
    }

    /// Report distance computations to the given counter instead of the process-wide one.
    pub fn with_counter(mut self, counter: DistanceCounter) -> Self {
        self.set_counter(counter);
        self
    }

    fn set_counter(&mut self, counter: DistanceCounter) {
        self.centers.set_counter(counter.clone());
        self.pending.set_counter(counter.clone());
        for index in self.indexes.iter_mut() {
            index.set_counter(counter.clone());
        }
        self.counter = counter;
    }

    /// The counter distance computations are reported to.
    pub fn counter(&self) -> &DistanceCounter {
        &self.counter
    }

    /// The options the database was created with.
    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// The clusters, in the order of their indexes.
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// The index of each cluster.
    pub fn indexes(&self) -> &[LshIndex<S>] {
        &self.indexes
    }

    fn clustered_len(&self) -> usize {
        self.clusters.iter().map(|cluster| cluster.members.len()).sum()
    }

    /// The number of stored points, searchable or not.
    pub fn len(&self) -> usize {
        self.clustered_len() + self.pending.len()
    }

    /// Whether no points are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a point; it becomes searchable after the next [Database::rebuild].
    ///
    /// # Returns
    ///
    /// The global id of the point.
    pub fn insert(&mut self, point: &[S::Scalar]) -> Result<u32> {
        let id = u32::try_from(self.len())
            .map_err(|_| LshError::invalid("a database holds at most 2^32 points"))?;
        self.pending.store(point)?;
        Ok(id)
    }

    /// The number of bytes the database occupies.
    pub fn memory_usage(&self) -> usize {
        size_of::<Self>()
            + self.centers.memory_usage()
            + self.pending.memory_usage()
            + self
                .indexes
                .iter()
                .map(LshIndex::memory_usage)
                .sum::<usize>()
            + self
                .clusters
                .iter()
                .map(|cluster| size_of::<Cluster>() + cluster.members.len() * size_of::<u32>())
                .sum::<usize>()
    }

    fn next_rng(&mut self) -> StdRng {
        self.generation += 1;
        StdRng::seed_from_u64(self.seed ^ self.generation.wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }

    /// The number of clusters to build over `len` points.
    ///
    /// The target `factor · √len` is lowered until the fixed cost of every cluster's index fits in what the per-point costs leave of the budget.
    pub fn cluster_count(&self, len: usize) -> Result<usize> {
        let index_options = &self.options.index;
        let fixed = LshIndex::<S>::estimate_memory(self.dimensions, index_options, 0, 1);
        let per_point = LshIndex::<S>::estimate_memory(self.dimensions, index_options, 1, 1) - fixed;
        let budget = self.options.memory_per_point.saturating_mul(len);
        let spare = budget.saturating_sub(per_point.saturating_mul(len));
        let affordable = spare / fixed.max(1);
        if affordable == 0 {
            return Err(LshError::ResourceExhausted(format!(
                "{} bytes per point cannot hold an index over {len} points",
                self.options.memory_per_point
            )));
        }
        let target = (self.options.num_clusters_factor * (len as f32).sqrt()).round() as usize;
        Ok(target.clamp(1, len.max(1)).min(affordable))
    }

    fn collect_points(&self) -> Result<Dataset<S>> {
        let clustered = self.clustered_len();
        let mut locations = vec![None; clustered];
        for (cluster, entry) in self.clusters.iter().enumerate() {
            for (local, &global) in entry.members.iter().enumerate() {
                let slot = locations
                    .get_mut(global as usize)
                    .ok_or_else(|| LshError::corrupt(format!("member {global} out of range")))?;
                *slot = Some((cluster, local as u32));
            }
        }
        let mut points = Dataset::new(self.dimensions)?.with_counter(self.counter.clone());
        for location in locations {
            let (cluster, local) =
                location.ok_or_else(|| LshError::corrupt("a point belongs to no cluster"))?;
            points.push_packed(self.indexes[cluster].dataset().point(local))?;
        }
        for id in 0..self.pending.len() as u32 {
            points.push_packed(self.pending.point(id))?;
        }
        Ok(points)
    }

    /// Re-partition every stored point and build one index per cluster.
    ///
    /// # Returns
    ///
    /// The number of bytes the database occupies.
    pub fn rebuild(&mut self) -> Result<usize> {
        let points = self.collect_points()?;
        let len = points.len();
        if len == 0 {
            return Ok(self.memory_usage());
        }
        let num_clusters = self.cluster_count(len)?;
        let mut rng = self.next_rng();
        let partition = partition(&points, num_clusters, self.options.sample_size, &mut rng)?;
        let seeds: Vec<u64> = partition.members.iter().map(|_| rng.random()).collect();

        let budget = self.options.memory_per_point.saturating_mul(len);
        let dimensions = self.dimensions;
        let index_options = self.options.index;
        let indexes: Vec<LshIndex<S>> = partition
            .members
            .par_iter()
            .zip(seeds.par_iter())
            .map(|(members, &seed)| {
                let share = (budget as u128 * members.len() as u128 / len as u128) as usize;
                let minimum = LshIndex::<S>::estimate_memory(dimensions, &index_options, members.len(), 1);
                if share < minimum {
                    warn!(share, minimum, members = members.len(), "cluster share raised to fit one table");
                }
                let options = IndexOptions {
                    memory_limit: share.max(minimum),
                    seed: Some(seed),
                    ..index_options
                };
                let mut index = LshIndex::from_dataset(points.subset(members)?, options)?;
                index.rebuild(None)?;
                Ok(index)
            })
            .collect::<Result<_>>()?;

        self.centers = points.subset(&partition.centers)?;
        self.clusters = partition
            .centers
            .into_iter()
            .zip(partition.radii)
            .zip(partition.members)
            .map(|((center, radius), members)| Cluster {
                center,
                radius,
                members,
            })
            .collect();
        self.indexes = indexes;
        self.pending = Dataset::new(dimensions)?.with_counter(self.counter.clone());

        let memory = self.memory_usage();
        info!(
            points = len,
            clusters = self.clusters.len(),
            memory,
            "rebuilt database"
        );
        Ok(memory)
    }

    /// Search for the points most similar to a query.
    ///
    /// # Arguments
    ///
    /// * `query` - A vector of the database's dimensionality, or a set of tokens from its universe.
    ///
    /// * `k` - The number of neighbours to return.
    ///
    /// * `recall` - The probability, in `(0, 1]`, with which each true neighbour should be found.
    ///
    /// # Returns
    ///
    /// At most `k` global point ids, most similar first.
    pub fn search(&self, query: &[S::Scalar], k: usize, recall: f32) -> Result<Vec<u32>> {
        Ok(self
            .search_with_similarities(query, k, recall)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// Search for the points most similar to a query, returning their similarities alongside their global ids.
    pub fn search_with_similarities(
        &self,
        query: &[S::Scalar],
        k: usize,
        recall: f32,
    ) -> Result<Vec<(u32, f32)>> {
        check_search_arguments(k, recall, 0.0)?;
        let query = self.centers.prepare(query)?;
        if self.clusters.is_empty() {
            return Ok(Vec::new());
        }
        let mut order: Vec<(usize, f32)> = (0..self.clusters.len())
            .map(|cluster| Ok((cluster, self.centers.distance_to(&query, cluster as u32)?)))
            .collect::<Result<_>>()?;
        order.sort_unstable_by(|a, b| a.1.total_cmp(&b.1));

        let probes = self
            .options
            .max_clusters_probed
            .unwrap_or(self.clusters.len())
            .clamp(1, self.clusters.len());
        // a union bound over the clusters that may be visited
        let local_recall = 1.0 - (1.0 - recall) / probes as f32;

        let mut top = TopK::new(k);
        for &(cluster, distance) in order.iter().take(probes) {
            let kth = top.kth_similarity();
            if let Some(kth) = kth {
                let kth_distance = S::distance_from_similarity(kth);
                if distance - self.clusters[cluster].radius > kth_distance {
                    trace!(cluster, distance, kth_distance, "skipped cluster");
                    continue;
                }
            }
            let local = match self.indexes[cluster].search_prepared(
                &query,
                k,
                local_recall,
                kth.unwrap_or(0.0),
            ) {
                Err(LshError::NotBuilt) => continue,
                result => result?,
            };
            let members = &self.clusters[cluster].members;
            for (local_id, similarity) in local {
                let global = members
                    .get(local_id as usize)
                    .ok_or_else(|| LshError::corrupt(format!("cluster {cluster} has no member {local_id}")))?;
                top.insert(*global, similarity);
            }
        }
        debug!(probes, found = top.len(), "searched clusters");
        Ok(top.into_sorted())
    }

    /// Run many searches in parallel.
    pub fn search_batch(&self, queries: &[Vec<S::Scalar>], k: usize, recall: f32) -> Result<Vec<Vec<u32>>> {
        queries
            .par_iter()
            .map(|query| self.search(query, k, recall))
            .collect()
    }

    /// Encode the database, preceded by a header naming its format and similarity measure.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode_with_header(DATABASE_MAGIC, S::KIND, self)
    }

    /// Decode a database written by [Database::serialize].
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (kind, body) = read_header(DATABASE_MAGIC, bytes)?;
        if kind != S::KIND {
            return Err(LshError::corrupt(format!(
                "serialized database is {kind}, expected {}",
                S::KIND
            )));
        }
        let database: Self = decode_exact(body)?;
        database.validate()?;
        Ok(database)
    }

    /// Check the structural invariants of a deserialized database.
    pub fn validate(&self) -> Result<()> {
        self.centers.validate()?;
        self.pending.validate()?;
        if self.centers.dimensions() != self.dimensions || self.pending.dimensions() != self.dimensions {
            return Err(LshError::corrupt("stored points have the wrong dimensionality"));
        }
        if self.clusters.len() != self.indexes.len() || self.clusters.len() != self.centers.len() {
            return Err(LshError::corrupt("clusters, centers and indexes disagree in number"));
        }
        let clustered = self.clustered_len();
        let mut owned = vec![false; clustered];
        for (cluster, index) in self.clusters.iter().zip(&self.indexes) {
            index.validate()?;
            if index.len() != cluster.members.len() || index.dataset().dimensions() != self.dimensions {
                return Err(LshError::corrupt("a cluster's index does not hold its members"));
            }
            if !(cluster.radius.is_finite() && cluster.radius >= 0.0)
                || !cluster.members.contains(&cluster.center)
            {
                return Err(LshError::corrupt("a cluster's center or radius is invalid"));
            }
            for &member in &cluster.members {
                match owned.get_mut(member as usize) {
                    Some(slot) if !*slot => *slot = true,
                    _ => return Err(LshError::corrupt(format!("point {member} is not in exactly one cluster"))),
                }
            }
        }
        Ok(())
    }
}
