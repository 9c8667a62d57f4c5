use super::buffer::TopK;
use super::prefix_map::{HashValue, PrefixMap, PrefixMapQuery};
use super::sketch::SketchFilter;
use super::{check_search_arguments, decode_exact, encode_with_header, read_header, INDEX_MAGIC};
use crate::dataset::Dataset;
use crate::distance::Similarity;
use crate::error::{LshError, Result};
use crate::hash::{
    source::{HashSource, HashSourceOptions},
    BITS_PER_FUNCTION, HASH_LENGTH,
};
use crate::metrics::DistanceCounter;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::{
    iter::{IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator},
    slice::ParallelSlice,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// The default number of widening rounds; enough to reach the empty prefix in every table.
pub const DEFAULT_MAX_ROUNDS: usize = (HASH_LENGTH / BITS_PER_FUNCTION) as usize + 1;

/// The largest table count chosen from a memory limit.
pub const MAX_TABLES: usize = 1024;

/// The default memory limit of an index, in bytes.
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// Options for constructing an [LshIndex].
pub struct IndexOptions {
    /// The number of bytes the index may occupy when choosing its own table count.
    pub memory_limit: usize,
    /// How the per-table hashes are produced.
    pub hash_source: HashSourceOptions,
    /// Whether candidates are pre-filtered with Hamming sketches.
    pub sketches: bool,
    /// The maximum number of times each table's search prefix is shortened.
    pub max_rounds: usize,
    /// The seed for sampling hash functions; drawn from the thread's generator when absent.
    pub seed: Option<u64>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            hash_source: HashSourceOptions::default(),
            sketches: true,
            max_rounds: DEFAULT_MAX_ROUNDS,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The lifecycle of an [LshIndex].
pub enum IndexState {
    /// Never built; searches return nothing.
    Empty,
    /// Every stored point is searchable.
    Built,
    /// Points have been inserted since the last rebuild and are not yet searchable.
    Inserting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
/// A locality-sensitive hashing index whose searches stop once a requested recall is statistically guaranteed.
///
/// # Arguments
///
/// * `S` - The similarity measure the index is built over.
pub struct LshIndex<S: Similarity> {
    dataset: Dataset<S>,
    family: S::Hash,
    maps: Vec<PrefixMap>,
    sketches: Option<SketchFilter<S::Sketch>>,
    source: Option<HashSource<S::Hash>>,
    options: IndexOptions,
    indexed: usize,
    seed: u64,
    generation: u64,
}

impl<S: Similarity> LshIndex<S> {
    /// Construct a new, empty [LshIndex].
    ///
    /// # Arguments
    ///
    /// * `dimensions` - The dimensionality of vectors, or the universe size of sets.
    ///
    /// * `options` - The creation options for the index.
    ///
    /// # Returns
    ///
    /// An index with no points and no tables.
    pub fn new(dimensions: usize, options: IndexOptions) -> Result<Self> {
        Self::from_dataset(Dataset::new(dimensions)?, options)
    }

    /// Construct an index over already stored points; they become searchable after [LshIndex::rebuild].
    pub fn from_dataset(dataset: Dataset<S>, options: IndexOptions) -> Result<Self> {
        if options.max_rounds == 0 {
            return Err(LshError::invalid("at least one widening round is needed"));
        }
        Ok(Self {
            family: S::hash_family(dataset.dimensions()),
            dataset,
            maps: Vec::new(),
            sketches: None,
            source: None,
            options,
            indexed: 0,
            seed: options.seed.unwrap_or_else(|| rand::rng().random()),
            generation: 0,
        })
    }

    /// Report distance computations to the given counter instead of the process-wide one.
    pub fn with_counter(mut self, counter: DistanceCounter) -> Self {
        self.dataset.set_counter(counter);
        self
    }

    pub(crate) fn set_counter(&mut self, counter: DistanceCounter) {
        self.dataset.set_counter(counter);
    }

    /// The counter distance computations are reported to.
    pub fn counter(&self) -> &DistanceCounter {
        self.dataset.counter()
    }

    /// The stored points.
    pub fn dataset(&self) -> &Dataset<S> {
        &self.dataset
    }

    /// The options the index was created with.
    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// The number of stored points, searchable or not.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// Whether no points are stored.
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// The number of hash tables, zero before the first build.
    pub fn num_tables(&self) -> usize {
        self.maps.len()
    }

    /// Where the index is in its lifecycle.
    pub fn state(&self) -> IndexState {
        match (&self.source, self.indexed == self.dataset.len()) {
            (None, _) => IndexState::Empty,
            (Some(_), true) => IndexState::Built,
            (Some(_), false) => IndexState::Inserting,
        }
    }

    /// Store a point; it becomes searchable after the next [LshIndex::rebuild].
    ///
    /// # Arguments
    ///
    /// * `point` - A vector of the index's dimensionality, or a set of tokens from its universe.
    ///
    /// # Returns
    ///
    /// The id of the point.
    pub fn insert(&mut self, point: &[S::Scalar]) -> Result<u32> {
        self.dataset.store(point)
    }

    /// The number of bytes an index over `num_points` points with `num_tables` tables occupies.
    ///
    /// # Arguments
    ///
    /// * `dimensions` - The dimensionality of vectors, or the universe size of sets.
    ///
    /// * `options` - The options the index is built with.
    ///
    /// * `num_points` - The number of stored points.
    ///
    /// * `num_tables` - The number of hash tables.
    pub fn estimate_memory(
        dimensions: usize,
        options: &IndexOptions,
        num_points: usize,
        num_tables: usize,
    ) -> usize {
        let sketches = match options.sketches {
            true => SketchFilter::memory_usage_for(&S::sketch_family(dimensions), num_points),
            false => 0,
        };
        size_of::<Self>()
            + Dataset::<S>::memory_usage_for(dimensions, num_points)
            + sketches
            + num_tables * PrefixMap::memory_usage(num_points)
            + options
                .hash_source
                .memory_usage(&S::hash_family(dimensions), num_tables, HASH_LENGTH)
    }

    /// The number of bytes the index occupies.
    pub fn memory_usage(&self) -> usize {
        Self::estimate_memory(
            self.dataset.dimensions(),
            &self.options,
            self.dataset.len(),
            self.maps.len(),
        )
    }

    fn tables_for_memory(&self) -> Result<usize> {
        let dimensions = self.dataset.dimensions();
        let points = self.dataset.len();
        let fits = |tables: usize| {
            Self::estimate_memory(dimensions, &self.options, points, tables) <= self.options.memory_limit
        };
        if !fits(1) {
            return Err(LshError::ResourceExhausted(format!(
                "{} bytes cannot hold one table over {points} points (needs {})",
                self.options.memory_limit,
                Self::estimate_memory(dimensions, &self.options, points, 1)
            )));
        }
        let mut low = 1;
        while low < MAX_TABLES && fits((low * 2).min(MAX_TABLES)) {
            low = (low * 2).min(MAX_TABLES);
        }
        let mut high = (low * 2).min(MAX_TABLES + 1);
        while high - low > 1 {
            let middle = (low + high) / 2;
            match fits(middle) {
                true => low = middle,
                false => high = middle,
            }
        }
        Ok(low)
    }

    fn next_rng(&mut self) -> StdRng {
        self.generation += 1;
        StdRng::seed_from_u64(self.seed ^ self.generation.wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }

    /// Make every stored point searchable.
    ///
    /// Hash functions are resampled, and every point rehashed, when the table count changes; otherwise only points inserted since the last rebuild are hashed.
    ///
    /// # Arguments
    ///
    /// * `num_tables` - The number of hash tables; when absent, the most that fit in the memory limit.
    ///
    /// # Returns
    ///
    /// The number of bytes the index occupies.
    pub fn rebuild(&mut self, num_tables: Option<usize>) -> Result<usize> {
        let num_tables = match num_tables {
            Some(0) => return Err(LshError::invalid("an index needs at least one table")),
            Some(num_tables) => num_tables,
            None => self.tables_for_memory()?,
        };
        let resample = self
            .source
            .as_ref()
            .is_none_or(|source| source.num_tables() != num_tables);
        if resample {
            let mut rng = self.next_rng();
            self.source = Some(HashSource::build(
                self.options.hash_source,
                self.family.clone(),
                num_tables,
                HASH_LENGTH,
                &mut rng,
            )?);
            let workers = rayon::current_num_threads();
            self.maps = (0..num_tables)
                .map(|_| PrefixMap::new(HASH_LENGTH, workers))
                .collect::<Result<_>>()?;
            self.indexed = 0;
            debug!(num_tables, "sampled hash functions");
        }
        if self.options.sketches && self.sketches.is_none() {
            let mut rng = self.next_rng();
            self.sketches = Some(SketchFilter::new(
                S::sketch_family(self.dataset.dimensions()),
                &mut rng,
            )?);
        }

        let source = self.source.as_ref().ok_or(LshError::NotBuilt)?;
        let dataset = &self.dataset;
        let pending: Vec<u32> = (self.indexed as u32..dataset.len() as u32).collect();
        let chunk_len = pending
            .len()
            .div_ceil(rayon::current_num_threads())
            .max(1);
        // each worker hashes a disjoint run of points into its own buffer
        let hashed: Vec<(&[u32], Vec<u64>)> = pending
            .par_chunks(chunk_len)
            .map_init(Vec::new, |hashes, ids| {
                let mut table_hashes = Vec::with_capacity(ids.len() * num_tables);
                for &id in ids {
                    source.hash_repetitions(dataset.point(id), hashes);
                    table_hashes.extend_from_slice(hashes);
                }
                (ids, table_hashes)
            })
            .collect();
        self.maps
            .par_iter_mut()
            .enumerate()
            .for_each(|(table, map)| {
                for (worker, (ids, hashes)) in hashed.iter().enumerate() {
                    for (position, &id) in ids.iter().enumerate() {
                        map.insert(worker, id, hashes[position * num_tables + table] as HashValue);
                    }
                }
                map.rebuild();
            });
        if let Some(sketches) = self.sketches.as_mut() {
            sketches.extend(&self.dataset);
        }
        self.indexed = self.dataset.len();

        let memory = self.memory_usage();
        info!(
            points = self.indexed,
            hashed = pending.len(),
            num_tables,
            memory,
            "rebuilt index"
        );
        Ok(memory)
    }

    /// Search for the points most similar to a query.
    ///
    /// # Arguments
    ///
    /// * `query` - A vector of the index's dimensionality, or a set of tokens from its universe.
    ///
    /// * `k` - The number of neighbours to return.
    ///
    /// * `recall` - The probability, in `(0, 1]`, with which each true neighbour should be found.
    ///
    /// * `max_sim` - A similarity the caller already has `k` results at least as good as; the search may stop once nothing better is likely to be missed.
    ///
    /// # Returns
    ///
    /// At most `k` point ids, most similar first; empty if the index has never been built.
    pub fn search(&self, query: &[S::Scalar], k: usize, recall: f32, max_sim: f32) -> Result<Vec<u32>> {
        Ok(self
            .search_with_similarities(query, k, recall, max_sim)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// Search for the points most similar to a query, returning their similarities alongside their ids.
    pub fn search_with_similarities(
        &self,
        query: &[S::Scalar],
        k: usize,
        recall: f32,
        max_sim: f32,
    ) -> Result<Vec<(u32, f32)>> {
        check_search_arguments(k, recall, max_sim)?;
        let query = self.dataset.prepare(query)?;
        match self.search_prepared(&query, k, recall, max_sim) {
            Err(LshError::NotBuilt) => Ok(Vec::new()),
            result => result,
        }
    }

    /// Run many searches in parallel.
    pub fn search_batch(
        &self,
        queries: &[Vec<S::Scalar>],
        k: usize,
        recall: f32,
        max_sim: f32,
    ) -> Result<Vec<Vec<u32>>> {
        queries
            .par_iter()
            .map(|query| self.search(query, k, recall, max_sim))
            .collect()
    }

    /// Search with a query already in packed storage form.
    pub(crate) fn search_prepared(
        &self,
        query: &[S::Element],
        k: usize,
        recall: f32,
        max_sim: f32,
    ) -> Result<Vec<(u32, f32)>> {
        let source = self.source.as_ref().ok_or(LshError::NotBuilt)?;
        if self.indexed == 0 {
            return Ok(Vec::new());
        }
        let budget = 1.0 - recall;
        let sketches = match self.options.sketches {
            true => self
                .sketches
                .as_ref()
                .map(|sketches| (sketches, sketches.sketch(query))),
            false => None,
        };
        let (stop_budget, filter_budget) = match sketches {
            Some(_) => (budget / 2.0, budget / 2.0),
            None => (budget, 0.0),
        };

        let mut hashes = Vec::with_capacity(self.maps.len());
        source.hash_repetitions(query, &mut hashes);
        let mut queries: Vec<PrefixMapQuery> = self
            .maps
            .iter()
            .zip(&hashes)
            .map(|(map, &hash)| map.create_query(hash as HashValue))
            .collect();

        let mut top = TopK::new(k);
        let mut seen: HashSet<u32> = HashSet::new();
        let mut threshold = None;
        let proxy = |top: &TopK| match top.kth_similarity() {
            Some(kth) => Some(kth.max(max_sim)),
            None if max_sim > 0.0 => Some(max_sim),
            None => None,
        };

        for round in 0..self.options.max_rounds {
            if queries.iter().all(PrefixMapQuery::is_exhausted) {
                break;
            }
            for (table, (map, prefix_query)) in self.maps.iter().zip(queries.iter_mut()).enumerate() {
                let (left, right) = map.get_next_range(prefix_query);
                for &id in left.iter().chain(right) {
                    if seen.contains(&id) {
                        continue;
                    }
                    if let (Some((filter, query_sketch)), Some(similarity)) = (&sketches, proxy(&top)) {
                        let max_distance = filter.threshold(&mut threshold, similarity, filter_budget);
                        if filter.distance(query_sketch, id, table) > max_distance {
                            continue;
                        }
                    }
                    seen.insert(id);
                    let similarity = self.dataset.similarity_to(query, id)?;
                    top.insert(id, similarity);
                }
                if let Some(similarity) = proxy(&top) {
                    let failure =
                        source.failure_probability(prefix_query.prefix_length(), table + 1, similarity);
                    if failure <= stop_budget {
                        debug!(round, table, evaluated = seen.len(), failure, "recall target met");
                        return Ok(top.into_sorted());
                    }
                }
            }
        }
        debug!(evaluated = seen.len(), "search exhausted its rounds");
        Ok(top.into_sorted())
    }

    /// Encode the index, preceded by a header naming its format and similarity measure.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode_with_header(INDEX_MAGIC, S::KIND, self)
    }

    /// Decode an index written by [LshIndex::serialize].
    ///
    /// # Returns
    ///
    /// The index, reporting to the process-wide distance counter; `CorruptState` if the bytes do not hold a valid index of this measure.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (kind, body) = read_header(INDEX_MAGIC, bytes)?;
        if kind != S::KIND {
            return Err(LshError::corrupt(format!(
                "serialized index is {kind}, expected {}",
                S::KIND
            )));
        }
        Self::deserialize_body(body)
    }

    pub(crate) fn deserialize_body(body: &[u8]) -> Result<Self> {
        let index: Self = decode_exact(body)?;
        index.validate()?;
        Ok(index)
    }

    /// Check the structural invariants of a deserialized index.
    pub fn validate(&self) -> Result<()> {
        self.dataset.validate()?;
        let points = self.dataset.len();
        let dimensions = self.dataset.dimensions();
        if self.options.max_rounds == 0 {
            return Err(LshError::corrupt("no widening rounds"));
        }
        if self.family != S::hash_family(dimensions) {
            return Err(LshError::corrupt("hash family does not match the dataset"));
        }
        if self.indexed > points {
            return Err(LshError::corrupt("more points indexed than stored"));
        }
        match &self.source {
            None => {
                if !self.maps.is_empty() || self.indexed != 0 || self.sketches.is_some() {
                    return Err(LshError::corrupt("tables without hash functions"));
                }
            }
            Some(source) => {
                source.validate()?;
                if source.family() != &self.family
                    || source.hash_length() != HASH_LENGTH
                    || source.num_tables() != self.maps.len()
                {
                    return Err(LshError::corrupt("hash functions do not match the tables"));
                }
            }
        }
        for map in &self.maps {
            map.validate(points)?;
            if map.hash_length() != HASH_LENGTH || map.len() + map.staged_len() != self.indexed {
                return Err(LshError::corrupt("table contents do not match the index"));
            }
        }
        if let Some(sketches) = &self.sketches {
            sketches.validate(points)?;
            if sketches.family() != &S::sketch_family(dimensions) || sketches.len() != self.indexed {
                return Err(LshError::corrupt("sketches do not match the index"));
            }
        }
        Ok(())
    }
}
