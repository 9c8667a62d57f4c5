use crate::error::{LshError, Result};
use crate::hash::BITS_PER_FUNCTION;
use rayon::slice::ParallelSliceMut;
use serde::{Deserialize, Serialize};

/// A hash value stored in a [`PrefixMap`].
pub type HashValue = u32;

/// The number of entries skipped at a time when searching for the end of a range.
pub const SEGMENT_SIZE: usize = 12;

/// The number of leading hash bits covered by the prefix index.
pub const PREFIX_INDEX_BITS: u32 = 13;

/// The sentinel hash stored in the padding; it never shares a prefix with a real hash.
pub const IMPOSSIBLE_HASH: HashValue = HashValue::MAX;

const PREFIX_INDEX_LEN: usize = (1 << PREFIX_INDEX_BITS) + 1;

/// The longest hash a [`PrefixMap`] accepts; the top bits must stay free so the sentinel never matches.
pub const MAX_HASH_LENGTH: u32 = HashValue::BITS - BITS_PER_FUNCTION;

#[derive(Debug, Clone, Serialize, Deserialize)]
/// The hashes of one table, sorted so that every prefix of a query hash corresponds to a contiguous range.
///
/// Both ends are padded with [`SEGMENT_SIZE`] sentinel entries, so range searches never need a bounds check.
pub struct PrefixMap {
    indices: Vec<u32>,
    hashes: Vec<HashValue>,
    staged: Vec<Vec<(u32, HashValue)>>,
    hash_length: u32,
    prefix_index: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The state of a progressively widening search in a [`PrefixMap`].
pub struct PrefixMapQuery {
    hash: HashValue,
    prefix_mask: HashValue,
    prefix_length: u32,
    prefix_start: usize,
    prefix_end: usize,
}

impl PrefixMapQuery {
    /// The number of leading bits the most recently returned ranges share with the query.
    pub fn prefix_length(&self) -> u32 {
        self.prefix_length
    }

    /// Whether every entry of the map has been returned.
    pub fn is_exhausted(&self) -> bool {
        self.prefix_length == 0
    }
}

impl PrefixMap {
    /// Create an empty map.
    ///
    /// # Arguments
    ///
    /// * `hash_length` - The number of bits in each stored hash.
    ///
    /// * `num_workers` - The number of staging buffers, one per inserting worker.
    ///
    /// # Returns
    ///
    /// A map holding only padding.
    pub fn new(hash_length: u32, num_workers: usize) -> Result<Self> {
        if !(PREFIX_INDEX_BITS..=MAX_HASH_LENGTH).contains(&hash_length) {
            return Err(LshError::invalid(format!(
                "hash length {hash_length} is outside {PREFIX_INDEX_BITS}..={MAX_HASH_LENGTH}"
            )));
        }
        let mut map = Self {
            indices: Vec::new(),
            hashes: Vec::new(),
            staged: vec![Vec::new(); num_workers.max(1)],
            hash_length,
            prefix_index: Vec::new(),
        };
        map.rebuild();
        Ok(map)
    }

    /// Stage an entry; it becomes visible to queries after the next [`PrefixMap::rebuild`].
    ///
    /// # Arguments
    ///
    /// * `worker` - The inserting worker; each worker owns one staging buffer.
    ///
    /// * `id` - The point the hash belongs to.
    ///
    /// * `hash` - The point's hash, using at most `hash_length` bits.
    pub fn insert(&mut self, worker: usize, id: u32, hash: HashValue) {
        debug_assert!(hash >> self.hash_length == 0);
        let buffers = self.staged.len();
        self.staged[worker % buffers].push((id, hash));
    }

    /// Merge the staged entries into the sorted contents and recompute the prefix index.
    pub fn rebuild(&mut self) {
        let existing = self.len();
        let staged: usize = self.staged.iter().map(Vec::len).sum();
        let mut entries: Vec<(HashValue, u32)> = Vec::with_capacity(existing + staged);
        entries.extend(
            self.hashes
                .iter()
                .zip(&self.indices)
                .skip(SEGMENT_SIZE)
                .take(existing)
                .map(|(&hash, &id)| (hash, id)),
        );
        for buffer in self.staged.iter_mut() {
            entries.extend(buffer.drain(..).map(|(id, hash)| (hash, id)));
            buffer.shrink_to_fit();
        }
        entries.par_sort_unstable();

        let total = entries.len() + 2 * SEGMENT_SIZE;
        self.hashes = Vec::with_capacity(total);
        self.indices = Vec::with_capacity(total);
        self.hashes.resize(SEGMENT_SIZE, IMPOSSIBLE_HASH);
        self.indices.resize(SEGMENT_SIZE, 0);
        self.hashes.extend(entries.iter().map(|&(hash, _)| hash));
        self.indices.extend(entries.iter().map(|&(_, id)| id));
        self.hashes.resize(total, IMPOSSIBLE_HASH);
        self.indices.resize(total, 0);

        // the prefix index covers every entry, not only the newly staged ones
        let shift = self.hash_length - PREFIX_INDEX_BITS;
        let mut position = 0;
        self.prefix_index = (0..PREFIX_INDEX_LEN)
            .map(|prefix| {
                while position < entries.len() && ((entries[position].0 >> shift) as usize) < prefix {
                    position += 1;
                }
                (SEGMENT_SIZE + position) as u32
            })
            .collect();
    }

    /// Start a search around the given hash.
    ///
    /// # Arguments
    ///
    /// * `hash` - The query's hash in this table.
    ///
    /// # Returns
    ///
    /// A query positioned at the first entry not less than `hash`, with no entries returned yet.
    pub fn create_query(&self, hash: HashValue) -> PrefixMapQuery {
        let hash = hash & ((1 << self.hash_length) - 1);
        let prefix = (hash >> (self.hash_length - PREFIX_INDEX_BITS)) as usize;
        let (start, end) = (
            self.prefix_index[prefix] as usize,
            self.prefix_index[prefix + 1] as usize,
        );
        let position = start + self.hashes[start..end].partition_point(|&h| h < hash);
        PrefixMapQuery {
            hash,
            prefix_mask: HashValue::MAX,
            prefix_length: self.hash_length,
            prefix_start: position,
            prefix_end: position,
        }
    }

    /// Shorten the query's prefix by one function's worth of bits and return the entries newly sharing it.
    ///
    /// # Arguments
    ///
    /// * `query` - The search state, advanced in place.
    ///
    /// # Returns
    ///
    /// The ids of the entries newly matching the shorter prefix, below and above those returned previously.
    pub fn get_next_range<'a>(&'a self, query: &mut PrefixMapQuery) -> (&'a [u32], &'a [u32]) {
        if query.prefix_length == 0 {
            return (&[], &[]);
        }
        let step = BITS_PER_FUNCTION.min(query.prefix_length);
        query.prefix_length -= step;
        query.prefix_mask <<= step;
        let mask = query.prefix_mask;
        let target = query.hash & mask;
        let matches = |hash: HashValue| hash & mask == target;

        // jump a segment at a time past the end of the range, then search the final segment
        let start_right = query.prefix_end;
        let mut next = start_right;
        while matches(self.hashes[next]) {
            next += SEGMENT_SIZE;
        }
        let floor = next.saturating_sub(SEGMENT_SIZE).max(start_right);
        let end_right = floor + self.hashes[floor..next].partition_point(|&h| matches(h));

        let end_left = query.prefix_start;
        let mut next = end_left - 1;
        while matches(self.hashes[next]) {
            next -= SEGMENT_SIZE;
        }
        let low = next + 1;
        let high = (next + SEGMENT_SIZE + 1).min(end_left);
        let start_left = low + self.hashes[low..high].partition_point(|&h| !matches(h));

        query.prefix_start = start_left;
        query.prefix_end = end_right;
        (
            &self.indices[start_left..end_left],
            &self.indices[start_right..end_right],
        )
    }

    /// The number of bits in each stored hash.
    pub fn hash_length(&self) -> u32 {
        self.hash_length
    }

    /// The number of searchable entries.
    pub fn len(&self) -> usize {
        self.hashes.len().saturating_sub(2 * SEGMENT_SIZE)
    }

    /// Whether the map holds no searchable entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of entries waiting for the next rebuild.
    pub fn staged_len(&self) -> usize {
        self.staged.iter().map(Vec::len).sum()
    }

    /// The searchable `(hash, id)` entries in sorted order.
    pub fn entries(&self) -> impl Iterator<Item = (HashValue, u32)> + '_ {
        self.hashes
            .iter()
            .zip(&self.indices)
            .skip(SEGMENT_SIZE)
            .take(self.len())
            .map(|(&hash, &id)| (hash, id))
    }

    /// The index of the first entry whose leading [`PREFIX_INDEX_BITS`] bits are at least `prefix`.
    pub fn prefix_bound(&self, prefix: usize) -> Option<usize> {
        self.prefix_index.get(prefix).map(|&index| index as usize)
    }

    /// The number of bytes a map holding `len` entries occupies.
    pub fn memory_usage(len: usize) -> usize {
        size_of::<Self>()
            + (len + 2 * SEGMENT_SIZE) * (size_of::<u32>() + size_of::<HashValue>())
            + PREFIX_INDEX_LEN * size_of::<u32>()
    }

    /// Check the structural invariants of a deserialized map.
    ///
    /// # Arguments
    ///
    /// * `num_points` - The number of points ids may refer to.
    pub fn validate(&self, num_points: usize) -> Result<()> {
        if !(PREFIX_INDEX_BITS..=MAX_HASH_LENGTH).contains(&self.hash_length) {
            return Err(LshError::corrupt(format!("hash length {}", self.hash_length)));
        }
        if self.hashes.len() != self.indices.len() || self.hashes.len() < 2 * SEGMENT_SIZE {
            return Err(LshError::corrupt("prefix map arrays have inconsistent lengths"));
        }
        if self.staged.is_empty() {
            return Err(LshError::corrupt("prefix map has no staging buffers"));
        }
        let len = self.len();
        let padding = self.hashes[..SEGMENT_SIZE]
            .iter()
            .chain(&self.hashes[SEGMENT_SIZE + len..]);
        if padding.copied().any(|hash| hash != IMPOSSIBLE_HASH) {
            return Err(LshError::corrupt("prefix map padding was overwritten"));
        }
        let limit = 1u64 << self.hash_length;
        let entries: Vec<(HashValue, u32)> = self.entries().collect();
        if entries.windows(2).any(|pair| pair[0].0 > pair[1].0) {
            return Err(LshError::corrupt("prefix map hashes are not sorted"));
        }
        let staged = self.staged.iter().flatten().map(|&(id, hash)| (hash, id));
        for (hash, id) in entries.iter().copied().chain(staged) {
            if hash as u64 >= limit {
                return Err(LshError::corrupt(format!("hash {hash:#x} is too long")));
            }
            if id as usize >= num_points {
                return Err(LshError::corrupt(format!("point {id} does not exist")));
            }
        }
        if self.prefix_index.len() != PREFIX_INDEX_LEN {
            return Err(LshError::corrupt("prefix index has the wrong length"));
        }
        let shift = self.hash_length - PREFIX_INDEX_BITS;
        for (prefix, &bound) in self.prefix_index.iter().enumerate() {
            let bound = bound as usize;
            if bound < SEGMENT_SIZE || bound > SEGMENT_SIZE + len {
                return Err(LshError::corrupt("prefix index points into the padding"));
            }
            let position = bound - SEGMENT_SIZE;
            let before_ok = position == 0 || ((entries[position - 1].0 >> shift) as usize) < prefix;
            let after_ok = position == len || ((entries[position].0 >> shift) as usize) >= prefix;
            if !(before_ok && after_ok) {
                return Err(LshError::corrupt(format!(
                    "prefix index entry {prefix} is not a lower bound"
                )));
            }
        }
        Ok(())
    }
}
