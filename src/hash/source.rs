use super::{concatenate_hashes, HashFamily, HashFunction, BITS_PER_FUNCTION};
use crate::error::{LshError, Result};
use rand::{seq::index::sample as sample_indices, Rng};
use serde::{Deserialize, Serialize};

/// The default number of bits in a hash pool.
pub const DEFAULT_POOL_SIZE: usize = 3072;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
/// How the per-table hashes of an index are produced.
pub enum HashSourceOptions {
    #[default]
    /// Every table samples its own functions.
    Independent,
    /// Tables draw their functions from a shared pool.
    Pool {
        /// The size of the pool, in bits.
        pool_size: usize,
    },
    /// Tables combine a left and a right half-hash, reusing each half across many tables.
    Tensor,
}

impl HashSourceOptions {
    /// A pool of the default size.
    pub fn pool() -> Self {
        Self::Pool {
            pool_size: DEFAULT_POOL_SIZE,
        }
    }

    /// The number of bytes a source built with these options would occupy.
    ///
    /// # Arguments
    ///
    /// * `family` - The family the functions are sampled from.
    ///
    /// * `num_tables` - The number of tables served.
    ///
    /// * `hash_length` - The number of bits per table hash.
    pub fn memory_usage<F: HashFamily>(&self, family: &F, num_tables: usize, hash_length: u32) -> usize {
        let per_hash = functions_per_hash(hash_length, family.bits_per_function());
        let functions = match self {
            Self::Independent => num_tables * per_hash,
            Self::Pool { pool_size } => pool_len(*pool_size, family.bits_per_function(), per_hash),
            Self::Tensor => {
                2 * tensor_hashers(num_tables)
                    * functions_per_hash(hash_length / 2, family.bits_per_function())
            }
        };
        let indices = match self {
            Self::Pool { .. } => num_tables * per_hash * size_of::<u32>(),
            _ => 0,
        };
        size_of::<HashSource<F>>() + functions * family.function_memory() + indices
    }
}

fn functions_per_hash(hash_length: u32, bits_per_function: u32) -> usize {
    hash_length.div_ceil(bits_per_function) as usize
}

fn bits_to_cut(hash_length: u32, bits_per_function: u32) -> u32 {
    functions_per_hash(hash_length, bits_per_function) as u32 * bits_per_function - hash_length
}

fn pool_len(pool_size: usize, bits_per_function: u32, per_hash: usize) -> usize {
    (pool_size / bits_per_function as usize).max(per_hash)
}

fn tensor_hashers(num_tables: usize) -> usize {
    (num_tables as f64).sqrt().ceil() as usize
}

/// Interleave two half-hashes bit by bit, with the left half's most significant bit leading.
fn interleave(left: u64, right: u64, half_length: u32) -> u64 {
    (0..half_length).fold(0, |hash, bit| {
        hash | ((right >> bit) & 1) << (2 * bit) | ((left >> bit) & 1) << (2 * bit + 1)
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
/// Every table owns `⌈hash_length / bits_per_function⌉` functions.
pub struct IndependentHashes<F: HashFamily> {
    family: F,
    functions: Vec<F::Function>,
    num_tables: usize,
    hash_length: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
/// Tables concatenate distinct functions chosen from a shared pool, each evaluated once per point.
pub struct HashPool<F: HashFamily> {
    family: F,
    functions: Vec<F::Function>,
    indices: Vec<u32>,
    num_tables: usize,
    hash_length: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
/// Table `t` interleaves left half-hash `t / n` with right half-hash `t mod n`.
pub struct TensoredHashes<F: HashFamily> {
    family: F,
    left: Vec<F::Function>,
    right: Vec<F::Function>,
    num_tables: usize,
    hash_length: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
/// A source of one hash per table for every point.
pub enum HashSource<F: HashFamily> {
    /// Independent functions per table.
    Independent(IndependentHashes<F>),
    /// Functions shared through a pool.
    Pool(HashPool<F>),
    /// Pairs of reused half-hashes.
    Tensor(TensoredHashes<F>),
}

impl<F: HashFamily> HashSource<F> {
    /// Sample a hash source.
    ///
    /// # Arguments
    ///
    /// * `options` - Which kind of source to build.
    ///
    /// * `family` - The family to sample functions from.
    ///
    /// * `num_tables` - The number of hashes produced per point.
    ///
    /// * `hash_length` - The number of bits in each hash.
    ///
    /// * `rng` - The source of randomness.
    ///
    /// # Returns
    ///
    /// The sampled source.
    pub fn build<R: Rng + ?Sized>(
        options: HashSourceOptions,
        family: F,
        num_tables: usize,
        hash_length: u32,
        rng: &mut R,
    ) -> Result<Self> {
        if num_tables == 0 {
            return Err(LshError::invalid("a hash source needs at least one table"));
        }
        if hash_length == 0 || hash_length > 64 {
            return Err(LshError::invalid(format!(
                "hash length {hash_length} is outside 1..=64"
            )));
        }
        let bits = family.bits_per_function();
        let per_hash = functions_per_hash(hash_length, bits);
        let source = match options {
            HashSourceOptions::Independent => Self::Independent(IndependentHashes {
                functions: (0..num_tables * per_hash).map(|_| family.sample(rng)).collect(),
                family,
                num_tables,
                hash_length,
            }),
            HashSourceOptions::Pool { pool_size } => {
                let len = pool_len(pool_size, bits, per_hash);
                let functions = (0..len).map(|_| family.sample(rng)).collect();
                let indices = (0..num_tables)
                    .flat_map(|_| sample_indices(rng, len, per_hash).into_iter().map(|i| i as u32))
                    .collect();
                Self::Pool(HashPool {
                    family,
                    functions,
                    indices,
                    num_tables,
                    hash_length,
                })
            }
            HashSourceOptions::Tensor => {
                if hash_length % 2 != 0 {
                    return Err(LshError::invalid("tensored hashes need an even hash length"));
                }
                let hashers = tensor_hashers(num_tables);
                let half = functions_per_hash(hash_length / 2, bits);
                let left = (0..hashers * half).map(|_| family.sample(rng)).collect();
                let right = (0..hashers * half).map(|_| family.sample(rng)).collect();
                Self::Tensor(TensoredHashes {
                    family,
                    left,
                    right,
                    num_tables,
                    hash_length,
                })
            }
        };
        Ok(source)
    }

    /// The family the functions were sampled from.
    pub fn family(&self) -> &F {
        match self {
            Self::Independent(source) => &source.family,
            Self::Pool(source) => &source.family,
            Self::Tensor(source) => &source.family,
        }
    }

    /// The number of hashes produced per point.
    pub fn num_tables(&self) -> usize {
        match self {
            Self::Independent(source) => source.num_tables,
            Self::Pool(source) => source.num_tables,
            Self::Tensor(source) => source.num_tables,
        }
    }

    /// The number of bits in each hash.
    pub fn hash_length(&self) -> u32 {
        match self {
            Self::Independent(source) => source.hash_length,
            Self::Pool(source) => source.hash_length,
            Self::Tensor(source) => source.hash_length,
        }
    }

    /// The options this source could be rebuilt with.
    pub fn options(&self) -> HashSourceOptions {
        match self {
            Self::Independent(_) => HashSourceOptions::Independent,
            Self::Pool(source) => HashSourceOptions::Pool {
                pool_size: source.functions.len() * source.family.bits_per_function() as usize,
            },
            Self::Tensor(_) => HashSourceOptions::Tensor,
        }
    }

    /// Hash a stored point once per table.
    ///
    /// # Arguments
    ///
    /// * `point` - The packed storage of the point.
    ///
    /// * `hashes` - Cleared, then filled with one hash per table.
    pub fn hash_repetitions(&self, point: &[F::Element], hashes: &mut Vec<u64>) {
        hashes.clear();
        let bits = self.family().bits_per_function();
        match self {
            Self::Independent(source) => {
                let per_hash = functions_per_hash(source.hash_length, bits);
                let cut = bits_to_cut(source.hash_length, bits);
                hashes.extend(source.functions.chunks(per_hash).map(|functions| {
                    concatenate_hashes(functions.iter().map(|f| f.hash(point)), bits, cut)
                }));
            }
            Self::Pool(source) => {
                let per_hash = functions_per_hash(source.hash_length, bits);
                let cut = bits_to_cut(source.hash_length, bits);
                let values: Vec<u64> = source.functions.iter().map(|f| f.hash(point)).collect();
                hashes.extend(source.indices.chunks(per_hash).map(|indices| {
                    concatenate_hashes(indices.iter().map(|&i| values[i as usize]), bits, cut)
                }));
            }
            Self::Tensor(source) => {
                let half_length = source.hash_length / 2;
                let per_half = functions_per_hash(half_length, bits);
                let cut = bits_to_cut(half_length, bits);
                let half_hashes = |functions: &[F::Function]| -> Vec<u64> {
                    functions
                        .chunks(per_half)
                        .map(|chunk| concatenate_hashes(chunk.iter().map(|f| f.hash(point)), bits, cut))
                        .collect()
                };
                let left = half_hashes(&source.left);
                let right = half_hashes(&source.right);
                let hashers = right.len();
                hashes.extend((0..source.num_tables).map(|table| {
                    interleave(left[table / hashers], right[table % hashers], half_length)
                }));
            }
        }
    }

    /// The probability that two points of the given similarity agree on `num_bits` bits of one table's hash.
    pub fn collision_probability(&self, similarity: f32, num_bits: u32) -> f32 {
        self.family().collision_probability(similarity, num_bits)
    }

    /// The similarity at which one function collides with probability `probability`.
    pub fn icollision_probability(&self, probability: f32) -> f32 {
        self.family().icollision_probability(probability)
    }

    /// The probability that a point of the given similarity to the query has not yet collided with it in any table.
    ///
    /// # Arguments
    ///
    /// * `prefix_length` - The prefix length of the round in progress.
    ///
    /// * `tables_done` - The number of tables already searched at `prefix_length`; the rest have only been searched one round earlier.
    ///
    /// * `similarity` - The similarity of the point.
    ///
    /// # Returns
    ///
    /// An estimate of the failure probability, in `[0, 1]`.
    pub fn failure_probability(&self, prefix_length: u32, tables_done: usize, similarity: f32) -> f32 {
        let hash_length = self.hash_length();
        let num_tables = self.num_tables();
        let tables_done = tables_done.min(num_tables);
        let family = self.family();
        let failure = match self {
            // Pool functions are shared between tables, so treating the tables as independent is an approximation there.
            Self::Independent(_) | Self::Pool(_) => {
                let current = 1.0 - family.collision_probability(similarity, prefix_length);
                let previous_length = prefix_length + BITS_PER_FUNCTION;
                let previous = match previous_length >= hash_length {
                    true => 1.0,
                    false => 1.0 - family.collision_probability(similarity, previous_length),
                };
                current.powi(tables_done as i32) * previous.powi((num_tables - tables_done) as i32)
            }
            Self::Tensor(source) => {
                let completed = match tables_done >= num_tables {
                    true => prefix_length,
                    false => prefix_length + BITS_PER_FUNCTION,
                };
                if completed >= hash_length {
                    return 1.0;
                }
                let hashers = source.left.len() / functions_per_hash(hash_length / 2, family.bits_per_function());
                let left_used = num_tables.div_ceil(hashers).min(hashers);
                let right_used = num_tables.min(hashers);
                let left = family.collision_probability(similarity, completed.div_ceil(2));
                let right = family.collision_probability(similarity, completed / 2);
                let left_hit = 1.0 - (1.0 - left).powi(left_used as i32);
                let right_hit = 1.0 - (1.0 - right).powi(right_used as i32);
                1.0 - left_hit * right_hit
            }
        };
        failure.clamp(0.0, 1.0)
    }

    /// The number of bytes this source occupies.
    pub fn memory_usage(&self) -> usize {
        self.options()
            .memory_usage(self.family(), self.num_tables(), self.hash_length())
    }

    /// Check the structural invariants of a deserialized source.
    pub fn validate(&self) -> Result<()> {
        let family = self.family();
        let bits = family.bits_per_function();
        if !(1..=32).contains(&bits) {
            return Err(LshError::corrupt(format!("{bits} bits per function")));
        }
        let hash_length = self.hash_length();
        if hash_length == 0 || hash_length > 64 {
            return Err(LshError::corrupt(format!("hash length {hash_length}")));
        }
        let num_tables = self.num_tables();
        if num_tables == 0 {
            return Err(LshError::corrupt("hash source without tables"));
        }
        let per_hash = functions_per_hash(hash_length, bits);
        let (functions, expected): (Vec<&F::Function>, usize) = match self {
            Self::Independent(source) => (source.functions.iter().collect(), num_tables * per_hash),
            Self::Pool(source) => {
                if source.indices.len() != num_tables * per_hash {
                    return Err(LshError::corrupt("hash pool index count mismatch"));
                }
                if let Some(index) = source
                    .indices
                    .iter()
                    .find(|&&index| index as usize >= source.functions.len())
                {
                    return Err(LshError::corrupt(format!("hash pool index {index} out of range")));
                }
                (source.functions.iter().collect(), source.functions.len().max(per_hash))
            }
            Self::Tensor(source) => {
                if hash_length % 2 != 0 {
                    return Err(LshError::corrupt("tensored hashes with an odd hash length"));
                }
                let expected =
                    tensor_hashers(num_tables) * functions_per_hash(hash_length / 2, bits);
                if source.left.len() != expected {
                    return Err(LshError::corrupt("tensored hash left half count mismatch"));
                }
                (source.left.iter().chain(&source.right).collect(), 2 * expected)
            }
        };
        if functions.len() != expected {
            return Err(LshError::corrupt(format!(
                "expected {expected} hash functions, found {}",
                functions.len()
            )));
        }
        match functions.iter().all(|function| family.is_compatible(function)) {
            true => Ok(()),
            false => Err(LshError::corrupt("hash function does not match its family")),
        }
    }
}
