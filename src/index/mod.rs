use crate::distance::SimilarityKind;
use crate::error::{LshError, Result};
use serde::{Deserialize, Serialize};

/// Bounded buffer of the best candidates seen during a search.
pub mod buffer;
/// A recall-targeted locality-sensitive hashing index over one dataset.
///
/// Based on the multi-probe prefix search of [PUFFINN](https://github.com/puffinn/puffinn), which widens the searched hash prefixes until the probability of having missed a true neighbour falls below the requested bound.
pub mod lsh;
/// Sorted per-table hash storage supporting widening prefix searches.
pub mod prefix_map;
/// Hamming sketches for discarding candidates cheaply.
pub mod sketch;

/// The first bytes of a serialized [`lsh::LshIndex`].
pub const INDEX_MAGIC: [u8; 4] = *b"FRLI";

/// The first bytes of a serialized [`crate::database::core::Database`].
pub const DATABASE_MAGIC: [u8; 4] = *b"FRLD";

/// The version of the serialized format.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Header {
    magic: [u8; 4],
    version: u32,
    kind: SimilarityKind,
}

/// Encode a header followed by `value`.
pub(crate) fn encode_with_header<T: Serialize>(
    magic: [u8; 4],
    kind: SimilarityKind,
    value: &T,
) -> Result<Vec<u8>> {
    let header = Header {
        magic,
        version: FORMAT_VERSION,
        kind,
    };
    Ok(bincode::serde::encode_to_vec(
        (header, value),
        bincode::config::legacy(),
    )?)
}

/// Read and check a header, returning the similarity kind it announces and the remaining bytes.
pub(crate) fn read_header(magic: [u8; 4], bytes: &[u8]) -> Result<(SimilarityKind, &[u8])> {
    let (header, read): (Header, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::legacy())?;
    if header.magic != magic {
        return Err(LshError::corrupt("unrecognised magic bytes"));
    }
    if header.version != FORMAT_VERSION {
        return Err(LshError::corrupt(format!(
            "unsupported format version {}",
            header.version
        )));
    }
    Ok((header.kind, &bytes[read..]))
}

/// Decode a value that must span all of `bytes`.
pub(crate) fn decode_exact<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, read): (T, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::legacy())?;
    match read == bytes.len() {
        true => Ok(value),
        false => Err(LshError::corrupt("trailing bytes after serialized index")),
    }
}

/// Reject search parameters no search could honour.
pub(crate) fn check_search_arguments(k: usize, recall: f32, max_sim: f32) -> Result<()> {
    if k == 0 {
        return Err(LshError::invalid("k must be positive"));
    }
    if !(recall > 0.0 && recall <= 1.0) {
        return Err(LshError::invalid(format!("recall {recall} is outside (0, 1]")));
    }
    if !max_sim.is_finite() {
        return Err(LshError::invalid("max_sim must be finite"));
    }
    Ok(())
}
