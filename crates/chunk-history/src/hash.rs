#![forbid(unsafe_code)]

//! Content hash used to address chunks.
//!
//! MurmurHash2 (32-bit) over the UTF-8 bytes of a chunk's serialized form.
//! The hash is a dedup key only: it is fast and stable across processes (no
//! random seed), but it makes no attempt at collision resistance.

use std::fmt;

use serde::{Deserialize, Serialize};

const M: u32 = 0x5bd1_e995;
const R: u32 = 24;

/// Hash a string with seed 0.
#[inline]
#[must_use]
pub fn hash_str(text: &str) -> u32 {
    hash_bytes_with_seed(text.as_bytes(), 0)
}

/// MurmurHash2 over raw bytes with an explicit seed.
#[must_use]
pub fn hash_bytes_with_seed(data: &[u8], seed: u32) -> u32 {
    // Only the low 32 bits of the length participate.
    let mut h = seed ^ (data.len() as u32);

    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let mut k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = blocks.remainder();
    if tail.len() == 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// Address of a chunk in the [`ChunkStore`](crate::ChunkStore).
///
/// Displays as the decimal hash value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkKey(u32);

impl ChunkKey {
    /// Key for an already-serialized payload.
    #[inline]
    #[must_use]
    pub fn for_payload(payload: &str) -> Self {
        Self(hash_str(payload))
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
