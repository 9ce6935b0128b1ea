#![forbid(unsafe_code)]

//! Append-only, content-addressed chunk storage.
//!
//! # Invariants
//!
//! 1. A key is written at most once; later `put`s with the same key keep the
//!    original payload.
//! 2. Nothing is removed except by [`ChunkStore::clear`], so any key a record
//!    has ever referenced stays resolvable until the owning history resets.
//! 3. `total_bytes` equals the summed length of all stored payloads.

use ahash::AHashMap;
use tracing::trace;

use crate::error::HistoryError;
use crate::hash::ChunkKey;

/// Counters describing the store's contents and how often dedup kicked in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStoreStats {
    /// Distinct chunks stored.
    pub chunks: usize,
    /// Summed payload length in bytes.
    pub bytes: usize,
    /// Total `put` calls.
    pub writes: u64,
    /// `put` calls that found their key already present.
    pub dedup_hits: u64,
}

/// Hash-addressed payload map owned by a single history.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: AHashMap<ChunkKey, Box<str>>,
    total_bytes: usize,
    writes: u64,
    dedup_hits: u64,
}

impl ChunkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `payload` under `key` unless the key is already present.
    ///
    /// Returns `true` if the payload was stored, `false` on a dedup hit.
    pub fn put(&mut self, key: ChunkKey, payload: String) -> bool {
        self.writes += 1;
        if self.chunks.contains_key(&key) {
            self.dedup_hits += 1;
            trace!(%key, "chunk dedup hit");
            return false;
        }
        self.total_bytes += payload.len();
        self.chunks.insert(key, payload.into_boxed_str());
        true
    }

    /// Hash and store a payload, returning its key.
    pub fn put_payload(&mut self, payload: String) -> ChunkKey {
        let key = ChunkKey::for_payload(&payload);
        self.put(key, payload);
        key
    }

    /// Look up a payload. A miss means a record outlived its chunks.
    pub fn get(&self, key: ChunkKey) -> Result<&str, HistoryError> {
        self.chunks
            .get(&key)
            .map(|payload| &**payload)
            .ok_or(HistoryError::MissingChunk { key })
    }

    #[must_use]
    pub fn contains(&self, key: ChunkKey) -> bool {
        self.chunks.contains_key(&key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    #[must_use]
    pub fn stats(&self) -> ChunkStoreStats {
        ChunkStoreStats {
            chunks: self.chunks.len(),
            bytes: self.total_bytes,
            writes: self.writes,
            dedup_hits: self.dedup_hits,
        }
    }

    /// Drop every chunk and reset the counters.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total_bytes = 0;
        self.writes = 0;
        self.dedup_hits = 0;
    }
}
