#![forbid(unsafe_code)]

//! Chunk History
//!
//! Undo/redo history for tree-shaped application state. Each snapshot is
//! decomposed into content-addressed chunks, so consecutive snapshots that
//! differ in one node share storage for everything else.
//!
//! # Key Components
//!
//! - [`History`] - Shared handle: push, get, undo, redo, reset
//! - [`HistoryBuilder`] - Rules, initial state, limits and the change callback
//! - [`PushFuture`] - Completion of a debounced push
//! - [`TransformRule`] / [`RuleSet`] - How a node splits into chunks and children
//! - [`ChunkStore`] - Append-only payload map keyed by [`ChunkKey`]
//! - [`Record`] - Reference-only tree for one snapshot
//! - [`HistoryConfig`] - Tunables, loadable from JSON (and TOML with `config-file`)
//!
//! # Data flow
//!
//! ```text
//! push(state) ──► PushQueue ──(delay of silence)──┐
//! push_sync(state) ───────────────────────────────┤
//!                                                 ▼
//!                 RuleSet::select ─► decompose ─► ChunkStore::put
//!                                                 │
//!                                   Record ─► HistoryStack slot
//!
//! get() ◄── recompose ◄── ChunkStore::get ◄── Record at cursor
//! ```
//!
//! States are any `Serialize + DeserializeOwned + Clone` type; rules see them
//! as [`serde_json::Value`]. Shared or cyclic structure is expressed with
//! indices (an arena), which round-trips as ordinary data.

pub mod chunk_store;
pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod history;
mod pending;
pub mod record;
pub mod rules;
mod stack;

pub use chunk_store::{ChunkStore, ChunkStoreStats};
pub use codec::{CodecError, CodecStage};
pub use config::{ConfigError, HistoryConfig};
pub use error::{HistoryError, HistoryResult};
pub use hash::{ChunkKey, hash_bytes_with_seed, hash_str};
pub use history::{History, HistoryBuilder, HistoryStats, PushFuture};
pub use record::Record;
pub use rules::{CHILDREN_FIELD, Decomposed, DefaultRule, FnRule, RuleIndex, RuleSet, TransformRule};
