#![forbid(unsafe_code)]

//! Structural codec between application state and chunk payloads.
//!
//! Everything that enters the chunk store goes through [`encode`], and
//! everything that leaves it goes through [`decode`]. The encoding is
//! compact JSON with object keys in sorted order, so two structurally equal
//! values always produce the same payload and therefore the same
//! [`ChunkKey`](crate::ChunkKey).
//!
//! Floats are written with their shortest exact representation and parsed
//! back with `float_roundtrip`, so every finite `f64` survives unchanged.
//! Decoding has no nesting limit: any value [`encode`] accepts, [`decode`]
//! reads back.
//!
//! Shared or cyclic structure is not representable in an owned Rust value.
//! Model it as an arena instead (nodes in a `Vec`, edges as indices); the
//! indices round-trip as ordinary numbers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which direction of the codec failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStage {
    /// Application state -> [`Value`].
    ToValue,
    /// [`Value`] -> application state.
    FromValue,
    /// [`Value`] -> payload string.
    Encode,
    /// Payload string -> [`Value`].
    Decode,
}

impl std::fmt::Display for CodecStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ToValue => "to-value",
            Self::FromValue => "from-value",
            Self::Encode => "encode",
            Self::Decode => "decode",
        };
        f.write_str(name)
    }
}

/// A codec failure, flattened to its message so it can be cloned and fanned
/// out to every waiter of a coalesced push.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("codec {stage} failed: {message}")]
pub struct CodecError {
    pub stage: CodecStage,
    pub message: String,
}

impl CodecError {
    fn new(stage: CodecStage, err: &serde_json::Error) -> Self {
        Self {
            stage,
            message: err.to_string(),
        }
    }
}

/// Serialize a chunk value to its canonical payload.
pub fn encode(value: &Value) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::new(CodecStage::Encode, &e))
}

/// Parse a payload produced by [`encode`].
pub fn decode(payload: &str) -> Result<Value, CodecError> {
    let failed = |e: serde_json::Error| CodecError::new(CodecStage::Decode, &e);
    let mut de = serde_json::Deserializer::from_str(payload);
    de.disable_recursion_limit();
    let value = Value::deserialize(&mut de).map_err(failed)?;
    de.end().map_err(failed)?;
    Ok(value)
}

/// Lower typed state into the value model the transform rules operate on.
pub fn to_value<T: Serialize>(state: &T) -> Result<Value, CodecError> {
    serde_json::to_value(state).map_err(|e| CodecError::new(CodecStage::ToValue, &e))
}

/// Raise a recomposed value back into typed state.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, CodecError> {
    serde_json::from_value(value).map_err(|e| CodecError::new(CodecStage::FromValue, &e))
}
