//! Result codec for values crossing the process boundary.
//!
//! A payload is a JSON array holding the task's return values in order.
//! JSON is self-describing, so the reader needs no schema to rebuild the
//! values. The same encoding carries the task descriptor sent to the child.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

/// Payloads above this size get a warning. The transfer protocol assumes the
/// whole payload fits in the pipe buffer (commonly 64KB) before the parent
/// starts reading.
pub const PAYLOAD_WARN_THRESHOLD: usize = 4096;

/// Deepest nesting of arrays/objects accepted by [`encode`].
///
/// Stays below `serde_json`'s own recursion limit so anything we encode can
/// be decoded again on the other side.
pub const MAX_NESTING_DEPTH: usize = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("value nesting exceeds {limit} levels (cyclic structures cannot be encoded)")]
    NestingTooDeep { limit: usize },

    #[error("failed to encode value: {0}")]
    Encode(String),

    #[error("failed to decode payload: {0}")]
    Decode(String),
}

/// Encodes an ordered sequence of values into a payload.
///
/// # Errors
///
/// Returns [`CodecError::NestingTooDeep`] when any value nests deeper than
/// [`MAX_NESTING_DEPTH`].
pub fn encode(values: &[Value]) -> Result<Vec<u8>, CodecError> {
    for value in values {
        check_depth(value, 1)?;
    }
    serde_json::to_vec(values).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a payload back into the ordered sequence of values.
///
/// Malformed input fails as a whole; there is no partial result.
pub fn decode(bytes: &[u8]) -> Result<Vec<Value>, CodecError> {
    serde_json::from_slice::<Vec<Value>>(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Size the payload for `values` would have once encoded.
pub fn encoded_len(values: &[Value]) -> Result<usize, CodecError> {
    encode(values).map(|bytes| bytes.len())
}

/// Whether a payload of `len` bytes is above the warning threshold.
pub fn exceeds_threshold(len: usize, threshold: usize) -> bool {
    len > threshold
}

pub(crate) fn encode_message<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(message).map_err(|e| CodecError::Encode(e.to_string()))
}

pub(crate) fn decode_message<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

fn check_depth(value: &Value, depth: usize) -> Result<(), CodecError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(CodecError::NestingTooDeep {
            limit: MAX_NESTING_DEPTH,
        });
    }
    match value {
        Value::Array(items) => items.iter().try_for_each(|v| check_depth(v, depth + 1)),
        Value::Object(map) => map.values().try_for_each(|v| check_depth(v, depth + 1)),
        _ => Ok(()),
    }
}
