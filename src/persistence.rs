/*!
Persistence primitives for encoding checkpoint payloads and metadata.

Stored blobs are UTF-8 JSON text encoded to bytes; decoding reverses this.
That is the wire contract the orchestration engine relies on implicitly, so
every backend routes its blobs through [`JsonSerializer`] rather than
hand-rolling encoding at the call site.

This module intentionally does NOT perform I/O. It is pure data
transformation and (de)serialization glue.
*/

use miette::Diagnostic;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Serialization errors for stored blobs.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("JSON serialization/deserialization failed: {source}")]
    #[diagnostic(
        code(loompoint::persistence::serde),
        help("Stored blobs must be UTF-8 JSON text; check the payload shape.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

/// Encoder/decoder for the stored blob format.
///
/// ```rust
/// use loompoint::JsonSerializer;
/// use serde_json::json;
///
/// let serializer = JsonSerializer;
/// let bytes = serializer.dumps(&json!({"step": 3})).unwrap();
/// let value: serde_json::Value = serializer.loads(&bytes).unwrap();
/// assert_eq!(value["step"], 3);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    /// Encode a value to UTF-8 JSON bytes.
    pub fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, PersistenceError> {
        serde_json::to_vec(value).map_err(|e| PersistenceError::Serde { source: e })
    }

    /// Decode a value from UTF-8 JSON bytes.
    pub fn loads<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, PersistenceError> {
        serde_json::from_slice(bytes).map_err(|e| PersistenceError::Serde { source: e })
    }
}
