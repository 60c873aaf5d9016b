/*!
Data model for checkpoint persistence.

This module holds the serde-friendly types shared by every backend:
addressing refs, the checkpoint payload wrapper, retrieved tuples, and
pending-write records. It intentionally does NOT perform I/O; all storage
logic lives in the `store` module.

The payload (`Checkpoint::state`) and side-information
(`CheckpointTuple::metadata`) are opaque `serde_json::Value`s: the engine's
internal state shape is outside this crate's control and may evolve, so the
store never models its structure.
*/

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Addressing context for store operations.
///
/// A ref names a position inside a thread's history:
///
/// - `thread_id`: which thread; `None` falls back to the store-configured
///   default thread.
/// - `checkpoint_id`: which checkpoint. For [`get`](crate::CheckpointStore::get)
///   this selects an exact row (`None` means "latest"); for
///   [`put`](crate::CheckpointStore::put) it is recorded as the new row's
///   parent pointer.
///
/// `put` returns the ref of the written row, so threading the result of one
/// `put` into the next builds the parent chain:
///
/// ```rust,no_run
/// use loompoint::{Checkpoint, CheckpointRef, CheckpointStore};
/// use serde_json::json;
///
/// # async fn example(store: &dyn CheckpointStore) -> Result<(), loompoint::StoreError> {
/// let first = store
///     .put(&CheckpointRef::default(), &Checkpoint::new("001", json!({})), &json!({}))
///     .await?;
/// // "002" is stored with parent_id = "001".
/// store
///     .put(&first, &Checkpoint::new("002", json!({})), &json!({}))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub thread_id: Option<String>,
    pub checkpoint_id: Option<String>,
}

impl CheckpointRef {
    /// Ref addressing the latest checkpoint of `thread_id`.
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            checkpoint_id: None,
        }
    }

    /// Ref addressing one exact checkpoint.
    pub fn at(thread_id: impl Into<String>, checkpoint_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            checkpoint_id: Some(checkpoint_id.into()),
        }
    }
}

/// One snapshot of execution state.
///
/// `id` must be unique within its thread and is the listing sort key:
/// ordering is plain lexicographic string comparison, so callers must pick a
/// format that sorts correctly (zero-padded sequence numbers, or the
/// timestamps produced by [`sortable_checkpoint_id`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    #[serde(default)]
    pub state: Value,
}

impl Checkpoint {
    pub fn new(id: impl Into<String>, state: Value) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }

    /// Checkpoint with a freshly generated sortable id.
    pub fn with_generated_id(state: Value) -> Self {
        Self::new(sortable_checkpoint_id(), state)
    }
}

/// Options for history listing.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Maximum number of entries to return.
    pub limit: Option<usize>,
    /// Only entries with `checkpoint_id` strictly less than this value
    /// (backward pagination cursor).
    pub before: Option<String>,
}

/// An intermediate write buffered against a not-yet-superseded checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub task_id: String,
    pub channel: String,
    pub value: Value,
}

/// A retrieved checkpoint row.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointTuple {
    /// Fully resolved ref of this row (both ids populated).
    pub config: CheckpointRef,
    pub checkpoint: Checkpoint,
    pub metadata: Value,
    /// Ref of the parent checkpoint, when the row has one; usable to walk
    /// history backward one hop at a time.
    pub parent: Option<CheckpointRef>,
    /// Buffered writes attached to this checkpoint. Populated by point
    /// lookups; listings leave it empty.
    pub pending_writes: Vec<PendingWrite>,
}

/// Generate a checkpoint id that sorts lexicographically in creation order.
///
/// The id is a fixed-width UTC timestamp with microsecond precision plus a
/// short random suffix to break same-microsecond ties:
///
/// ```text
/// 20260806T142512.304817Z-9f3b21c4
/// ```
///
/// ```rust
/// use loompoint::sortable_checkpoint_id;
///
/// let a = sortable_checkpoint_id();
/// std::thread::sleep(std::time::Duration::from_millis(2));
/// let b = sortable_checkpoint_id();
/// assert!(a < b);
/// ```
pub fn sortable_checkpoint_id() -> String {
    let ts = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{ts}-{}", &suffix[..8])
}
