/*!
The [`CheckpointStore`] trait and its backends.

A store persists checkpoints per thread with upsert semantics, serves point
lookups and reverse-chronological history listings, buffers pending writes
for in-flight steps, and deletes whole threads in one operation.

# Backends

- [`InMemoryCheckpointStore`] - volatile storage for testing and development
- [`SqliteCheckpointStore`] - durable SQLite-backed persistence
- `PostgresCheckpointStore` - durable PostgreSQL-backed persistence

# Contract notes

All mutating operations are single statements (or a single transaction), so
a failure never leaves partial cross-call state behind; errors are local to
one operation and the caller decides whether to retry. Concurrent `put`s to
the same `(thread, checkpoint)` key rely on the backing store's upsert
atomicity: last writer wins at the row level, and no optimistic-concurrency
token is maintained at this layer.
*/

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::checkpoint::{Checkpoint, CheckpointRef, CheckpointTuple, ListOptions};
use crate::config::{ConfigError, StoreConfig};
use crate::persistence::PersistenceError;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryCheckpointStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCheckpointStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCheckpointStore;

/// Stream of history entries, newest first.
///
/// The backing query runs eagerly when `list` is called; the stream yields
/// the materialized entries incrementally and is not restartable (a fresh
/// `list` call re-queries current state).
pub type CheckpointStream = BoxStream<'static, CheckpointTuple>;

/// Store operation failures.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("schema initialization failed: {message}")]
    #[diagnostic(
        code(loompoint::store::schema),
        help("The store stays uninitialized after this error; the next call retries table creation.")
    )]
    Schema { message: String },

    #[error("backend error: {message}")]
    #[diagnostic(code(loompoint::store::backend))]
    Backend { message: String },

    #[error("no checkpoint id in the checkpoint or the ref")]
    #[diagnostic(
        code(loompoint::store::missing_checkpoint_id),
        help("Set Checkpoint::id, or address an existing checkpoint via CheckpointRef::checkpoint_id.")
    )]
    MissingCheckpointId,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Durable storage and retrieval of checkpoints for an orchestration engine.
///
/// The engine calls [`put`](CheckpointStore::put) once per committed step
/// with a monotonically advancing checkpoint id, [`get`](CheckpointStore::get)
/// and [`list`](CheckpointStore::list) to resume or inspect history, and
/// [`delete_thread`](CheckpointStore::delete_thread) to purge a conversation.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Upsert a checkpoint row keyed by `(thread, checkpoint id)`.
    ///
    /// The stored id comes from `checkpoint.id` when non-empty, else from
    /// `at.checkpoint_id`. The row's parent pointer is `at.checkpoint_id`.
    /// A colliding key overwrites payload and metadata in place, never
    /// errors. Returns the ref of the written row for chaining.
    async fn put(
        &self,
        at: &CheckpointRef,
        checkpoint: &Checkpoint,
        metadata: &Value,
    ) -> Result<CheckpointRef>;

    /// Fetch one checkpoint: the exact row when `at.checkpoint_id` is set,
    /// else the latest (lexicographically greatest id) of the thread.
    /// `Ok(None)` when absent. The tuple carries the parent ref for walking
    /// history and any pending writes buffered against the checkpoint.
    async fn get(&self, at: &CheckpointRef) -> Result<Option<CheckpointTuple>>;

    /// List the thread's checkpoints in `checkpoint_id` descending order.
    ///
    /// `options.before` restricts to ids strictly less than the cursor;
    /// `options.limit` caps the number of entries. Listed tuples do not
    /// carry pending writes; use [`get`](CheckpointStore::get) for those.
    async fn list(&self, at: &CheckpointRef, options: ListOptions) -> Result<CheckpointStream>;

    /// Buffer intermediate writes against the checkpoint named by
    /// `at.checkpoint_id`, keyed by `(task_id, position)` with upsert
    /// semantics so a retried task replaces its own records.
    async fn put_writes(
        &self,
        at: &CheckpointRef,
        task_id: &str,
        writes: &[(String, Value)],
    ) -> Result<()>;

    /// Remove every checkpoint and pending write of the thread. Idempotent:
    /// deleting an absent thread is a no-op, not an error.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}

/// Thread id of a ref, falling back to the store's configured default.
pub(crate) fn resolve_thread<'a>(at: &'a CheckpointRef, config: &'a StoreConfig) -> &'a str {
    at.thread_id.as_deref().unwrap_or(&config.thread_id)
}

/// Checkpoint id for a `put`: the checkpoint's own id wins, the ref's id is
/// the fallback, and having neither is an error.
pub(crate) fn resolve_checkpoint_id(
    at: &CheckpointRef,
    checkpoint: &Checkpoint,
) -> Result<String> {
    if !checkpoint.id.is_empty() {
        return Ok(checkpoint.id.clone());
    }
    at.checkpoint_id
        .clone()
        .ok_or(StoreError::MissingCheckpointId)
}
