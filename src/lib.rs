//! # Loompoint: Checkpoint Persistence for Agent Workflows
//!
//! Loompoint stores versioned execution checkpoints for stateful agent and
//! workflow engines. Checkpoints are grouped into *threads* (one logical
//! conversation or run), linked into a parent-pointer history chain, and
//! persisted as opaque JSON blobs so the engine's state shape can evolve
//! without touching the storage layer.
//!
//! ## Core Concepts
//!
//! - **Checkpoint**: a serialized snapshot of execution state at one step
//! - **Thread**: a group of checkpoints forming one continuous run
//! - **Checkpoint chain**: the parent-linked history within a thread
//! - **Pending writes**: buffered intermediate writes for a checkpoint that
//!   has not yet committed its successor
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use loompoint::{
//!     Checkpoint, CheckpointRef, CheckpointStore, ListOptions, SqliteCheckpointStore,
//!     StoreConfig, sortable_checkpoint_id,
//! };
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteCheckpointStore::connect(
//!     "sqlite://agents.db",
//!     StoreConfig::new("thread_1"),
//! )
//! .await?;
//!
//! // Persist a checkpoint; the returned ref carries the written ids and
//! // becomes the parent context for the next put.
//! let checkpoint = Checkpoint::new(sortable_checkpoint_id(), json!({"step": 1}));
//! let head = store
//!     .put(&CheckpointRef::default(), &checkpoint, &json!({"source": "loop"}))
//!     .await?;
//!
//! // Resume from the latest checkpoint of the thread.
//! if let Some(tuple) = store.get(&CheckpointRef::default()).await? {
//!     println!("resuming at {:?}", tuple.config.checkpoint_id);
//! }
//!
//! // Walk history, newest first.
//! let mut history = store.list(&head, ListOptions::default()).await?;
//! while let Some(entry) = history.next().await {
//!     println!("{:?}", entry.config.checkpoint_id);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! - [`InMemoryCheckpointStore`] - volatile storage for tests and development
//! - [`SqliteCheckpointStore`] - durable SQLite-backed persistence (feature `sqlite`, default)
//! - `PostgresCheckpointStore` - durable PostgreSQL-backed persistence (feature `postgres`)
//!
//! ## Module Guide
//!
//! - [`checkpoint`] - data model: refs, tuples, pending writes, id helpers
//! - [`config`] - store configuration and table-name validation
//! - [`persistence`] - pure JSON-blob serialization, no I/O
//! - [`store`] - the [`CheckpointStore`] trait and its backends

pub mod checkpoint;
pub mod config;
pub mod persistence;
pub mod store;

pub use checkpoint::{
    Checkpoint, CheckpointRef, CheckpointTuple, ListOptions, PendingWrite, sortable_checkpoint_id,
};
pub use config::{ConfigError, StoreConfig, TableName, database_url_from_env};
pub use persistence::{JsonSerializer, PersistenceError};
#[cfg(feature = "postgres")]
pub use store::PostgresCheckpointStore;
#[cfg(feature = "sqlite")]
pub use store::SqliteCheckpointStore;
pub use store::{CheckpointStore, CheckpointStream, InMemoryCheckpointStore, StoreError};
