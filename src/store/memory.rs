/*!
Volatile in-memory checkpoint store.

Useful for tests and development; state lives for the lifetime of the store
instance. Rows hold the same serialized blob form the durable backends
persist, so payloads round-trip through the identical wire contract.
*/

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::instrument;

use super::{
    CheckpointStore, CheckpointStream, Result, StoreError, resolve_checkpoint_id, resolve_thread,
};
use crate::checkpoint::{Checkpoint, CheckpointRef, CheckpointTuple, ListOptions, PendingWrite};
use crate::config::StoreConfig;
use crate::persistence::JsonSerializer;

struct StoredRow {
    parent_id: Option<String>,
    checkpoint: Vec<u8>,
    metadata: Vec<u8>,
}

#[derive(Default)]
struct ThreadShelf {
    /// Checkpoint id -> row; BTreeMap keeps ids in lexicographic order.
    rows: BTreeMap<String, StoredRow>,
    /// Checkpoint id -> (task id, position) -> (channel, value bytes).
    writes: FxHashMap<String, BTreeMap<(String, usize), (String, Vec<u8>)>>,
}

/// In-memory implementation of [`CheckpointStore`].
pub struct InMemoryCheckpointStore {
    config: StoreConfig,
    serializer: JsonSerializer,
    threads: RwLock<FxHashMap<String, ThreadShelf>>,
}

impl InMemoryCheckpointStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            serializer: JsonSerializer,
            threads: RwLock::new(FxHashMap::default()),
        }
    }

    fn row_to_tuple(
        &self,
        thread_id: &str,
        checkpoint_id: &str,
        row: &StoredRow,
    ) -> Result<CheckpointTuple> {
        Ok(CheckpointTuple {
            config: CheckpointRef::at(thread_id, checkpoint_id),
            checkpoint: self.serializer.loads(&row.checkpoint)?,
            metadata: self.serializer.loads(&row.metadata)?,
            parent: row
                .parent_id
                .as_ref()
                .map(|p| CheckpointRef::at(thread_id, p)),
            pending_writes: Vec::new(),
        })
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl std::fmt::Debug for InMemoryCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCheckpointStore").finish()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    #[instrument(skip(self, checkpoint, metadata), err)]
    async fn put(
        &self,
        at: &CheckpointRef,
        checkpoint: &Checkpoint,
        metadata: &Value,
    ) -> Result<CheckpointRef> {
        let thread_id = resolve_thread(at, &self.config).to_string();
        let checkpoint_id = resolve_checkpoint_id(at, checkpoint)?;
        let checkpoint_blob = self.serializer.dumps(checkpoint)?;
        let metadata_blob = self.serializer.dumps(metadata)?;

        let mut threads = self.threads.write().await;
        let shelf = threads.entry(thread_id.clone()).or_default();
        match shelf.rows.entry(checkpoint_id.clone()) {
            std::collections::btree_map::Entry::Occupied(mut entry) => {
                // Upsert replaces payload and metadata only; the parent
                // pointer recorded at first insert is retained.
                let row = entry.get_mut();
                row.checkpoint = checkpoint_blob;
                row.metadata = metadata_blob;
            }
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(StoredRow {
                    parent_id: at.checkpoint_id.clone(),
                    checkpoint: checkpoint_blob,
                    metadata: metadata_blob,
                });
            }
        }

        Ok(CheckpointRef::at(thread_id, checkpoint_id))
    }

    #[instrument(skip(self), err)]
    async fn get(&self, at: &CheckpointRef) -> Result<Option<CheckpointTuple>> {
        let thread_id = resolve_thread(at, &self.config);
        let threads = self.threads.read().await;
        let Some(shelf) = threads.get(thread_id) else {
            return Ok(None);
        };
        let found = match &at.checkpoint_id {
            Some(id) => shelf.rows.get_key_value(id),
            None => shelf.rows.iter().next_back(),
        };
        let Some((checkpoint_id, row)) = found else {
            return Ok(None);
        };

        let mut tuple = self.row_to_tuple(thread_id, checkpoint_id, row)?;
        if let Some(buffered) = shelf.writes.get(checkpoint_id) {
            for ((task_id, _), (channel, bytes)) in buffered {
                tuple.pending_writes.push(PendingWrite {
                    task_id: task_id.clone(),
                    channel: channel.clone(),
                    value: self.serializer.loads(bytes)?,
                });
            }
        }
        Ok(Some(tuple))
    }

    #[instrument(skip(self), err)]
    async fn list(&self, at: &CheckpointRef, options: ListOptions) -> Result<CheckpointStream> {
        let thread_id = resolve_thread(at, &self.config);
        let threads = self.threads.read().await;

        let mut tuples = Vec::new();
        if let Some(shelf) = threads.get(thread_id) {
            let limit = options.limit.unwrap_or(usize::MAX);
            for (checkpoint_id, row) in shelf.rows.iter().rev() {
                if tuples.len() >= limit {
                    break;
                }
                if let Some(before) = &options.before {
                    if checkpoint_id >= before {
                        continue;
                    }
                }
                tuples.push(self.row_to_tuple(thread_id, checkpoint_id, row)?);
            }
        }
        Ok(stream::iter(tuples).boxed())
    }

    #[instrument(skip(self, writes), err)]
    async fn put_writes(
        &self,
        at: &CheckpointRef,
        task_id: &str,
        writes: &[(String, Value)],
    ) -> Result<()> {
        let checkpoint_id = at
            .checkpoint_id
            .clone()
            .ok_or(StoreError::MissingCheckpointId)?;
        let thread_id = resolve_thread(at, &self.config).to_string();

        let mut encoded = Vec::with_capacity(writes.len());
        for (idx, (channel, value)) in writes.iter().enumerate() {
            encoded.push((idx, channel.clone(), self.serializer.dumps(value)?));
        }

        let mut threads = self.threads.write().await;
        let shelf = threads.entry(thread_id).or_default();
        let buffered = shelf.writes.entry(checkpoint_id).or_default();
        for (idx, channel, bytes) in encoded {
            buffered.insert((task_id.to_string(), idx), (channel, bytes));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.threads.write().await.remove(thread_id);
        Ok(())
    }
}
