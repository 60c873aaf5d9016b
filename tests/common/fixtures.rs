#![allow(dead_code)]

use futures_util::StreamExt;
use loompoint::{Checkpoint, CheckpointRef, CheckpointStore, CheckpointStream, StoreConfig};
use serde_json::{Value, json};

/// Checkpoint payload with a recognizable marker for assertions.
pub fn checkpoint(id: &str, marker: i64) -> Checkpoint {
    Checkpoint::new(
        id,
        json!({"step": marker, "messages": [format!("message {marker}")]}),
    )
}

pub fn metadata(source: &str) -> Value {
    json!({"source": source, "step_kind": "loop"})
}

#[cfg(feature = "sqlite")]
pub async fn sqlite_store(thread: &str) -> loompoint::SqliteCheckpointStore {
    loompoint::SqliteCheckpointStore::connect("sqlite::memory:", StoreConfig::new(thread))
        .await
        .expect("connect sqlite memory")
}

/// Seed a parent-linked chain of checkpoints in `ids` order, returning the
/// ref of the last (head) checkpoint.
pub async fn seed_chain(store: &dyn CheckpointStore, thread: &str, ids: &[&str]) -> CheckpointRef {
    let mut head = CheckpointRef::thread(thread);
    for (i, id) in ids.iter().enumerate() {
        head = store
            .put(&head, &checkpoint(id, i as i64 + 1), &metadata("seed"))
            .await
            .expect("seed put");
    }
    head
}

/// Drain a history stream into the checkpoint ids it yields, in order.
pub async fn collect_ids(stream: CheckpointStream) -> Vec<String> {
    stream
        .map(|tuple| tuple.config.checkpoint_id.expect("resolved id"))
        .collect::<Vec<_>>()
        .await
}
