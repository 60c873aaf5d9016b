//! Builds a small checkpoint chain in an in-memory SQLite store, resumes
//! from the latest snapshot, and walks the parent pointers back to the root.
//!
//! Run with:
//! ```bash
//! cargo run --example checkpoint_chain
//! ```

use futures_util::StreamExt;
use loompoint::{
    Checkpoint, CheckpointRef, CheckpointStore, ListOptions, SqliteCheckpointStore, StoreConfig,
    sortable_checkpoint_id,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let store =
        SqliteCheckpointStore::connect("sqlite::memory:", StoreConfig::new("demo_thread")).await?;

    // Commit three steps; each put's returned ref is the next put's parent
    // context.
    let mut head = CheckpointRef::default();
    for step in 1..=3 {
        let checkpoint = Checkpoint::new(
            sortable_checkpoint_id(),
            json!({"step": step, "messages": [format!("message {step}")]}),
        );
        head = store
            .put(&head, &checkpoint, &json!({"source": "demo", "step": step}))
            .await?;
        println!("committed step {step} as {:?}", head.checkpoint_id);
    }

    // Buffer a pending write against the head checkpoint.
    store
        .put_writes(
            &head,
            "task_a",
            &[("messages".into(), json!("draft reply"))],
        )
        .await?;

    // Resume from the latest checkpoint.
    let latest = store
        .get(&CheckpointRef::thread("demo_thread"))
        .await?
        .expect("thread has checkpoints");
    println!(
        "latest: {:?} (pending writes: {})",
        latest.config.checkpoint_id,
        latest.pending_writes.len()
    );

    // History, newest first.
    let mut history = store
        .list(&CheckpointRef::thread("demo_thread"), ListOptions::default())
        .await?;
    while let Some(tuple) = history.next().await {
        println!("history entry: {:?}", tuple.config.checkpoint_id);
    }

    // Walk the parent chain from the head back to the root.
    let mut cursor = Some(latest.config.clone());
    while let Some(at) = cursor {
        let tuple = store.get(&at).await?.expect("chain entry exists");
        println!(
            "chain: {:?} -> parent {:?}",
            tuple.config.checkpoint_id,
            tuple.parent.as_ref().and_then(|p| p.checkpoint_id.clone())
        );
        cursor = tuple.parent;
    }

    store.delete_thread("demo_thread").await?;
    Ok(())
}
