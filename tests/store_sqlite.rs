#![cfg(feature = "sqlite")]

use loompoint::{
    Checkpoint, CheckpointRef, CheckpointStore, ListOptions, SqliteCheckpointStore, StoreConfig,
    StoreError,
};
use serde_json::json;

mod common;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_put_get_roundtrip() {
    let store = sqlite_store("t1").await;
    let payload = json!({
        "step": 7,
        "messages": [{"role": "user", "content": "hello"}],
        "nested": {"versions": [1, 2, 3], "flag": true}
    });
    let meta = json!({"source": "loop", "writes": {"messages": 1}});

    let written = store
        .put(
            &CheckpointRef::thread("t1"),
            &Checkpoint::new("001", payload.clone()),
            &meta,
        )
        .await
        .expect("put");
    assert_eq!(written.thread_id.as_deref(), Some("t1"));
    assert_eq!(written.checkpoint_id.as_deref(), Some("001"));

    let tuple = store.get(&written).await.expect("get").expect("Some tuple");
    assert_eq!(tuple.checkpoint.id, "001");
    assert_eq!(tuple.checkpoint.state, payload);
    assert_eq!(tuple.metadata, meta);
    assert!(tuple.parent.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upsert_overwrites_payload_and_metadata() {
    let store = sqlite_store("t1").await;
    let at = CheckpointRef::thread("t1");

    store
        .put(&at, &checkpoint("001", 1), &metadata("first"))
        .await
        .expect("first put");
    store
        .put(&at, &checkpoint("001", 2), &metadata("second"))
        .await
        .expect("second put");

    let ids = collect_ids(
        store
            .list(&at, ListOptions::default())
            .await
            .expect("list"),
    )
    .await;
    assert_eq!(ids, vec!["001"], "colliding put must not add a row");

    let tuple = store
        .get(&CheckpointRef::at("t1", "001"))
        .await
        .expect("get")
        .expect("Some tuple");
    assert_eq!(tuple.checkpoint.state["step"], 2);
    assert_eq!(tuple.metadata["source"], "second");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_list_orders_descending() {
    let store = sqlite_store("t1").await;
    let at = CheckpointRef::thread("t1");
    // Insert out of order to prove ordering comes from the id, not
    // insertion sequence.
    for id in ["002", "001", "003"] {
        store
            .put(&at, &checkpoint(id, 0), &metadata("seed"))
            .await
            .expect("put");
    }

    let ids = collect_ids(
        store
            .list(&at, ListOptions::default())
            .await
            .expect("list"),
    )
    .await;
    assert_eq!(ids, vec!["003", "002", "001"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_list_pagination_before_and_limit() {
    let store = sqlite_store("t1").await;
    let at = CheckpointRef::thread("t1");
    seed_chain(&store, "t1", &["001", "002", "003"]).await;

    let before = collect_ids(
        store
            .list(
                &at,
                ListOptions {
                    before: Some("002".into()),
                    ..Default::default()
                },
            )
            .await
            .expect("list before"),
    )
    .await;
    assert_eq!(before, vec!["001"], "before is a strict bound");

    let limited = collect_ids(
        store
            .list(
                &at,
                ListOptions {
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .await
            .expect("list limit"),
    )
    .await;
    assert_eq!(limited, vec!["003"]);

    let combined = collect_ids(
        store
            .list(
                &at,
                ListOptions {
                    limit: Some(1),
                    before: Some("003".into()),
                },
            )
            .await
            .expect("list combined"),
    )
    .await;
    assert_eq!(combined, vec!["002"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_get_without_id_returns_latest() {
    let store = sqlite_store("t1").await;
    let at = CheckpointRef::thread("t1");
    for id in ["002", "003", "001"] {
        store
            .put(&at, &checkpoint(id, 0), &metadata("seed"))
            .await
            .expect("put");
    }

    let tuple = store.get(&at).await.expect("get").expect("Some tuple");
    assert_eq!(tuple.config.checkpoint_id.as_deref(), Some("003"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_thread_isolation() {
    let store = sqlite_store("t1").await;
    seed_chain(&store, "thread_a", &["001", "002"]).await;
    seed_chain(&store, "thread_b", &["901"]).await;

    let a_ids = collect_ids(
        store
            .list(&CheckpointRef::thread("thread_a"), ListOptions::default())
            .await
            .expect("list a"),
    )
    .await;
    assert_eq!(a_ids, vec!["002", "001"]);

    let b = store
        .get(&CheckpointRef::thread("thread_b"))
        .await
        .expect("get b")
        .expect("Some tuple");
    assert_eq!(b.config.checkpoint_id.as_deref(), Some("901"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parent_chain_walk() {
    let store = sqlite_store("t1").await;
    let head = seed_chain(&store, "t1", &["001", "002", "003"]).await;

    let mut walked = Vec::new();
    let mut cursor = Some(head);
    while let Some(at) = cursor {
        let tuple = store.get(&at).await.expect("get").expect("chain entry");
        walked.push(tuple.config.checkpoint_id.clone().expect("id"));
        cursor = tuple.parent;
    }
    assert_eq!(walked, vec!["003", "002", "001"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_thread_is_idempotent() {
    let store = sqlite_store("t1").await;
    let head = seed_chain(&store, "t1", &["001", "002"]).await;
    store
        .put_writes(&head, "task_a", &[("messages".into(), json!("draft"))])
        .await
        .expect("put_writes");

    store.delete_thread("t1").await.expect("delete");

    assert!(
        store
            .get(&CheckpointRef::thread("t1"))
            .await
            .expect("get")
            .is_none()
    );
    let ids = collect_ids(
        store
            .list(&CheckpointRef::thread("t1"), ListOptions::default())
            .await
            .expect("list"),
    )
    .await;
    assert!(ids.is_empty());

    // Deleting an already-empty thread is a no-op, not an error.
    store.delete_thread("t1").await.expect("re-delete");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pending_writes_roundtrip_and_upsert() {
    let store = sqlite_store("t1").await;
    let head = seed_chain(&store, "t1", &["001"]).await;

    store
        .put_writes(
            &head,
            "task_a",
            &[
                ("messages".into(), json!("draft one")),
                ("extra".into(), json!({"k": 1})),
            ],
        )
        .await
        .expect("put_writes");

    // A retried task replaces its own records in place.
    store
        .put_writes(
            &head,
            "task_a",
            &[
                ("messages".into(), json!("draft two")),
                ("extra".into(), json!({"k": 2})),
            ],
        )
        .await
        .expect("retry put_writes");

    let tuple = store.get(&head).await.expect("get").expect("Some tuple");
    assert_eq!(tuple.pending_writes.len(), 2);
    assert_eq!(tuple.pending_writes[0].task_id, "task_a");
    assert_eq!(tuple.pending_writes[0].channel, "messages");
    assert_eq!(tuple.pending_writes[0].value, json!("draft two"));
    assert_eq!(tuple.pending_writes[1].value, json!({"k": 2}));

    // Writes attach to their checkpoint only.
    let other = store
        .put(
            &head,
            &checkpoint("002", 2),
            &metadata("next"),
        )
        .await
        .expect("put next");
    let other_tuple = store.get(&other).await.expect("get").expect("Some tuple");
    assert!(other_tuple.pending_writes.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_put_writes_requires_checkpoint_id() {
    let store = sqlite_store("t1").await;
    let err = store
        .put_writes(
            &CheckpointRef::thread("t1"),
            "task_a",
            &[("messages".into(), json!("x"))],
        )
        .await
        .expect_err("must reject ref without checkpoint id");
    assert!(matches!(err, StoreError::MissingCheckpointId));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_default_thread_fallback() {
    let store = sqlite_store("fallback_thread").await;

    store
        .put(
            &CheckpointRef::default(),
            &checkpoint("001", 1),
            &metadata("seed"),
        )
        .await
        .expect("put");

    let via_default = store
        .get(&CheckpointRef::default())
        .await
        .expect("get")
        .expect("Some tuple");
    assert_eq!(
        via_default.config.thread_id.as_deref(),
        Some("fallback_thread")
    );

    let via_explicit = store
        .get(&CheckpointRef::thread("fallback_thread"))
        .await
        .expect("get")
        .expect("Some tuple");
    assert_eq!(via_explicit.config, via_default.config);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_checkpoint_id_falls_back_to_ref() {
    let store = sqlite_store("t1").await;

    let written = store
        .put(
            &CheckpointRef::at("t1", "from_ref"),
            &Checkpoint::new("", json!({"step": 1})),
            &metadata("seed"),
        )
        .await
        .expect("put");
    assert_eq!(written.checkpoint_id.as_deref(), Some("from_ref"));

    let err = store
        .put(
            &CheckpointRef::thread("t1"),
            &Checkpoint::new("", json!({})),
            &metadata("seed"),
        )
        .await
        .expect_err("no id anywhere must fail");
    assert!(matches!(err, StoreError::MissingCheckpointId));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_table_name_rejected_before_io() {
    let config = StoreConfig::new("t1").with_table("checkpoints; DROP TABLE users");
    let err = SqliteCheckpointStore::connect("sqlite::memory:", config)
        .await
        .expect_err("invalid table name must fail");
    assert!(matches!(err, StoreError::Config(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_foreign_scheme_rejected_before_io() {
    // No server is running anywhere; the error must come from validation,
    // not from a connection attempt.
    let err = SqliteCheckpointStore::connect(
        "postgres://localhost/agents",
        StoreConfig::new("t1"),
    )
    .await
    .expect_err("foreign scheme must fail");
    assert!(matches!(err, StoreError::Config(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_normalized_table_name_is_used() {
    let config = StoreConfig::new("t1").with_table("  Agent Checkpoints ");
    let store = SqliteCheckpointStore::connect("sqlite::memory:", config)
        .await
        .expect("connect");

    let head = seed_chain(&store, "t1", &["001"]).await;
    let tuple = store.get(&head).await.expect("get").expect("Some tuple");
    assert_eq!(tuple.checkpoint.id, "001");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_backed_store_survives_reconnect() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}/loom.db?mode=rwc", dir.path().display());

    {
        let store = SqliteCheckpointStore::connect(&url, StoreConfig::new("t1"))
            .await
            .expect("connect");
        seed_chain(&store, "t1", &["001", "002"]).await;
    }

    let store = SqliteCheckpointStore::connect(&url, StoreConfig::new("t1"))
        .await
        .expect("reconnect");
    let tuple = store
        .get(&CheckpointRef::thread("t1"))
        .await
        .expect("get")
        .expect("Some tuple");
    assert_eq!(tuple.config.checkpoint_id.as_deref(), Some("002"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_list_is_a_snapshot_not_a_live_view() {
    let store = sqlite_store("t1").await;
    seed_chain(&store, "t1", &["001", "002"]).await;

    let stream = store
        .list(&CheckpointRef::thread("t1"), ListOptions::default())
        .await
        .expect("list");

    // A row written after the call does not appear in the already-produced
    // sequence; a fresh call re-queries current state.
    store
        .put(
            &CheckpointRef::thread("t1"),
            &checkpoint("003", 3),
            &metadata("late"),
        )
        .await
        .expect("late put");

    let ids = collect_ids(stream).await;
    assert_eq!(ids, vec!["002", "001"]);

    let fresh = collect_ids(
        store
            .list(&CheckpointRef::thread("t1"), ListOptions::default())
            .await
            .expect("fresh list"),
    )
    .await;
    assert_eq!(fresh, vec!["003", "002", "001"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_puts_last_writer_wins() {
    // File-backed: pooled in-memory SQLite hands each new connection its
    // own database, which breaks cross-connection visibility under load.
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}/race.db?mode=rwc", dir.path().display());
    let store = std::sync::Arc::new(
        SqliteCheckpointStore::connect(&url, StoreConfig::new("t1"))
            .await
            .expect("connect"),
    );
    let mut handles = Vec::new();
    for marker in 0..8_i64 {
        let store = std::sync::Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .put(
                    &CheckpointRef::thread("t1"),
                    &checkpoint("001", marker),
                    &metadata("race"),
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("put");
    }

    let ids = collect_ids(
        store
            .list(&CheckpointRef::thread("t1"), ListOptions::default())
            .await
            .expect("list"),
    )
    .await;
    assert_eq!(ids, vec!["001"], "row-level upsert keeps a single row");
}
