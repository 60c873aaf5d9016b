/*!
SQLite Checkpoint Store

This module provides the `SqliteCheckpointStore` async implementation of the
`CheckpointStore` trait defined in `store/mod.rs`.

## Behavior

- Blobs are encoded through the persistence module (UTF-8 JSON bytes); this
  module is focused on database I/O only.
- Schema initialization is lazy: the first operation creates the checkpoint
  and pending-writes tables under a single-flight guard scoped to the store
  instance. `CREATE TABLE IF NOT EXISTS` keeps concurrent first-use across
  instances idempotent. A failed initialization leaves the store
  uninitialized so the next call retries.
- The table name is configurable and interpolated into statement text, so it
  is validated in `connect` before any I/O (see `config::TableName`).

## Database Schema

| column        | type | notes                 |
|---------------|------|-----------------------|
| thread_id     | TEXT | part of primary key   |
| checkpoint_id | TEXT | part of primary key   |
| parent_id     | TEXT | history chain pointer |
| checkpoint    | BLOB | serialized payload    |
| metadata      | BLOB | serialized metadata   |

The companion `<table>_writes` table keys pending writes by
`(thread_id, checkpoint_id, task_id, idx)`.
*/

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tokio::sync::OnceCell;
use tracing::instrument;

use super::{
    CheckpointStore, CheckpointStream, Result, StoreError, resolve_checkpoint_id, resolve_thread,
};
use crate::checkpoint::{Checkpoint, CheckpointRef, CheckpointTuple, ListOptions, PendingWrite};
use crate::config::{StoreConfig, TableName, validate_url};
use crate::persistence::JsonSerializer;

/// SQLite-backed implementation of [`CheckpointStore`].
///
/// # Storage Growth
///
/// Every committed step adds a row; storage grows roughly with
/// `(threads x checkpoints_per_thread x payload_size)`. Long-running
/// applications should purge finished conversations with
/// [`delete_thread`](CheckpointStore::delete_thread).
pub struct SqliteCheckpointStore {
    /// Shared SQLite connection pool; each operation borrows a connection
    /// and releases it on every exit path.
    pool: Arc<SqlitePool>,
    config: StoreConfig,
    table: TableName,
    writes_table: TableName,
    serializer: JsonSerializer,
    schema_ready: OnceCell<()>,
}

impl std::fmt::Debug for SqliteCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointStore")
            .field("table", &self.table)
            .finish()
    }
}

impl SqliteCheckpointStore {
    /// Connect (or create) a SQLite database at `database_url`.
    /// Example URLs: `"sqlite://agents.db"`, `"sqlite::memory:"`.
    ///
    /// The configured table name is validated here, before any connection is
    /// opened; tables themselves are created lazily on first use.
    #[must_use = "store must be used to persist checkpoints"]
    #[instrument(skip(database_url, config))]
    pub async fn connect(
        database_url: &str,
        config: StoreConfig,
    ) -> std::result::Result<Self, StoreError> {
        let table = config.checkpoint_table()?;
        let writes_table = table.writes_table();
        validate_url(database_url, &["sqlite"], &[])?;
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("connect error: {e}"),
            })?;
        Ok(Self {
            pool: Arc::new(pool),
            config,
            table,
            writes_table,
            serializer: JsonSerializer,
            schema_ready: OnceCell::new(),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(&format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {} (
                        thread_id TEXT NOT NULL,
                        checkpoint_id TEXT NOT NULL,
                        parent_id TEXT,
                        checkpoint BLOB NOT NULL,
                        metadata BLOB NOT NULL,
                        PRIMARY KEY (thread_id, checkpoint_id)
                    )
                    "#,
                    self.table
                ))
                .execute(&*self.pool)
                .await
                .map_err(|e| StoreError::Schema {
                    message: format!("create {}: {e}", self.table),
                })?;

                sqlx::query(&format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {} (
                        thread_id TEXT NOT NULL,
                        checkpoint_id TEXT NOT NULL,
                        task_id TEXT NOT NULL,
                        idx INTEGER NOT NULL,
                        channel TEXT NOT NULL,
                        value BLOB NOT NULL,
                        PRIMARY KEY (thread_id, checkpoint_id, task_id, idx)
                    )
                    "#,
                    self.writes_table
                ))
                .execute(&*self.pool)
                .await
                .map_err(|e| StoreError::Schema {
                    message: format!("create {}: {e}", self.writes_table),
                })?;

                Ok(())
            })
            .await
            .map(|_| ())
    }

    fn row_to_tuple(&self, row: &SqliteRow) -> Result<CheckpointTuple> {
        let thread_id: String = row.get("thread_id");
        let checkpoint_id: String = row.get("checkpoint_id");
        let parent_id: Option<String> = row.get("parent_id");
        let checkpoint_blob: Vec<u8> = row.get("checkpoint");
        let metadata_blob: Vec<u8> = row.get("metadata");

        let checkpoint: Checkpoint = self.serializer.loads(&checkpoint_blob)?;
        let metadata: Value = self.serializer.loads(&metadata_blob)?;

        Ok(CheckpointTuple {
            parent: parent_id.map(|p| CheckpointRef::at(thread_id.clone(), p)),
            config: CheckpointRef::at(thread_id, checkpoint_id),
            checkpoint,
            metadata,
            pending_writes: Vec::new(),
        })
    }

    async fn load_pending_writes(
        &self,
        thread_id: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<PendingWrite>> {
        let rows = sqlx::query(&format!(
            "SELECT task_id, channel, value FROM {} \
             WHERE thread_id = ?1 AND checkpoint_id = ?2 \
             ORDER BY task_id, idx",
            self.writes_table
        ))
        .bind(thread_id)
        .bind(checkpoint_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("select pending writes: {e}"),
        })?;

        rows.iter()
            .map(|row| {
                let value_blob: Vec<u8> = row.get("value");
                Ok(PendingWrite {
                    task_id: row.get("task_id"),
                    channel: row.get("channel"),
                    value: self.serializer.loads(&value_blob)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    #[instrument(skip(self, checkpoint, metadata), err)]
    async fn put(
        &self,
        at: &CheckpointRef,
        checkpoint: &Checkpoint,
        metadata: &Value,
    ) -> Result<CheckpointRef> {
        self.ensure_schema().await?;
        let thread_id = resolve_thread(at, &self.config).to_string();
        let checkpoint_id = resolve_checkpoint_id(at, checkpoint)?;
        let checkpoint_blob = self.serializer.dumps(checkpoint)?;
        let metadata_blob = self.serializer.dumps(metadata)?;

        // Upsert replaces payload and metadata only; the parent pointer
        // recorded at first insert is retained.
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (thread_id, checkpoint_id, parent_id, checkpoint, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (thread_id, checkpoint_id) DO UPDATE SET
                checkpoint = excluded.checkpoint,
                metadata = excluded.metadata
            "#,
            self.table
        ))
        .bind(&thread_id)
        .bind(&checkpoint_id)
        .bind(at.checkpoint_id.as_deref())
        .bind(&checkpoint_blob)
        .bind(&metadata_blob)
        .execute(&*self.pool)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("insert checkpoint: {e}"),
        })?;

        Ok(CheckpointRef::at(thread_id, checkpoint_id))
    }

    #[instrument(skip(self), err)]
    async fn get(&self, at: &CheckpointRef) -> Result<Option<CheckpointTuple>> {
        self.ensure_schema().await?;
        let thread_id = resolve_thread(at, &self.config);

        let row_opt = match &at.checkpoint_id {
            Some(checkpoint_id) => {
                sqlx::query(&format!(
                    "SELECT thread_id, checkpoint_id, parent_id, checkpoint, metadata \
                     FROM {} WHERE thread_id = ?1 AND checkpoint_id = ?2",
                    self.table
                ))
                .bind(thread_id)
                .bind(checkpoint_id)
                .fetch_optional(&*self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT thread_id, checkpoint_id, parent_id, checkpoint, metadata \
                     FROM {} WHERE thread_id = ?1 \
                     ORDER BY checkpoint_id DESC LIMIT 1",
                    self.table
                ))
                .bind(thread_id)
                .fetch_optional(&*self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::Backend {
            message: format!("select checkpoint: {e}"),
        })?;

        let Some(row) = row_opt else {
            return Ok(None);
        };
        let mut tuple = self.row_to_tuple(&row)?;
        let checkpoint_id: String = row.get("checkpoint_id");
        tuple.pending_writes = self.load_pending_writes(thread_id, &checkpoint_id).await?;
        Ok(Some(tuple))
    }

    #[instrument(skip(self), err)]
    async fn list(&self, at: &CheckpointRef, options: ListOptions) -> Result<CheckpointStream> {
        self.ensure_schema().await?;
        let thread_id = resolve_thread(at, &self.config);

        // Build WHERE clause conditions
        let mut conditions = vec!["thread_id = ?1".to_string()];
        let mut param_count = 1;
        if options.before.is_some() {
            param_count += 1;
            conditions.push(format!("checkpoint_id < ?{param_count}"));
        }
        let where_clause = conditions.join(" AND ");

        let mut sql = format!(
            "SELECT thread_id, checkpoint_id, parent_id, checkpoint, metadata \
             FROM {} WHERE {where_clause} ORDER BY checkpoint_id DESC",
            self.table
        );
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut query = sqlx::query(&sql).bind(thread_id);
        if let Some(before) = &options.before {
            query = query.bind(before);
        }

        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("select history: {e}"),
            })?;

        let tuples = rows
            .iter()
            .map(|row| self.row_to_tuple(row))
            .collect::<Result<Vec<_>>>()?;
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
            .as_deref()
            .ok_or(StoreError::MissingCheckpointId)?;
        self.ensure_schema().await?;
        let thread_id = resolve_thread(at, &self.config);

        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend {
            message: format!("tx begin: {e}"),
        })?;

        for (idx, (channel, value)) in writes.iter().enumerate() {
            let value_blob = self.serializer.dumps(value)?;
            sqlx::query(&format!(
                r#"
                INSERT INTO {} (thread_id, checkpoint_id, task_id, idx, channel, value)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT (thread_id, checkpoint_id, task_id, idx) DO UPDATE SET
                    channel = excluded.channel,
                    value = excluded.value
                "#,
                self.writes_table
            ))
            .bind(thread_id)
            .bind(checkpoint_id)
            .bind(task_id)
            .bind(idx as i64)
            .bind(channel)
            .bind(&value_blob)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("insert pending write: {e}"),
            })?;
        }

        tx.commit().await.map_err(|e| StoreError::Backend {
            message: format!("tx commit: {e}"),
        })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend {
            message: format!("tx begin: {e}"),
        })?;

        sqlx::query(&format!("DELETE FROM {} WHERE thread_id = ?1", self.table))
            .bind(thread_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("delete thread: {e}"),
            })?;

        sqlx::query(&format!(
            "DELETE FROM {} WHERE thread_id = ?1",
            self.writes_table
        ))
        .bind(thread_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("delete thread writes: {e}"),
        })?;

        tx.commit().await.map_err(|e| StoreError::Backend {
            message: format!("tx commit: {e}"),
        })
    }
}
