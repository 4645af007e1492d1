//! `sqlx`-backed [`BufferStore`] — the durable half of the hybrid event
//! buffer. Ships with a SQLite pool by default; the same queries run against
//! Postgres since both drivers are enabled on the `buffer` feature in
//! `Cargo.toml`.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::error::A2AResult;

use super::store::{BufferedSseEvent, BufferStore, TaskMetadata};

/// A `sqlx::SqlitePool`-backed event store.
///
/// Schema (`sse_events`, `task_metadata`) is created on first connect via
/// `CREATE TABLE IF NOT EXISTS` — migrations-as-code, no separate migration
/// runner for a crate this small.
pub struct SqlBufferStore {
    pool: SqlitePool,
}

impl SqlBufferStore {
    pub async fn connect(database_url: &str) -> A2AResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn migrate(&self) -> A2AResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_metadata (
                task_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sse_events (
                task_id TEXT NOT NULL,
                sequence_number INTEGER NOT NULL,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_payload TEXT NOT NULL,
                created_at_epoch INTEGER NOT NULL,
                consumed_at_epoch INTEGER,
                PRIMARY KEY (task_id, sequence_number)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> A2AResult<BufferedSseEvent> {
    let payload_text: String = row.try_get("event_payload")?;
    Ok(BufferedSseEvent {
        task_id: row.try_get("task_id")?,
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        sequence_number: row.try_get::<i64, _>("sequence_number")? as u64,
        event_type: row.try_get("event_type")?,
        event_payload: serde_json::from_str(&payload_text)?,
        created_at_epoch: row.try_get::<i64, _>("created_at_epoch")? as u64,
        consumed_at_epoch: row
            .try_get::<Option<i64>, _>("consumed_at_epoch")?
            .map(|v| v as u64),
    })
}

#[async_trait]
impl BufferStore for SqlBufferStore {
    async fn set_task_metadata(&self, metadata: TaskMetadata) -> A2AResult<()> {
        sqlx::query(
            "INSERT INTO task_metadata (task_id, session_id, user_id) VALUES (?, ?, ?)
             ON CONFLICT(task_id) DO UPDATE SET session_id = excluded.session_id, user_id = excluded.user_id",
        )
        .bind(&metadata.task_id)
        .bind(&metadata.session_id)
        .bind(&metadata.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task_metadata(&self, task_id: &str) -> A2AResult<Option<TaskMetadata>> {
        let row = sqlx::query("SELECT task_id, session_id, user_id FROM task_metadata WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| TaskMetadata {
            task_id: r.get("task_id"),
            session_id: r.get("session_id"),
            user_id: r.get("user_id"),
        }))
    }

    async fn insert_events(&self, events: Vec<BufferedSseEvent>) -> A2AResult<()> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            let payload_text = serde_json::to_string(&event.event_payload)?;
            sqlx::query(
                "INSERT INTO sse_events
                    (task_id, sequence_number, session_id, user_id, event_type, event_payload, created_at_epoch, consumed_at_epoch)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(task_id, sequence_number) DO NOTHING",
            )
            .bind(&event.task_id)
            .bind(event.sequence_number as i64)
            .bind(&event.session_id)
            .bind(&event.user_id)
            .bind(&event.event_type)
            .bind(payload_text)
            .bind(event.created_at_epoch as i64)
            .bind(event.consumed_at_epoch.map(|v| v as i64))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_events(
        &self,
        task_id: &str,
        from_sequence: u64,
        expected_session_id: &str,
        expected_user_id: &str,
    ) -> A2AResult<Vec<BufferedSseEvent>> {
        let meta = self.get_task_metadata(task_id).await?;
        match meta {
            Some(m) if m.session_id == expected_session_id && m.user_id == expected_user_id => {}
            _ => return Ok(Vec::new()),
        }

        let rows = sqlx::query(
            "SELECT * FROM sse_events WHERE task_id = ? AND sequence_number > ? ORDER BY sequence_number ASC",
        )
        .bind(task_id)
        .bind(from_sequence as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    async fn fetch_unconsumed_for_session(
        &self,
        session_id: &str,
    ) -> A2AResult<HashMap<String, Vec<BufferedSseEvent>>> {
        let rows = sqlx::query(
            "SELECT * FROM sse_events WHERE session_id = ? AND consumed_at_epoch IS NULL ORDER BY task_id, sequence_number ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out: HashMap<String, Vec<BufferedSseEvent>> = HashMap::new();
        for row in &rows {
            let event = row_to_event(row)?;
            out.entry(event.task_id.clone()).or_default().push(event);
        }
        Ok(out)
    }

    async fn has_unconsumed(&self, task_id: &str) -> A2AResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM sse_events WHERE task_id = ? AND consumed_at_epoch IS NULL",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.try_get("c")?;
        Ok(count > 0)
    }

    async fn mark_consumed(&self, task_id: &str, up_to_sequence: u64) -> A2AResult<()> {
        sqlx::query(
            "UPDATE sse_events SET consumed_at_epoch = ? WHERE task_id = ? AND sequence_number <= ? AND consumed_at_epoch IS NULL",
        )
        .bind(crate::utils::now_epoch() as i64)
        .bind(task_id)
        .bind(up_to_sequence as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> A2AResult<u64> {
        let result = sqlx::query("DELETE FROM sse_events WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM task_metadata WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn cleanup_older_than(&self, older_than_epoch: u64) -> A2AResult<u64> {
        let result = sqlx::query(
            "DELETE FROM sse_events WHERE consumed_at_epoch IS NOT NULL AND consumed_at_epoch < ?",
        )
        .bind(older_than_epoch as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn next_sequence(&self, task_id: &str) -> A2AResult<u64> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 as next FROM sse_events WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        let next: i64 = row.try_get("next")?;
        Ok(next as u64)
    }
}
