//! The durable backing store behind the hybrid event buffer.
//!
//! [`BufferStore`] is the narrow persistence seam the buffer writes through;
//! [`InMemoryBufferStore`] is a dependency-free implementation used by tests
//! and by "direct" (non-hybrid, DB-less) deployments. The `buffer` feature
//! additionally provides a `sqlx`-backed implementation in
//! [`super::sql::SqlBufferStore`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::A2AResult;

/// Per-task metadata required before any event may be buffered, so every
/// read can be authorized against `(taskId, sessionId, userId)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub task_id: String,
    pub session_id: String,
    pub user_id: String,
}

/// A single persisted SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedSseEvent {
    pub task_id: String,
    pub session_id: String,
    pub user_id: String,
    pub sequence_number: u64,
    pub event_type: String,
    pub event_payload: Value,
    pub created_at_epoch: u64,
    pub consumed_at_epoch: Option<u64>,
}

/// The durable store a [`super::EventBuffer`] writes through.
///
/// All methods are async to model a real database round-trip; the in-memory
/// implementation simply never awaits.
#[async_trait]
pub trait BufferStore: Send + Sync {
    async fn set_task_metadata(&self, metadata: TaskMetadata) -> A2AResult<()>;

    async fn get_task_metadata(&self, task_id: &str) -> A2AResult<Option<TaskMetadata>>;

    /// Persists a batch of already-sequenced events in one transaction.
    async fn insert_events(&self, events: Vec<BufferedSseEvent>) -> A2AResult<()>;

    /// Returns events for `task_id` with `sequence_number > from_sequence`,
    /// in ascending sequence order, restricted to the caller's
    /// `(session_id, user_id)` — a mismatch returns an empty list, never an
    /// error (the authorization invariant in ).
    async fn fetch_events(
        &self,
        task_id: &str,
        from_sequence: u64,
        expected_session_id: &str,
        expected_user_id: &str,
    ) -> A2AResult<Vec<BufferedSseEvent>>;

    /// Returns every unconsumed event for every task belonging to
    /// `session_id`, keyed by task id.
    async fn fetch_unconsumed_for_session(
        &self,
        session_id: &str,
    ) -> A2AResult<HashMap<String, Vec<BufferedSseEvent>>>;

    async fn has_unconsumed(&self, task_id: &str) -> A2AResult<bool>;

    async fn mark_consumed(&self, task_id: &str, up_to_sequence: u64) -> A2AResult<()>;

    /// Deletes every row for `task_id` and its metadata. Returns the number
    /// of deleted event rows.
    async fn delete_task(&self, task_id: &str) -> A2AResult<u64>;

    /// Deletes consumed events older than `older_than_epoch`. Returns the
    /// number of deleted rows.
    async fn cleanup_older_than(&self, older_than_epoch: u64) -> A2AResult<u64>;

    /// The next sequence number to assign for `task_id` (1 if none exist).
    async fn next_sequence(&self, task_id: &str) -> A2AResult<u64>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    metadata: HashMap<String, TaskMetadata>,
    // task_id -> sequence_number -> event
    events: HashMap<String, BTreeMap<u64, BufferedSseEvent>>,
}

/// Dependency-free [`BufferStore`] backed by an in-process `Mutex`. Used by
/// tests and by deployments that disable hybrid mode (`database_url` unset).
#[derive(Debug, Default)]
pub struct InMemoryBufferStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryBufferStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BufferStore for InMemoryBufferStore {
    async fn set_task_metadata(&self, metadata: TaskMetadata) -> A2AResult<()> {
        let mut state = self.state.lock().unwrap();
        state.metadata.insert(metadata.task_id.clone(), metadata);
        Ok(())
    }

    async fn get_task_metadata(&self, task_id: &str) -> A2AResult<Option<TaskMetadata>> {
        Ok(self.state.lock().unwrap().metadata.get(task_id).cloned())
    }

    async fn insert_events(&self, events: Vec<BufferedSseEvent>) -> A2AResult<()> {
        let mut state = self.state.lock().unwrap();
        for event in events {
            state
                .events
                .entry(event.task_id.clone())
                .or_default()
                .insert(event.sequence_number, event);
        }
        Ok(())
    }

    async fn fetch_events(
        &self,
        task_id: &str,
        from_sequence: u64,
        expected_session_id: &str,
        expected_user_id: &str,
    ) -> A2AResult<Vec<BufferedSseEvent>> {
        let state = self.state.lock().unwrap();
        let Some(meta) = state.metadata.get(task_id) else {
            return Ok(Vec::new());
        };
        if meta.session_id != expected_session_id || meta.user_id != expected_user_id {
            return Ok(Vec::new());
        }
        Ok(state
            .events
            .get(task_id)
            .map(|m| {
                m.range((from_sequence + 1)..)
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_unconsumed_for_session(
        &self,
        session_id: &str,
    ) -> A2AResult<HashMap<String, Vec<BufferedSseEvent>>> {
        let state = self.state.lock().unwrap();
        let mut result = HashMap::new();
        for (task_id, meta) in state.metadata.iter() {
            if meta.session_id != session_id {
                continue;
            }
            let unconsumed: Vec<BufferedSseEvent> = state
                .events
                .get(task_id)
                .map(|m| {
                    m.values()
                        .filter(|e| e.consumed_at_epoch.is_none())
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            if !unconsumed.is_empty() {
                result.insert(task_id.clone(), unconsumed);
            }
        }
        Ok(result)
    }

    async fn has_unconsumed(&self, task_id: &str) -> A2AResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .get(task_id)
            .map(|m| m.values().any(|e| e.consumed_at_epoch.is_none()))
            .unwrap_or(false))
    }

    async fn mark_consumed(&self, task_id: &str, up_to_sequence: u64) -> A2AResult<()> {
        let mut state = self.state.lock().unwrap();
        let now = crate::utils::now_epoch();
        if let Some(map) = state.events.get_mut(task_id) {
            for (seq, event) in map.iter_mut() {
                if *seq <= up_to_sequence {
                    event.consumed_at_epoch.get_or_insert(now);
                }
            }
        }
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> A2AResult<u64> {
        let mut state = self.state.lock().unwrap();
        state.metadata.remove(task_id);
        Ok(state.events.remove(task_id).map(|m| m.len() as u64).unwrap_or(0))
    }

    async fn cleanup_older_than(&self, older_than_epoch: u64) -> A2AResult<u64> {
        let mut state = self.state.lock().unwrap();
        let mut deleted = 0u64;
        for map in state.events.values_mut() {
            let to_remove: Vec<u64> = map
                .iter()
                .filter(|(_, e)| {
                    e.consumed_at_epoch
                        .map(|c| c < older_than_epoch)
                        .unwrap_or(false)
                })
                .map(|(seq, _)| *seq)
                .collect();
            for seq in to_remove {
                map.remove(&seq);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn next_sequence(&self, task_id: &str) -> A2AResult<u64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .get(task_id)
            .and_then(|m| m.keys().next_back().copied())
            .map(|last| last + 1)
            .unwrap_or(1))
    }
}
