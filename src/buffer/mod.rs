//! Persistent SSE event buffer — hybrid RAM + DB storage that
//! guarantees no server-sent event is lost across a transient client
//! disconnect or process restart.
//!
//! Writers append to a per-task RAM slice under a per-task lock. When the
//! slice reaches [`crate::config::BufferConfig::hybrid_flush_threshold`], or
//! `flush_task_buffer` is called, or a read needs the freshest state, the
//! slice drains into a bounded async write queue. A dedicated writer worker
//! batches queued events into the [`BufferStore`]; if the queue is full, the
//! failed tail is pushed back onto the RAM slice head so it is retried on
//! the next flush (backpressure).

pub mod store;

#[cfg(feature = "buffer")]
pub mod sql;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::config::BufferConfig;
use crate::error::A2AResult;
use crate::utils::now_epoch;

/// A point-in-time snapshot of the async write queue's occupancy, as
/// `get_async_queue_stats` in the original's event buffer exposes for
/// operational dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AsyncQueueStats {
    /// Bounded capacity of the queue (0 outside hybrid mode).
    pub capacity: usize,
    /// Jobs currently sitting in the queue, awaiting the writer worker.
    pub in_flight: usize,
}

pub use store::{BufferStore, BufferedSseEvent, InMemoryBufferStore, TaskMetadata};

/// Which write path the buffer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// `bufferEvent` always returns `false`; every operation is a no-op.
    Disabled,
    /// Writers go straight to the `BufferStore`, no RAM slice.
    Direct,
    /// RAM slice + async write queue.
    Hybrid,
}

struct WriteJob {
    events: Vec<BufferedSseEvent>,
}

/// The persistent SSE event buffer: hybrid RAM + DB storage with at-least-once delivery.
pub struct EventBuffer {
    mode: Mode,
    config: BufferConfig,
    store: Arc<dyn BufferStore>,
    /// Per-task RAM slices, hybrid mode only.
    ram: Mutex<HashMap<String, VecDeque<BufferedSseEvent>>>,
    /// Cached task metadata, consulted before falling back to the store.
    metadata_cache: Mutex<HashMap<String, TaskMetadata>>,
    write_queue: Option<mpsc::Sender<WriteJob>>,
}

impl EventBuffer {
    /// Builds a disabled buffer — every operation becomes a no-op. Used when
    /// `BufferConfig::enabled` is false.
    pub fn disabled() -> Self {
        Self {
            mode: Mode::Disabled,
            config: BufferConfig {
                enabled: false,
                ..Default::default()
            },
            store: Arc::new(InMemoryBufferStore::new()),
            ram: Mutex::new(HashMap::new()),
            metadata_cache: Mutex::new(HashMap::new()),
            write_queue: None,
        }
    }

    /// Builds a direct-mode buffer: every write goes straight to `store`,
    /// no RAM slice and no async writer worker.
    pub fn direct(store: Arc<dyn BufferStore>) -> Self {
        Self {
            mode: Mode::Direct,
            config: BufferConfig {
                hybrid_mode_enabled: false,
                ..Default::default()
            },
            store,
            ram: Mutex::new(HashMap::new()),
            metadata_cache: Mutex::new(HashMap::new()),
            write_queue: None,
        }
    }

    /// Builds a hybrid buffer and spawns its dedicated async writer worker.
    pub fn hybrid(store: Arc<dyn BufferStore>, config: BufferConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.async_write_queue_size);
        spawn_writer_worker(store.clone(), rx);
        Self {
            mode: Mode::Hybrid,
            config,
            store,
            ram: Mutex::new(HashMap::new()),
            metadata_cache: Mutex::new(HashMap::new()),
            write_queue: Some(tx),
        }
    }

    /// Required before the first `buffer_event` for a task.
    pub async fn set_task_metadata(
        &self,
        task_id: &str,
        session_id: &str,
        user_id: &str,
    ) -> A2AResult<()> {
        if self.mode == Mode::Disabled {
            return Ok(());
        }
        let metadata = TaskMetadata {
            task_id: task_id.to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
        };
        self.metadata_cache
            .lock()
            .await
            .insert(task_id.to_string(), metadata.clone());
        self.store.set_task_metadata(metadata).await
    }

    async fn resolved_metadata(&self, task_id: &str) -> A2AResult<Option<TaskMetadata>> {
        if let Some(m) = self.metadata_cache.lock().await.get(task_id).cloned() {
            return Ok(Some(m));
        }
        let from_db = self.store.get_task_metadata(task_id).await?;
        if let Some(ref m) = from_db {
            self.metadata_cache
                .lock()
                .await
                .insert(task_id.to_string(), m.clone());
        }
        Ok(from_db)
    }

    /// Buffers one event for `task_id`. Returns `false` if the buffer is
    /// disabled or no metadata is known for the task — rejecting writes
    /// with no authorizable metadata prevents orphan rows.
    pub async fn buffer_event(
        &self,
        task_id: &str,
        event_type: &str,
        payload: Value,
    ) -> A2AResult<bool> {
        if self.mode == Mode::Disabled {
            return Ok(false);
        }
        let Some(metadata) = self.resolved_metadata(task_id).await? else {
            warn!(task_id, "bufferEvent rejected: no task metadata available");
            return Ok(false);
        };

        match self.mode {
            Mode::Disabled => unreachable!(),
            Mode::Direct => {
                let seq = self.store.next_sequence(task_id).await?;
                let event = BufferedSseEvent {
                    task_id: task_id.to_string(),
                    session_id: metadata.session_id,
                    user_id: metadata.user_id,
                    sequence_number: seq,
                    event_type: event_type.to_string(),
                    event_payload: payload,
                    created_at_epoch: now_epoch(),
                    consumed_at_epoch: None,
                };
                self.store.insert_events(vec![event]).await?;
            }
            Mode::Hybrid => {
                let mut ram = self.ram.lock().await;
                let slice = ram.entry(task_id.to_string()).or_default();
                let next_seq = slice
                    .back()
                    .map(|e| e.sequence_number + 1)
                    .unwrap_or(1)
                    .max(self.store.next_sequence(task_id).await?);
                slice.push_back(BufferedSseEvent {
                    task_id: task_id.to_string(),
                    session_id: metadata.session_id,
                    user_id: metadata.user_id,
                    sequence_number: next_seq,
                    event_type: event_type.to_string(),
                    event_payload: payload,
                    created_at_epoch: now_epoch(),
                    consumed_at_epoch: None,
                });
                let should_flush = slice.len() >= self.config.hybrid_flush_threshold;
                drop(ram);
                if should_flush {
                    self.flush_task_buffer(task_id).await?;
                }
            }
        }
        Ok(true)
    }

    /// Moves the RAM slice into the async write queue. No-op outside hybrid
    /// mode. Returns the number of events successfully enqueued; events that
    /// could not be enqueued (queue full) are re-added to the RAM head so
    /// they are retried later, preserving FIFO order.
    pub async fn flush_task_buffer(&self, task_id: &str) -> A2AResult<usize> {
        if self.mode != Mode::Hybrid {
            return Ok(0);
        }
        let Some(tx) = &self.write_queue else {
            return Ok(0);
        };

        let drained: Vec<BufferedSseEvent> = {
            let mut ram = self.ram.lock().await;
            match ram.get_mut(task_id) {
                Some(slice) => slice.drain(..).collect(),
                None => Vec::new(),
            }
        };
        if drained.is_empty() {
            return Ok(0);
        }

        match tx.try_send(WriteJob {
            events: drained.clone(),
        }) {
            Ok(()) => Ok(drained.len()),
            Err(_) => {
                warn!(task_id, count = drained.len(), "write queue full, retrying later");
                let mut ram = self.ram.lock().await;
                let slice = ram.entry(task_id.to_string()).or_default();
                for event in drained.into_iter().rev() {
                    slice.push_front(event);
                }
                Ok(0)
            }
        }
    }

    /// Flushes the RAM slice first (so the read reflects everything known),
    /// then returns sequenced events strictly greater than `from_sequence`.
    pub async fn get_buffered_events(
        &self,
        task_id: &str,
        from_sequence: Option<u64>,
    ) -> A2AResult<Vec<BufferedSseEvent>> {
        if self.mode == Mode::Disabled {
            return Ok(Vec::new());
        }
        if self.mode == Mode::Hybrid {
            self.flush_task_buffer(task_id).await?;
        }
        let Some(metadata) = self.resolved_metadata(task_id).await? else {
            return Ok(Vec::new());
        };
        self.store
            .fetch_events(
                task_id,
                from_sequence.unwrap_or(0),
                &metadata.session_id,
                &metadata.user_id,
            )
            .await
    }

    pub async fn has_unconsumed_events(&self, task_id: &str) -> A2AResult<bool> {
        if self.mode == Mode::Disabled {
            return Ok(false);
        }
        if self.mode == Mode::Hybrid {
            let has_ram = self
                .ram
                .lock()
                .await
                .get(task_id)
                .map(|s| !s.is_empty())
                .unwrap_or(false);
            if has_ram {
                return Ok(true);
            }
        }
        self.store.has_unconsumed(task_id).await
    }

    pub async fn get_unconsumed_events_for_session(
        &self,
        session_id: &str,
    ) -> A2AResult<HashMap<String, Vec<BufferedSseEvent>>> {
        if self.mode == Mode::Disabled {
            return Ok(HashMap::new());
        }
        self.store.fetch_unconsumed_for_session(session_id).await
    }

    pub async fn mark_events_consumed(&self, task_id: &str, up_to_sequence: u64) -> A2AResult<()> {
        if self.mode == Mode::Disabled {
            return Ok(());
        }
        self.store.mark_consumed(task_id, up_to_sequence).await
    }

    pub async fn delete_events_for_task(&self, task_id: &str) -> A2AResult<u64> {
        if self.mode == Mode::Disabled {
            return Ok(0);
        }
        self.ram.lock().await.remove(task_id);
        self.metadata_cache.lock().await.remove(task_id);
        self.store.delete_task(task_id).await
    }

    pub async fn cleanup_old_events(&self, older_than_days: u32) -> A2AResult<u64> {
        if self.mode == Mode::Disabled {
            return Ok(0);
        }
        let cutoff = now_epoch().saturating_sub(u64::from(older_than_days) * 86_400);
        self.store.cleanup_older_than(cutoff).await
    }

    /// Whether the buffer accepts writes at all.
    pub fn is_enabled(&self) -> bool {
        self.mode != Mode::Disabled
    }

    /// Whether the buffer is running in hybrid RAM+DB mode, as opposed to
    /// disabled or direct-to-store.
    pub fn is_hybrid_mode_enabled(&self) -> bool {
        self.mode == Mode::Hybrid
    }

    /// Occupancy of the async write queue. Zero capacity and zero in-flight
    /// outside hybrid mode, since there is no queue to report on.
    pub fn get_async_queue_stats(&self) -> AsyncQueueStats {
        match &self.write_queue {
            Some(tx) => AsyncQueueStats {
                capacity: tx.max_capacity(),
                in_flight: tx.max_capacity().saturating_sub(tx.capacity()),
            },
            None => AsyncQueueStats::default(),
        }
    }

    /// Flushes every task's RAM slice into the async write queue in one
    /// pass — used on a scheduled sweep and during shutdown. Returns the
    /// total number of events enqueued across all tasks. No-op outside
    /// hybrid mode.
    pub async fn flush_all_buffers(&self) -> A2AResult<usize> {
        if self.mode != Mode::Hybrid {
            return Ok(0);
        }
        let task_ids: Vec<String> = {
            let ram = self.ram.lock().await;
            ram.iter()
                .filter(|(_, slice)| !slice.is_empty())
                .map(|(task_id, _)| task_id.clone())
                .collect()
        };
        let mut total = 0;
        for task_id in task_ids {
            total += self.flush_task_buffer(&task_id).await?;
        }
        Ok(total)
    }

    /// Drains every RAM slice into the write queue and waits (bounded) for
    /// the async writer worker to catch up, for an orderly process
    /// shutdown. Never blocks forever: logs and returns if the queue has
    /// not drained within a few seconds.
    pub async fn shutdown(&self) -> A2AResult<()> {
        self.flush_all_buffers().await?;
        if self.mode != Mode::Hybrid {
            return Ok(());
        }
        for _ in 0..100 {
            if self.get_async_queue_stats().in_flight == 0 {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let stats = self.get_async_queue_stats();
        warn!(in_flight = stats.in_flight, "event buffer shutdown: write queue did not fully drain in time");
        Ok(())
    }
}

fn spawn_writer_worker(store: Arc<dyn BufferStore>, mut rx: mpsc::Receiver<WriteJob>) {
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let count = job.events.len();
            if let Err(e) = store.insert_events(job.events).await {
                error!(error = %e, count, "async event-buffer write failed, events dropped");
            } else {
                debug!(count, "flushed buffered events to durable store");
            }
        }
    });
}
