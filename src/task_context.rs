//! Per-task execution context and the registry that owns it.
//!
//! Both the gateway and the proxy keep one [`TaskContextRegistry`] each,
//! keyed by [`LogicalTaskId`](crate::types::logical_task_id) (a plain
//! `String`). A context is created at first accept of a request for a task
//! id and removed when the final response is emitted, cancellation
//! completes, or a hard timeout fires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

use crate::error::{A2AError, A2AResult};
use crate::skills::ActivatedSkill;

/// A produced artifact's filename and version, recorded on the owning task
/// context so the gateway can later describe new artifacts to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedArtifact {
    pub filename: String,
    pub version: u32,
}

/// Conversation-compaction bookkeeping carried on a task's context so the
/// harness can resume progressive summarization across turns within the
/// same session.
#[derive(Debug, Clone, Default)]
pub struct CompactionState {
    /// The text of the most recent summary, if any compaction has happened.
    pub last_summary: Option<String>,
    /// Number of compactions performed so far in this session.
    pub compaction_count: u32,
}

/// An observable, settable cancellation signal.
///
/// Cloning shares the same underlying flag — every clone observes the same
/// cancellation. Producers sample [`CancellationToken::is_cancelled`] between
/// IO operations; the settable side is exposed to whoever handles an inbound
/// cancel request or a timeout.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Sets the flag. Idempotent — cancelling twice is a no-op on the second call.
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Suspends until cancelled. Returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Per-task record held by the gateway or the proxy.
///
/// A hop owns exactly the contexts it created; the other hop never reads or
/// writes them directly — cross-hop coordination happens over the mesh.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub logical_task_id: String,
    pub json_rpc_request_id: Option<String>,
    /// Topic intermediate status/artifact events are published to.
    pub status_topic: String,
    /// Topic the terminal response is published to.
    pub reply_to_topic: String,
    /// Set only for interactive (client-attached) tasks.
    pub client_id: Option<String>,
    pub user_identity: UserIdentity,
    pub session_id: String,
    pub app_name_for_artifacts: String,
    pub start_time_epoch: u64,
    pub cancellation: CancellationToken,
    pub produced_artifacts: Arc<RwLock<Vec<ProducedArtifact>>>,
    pub activated_skills: Arc<RwLock<HashMap<String, ActivatedSkill>>>,
    pub compaction: Arc<RwLock<CompactionState>>,
    /// True when the task has no attached interactive client — see
    /// `TaskContext::is_background` below.
    pub background_execution_enabled: bool,
}

/// Resolved caller identity, attached to a `TaskContext` at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub source: String,
}

impl UserIdentity {
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            name: None,
            email: None,
            source: "dev".to_string(),
        }
    }
}

impl TaskContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logical_task_id: impl Into<String>,
        json_rpc_request_id: Option<String>,
        status_topic: impl Into<String>,
        reply_to_topic: impl Into<String>,
        client_id: Option<String>,
        user_identity: UserIdentity,
        session_id: impl Into<String>,
        app_name_for_artifacts: impl Into<String>,
    ) -> Self {
        let background_execution_enabled = client_id.is_none();
        Self {
            logical_task_id: logical_task_id.into(),
            json_rpc_request_id,
            status_topic: status_topic.into(),
            reply_to_topic: reply_to_topic.into(),
            client_id,
            user_identity,
            session_id: session_id.into(),
            app_name_for_artifacts: app_name_for_artifacts.into(),
            start_time_epoch: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            cancellation: CancellationToken::new(),
            produced_artifacts: Arc::new(RwLock::new(Vec::new())),
            activated_skills: Arc::new(RwLock::new(HashMap::new())),
            compaction: Arc::new(RwLock::new(CompactionState::default())),
            background_execution_enabled,
        }
    }

    /// True if this task has no interactive client attached — i.e. it was
    /// submitted by something other than a live SSE-connected user.
    pub fn is_background(&self, metadata_background_flag: bool) -> bool {
        metadata_background_flag || (!self.reply_to_topic.is_empty() && self.client_id.is_none())
    }

    pub async fn record_produced_artifact(&self, filename: impl Into<String>, version: u32) {
        let mut guard = self.produced_artifacts.write().await;
        guard.push(ProducedArtifact {
            filename: filename.into(),
            version,
        });
    }

    pub async fn produced_artifacts_snapshot(&self) -> Vec<ProducedArtifact> {
        self.produced_artifacts.read().await.clone()
    }
}

/// A lock-protected `logicalTaskId -> TaskContext` map owned by one hop
/// (gateway or proxy).
#[derive(Debug, Default)]
pub struct TaskContextRegistry {
    inner: RwLock<HashMap<String, TaskContext>>,
}

impl TaskContextRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Fails if the id is already present.
    pub async fn create(&self, context: TaskContext) -> A2AResult<()> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(&context.logical_task_id) {
            return Err(A2AError::invalid_request(format!(
                "task context already exists for {}",
                context.logical_task_id
            )));
        }
        debug!(task_id = %context.logical_task_id, "task context created");
        guard.insert(context.logical_task_id.clone(), context);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<TaskContext> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<TaskContext> {
        let removed = self.inner.write().await.remove(id);
        if removed.is_some() {
            debug!(task_id = %id, "task context removed");
        }
        removed
    }

    /// Runs `action` against a snapshot of every live context — used for
    /// shutdown broadcast cancellation.
    pub async fn for_each<F: FnMut(&TaskContext)>(&self, mut action: F) {
        let guard = self.inner.read().await;
        for ctx in guard.values() {
            action(ctx);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshots every live context belonging to `session_id` — used by the
    /// harness to keep a task's `compaction` field in sync with the
    /// session-wide conversation state it tracks separately.
    pub async fn contexts_for_session(&self, session_id: &str) -> Vec<TaskContext> {
        self.inner
            .read()
            .await
            .values()
            .filter(|ctx| ctx.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Sets every live context's cancellation token — used on shutdown.
    pub async fn cancel_all(&self) {
        let guard = self.inner.read().await;
        let count = guard.len();
        for ctx in guard.values() {
            ctx.cancellation.cancel();
        }
        if count > 0 {
            warn!(count, "cancelled all in-flight task contexts");
        }
    }
}
