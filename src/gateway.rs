//! Gateway Component — the client-facing bridge onto the mesh.
//!
//! One [`Gateway`] exposes a single internal submit-task operation and two
//! event sinks (intermediate, final); the transport that drives it (HTTP,
//! a CLI, anything else) is deliberately left outside this module. Every
//! intermediate event is recorded to the [`crate::buffer::EventBuffer`] and
//! fanned out to whatever is currently subscribed to that task's live
//! stream; the final event additionally enhances any text response with a
//! block describing newly produced artifacts and tears the task's state
//! down. Structurally this mirrors [`crate::proxy::Proxy`]: a shared,
//! `Arc`-wrapped core plus an async `run()` loop driven off mesh
//! subscriptions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::artifact_store::{ArtifactMetadata, ArtifactStore, ArtifactUri};
use crate::buffer::EventBuffer;
use crate::config::RuntimeConfig;
use crate::error::{A2AError, A2AResult};
use crate::mesh::{MeshClient, MeshEnvelope};
use crate::task_context::{CancellationToken, TaskContext, TaskContextRegistry, UserIdentity};
use crate::types::{
    FileContent, FileWithUri, Message, Part, Role, SendMessageConfiguration, SendMessageParams,
    StreamResponse, Task, TaskState, TaskStatus,
};
use crate::utils::now_epoch;

/// How often `run()` checks every in-flight task's age against
/// `RuntimeConfig::task_timeout_seconds`.
const TASK_TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// One uploaded file accompanying a submit-task call, persisted as an
/// artifact before the request is assembled.
pub struct UploadedFile {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Caller-supplied context for a submit-task call — where the request came
/// from, as opposed to what it says.
pub struct ExternalRequestContext {
    pub user_id_for_artifacts: String,
    pub session_id: String,
    pub original_message: Option<String>,
    pub source: String,
}

/// One event delivered to an SSE subscriber. `sequence_number` is only
/// populated for events replayed from the buffer — events fanned out live
/// are not re-read from the store just to attach a number a reconnect will
/// never use.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub sequence_number: Option<u64>,
    pub event_type: String,
    pub payload: Value,
}

/// A client's live view of one task's SSE stream: the buffered backlog
/// first, then anything published while the subscriber is attached.
pub struct TaskEventStream {
    backlog: std::vec::IntoIter<SseEvent>,
    live: Option<broadcast::Receiver<SseEvent>>,
}

impl TaskEventStream {
    /// Waits for the next event. Returns `None` once the backlog is
    /// exhausted and the live channel (if any) has closed.
    pub async fn recv(&mut self) -> Option<SseEvent> {
        if let Some(event) = self.backlog.next() {
            return Some(event);
        }
        let live = self.live.as_mut()?;
        loop {
            match live.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "sse subscriber lagged, dropping missed live events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

struct LiveTask {
    tx: broadcast::Sender<SseEvent>,
    agent_name: String,
}

/// Bridges external clients onto the mesh: submits tasks, streams their
/// events back, and persists the event log for reconnect.
pub struct Gateway {
    config: Arc<RuntimeConfig>,
    mesh: Arc<dyn MeshClient>,
    registry: Arc<TaskContextRegistry>,
    buffer: Arc<EventBuffer>,
    artifact_store: Arc<dyn ArtifactStore>,
    gateway_id: String,
    live: RwLock<HashMap<String, LiveTask>>,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(
        config: Arc<RuntimeConfig>,
        mesh: Arc<dyn MeshClient>,
        buffer: Arc<EventBuffer>,
        artifact_store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            mesh,
            registry: Arc::new(TaskContextRegistry::new()),
            buffer,
            artifact_store,
            gateway_id: Uuid::new_v4().to_string(),
            live: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TaskContextRegistry> {
        &self.registry
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    /// Generates a LogicalTaskId, persists a TaskContext, saves any
    /// uploaded files as artifacts, assembles a modern A2A request, and
    /// publishes it to the target agent's request topic with `replyTo`/
    /// `a2aStatusTopic` user-properties pointing back at this gateway.
    /// Returns the new LogicalTaskId.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_task(
        &self,
        target_agent_name: &str,
        message_parts: Vec<Part>,
        uploads: Vec<UploadedFile>,
        ctx: ExternalRequestContext,
        user_identity: UserIdentity,
        is_streaming: bool,
        client_id: Option<String>,
    ) -> A2AResult<String> {
        let logical_task_id = Uuid::new_v4().to_string();
        let status_topic = self.config.agent_status_topic(target_agent_name, &logical_task_id);
        let reply_to_topic = self.config.gateway_reply_topic(&self.gateway_id, &logical_task_id);
        let user_id = user_identity.id.clone();

        let mut parts = message_parts;
        for upload in uploads {
            let metadata = ArtifactMetadata {
                description: None,
                mime_type: upload.mime_type.clone(),
                proxied_from_artifact_id: None,
                shared_publicly: false,
                extra: Value::Null,
            };
            let uri = self
                .artifact_store
                .save(
                    target_agent_name,
                    &ctx.user_id_for_artifacts,
                    &ctx.session_id,
                    &upload.filename,
                    upload.bytes,
                    metadata,
                )
                .await?;
            parts.push(Part::File {
                file: FileContent::Uri(FileWithUri {
                    uri: uri.to_string(),
                    mime_type: upload.mime_type,
                    name: Some(upload.filename),
                }),
                metadata: None,
            });
        }

        let task_context = TaskContext::new(
            logical_task_id.clone(),
            Some(logical_task_id.clone()),
            status_topic.clone(),
            reply_to_topic.clone(),
            client_id,
            user_identity,
            ctx.session_id.clone(),
            target_agent_name,
        );
        self.registry.create(task_context).await?;
        self.buffer
            .set_task_metadata(&logical_task_id, &ctx.session_id, &user_id)
            .await?;

        let message = Message {
            message_id: Uuid::new_v4().to_string(),
            role: Role::User,
            kind: "message".to_string(),
            parts,
            context_id: Some(ctx.session_id.clone()),
            task_id: None,
            metadata: ctx.original_message.map(|m| json!({"originalMessage": m, "source": ctx.source})),
            extensions: None,
            reference_task_ids: None,
        };

        let method = if is_streaming { "message/stream" } else { "message/send" };
        let params = SendMessageParams {
            message,
            configuration: Some(SendMessageConfiguration {
                blocking: Some(!is_streaming),
                ..Default::default()
            }),
            metadata: None,
            tenant: None,
        };

        let request_body = json!({
            "jsonrpc": "2.0",
            "id": logical_task_id,
            "method": method,
            "params": serde_json::to_value(&params)?,
        });

        let envelope = MeshEnvelope::new(request_body)
            .with_property("replyTo", reply_to_topic)
            .with_property("a2aStatusTopic", status_topic)
            .with_property("logicalTaskId", logical_task_id.clone())
            .with_property("sessionId", ctx.session_id);

        {
            let mut live = self.live.write().await;
            let (tx, _rx) = broadcast::channel(256);
            live.insert(
                logical_task_id.clone(),
                LiveTask {
                    tx,
                    agent_name: target_agent_name.to_string(),
                },
            );
        }

        self.mesh
            .publish(&self.config.agent_request_topic(target_agent_name), envelope.to_bytes()?)
            .await?;

        Ok(logical_task_id)
    }

    /// Replays buffered events strictly after `last_seq`, then joins the
    /// live stream for `task_id`.
    pub async fn subscribe_task(&self, task_id: &str, last_seq: Option<u64>) -> A2AResult<TaskEventStream> {
        let backlog = self.buffered_backlog(task_id, last_seq).await?;
        let live = self.live.read().await.get(task_id).map(|t| t.tx.subscribe());
        Ok(TaskEventStream {
            backlog: backlog.into_iter(),
            live,
        })
    }

    /// Replays unconsumed events for every unfinished task in `session_id`,
    /// one stream per task, before the caller joins each one's live channel.
    pub async fn subscribe_session(&self, session_id: &str) -> A2AResult<HashMap<String, TaskEventStream>> {
        let unconsumed = self.buffer.get_unconsumed_events_for_session(session_id).await?;
        let live_guard = self.live.read().await;
        let mut streams = HashMap::with_capacity(unconsumed.len());
        for (task_id, events) in unconsumed {
            let backlog: Vec<SseEvent> = events
                .into_iter()
                .map(|e| SseEvent {
                    sequence_number: Some(e.sequence_number),
                    event_type: e.event_type,
                    payload: e.event_payload,
                })
                .collect();
            let live = live_guard.get(&task_id).map(|t| t.tx.subscribe());
            streams.insert(
                task_id,
                TaskEventStream {
                    backlog: backlog.into_iter(),
                    live,
                },
            );
        }
        Ok(streams)
    }

    async fn buffered_backlog(&self, task_id: &str, last_seq: Option<u64>) -> A2AResult<Vec<SseEvent>> {
        Ok(self
            .buffer
            .get_buffered_events(task_id, last_seq)
            .await?
            .into_iter()
            .map(|e| SseEvent {
                sequence_number: Some(e.sequence_number),
                event_type: e.event_type,
                payload: e.event_payload,
            })
            .collect())
    }

    /// Publishes a `tasks/cancel` request to the target agent's request
    /// topic and sets the task's local cancellation token immediately —
    /// the `canceled` terminal event itself arrives later, through the
    /// ordinary final-event path, once downstream confirms.
    pub async fn cancel_task(&self, task_id: &str) -> A2AResult<()> {
        let ctx = self
            .registry
            .get(task_id)
            .await
            .ok_or_else(|| A2AError::task_not_found(task_id))?;
        ctx.cancellation.cancel();

        let agent_name = self.live.read().await.get(task_id).map(|t| t.agent_name.clone());
        let Some(agent_name) = agent_name else {
            warn!(task_id, "cancel requested for a task with no known target agent");
            return Ok(());
        };

        let body = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": "tasks/cancel",
            "params": {"id": task_id},
        });
        let envelope = MeshEnvelope::new(body)
            .with_property("replyTo", ctx.reply_to_topic.clone())
            .with_property("a2aStatusTopic", ctx.status_topic.clone())
            .with_property("logicalTaskId", task_id.to_string());

        self.mesh
            .publish(&self.config.agent_request_topic(&agent_name), envelope.to_bytes()?)
            .await
    }

    /// Subscribes to every agent's status topic and to this gateway's own
    /// reply topic, and dispatches inbound messages until `shutdown()` is
    /// called. A single message's failure is logged and does not stop the
    /// loop. A periodic sweep force-cancels any task that has exceeded
    /// `RuntimeConfig::task_timeout_seconds`.
    pub async fn run(&self) -> A2AResult<()> {
        let mut status_sub = self.mesh.subscribe(&self.config.gateway_status_wildcard()).await?;
        let mut reply_sub = self
            .mesh
            .subscribe(&self.config.gateway_reply_wildcard(&self.gateway_id))
            .await?;
        let mut timeout_sweep = tokio::time::interval(TASK_TIMEOUT_SWEEP_INTERVAL);
        timeout_sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("gateway run loop stopping: shutdown requested");
                    return Ok(());
                }
                message = status_sub.recv() => {
                    let Some(message) = message else {
                        warn!("gateway status subscription closed, run loop exiting");
                        return Ok(());
                    };
                    if let Err(err) = self.handle_status_message(message.payload).await {
                        error!(error = %err, "gateway failed to handle status event");
                    }
                }
                message = reply_sub.recv() => {
                    let Some(message) = message else {
                        warn!("gateway reply subscription closed, run loop exiting");
                        return Ok(());
                    };
                    if let Err(err) = self.handle_reply_message(&message.topic, message.payload).await {
                        error!(error = %err, "gateway failed to handle reply event");
                    }
                }
                _ = timeout_sweep.tick() => {
                    self.enforce_task_timeouts().await;
                }
            }
        }
    }

    /// Cancels every task whose `start_time_epoch` is older than
    /// `RuntimeConfig::task_timeout_seconds` and has not already been
    /// cancelled — the Data Model's "destroyed ... after a hard timeout"
    /// invariant.
    async fn enforce_task_timeouts(&self) {
        let now = now_epoch();
        let timeout = self.config.task_timeout_seconds;
        let mut expired = Vec::new();
        self.registry
            .for_each(|ctx| {
                if !ctx.cancellation.is_cancelled() && now.saturating_sub(ctx.start_time_epoch) >= timeout {
                    expired.push(ctx.logical_task_id.clone());
                }
            })
            .await;

        for task_id in expired {
            warn!(task_id, timeout, "task exceeded hard timeout, force-cancelling");
            if let Err(err) = self.cancel_task(&task_id).await {
                error!(task_id, error = %err, "failed to force-cancel timed-out task");
            }
        }
    }

    /// Stops `run()`, cancels every in-flight task, and waits for the event
    /// buffer's async writer to drain — the §5 Cleanup shutdown sequence for
    /// this hop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.cancel_all().await;
        if let Err(err) = self.buffer.shutdown().await {
            error!(error = %err, "event buffer shutdown reported an error");
        }
    }

    /// Intermediate event sink: records a status or artifact update to the
    /// event buffer and fans it out to any live SSE stream for its task.
    pub async fn handle_status_message(&self, payload: Vec<u8>) -> A2AResult<()> {
        let envelope = MeshEnvelope::from_bytes(&payload)?;
        let response: StreamResponse = serde_json::from_value(envelope.body)?;
        let task_id = stream_response_task_id(&response).to_string();

        if self.registry.get(&task_id).await.is_none() {
            debug!(task_id = %task_id, "status event for an unknown or finished task, dropping");
            return Ok(());
        }

        let event_type = stream_response_event_type(&response);
        let payload_value = serde_json::to_value(&response)?;
        self.record_and_fan_out(&task_id, event_type, payload_value).await
    }

    /// Final event sink: unwraps the JSON-RPC reply, enhances a completed
    /// task's text response with a new-artifacts block, records and fans
    /// out the terminal event, then tears the task's state down.
    async fn handle_reply_message(&self, topic: &str, payload: Vec<u8>) -> A2AResult<()> {
        let task_id = topic.rsplit('/').next().unwrap_or_default().to_string();
        let Some(ctx) = self.registry.get(&task_id).await else {
            debug!(task_id = %task_id, "reply for an unknown or already-finished task, dropping");
            return Ok(());
        };

        let envelope = MeshEnvelope::from_bytes(&payload)?;

        if let Some(error) = envelope.body.get("error") {
            let failed = synthesize_failed_task(&task_id, &ctx.session_id, error.clone());
            let payload_value = serde_json::to_value(&failed)?;
            self.record_and_fan_out(&task_id, "task", payload_value).await?;
            self.finish_task(&task_id).await;
            return Ok(());
        }

        let result = envelope
            .body
            .get("result")
            .cloned()
            .ok_or_else(|| A2AError::internal_error("reply envelope has neither result nor error"))?;

        let mut response: StreamResponse = serde_json::from_value(result)?;
        if let StreamResponse::Task(task) = &mut response {
            task.id = task_id.clone();
            enhance_with_artifact_manifest(&ctx, task).await;
        }

        let event_type = stream_response_event_type(&response);
        let payload_value = serde_json::to_value(&response)?;
        self.record_and_fan_out(&task_id, event_type, payload_value).await?;
        self.finish_task(&task_id).await;
        Ok(())
    }

    async fn record_and_fan_out(&self, task_id: &str, event_type: &str, payload: Value) -> A2AResult<()> {
        self.buffer.buffer_event(task_id, event_type, payload.clone()).await?;
        if let Some(task) = self.live.read().await.get(task_id) {
            // No subscriber is not an error — nobody may be connected right now.
            let _ = task.tx.send(SseEvent {
                sequence_number: None,
                event_type: event_type.to_string(),
                payload,
            });
        }
        Ok(())
    }

    async fn finish_task(&self, task_id: &str) {
        self.registry.remove(task_id).await;
        self.live.write().await.remove(task_id);
    }
}

/// Appends a block describing newly produced artifacts to a completed
/// task's text response, so clients that resolve artifact-content embeds
/// late can still fetch them.
async fn enhance_with_artifact_manifest(ctx: &TaskContext, task: &mut Task) {
    let produced = ctx.produced_artifacts_snapshot().await;
    if produced.is_empty() {
        return;
    }
    let Some(message) = task.status.message.as_mut() else {
        return;
    };

    let mut block = String::from("\n\n---\nNew artifacts:\n");
    for artifact in &produced {
        let uri = ArtifactUri::new(
            &ctx.app_name_for_artifacts,
            &ctx.user_identity.id,
            &ctx.session_id,
            &artifact.filename,
            artifact.version,
        );
        block.push_str(&format!("- {} ({})\n", artifact.filename, uri));
    }

    match message.parts.iter_mut().find(|p| matches!(p, Part::Text { .. })) {
        Some(Part::Text { text, .. }) => text.push_str(&block),
        _ => message.parts.push(Part::Text {
            text: block,
            metadata: None,
        }),
    }
}

fn synthesize_failed_task(task_id: &str, session_id: &str, error: Value) -> Task {
    let text = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("task failed")
        .to_string();
    Task {
        id: task_id.to_string(),
        context_id: session_id.to_string(),
        kind: "task".to_string(),
        status: TaskStatus {
            state: TaskState::Failed,
            message: Some(Message {
                message_id: Uuid::new_v4().to_string(),
                role: Role::Agent,
                kind: "message".to_string(),
                parts: vec![Part::Text { text, metadata: None }],
                context_id: Some(session_id.to_string()),
                task_id: Some(task_id.to_string()),
                metadata: None,
                extensions: None,
                reference_task_ids: None,
            }),
            timestamp: None,
        },
        artifacts: None,
        history: None,
        metadata: None,
    }
}

fn stream_response_task_id(resp: &StreamResponse) -> &str {
    match resp {
        StreamResponse::Task(t) => &t.id,
        StreamResponse::Message(m) => m.task_id.as_deref().unwrap_or(""),
        StreamResponse::StatusUpdate(e) => &e.task_id,
        StreamResponse::ArtifactUpdate(e) => &e.task_id,
    }
}

fn stream_response_event_type(resp: &StreamResponse) -> &'static str {
    match resp {
        StreamResponse::Task(_) => "task",
        StreamResponse::Message(_) => "message",
        StreamResponse::StatusUpdate(_) => "status-update",
        StreamResponse::ArtifactUpdate(_) => "artifact-update",
    }
}
