//! Proxy Component — sits between the mesh and each agent's HTTP
//! endpoint, translating dialects, persisting inline file bytes as
//! artifacts, and keeping every downstream task addressable by one
//! mesh-wide logical task id regardless of what the agent calls it
//! internally.
//!
//! One [`Proxy`] owns discovery (initial blocking pass + periodic
//! re-discovery), a [`TaskContextRegistry`] keyed by logical task id, and a
//! per-agent [`JsonRpcTransport`] cached after the agent's [`AgentCard`] is
//! resolved — mirroring [`crate::client::card_resolver::CardResolver`] and
//! [`crate::client::transport::JsonRpcTransport`], just driven from the mesh
//! side instead of a direct caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifact_store::{ArtifactMetadata, ArtifactStore};
use crate::client::card_resolver::CardResolver;
use crate::client::transport::{JsonRpcTransport, Transport, TransportConfig};
use crate::config::RuntimeConfig;
use crate::error::{A2AError, A2AResult};
use crate::mesh::{MeshClient, MeshEnvelope};
use crate::task_context::{CancellationToken, TaskContext, TaskContextRegistry, UserIdentity};
use crate::translator;
use crate::types::{
    FileContent, JsonRpcRequest, JsonRpcResponse, Message, Part, StreamResponse, Task, TaskStatus,
};
use crate::utils::now_epoch;

/// A proxied agent's configured base URL and the alias it is known by on the
/// mesh — independent of whatever name the remote's own AgentCard carries.
#[derive(Debug, Clone)]
pub struct ProxiedAgent {
    pub base_url: String,
    pub alias: String,
}

impl ProxiedAgent {
    pub fn new(base_url: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            alias: alias.into(),
        }
    }
}

/// How often `run()` checks every in-flight task's age against
/// `RuntimeConfig::task_timeout_seconds`.
const TASK_TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Which wire dialect an inbound request arrived in — carried on the mesh
/// envelope as a `"dialect"` user-property so the proxy doesn't need to
/// remember it out of band; `"modern"` is assumed when absent.
fn envelope_dialect(envelope: &MeshEnvelope) -> &str {
    envelope.property("dialect").unwrap_or("modern")
}

/// A registered downstream agent: its resolved card and a cached transport
/// to its HTTP endpoint.
struct AgentRegistration {
    request_topic: String,
    transport: JsonRpcTransport,
    app_name: String,
}

/// Translates, forwards, and rewrites traffic between the mesh and a set of
/// downstream A2A HTTP agents.
pub struct Proxy {
    config: Arc<RuntimeConfig>,
    mesh: Arc<dyn MeshClient>,
    registry: Arc<TaskContextRegistry>,
    artifact_store: Arc<dyn ArtifactStore>,
    agents: RwLock<HashMap<String, AgentRegistration>>,
    shutdown: CancellationToken,
}

impl Proxy {
    pub fn new(
        config: Arc<RuntimeConfig>,
        mesh: Arc<dyn MeshClient>,
        artifact_store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            mesh,
            registry: Arc::new(TaskContextRegistry::new()),
            artifact_store,
            agents: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TaskContextRegistry> {
        &self.registry
    }

    /// Resolves an agent's card from its HTTP base URL, renames it to the
    /// configured alias (independent of the remote's own internal name),
    /// overwrites its `url` with a mesh-scheme URI pointing at the per-agent
    /// request topic, registers the request topic and transport, and
    /// publishes both the rewritten modern card and its legacy-dialect
    /// translation to the discovery topic so gateways of either dialect
    /// learn about it. Returns the alias (used as the mesh topic segment and
    /// the artifact store's `app`).
    pub async fn discover_agent(&self, base_url: &str, alias: &str) -> A2AResult<String> {
        let resolver = CardResolver::new();
        let mut card = resolver.resolve(base_url).await?;
        let remote_name = card.name.clone();
        card.name = alias.to_string();
        card.url = self.config.agent_mesh_url(alias);

        let transport = JsonRpcTransport::with_config(
            format!("{}/a2a", base_url.trim_end_matches('/')),
            TransportConfig {
                timeout: self.config.agent_request_timeout(None),
                headers: HashMap::new(),
            },
        );

        let request_topic = self.config.agent_request_topic(alias);
        {
            let mut agents = self.agents.write().await;
            agents.insert(
                alias.to_string(),
                AgentRegistration {
                    request_topic: request_topic.clone(),
                    transport,
                    app_name: alias.to_string(),
                },
            );
        }

        let modern_card = serde_json::to_value(&card)?;
        let envelope = MeshEnvelope::new(modern_card.clone());
        self.mesh
            .publish(&self.config.discovery_topic(), envelope.to_bytes()?)
            .await?;

        let legacy_card = translator::translate_outbound_card(modern_card)?;
        let legacy_envelope = MeshEnvelope::new(legacy_card).with_property("dialect", "legacy");
        self.mesh
            .publish(&self.config.discovery_topic(), legacy_envelope.to_bytes()?)
            .await?;

        info!(alias, remote_name, %request_topic, "agent discovered and registered");
        Ok(alias.to_string())
    }

    /// Runs the initial blocking discovery pass over every configured
    /// proxied agent, logging (not aborting on) individual failures, then —
    /// if `discoveryIntervalSeconds` is nonzero — spawns a periodic
    /// background task that repeats the same pass forever.
    pub async fn run_discovery(self: &Arc<Self>, agents: Vec<ProxiedAgent>) {
        self.discovery_pass(&agents).await;

        let interval_seconds = self.config.discovery_interval_seconds;
        if interval_seconds == 0 {
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
            ticker.tick().await; // first tick fires immediately; skip it, we just ran
            loop {
                ticker.tick().await;
                this.discovery_pass(&agents).await;
            }
        });
    }

    async fn discovery_pass(&self, agents: &[ProxiedAgent]) {
        for agent in agents {
            if let Err(err) = self.discover_agent(&agent.base_url, &agent.alias).await {
                warn!(base_url = %agent.base_url, alias = %agent.alias, error = %err, "agent discovery failed, will retry next pass");
            }
        }
    }

    /// Subscribes to every registered agent's request topic and forwards
    /// each inbound envelope to [`Proxy::handle_request_envelope`]. Runs
    /// until `shutdown()` is called; a single envelope's failure is logged
    /// and does not stop the loop. A periodic sweep force-cancels any task
    /// that has exceeded `RuntimeConfig::task_timeout_seconds`.
    pub async fn run(&self) -> A2AResult<()> {
        let agent_names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        if agent_names.is_empty() {
            warn!("proxy run() called with no agents registered");
            return Ok(());
        }

        // One subscription per agent keeps topic routing explicit — the
        // topic's last segment is the agent name by construction
        // (`config.agent_request_topic`).
        let mut subscriptions = Vec::new();
        for name in &agent_names {
            let topic = self.config.agent_request_topic(name);
            subscriptions.push((name.clone(), self.mesh.subscribe(&topic).await?));
        }

        let mut last_sweep = tokio::time::Instant::now();

        loop {
            if self.shutdown.is_cancelled() {
                debug!("proxy run loop stopping: shutdown requested");
                return Ok(());
            }

            let mut progressed = false;
            for (agent_name, subscription) in subscriptions.iter_mut() {
                if let Ok(Some(message)) =
                    tokio::time::timeout(Duration::from_millis(50), subscription.recv()).await
                {
                    progressed = true;
                    if let Err(err) = self.handle_request_envelope(agent_name, message.payload).await {
                        error!(agent = %agent_name, error = %err, "proxy failed to handle request envelope");
                    }
                }
            }

            if last_sweep.elapsed() >= TASK_TIMEOUT_SWEEP_INTERVAL {
                self.enforce_task_timeouts().await;
                last_sweep = tokio::time::Instant::now();
            }

            if !progressed {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    /// Cancels every task whose `start_time_epoch` is older than
    /// `RuntimeConfig::task_timeout_seconds` and has not already been
    /// cancelled, then drops its context — the Data Model's "destroyed ...
    /// after a hard timeout" invariant.
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
            if let Some(ctx) = self.registry.get(&task_id).await {
                ctx.cancellation.cancel();
            }
            self.registry.remove(&task_id).await;
        }
    }

    /// Stops `run()`, cancels every in-flight task, and drops every cached
    /// per-agent HTTP transport — the §5 Cleanup shutdown sequence for this
    /// hop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.registry.cancel_all().await;
        self.agents.write().await.clear();
    }

    /// Handles one inbound mesh envelope addressed to `agent_name`: parses
    /// and translates it, forwards it over HTTP, rewrites the response's
    /// inline file bytes into persisted artifacts, and publishes the
    /// translated result back onto the mesh.
    pub async fn handle_request_envelope(&self, agent_name: &str, payload: Vec<u8>) -> A2AResult<()> {
        let envelope = MeshEnvelope::from_bytes(&payload)?;
        let dialect = envelope_dialect(&envelope).to_string();
        let reply_to_topic = envelope
            .property("replyTo")
            .ok_or_else(|| A2AError::Translation("envelope missing 'replyTo' property".to_string()))?
            .to_string();

        let envelope_id = envelope.body.get("id").cloned().unwrap_or(Value::Null);
        let method = envelope
            .body
            .get("method")
            .and_then(|m| m.as_str())
            .ok_or_else(|| A2AError::Translation("envelope body missing 'method'".to_string()))?
            .to_string();
        let params = envelope.body.get("params").cloned().unwrap_or(Value::Null);

        let logical_task_id = envelope
            .property("logicalTaskId")
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let status_topic = envelope
            .property("a2aStatusTopic")
            .map(str::to_string)
            .unwrap_or_else(|| self.config.agent_status_topic(agent_name, &logical_task_id));

        let is_cancel = method == "tasks/cancel";

        let modern_request = if dialect == "legacy" {
            if is_cancel {
                translator::translate_inbound_cancel(envelope_id.clone(), params)?
            } else {
                translator::translate_inbound_send(envelope_id.clone(), &method, params, None)?
            }
        } else {
            json!({"jsonrpc": "2.0", "id": envelope_id, "method": method, "params": params})
        };

        let agents = self.agents.read().await;
        let registration = agents
            .get(agent_name)
            .ok_or_else(|| A2AError::not_found(format!("agent '{agent_name}' not registered")))?;

        if self.registry.get(&logical_task_id).await.is_none() {
            let context = TaskContext::new(
                logical_task_id.clone(),
                envelope_id.as_str().map(|s| s.to_string()),
                status_topic.clone(),
                reply_to_topic.clone(),
                None,
                UserIdentity::anonymous(),
                envelope.property("sessionId").unwrap_or("default-session"),
                registration.app_name.clone(),
            );
            self.registry.create(context).await?;
        }

        let rpc_request: JsonRpcRequest = serde_json::from_value(modern_request)
            .map_err(|e| A2AError::Translation(format!("invalid modern request: {e}")))?;

        let response = registration.transport.send(&rpc_request).await;
        drop(agents);

        match response {
            Ok(rpc_response) => {
                self.handle_success(&logical_task_id, &dialect, &reply_to_topic, rpc_response)
                    .await
            }
            Err(err) => {
                self.publish_failure(&reply_to_topic, envelope_id, err).await
            }
        }
    }

    async fn handle_success(
        &self,
        logical_task_id: &str,
        dialect: &str,
        reply_to_topic: &str,
        rpc_response: JsonRpcResponse,
    ) -> A2AResult<()> {
        if let Some(rpc_error) = rpc_response.error {
            let envelope = MeshEnvelope::new(json!({
                "jsonrpc": "2.0",
                "id": rpc_response.id,
                "error": rpc_error,
            }));
            self.mesh.publish(reply_to_topic, envelope.to_bytes()?).await?;
            self.registry.remove(logical_task_id).await;
            return Ok(());
        }

        let Some(result) = rpc_response.result else {
            return Err(A2AError::Translation("response has neither result nor error".to_string()));
        };

        let ctx = self
            .registry
            .get(logical_task_id)
            .await
            .ok_or_else(|| A2AError::not_found(format!("task context {logical_task_id}")))?;

        let mut task = match serde_json::from_value::<StreamResponse>(result)? {
            StreamResponse::Task(mut task) => {
                task.id = logical_task_id.to_string();
                task
            }
            StreamResponse::Message(message) => synthesize_completed_task(message, logical_task_id),
            other => {
                warn!(kind = ?other, "proxy received a non-terminal event from a blocking send, treating as opaque pass-through");
                return Ok(());
            }
        };

        let produced = rewrite_inline_file_parts(&mut task, &ctx, self.artifact_store.as_ref()).await?;
        for artifact in produced {
            ctx.record_produced_artifact(artifact.filename, artifact.version).await;
        }

        let task_value = serde_json::to_value(&task)?;
        let outbound = if dialect == "legacy" {
            translator::translate_outbound_task(task_value)?
        } else {
            task_value
        };

        let envelope = MeshEnvelope::new(json!({
            "jsonrpc": "2.0",
            "id": ctx.json_rpc_request_id,
            "result": outbound,
        }));
        self.mesh.publish(reply_to_topic, envelope.to_bytes()?).await?;
        self.registry.remove(logical_task_id).await;
        Ok(())
    }

    async fn publish_failure(
        &self,
        reply_to_topic: &str,
        envelope_id: Value,
        err: A2AError,
    ) -> A2AResult<()> {
        let rpc_error: crate::types::JsonRpcError = err.into();
        let envelope = MeshEnvelope::new(json!({
            "jsonrpc": "2.0",
            "id": envelope_id,
            "error": rpc_error,
        }));
        self.mesh.publish(reply_to_topic, envelope.to_bytes()?).await
    }
}

/// Builds a synthetic completed [`Task`] around a bare [`Message`] response,
/// using the proxy's logical task id rather than whatever id (if any) the
/// agent attached to the message.
fn synthesize_completed_task(message: Message, logical_task_id: &str) -> Task {
    Task {
        id: logical_task_id.to_string(),
        context_id: message.context_id.clone().unwrap_or_default(),
        kind: "task".to_string(),
        status: TaskStatus {
            state: crate::types::TaskState::Completed,
            message: Some(message),
            timestamp: None,
        },
        artifacts: None,
        history: None,
        metadata: None,
    }
}

/// Persists every inline file part's bytes (`FileContent::Bytes`) found in a
/// task's status message and artifacts, replacing them with a
/// `FileContent::Uri` pointing at the persisted artifact — the proxy's
/// "no inline bytes leave the mesh" invariant. Returns the artifacts
/// produced so the caller can record them on the task context.
async fn rewrite_inline_file_parts(
    task: &mut Task,
    ctx: &TaskContext,
    store: &dyn ArtifactStore,
) -> A2AResult<Vec<crate::task_context::ProducedArtifact>> {
    let mut produced = Vec::new();

    if let Some(message) = task.status.message.as_mut() {
        rewrite_parts(&mut message.parts, ctx, store, &mut produced).await?;
    }
    if let Some(artifacts) = task.artifacts.as_mut() {
        for artifact in artifacts.iter_mut() {
            rewrite_parts(&mut artifact.parts, ctx, store, &mut produced).await?;
        }
    }

    Ok(produced)
}

async fn rewrite_parts(
    parts: &mut [Part],
    ctx: &TaskContext,
    store: &dyn ArtifactStore,
    produced: &mut Vec<crate::task_context::ProducedArtifact>,
) -> A2AResult<()> {
    for part in parts.iter_mut() {
        if let Part::File { file, metadata } = part {
            if let FileContent::Bytes(inline) = file {
                let filename = inline
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("artifact-{}", Uuid::new_v4()));
                let bytes = crate::utils::artifact::decode_base64(&inline.bytes)?;

                let artifact_metadata = ArtifactMetadata {
                    description: None,
                    mime_type: inline.mime_type.clone(),
                    proxied_from_artifact_id: Some(filename.clone()),
                    shared_publicly: false,
                    extra: Value::Null,
                };

                let uri = store
                    .save(
                        &ctx.app_name_for_artifacts,
                        &ctx.user_identity.id,
                        &ctx.session_id,
                        &filename,
                        bytes,
                        artifact_metadata,
                    )
                    .await?;

                produced.push(crate::task_context::ProducedArtifact {
                    filename: filename.clone(),
                    version: uri.version,
                });

                *file = FileContent::Uri(crate::types::FileWithUri {
                    uri: uri.to_string(),
                    mime_type: inline.mime_type.clone(),
                    name: Some(filename),
                });
                let _ = metadata;
            }
        }
    }
    Ok(())
}
