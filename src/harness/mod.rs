//! Agent Runtime Harness.
//!
//! Wraps a single agent's request-handling in an async loop that owns:
//! mesh message dispatch, a periodic timer tick, per-session conversation
//! accounting for compaction, and context-limit recovery. Agent logic itself
//! plugs in as a [`crate::server::agent_executor::AgentExecutor`]; the
//! harness is everything around it that isn't strictly agent logic —
//! mirroring how [`crate::server::request_handler`] wraps a `RequestHandler`
//! on the server side.
//!
//! Unhandled errors from one loop iteration are logged and the loop
//! continues — a single bad task must never take down the whole agent
//! process.

pub mod compaction;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{error, warn};

use crate::error::A2AResult;
use crate::mesh::MeshClient;
use crate::task_context::TaskContextRegistry;

use compaction::{
    compact_if_needed, truncation_notice, BadRequestDisposition, ConversationTurn, Summarizer,
};

/// Per-session accumulated conversation state the harness compacts over
/// time. Keyed by `session_id` — one entry survives across every task in
/// that session.
#[derive(Debug, Default)]
struct SessionConversation {
    turns: Vec<ConversationTurn>,
    last_summary: Option<String>,
}

/// How often the harness's idle timer fires while waiting on mesh messages.
/// Agents that need periodic background work (heartbeats, scheduled
/// housekeeping) hook into [`AgentRuntimeHarness::run`]'s timer branch.
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Token count past which a session's accumulated context is eligible for
/// compaction. Conservative default; production deployments size this to
/// the backing model's real context window.
const DEFAULT_COMPACTION_THRESHOLD_TOKENS: u64 = 100_000;

/// Token count a compaction pass aims to leave behind after summarizing.
const DEFAULT_COMPACTION_TARGET_TOKENS: u64 = 20_000;

/// Owns one agent's mesh subscription, task registry, and conversation
/// accounting, and drives its async run loop.
pub struct AgentRuntimeHarness {
    agent_name: String,
    mesh: Arc<dyn MeshClient>,
    registry: Arc<TaskContextRegistry>,
    summarizer: Arc<dyn Summarizer>,
    sessions: RwLock<HashMap<String, Mutex<SessionConversation>>>,
    compaction_threshold_tokens: u64,
    compaction_target_tokens: u64,
}

impl AgentRuntimeHarness {
    pub fn new(
        agent_name: impl Into<String>,
        mesh: Arc<dyn MeshClient>,
        registry: Arc<TaskContextRegistry>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            mesh,
            registry,
            summarizer,
            sessions: RwLock::new(HashMap::new()),
            compaction_threshold_tokens: DEFAULT_COMPACTION_THRESHOLD_TOKENS,
            compaction_target_tokens: DEFAULT_COMPACTION_TARGET_TOKENS,
        }
    }

    pub fn with_compaction_thresholds(mut self, threshold_tokens: u64, target_tokens: u64) -> Self {
        self.compaction_threshold_tokens = threshold_tokens;
        self.compaction_target_tokens = target_tokens;
        self
    }

    /// Appends a turn to a session's accumulated conversation and compacts
    /// it in place if it has grown past the configured threshold.
    ///
    /// Returns a truncation notice to surface to the caller when a
    /// compaction happened this call, worded for interactive vs. background
    /// tasks per `TaskContext::is_background`.
    pub async fn record_turn(
        &self,
        session_id: &str,
        turn: ConversationTurn,
        is_background: bool,
    ) -> A2AResult<Option<String>> {
        let sessions = self.sessions.read().await;
        let slot = if let Some(slot) = sessions.get(session_id) {
            slot
        } else {
            drop(sessions);
            let mut sessions = self.sessions.write().await;
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Mutex::new(SessionConversation::default()));
            drop(sessions);
            return Box::pin(self.record_turn(session_id, turn, is_background)).await;
        };

        let mut conversation = slot.lock().await;
        conversation.turns.push(turn);

        let outcome = compact_if_needed(
            &conversation.turns,
            self.compaction_threshold_tokens,
            self.compaction_target_tokens,
            conversation.last_summary.as_deref(),
            self.summarizer.as_ref(),
        )
        .await?;

        match outcome {
            Some(result) => {
                conversation.turns = result.turns;
                conversation.last_summary = Some(result.summary_text.clone());
                drop(conversation);
                self.sync_compaction_state(session_id, result.summary_text).await;
                Ok(Some(truncation_notice(is_background).to_string()))
            }
            None => Ok(None),
        }
    }

    /// Mirrors a session's freshly-compacted summary onto every
    /// `TaskContext` currently live for that session, so `TaskContext::compaction`
    /// reflects reality for as long as the task it belongs to is in flight —
    /// the harness's own per-session map remains the source of truth across
    /// a session's tasks, since a `TaskContext` is torn down at each task's
    /// terminal event.
    async fn sync_compaction_state(&self, session_id: &str, summary_text: String) {
        for ctx in self.registry.contexts_for_session(session_id).await {
            let mut state = ctx.compaction.write().await;
            state.last_summary = Some(summary_text.clone());
            state.compaction_count += 1;
        }
    }

    /// Forces an emergency compaction after the backend rejected a request
    /// with a context-limit `BadRequestError` — compacts harder than
    /// the steady-state pass by aiming for half the normal target, then the
    /// caller retries the backend call.
    pub async fn emergency_compact(&self, session_id: &str) -> A2AResult<bool> {
        let sessions = self.sessions.read().await;
        let Some(slot) = sessions.get(session_id) else {
            return Ok(false);
        };
        let mut conversation = slot.lock().await;
        let outcome = compact_if_needed(
            &conversation.turns,
            0,
            self.compaction_target_tokens / 2,
            conversation.last_summary.as_deref(),
            self.summarizer.as_ref(),
        )
        .await?;
        match outcome {
            Some(result) => {
                conversation.turns = result.turns;
                conversation.last_summary = Some(result.summary_text.clone());
                drop(conversation);
                self.sync_compaction_state(session_id, result.summary_text).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Classifies a `BadRequestError` message from the backend and, if it is
    /// a context-limit fingerprint, performs an emergency compaction. Any
    /// other `BadRequestError` is returned unchanged for the caller to
    /// surface.
    pub async fn recover_from_bad_request(
        &self,
        session_id: &str,
        message: &str,
    ) -> A2AResult<BadRequestDisposition> {
        let disposition = compaction::classify_bad_request(message);
        if disposition == BadRequestDisposition::EmergencyCompactAndRetry {
            self.emergency_compact(session_id).await?;
        }
        Ok(disposition)
    }

    /// Drives the harness's async loop: listens on the agent's request
    /// topic, dispatching each inbound message to `handle`, and fires a
    /// periodic tick agents can use for background housekeeping. Runs until
    /// the mesh subscription closes.
    ///
    /// A handler error is logged and the loop continues — one bad task must
    /// never take the agent process down.
    pub async fn run<F, Fut>(&self, request_topic: &str, mut handle: F) -> A2AResult<()>
    where
        F: FnMut(crate::mesh::MeshMessage) -> Fut,
        Fut: std::future::Future<Output = A2AResult<()>>,
    {
        let mut subscription = self.mesh.subscribe(request_topic).await?;
        let mut ticker = tokio::time::interval(DEFAULT_TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = subscription.recv() => {
                    let Some(message) = message else {
                        warn!(agent = %self.agent_name, "mesh subscription closed, harness loop exiting");
                        return Ok(());
                    };
                    if let Err(err) = handle(message).await {
                        error!(agent = %self.agent_name, error = %err, "harness message handler failed, continuing loop");
                    }
                }
                _ = ticker.tick() => {
                    // Reserved for agent-supplied periodic work; the harness
                    // itself has nothing to do on an idle tick today.
                }
            }
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn registry(&self) -> &Arc<TaskContextRegistry> {
        &self.registry
    }
}
