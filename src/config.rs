//! Runtime configuration shared by the gateway, proxy, and agent harness.
//!
//! A single [`RuntimeConfig`] is constructed once (typically from environment
//! variables) and passed by reference through constructors; no subsystem reads
//! ambient global state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{A2AError, A2AResult};

/// Top-level runtime configuration.
///
/// Every field has a typed default; [`RuntimeConfig::validate`] rejects
/// combinations that cannot work (e.g. a zero flush threshold or more than
/// ten allowed share-link domains).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Mesh topic namespace prefix, e.g. `"acme/prod"`.
    pub namespace: String,

    /// Database connection string for the event buffer and share-link store.
    /// `None` disables durable persistence (RAM-only, non-hybrid mode).
    pub database_url: Option<String>,

    /// HTTP bind host for the gateway/proxy discovery server.
    pub host: String,

    /// HTTP bind port.
    pub port: u16,

    /// Allowed CORS origins for the gateway's HTTP surface.
    pub cors_origins: Vec<String>,

    /// Authentication mode for inbound HTTP requests.
    pub auth_mode: AuthMode,

    /// Base URL of the external identity/authentication service, when
    /// `auth_mode` is not `Disabled`.
    pub auth_provider_url: Option<String>,

    /// Seconds between AgentCard discovery passes. `0` disables periodic
    /// re-discovery (an initial pass still always runs).
    pub discovery_interval_seconds: u64,

    /// Default per-agent HTTP request timeout, used when an agent's own
    /// configuration does not specify one.
    pub default_agent_request_timeout_seconds: u64,

    /// Event buffer settings.
    pub buffer: BufferConfig,

    /// Retention window, in days, for `cleanup_old_events`.
    pub event_retention_days: u32,

    /// Maximum accepted inbound message size, in bytes.
    pub max_message_bytes: usize,

    /// Hard timeout for an entire task, in seconds, after which it is
    /// force-canceled.
    pub task_timeout_seconds: u64,

    /// Heartbeat timeout for the deployer/platform liveness channel.
    pub heartbeat_timeout_seconds: u64,

    /// Directories to scan for skill catalogs.
    pub skill_paths: Vec<String>,

    /// Whether skill scanning recurses into subdirectories.
    pub skill_auto_discover: bool,

    /// Maximum number of domains permitted on a single share link.
    pub max_share_link_domains: usize,
}

/// Authentication modes for the gateway's HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// No authentication — every request is treated as an anonymous dev user.
    /// Never used outside local development.
    Disabled,
    /// Validate bearer tokens against `auth_provider_url`.
    Oidc,
}

/// Configuration for the persistent SSE event buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BufferConfig {
    /// Whether the buffer is enabled at all. If `false`, all buffer
    /// operations are no-ops.
    pub enabled: bool,

    /// Whether hybrid RAM+DB mode is active. Requires `enabled` and a
    /// configured database.
    pub hybrid_mode_enabled: bool,

    /// Number of RAM-buffered events for a task that triggers an automatic
    /// flush to the async write queue.
    pub hybrid_flush_threshold: usize,

    /// Bounded capacity of the async write queue.
    pub async_write_queue_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hybrid_mode_enabled: false,
            hybrid_flush_threshold: 20,
            async_write_queue_size: 1000,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespace: "sam".to_string(),
            database_url: None,
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
            auth_mode: AuthMode::Disabled,
            auth_provider_url: None,
            discovery_interval_seconds: 60,
            default_agent_request_timeout_seconds: 300,
            buffer: BufferConfig::default(),
            event_retention_days: 7,
            max_message_bytes: 10 * 1024 * 1024,
            task_timeout_seconds: 300,
            heartbeat_timeout_seconds: 60,
            skill_paths: Vec::new(),
            skill_auto_discover: true,
            max_share_link_domains: 10,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset. Variable names are prefixed `SAM_`.
    pub fn from_env() -> A2AResult<Self> {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SAM_NAMESPACE") {
            cfg.namespace = v;
        }
        if let Ok(v) = std::env::var("SAM_DATABASE_URL") {
            cfg.database_url = Some(v);
        }
        if let Ok(v) = std::env::var("SAM_HOST") {
            cfg.host = v;
        }
        if let Ok(v) = std::env::var("SAM_PORT") {
            cfg.port = v
                .parse()
                .map_err(|_| A2AError::invalid_params("SAM_PORT must be a valid u16"))?;
        }
        if let Ok(v) = std::env::var("SAM_CORS_ORIGINS") {
            cfg.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("SAM_DISCOVERY_INTERVAL_SECONDS") {
            cfg.discovery_interval_seconds = v.parse().map_err(|_| {
                A2AError::invalid_params("SAM_DISCOVERY_INTERVAL_SECONDS must be a valid u64")
            })?;
        }
        if let Ok(v) = std::env::var("SAM_BUFFER_HYBRID_MODE") {
            cfg.buffer.hybrid_mode_enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("SAM_SKILL_PATHS") {
            cfg.skill_paths = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects configuration combinations that cannot work at runtime.
    pub fn validate(&self) -> A2AResult<()> {
        if self.namespace.trim().is_empty() {
            return Err(A2AError::invalid_params("namespace must not be empty"));
        }
        if self.buffer.enabled && self.buffer.hybrid_mode_enabled {
            if self.buffer.hybrid_flush_threshold == 0 {
                return Err(A2AError::invalid_params(
                    "buffer.hybrid_flush_threshold must be > 0 in hybrid mode",
                ));
            }
            if self.buffer.async_write_queue_size == 0 {
                return Err(A2AError::invalid_params(
                    "buffer.async_write_queue_size must be > 0 in hybrid mode",
                ));
            }
        }
        if self.buffer.hybrid_mode_enabled && self.database_url.is_none() {
            return Err(A2AError::invalid_params(
                "hybrid buffer mode requires database_url to be set",
            ));
        }
        if self.max_share_link_domains == 0 {
            return Err(A2AError::invalid_params(
                "max_share_link_domains must be > 0",
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(A2AError::invalid_params("max_message_bytes must be > 0"));
        }
        if matches!(self.auth_mode, AuthMode::Oidc) && self.auth_provider_url.is_none() {
            return Err(A2AError::invalid_params(
                "auth_mode=oidc requires auth_provider_url",
            ));
        }
        Ok(())
    }

    /// Per-agent request timeout, falling back to the configured default.
    pub fn agent_request_timeout(&self, agent_override_seconds: Option<u64>) -> Duration {
        Duration::from_secs(
            agent_override_seconds.unwrap_or(self.default_agent_request_timeout_seconds),
        )
    }

    /// Mesh topic for an agent's request inbox.
    pub fn agent_request_topic(&self, agent_name: &str) -> String {
        format!("{}/a2a/v1/agent/request/{}", self.namespace, agent_name)
    }

    /// Mesh topic for an agent's status stream for a given task.
    pub fn agent_status_topic(&self, agent_name: &str, task_id: &str) -> String {
        format!(
            "{}/a2a/v1/agent/status/{}/{}",
            self.namespace, agent_name, task_id
        )
    }

    /// Mesh topic for agent-card discovery broadcasts.
    pub fn discovery_topic(&self) -> String {
        format!("{}/a2a/v1/discovery/agents", self.namespace)
    }

    /// Mesh-scheme URL a proxied agent's AgentCard `url` is rewritten to,
    /// replacing its real HTTP endpoint — callers reach the agent only
    /// through its request topic, never directly.
    pub fn agent_mesh_url(&self, alias: &str) -> String {
        format!("sam-mesh://{}", self.agent_request_topic(alias))
    }

    /// Wildcard filter matching every agent's status topic, for a gateway
    /// that does not know in advance which agents its in-flight tasks target.
    pub fn gateway_status_wildcard(&self) -> String {
        format!("{}/a2a/v1/agent/status/+/+", self.namespace)
    }

    /// Mesh topic a specific gateway instance's reply for one task is
    /// published to.
    pub fn gateway_reply_topic(&self, gateway_id: &str, logical_task_id: &str) -> String {
        format!("{}/gateway/reply/{}/{}", self.namespace, gateway_id, logical_task_id)
    }

    /// Wildcard filter matching every reply addressed to one gateway instance.
    pub fn gateway_reply_wildcard(&self, gateway_id: &str) -> String {
        format!("{}/gateway/reply/{}/#", self.namespace, gateway_id)
    }
}
