//! Pub/sub abstraction over the agent mesh transport.
//!
//! The gateway, proxy, and harness all communicate by publishing and
//! subscribing to topics rather than calling each other directly.
//! [`MeshClient`] is the seam; [`InProcessMesh`] is a dependency-free
//! implementation good enough for tests and single-process deployments.
//! A production deployment plugs in a real broker client behind the same
//! trait without either side of the mesh knowing the difference.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::error::{A2AError, A2AResult};

/// A single message delivered to a topic subscriber.
#[derive(Debug, Clone)]
pub struct MeshMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// The envelope every gateway/proxy/agent publishes onto the mesh.
///
/// Real brokers (Solace included) carry key/value user-properties alongside
/// a message body; [`MeshClient::publish`] only takes raw bytes, so the
/// `replyTo`/`a2aStatusTopic` user-properties that route hops between
/// gateway, proxy, and agent are folded into the JSON payload itself rather
/// than lost. A production mesh binding would map `user_properties` to
/// native broker headers instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshEnvelope {
    #[serde(default)]
    pub user_properties: HashMap<String, String>,
    pub body: Value,
}

impl MeshEnvelope {
    pub fn new(body: Value) -> Self {
        Self {
            user_properties: HashMap::new(),
            body,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.user_properties.get(key).map(String::as_str)
    }

    pub fn to_bytes(&self) -> A2AResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(A2AError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> A2AResult<Self> {
        serde_json::from_slice(bytes).map_err(A2AError::from)
    }
}

/// A live subscription to one or more topics, expressed as an async stream
/// of [`MeshMessage`]. Subscriptions created before a publish only see
/// messages published after they were established — there is no replay;
/// durability across disconnects is the event buffer's job, not the mesh's.
pub struct Subscription {
    rx: broadcast::Receiver<MeshMessage>,
    filter: TopicFilter,
}

impl Subscription {
    /// Waits for the next message matching this subscription's filter.
    /// Returns `None` only if the underlying channel has been closed.
    pub async fn recv(&mut self) -> Option<MeshMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if self.filter.matches(&msg.topic) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "mesh subscription lagged, dropping missed messages");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Publish/subscribe transport over the agent mesh.
#[async_trait]
pub trait MeshClient: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> A2AResult<()>;

    /// Subscribes to a topic, which may contain MQTT-style wildcards (`+`
    /// for one segment, `#` for the remaining segments) as the topic
    /// helpers in [`crate::config`] imply.
    async fn subscribe(&self, topic_filter: &str) -> A2AResult<Subscription>;
}

#[derive(Debug, Clone)]
struct TopicFilter {
    segments: Vec<String>,
}

impl TopicFilter {
    fn new(pattern: &str) -> Self {
        Self {
            segments: pattern.split('/').map(|s| s.to_string()).collect(),
        }
    }

    fn matches(&self, topic: &str) -> bool {
        let topic_segments: Vec<&str> = topic.split('/').collect();
        Self::matches_segments(&self.segments, &topic_segments)
    }

    fn matches_segments(pattern: &[String], topic: &[&str]) -> bool {
        match (pattern.first(), topic.first()) {
            (None, None) => true,
            (Some(p), _) if p == "#" => true,
            (Some(p), Some(_)) if p == "+" => {
                Self::matches_segments(&pattern[1..], &topic[1..])
            }
            (Some(p), Some(t)) if p == t => Self::matches_segments(&pattern[1..], &topic[1..]),
            _ => false,
        }
    }
}

/// In-process mesh backed by a single broadcast channel, filtered per
/// subscription. Adequate for tests and for running an entire mesh
/// (gateway + proxy + agents) inside one process.
pub struct InProcessMesh {
    tx: broadcast::Sender<MeshMessage>,
    // Kept so the channel is never entirely dropped, which would make every
    // future subscribe() immediately see a closed channel.
    _retained_rx: Mutex<broadcast::Receiver<MeshMessage>>,
}

impl InProcessMesh {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, rx) = broadcast::channel(capacity);
        Arc::new(Self {
            tx,
            _retained_rx: Mutex::new(rx),
        })
    }
}

impl Default for InProcessMesh {
    fn default() -> Self {
        let (tx, rx) = broadcast::channel(1024);
        Self {
            tx,
            _retained_rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl MeshClient for InProcessMesh {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> A2AResult<()> {
        // No subscribers is not an error — the mesh doesn't know or care who
        // is listening.
        let _ = self.tx.send(MeshMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, topic_filter: &str) -> A2AResult<Subscription> {
        Ok(Subscription {
            rx: self.tx.subscribe(),
            filter: TopicFilter::new(topic_filter),
        })
    }
}

/// Convenience registry mapping logical role names (`"gateway"`, agent
/// names) to their dedicated mesh handle, used by test harnesses that wire
/// up several roles against one [`InProcessMesh`].
#[derive(Default)]
pub struct MeshRegistry {
    handles: HashMap<String, Arc<dyn MeshClient>>,
}

impl MeshRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, client: Arc<dyn MeshClient>) {
        self.handles.insert(name.into(), client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MeshClient>> {
        self.handles.get(name).cloned()
    }
}
