//! RabbitMQ adapter using the Management HTTP API.
//!
//! Queue statistics come from `GET /api/queues` (or `/api/queues/{vhost}`
//! when a vhost is configured). The management plugin is usually exposed on
//! port 15672, locally or through a `kubectl port-forward`.
//!
//! ## Fields collected per queue
//!
//! - `messages_ready` / `messages_unacknowledged`: current depth
//! - `consumers`: attached consumers
//! - `message_stats.publish` / `message_stats.deliver_get`: the broker's
//!   cumulative counters, which reset to zero whenever the broker restarts
//!
//! ## Example
//!
//! ```rust,no_run
//! use mqtop_adapters::rabbitmq::ManagementClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ManagementClient::builder()
//!         .endpoint("http://localhost:15672")
//!         .credentials("guest", "guest")
//!         .vhost("/")
//!         .build()?;
//!
//!     for queue in client.collect().await?.queues {
//!         println!("{}: ready={} published={}", queue.name, queue.ready, queue.published);
//!     }
//!
//!     let peeked = client.peek("orders", 5, None).await?;
//!     println!("peeked {} messages", peeked.len());
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use mqtop_types::{PeekedMessage, QueueSnapshot, Snapshot};

use crate::AdapterError;

/// Maximum payload bytes the broker returns per peeked message.
const PEEK_TRUNCATE_BYTES: usize = 50_000;

/// RabbitMQ Management API client.
#[derive(Debug, Clone)]
pub struct ManagementClient {
    client: Client,
    endpoint: String,
    username: String,
    password: String,
    vhost: Option<String>,
}

impl ManagementClient {
    /// Create a new builder for configuring the client.
    pub fn builder() -> ManagementClientBuilder {
        ManagementClientBuilder::default()
    }

    /// The base URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Collect a snapshot of all queues, stamped with the current time.
    pub async fn collect(&self) -> Result<Snapshot, AdapterError> {
        let queues = self.list_queues().await?;
        Ok(Snapshot::now(queues))
    }

    /// List queue statistics for the configured vhost, or all vhosts.
    pub async fn list_queues(&self) -> Result<Vec<QueueSnapshot>, AdapterError> {
        let url = match &self.vhost {
            Some(vhost) => format!("{}/api/queues/{}", self.endpoint, urlencoded(vhost)),
            None => format!("{}/api/queues", self.endpoint),
        };

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let response = check_status(response, "vhost")?;

        let queues: Vec<QueueInfo> = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))?;

        debug!(count = queues.len(), url = %url, "listed queues");
        Ok(queues.into_iter().map(QueueInfo::into_snapshot).collect())
    }

    /// Fetch up to `count` messages from a queue and requeue them.
    ///
    /// Uses `ackmode=ack_requeue_true`, so the messages stay in the queue
    /// (they will be flagged `redelivered` on their next delivery). The vhost
    /// is, in order: the explicit argument, the client's vhost, the vhost of
    /// the first listed queue with that name, or `/`.
    pub async fn peek(
        &self,
        queue: &str,
        count: u32,
        vhost: Option<&str>,
    ) -> Result<Vec<PeekedMessage>, AdapterError> {
        let vhost = match vhost.or(self.vhost.as_deref()) {
            Some(v) => v.to_string(),
            None => self.discover_vhost(queue).await,
        };

        let url = format!(
            "{}/api/queues/{}/{}/get",
            self.endpoint,
            urlencoded(&vhost),
            urlencoded(queue)
        );

        let body = PeekRequest {
            count,
            ackmode: "ack_requeue_true",
            encoding: "auto",
            truncate: PEEK_TRUNCATE_BYTES,
        };

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, &format!("queue '{}' in vhost '{}'", queue, vhost))?;

        let messages: Vec<PeekedMessage> = response
            .json::<Vec<MessageInfo>>()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))?
            .into_iter()
            .map(MessageInfo::into_message)
            .collect();

        Ok(messages)
    }

    async fn discover_vhost(&self, queue: &str) -> String {
        match self.list_queues().await {
            Ok(queues) => queues
                .into_iter()
                .find(|q| q.name == queue)
                .map(|q| q.vhost)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "/".to_string()),
            Err(e) => {
                debug!(error = %e, "vhost discovery failed, using /");
                "/".to_string()
            }
        }
    }
}

/// Map non-success statuses onto adapter errors.
fn check_status(response: Response, what: &str) -> Result<Response, AdapterError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(AdapterError::Auth(format!(
            "management API rejected credentials ({})",
            status
        )));
    }
    if status == StatusCode::NOT_FOUND {
        return Err(AdapterError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        return Err(AdapterError::Http {
            status: status.as_u16(),
            message: format!("API returned status {}", status),
        });
    }
    Ok(response)
}

/// Builder for [`ManagementClient`].
#[derive(Debug, Default)]
pub struct ManagementClientBuilder {
    endpoint: Option<String>,
    username: Option<String>,
    password: Option<String>,
    vhost: Option<String>,
    timeout: Option<Duration>,
}

impl ManagementClientBuilder {
    /// Set the Management API endpoint (e.g., "http://localhost:15672").
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the username and password for authentication.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Restrict queries to a single vhost (default: all vhosts).
    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = Some(vhost.into());
        self
    }

    /// Set the request timeout (default: 10 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<ManagementClient, AdapterError> {
        let timeout = self.timeout.unwrap_or(Duration::from_secs(10));

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Config(e.to_string()))?;

        let endpoint = self
            .endpoint
            .unwrap_or_else(|| "http://localhost:15672".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(ManagementClient {
            client,
            endpoint,
            username: self.username.unwrap_or_else(|| "guest".to_string()),
            password: self.password.unwrap_or_else(|| "guest".to_string()),
            vhost: self.vhost,
        })
    }
}

// Percent-encode a path segment (vhost "/" becomes "%2F")
fn urlencoded(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Queue information from the RabbitMQ Management API.
#[derive(Debug, Deserialize)]
struct QueueInfo {
    name: String,
    #[serde(default)]
    vhost: String,
    #[serde(default)]
    messages_ready: Option<u64>,
    #[serde(default)]
    messages_unacknowledged: Option<u64>,
    #[serde(default)]
    consumers: Option<u32>,
    #[serde(default)]
    message_stats: Option<MessageStats>,
}

impl QueueInfo {
    fn into_snapshot(self) -> QueueSnapshot {
        let stats = self.message_stats.unwrap_or_default();
        QueueSnapshot {
            name: self.name,
            vhost: self.vhost,
            ready: self.messages_ready.unwrap_or(0),
            unacked: self.messages_unacknowledged.unwrap_or(0),
            consumers: self.consumers.unwrap_or(0),
            published: stats.publish,
            delivered: stats.deliver_get,
            sampled_at_ms: 0,
        }
    }
}

/// Cumulative counters. Queues that never saw traffic omit `message_stats`
/// entirely; busy ones may still omit individual counters.
#[derive(Debug, Default, Deserialize)]
struct MessageStats {
    #[serde(default)]
    publish: u64,
    #[serde(default)]
    deliver_get: u64,
}

#[derive(Debug, Serialize)]
struct PeekRequest {
    count: u32,
    ackmode: &'static str,
    encoding: &'static str,
    truncate: usize,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    #[serde(default)]
    payload: String,
    #[serde(default)]
    payload_encoding: String,
    #[serde(default)]
    routing_key: String,
    #[serde(default)]
    exchange: String,
    #[serde(default)]
    redelivered: bool,
    #[serde(default)]
    message_count: u64,
}

impl MessageInfo {
    fn into_message(self) -> PeekedMessage {
        PeekedMessage {
            payload: self.payload,
            payload_encoding: self.payload_encoding,
            routing_key: self.routing_key,
            exchange: self.exchange,
            redelivered: self.redelivered,
            message_count: self.message_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let client = ManagementClient::builder().build().unwrap();
        assert_eq!(client.endpoint, "http://localhost:15672");
        assert_eq!(client.username, "guest");
        assert_eq!(client.password, "guest");
        assert!(client.vhost.is_none());
    }

    #[test]
    fn test_builder_custom() {
        let client = ManagementClient::builder()
            .endpoint("http://rabbit.local:15672/")
            .credentials("admin", "secret")
            .vhost("myapp")
            .build()
            .unwrap();

        assert_eq!(client.endpoint(), "http://rabbit.local:15672");
        assert_eq!(client.username, "admin");
        assert_eq!(client.password, "secret");
        assert_eq!(client.vhost.as_deref(), Some("myapp"));
    }

    #[test]
    fn test_urlencoded() {
        assert_eq!(urlencoded("/"), "%2F");
        assert_eq!(urlencoded("my/vhost"), "my%2Fvhost");
        assert_eq!(urlencoded("simple"), "simple");
        assert_eq!(urlencoded("a b#c"), "a%20b%23c");
    }

    #[test]
    fn test_queue_info_parsing() {
        let json = r#"[
            {
                "name": "orders",
                "vhost": "/",
                "messages_ready": 120,
                "messages_unacknowledged": 4,
                "consumers": 2,
                "message_stats": {
                    "publish": 1500,
                    "publish_details": {"rate": 12.5},
                    "deliver_get": 1376,
                    "deliver_get_details": {"rate": 11.0}
                }
            },
            {
                "name": "idle",
                "vhost": "billing"
            }
        ]"#;

        let queues: Vec<QueueInfo> = serde_json::from_str(json).unwrap();
        let snapshots: Vec<QueueSnapshot> =
            queues.into_iter().map(QueueInfo::into_snapshot).collect();

        assert_eq!(snapshots[0].name, "orders");
        assert_eq!(snapshots[0].ready, 120);
        assert_eq!(snapshots[0].unacked, 4);
        assert_eq!(snapshots[0].consumers, 2);
        assert_eq!(snapshots[0].published, 1500);
        assert_eq!(snapshots[0].delivered, 1376);

        assert_eq!(snapshots[1].vhost, "billing");
        assert_eq!(snapshots[1].ready, 0);
        assert_eq!(snapshots[1].published, 0);
        assert_eq!(snapshots[1].delivered, 0);
    }

    #[test]
    fn test_null_counters_default_to_zero() {
        let json = r#"{"name": "q", "messages_ready": null, "consumers": null}"#;
        let info: QueueInfo = serde_json::from_str(json).unwrap();
        let snapshot = info.into_snapshot();
        assert_eq!(snapshot.ready, 0);
        assert_eq!(snapshot.consumers, 0);
    }

    #[test]
    fn test_peek_request_body() {
        let body = PeekRequest {
            count: 3,
            ackmode: "ack_requeue_true",
            encoding: "auto",
            truncate: PEEK_TRUNCATE_BYTES,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["count"], 3);
        assert_eq!(value["ackmode"], "ack_requeue_true");
        assert_eq!(value["encoding"], "auto");
    }

    #[test]
    fn test_message_info_parsing() {
        let json = r#"[{
            "payload": "{\"id\":1}",
            "payload_bytes": 8,
            "payload_encoding": "string",
            "routing_key": "orders.new",
            "exchange": "orders",
            "redelivered": true,
            "message_count": 7,
            "properties": {}
        }]"#;
        let infos: Vec<MessageInfo> = serde_json::from_str(json).unwrap();
        let msg = infos.into_iter().next().unwrap().into_message();
        assert_eq!(msg.payload, "{\"id\":1}");
        assert_eq!(msg.routing_key, "orders.new");
        assert_eq!(msg.exchange, "orders");
        assert!(msg.redelivered);
        assert_eq!(msg.message_count, 7);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let client = ManagementClient::builder()
            .endpoint("http://127.0.0.1:1")
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();

        let err = client.list_queues().await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err:?}");
    }
}
