//! Messages returned by a non-destructive queue peek.

/// A message fetched from a queue and immediately requeued.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeekedMessage {
    /// Message body, possibly truncated or base64-encoded by the broker.
    pub payload: String,

    /// `"string"` or `"base64"`, as reported by the broker.
    #[cfg_attr(feature = "serde", serde(default))]
    pub payload_encoding: String,

    pub routing_key: String,

    pub exchange: String,

    /// Whether the broker had delivered this message before.
    pub redelivered: bool,

    /// Messages left in the queue after this one was fetched.
    #[cfg_attr(feature = "serde", serde(default))]
    pub message_count: u64,
}
