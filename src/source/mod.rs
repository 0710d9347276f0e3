//! Queue statistics sources and the background poller.
//!
//! The render loop never talks to the broker itself. A [`StatsSource`]
//! produces [`Snapshot`]s, and the [`poller`] task fetches them on a timer
//! and hands each outcome to the render owner as a message.

pub mod poller;

pub use poller::{poll_once, spawn_poller, PollControl, PollerHandle};

use std::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;

use mqtop_adapters::rabbitmq::ManagementClient;
use mqtop_adapters::AdapterError;
use mqtop_types::Snapshot;

/// Anything that can list queue statistics for one broker.
///
/// # Example
///
/// ```no_run
/// use mqtop::source::StatsSource;
/// use mqtop_adapters::rabbitmq::ManagementClient;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ManagementClient::builder().endpoint("http://localhost:15672").build()?;
/// let snapshot = client.fetch().await?;
/// println!("{} queues from {}", snapshot.len(), client.description());
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait StatsSource: Send + Sync + Debug {
    /// Fetch the current state of every queue.
    async fn fetch(&self) -> Result<Snapshot, AdapterError>;

    /// Human-readable description of the source, shown in the header.
    fn description(&self) -> &str;
}

#[async_trait]
impl StatsSource for ManagementClient {
    async fn fetch(&self) -> Result<Snapshot, AdapterError> {
        self.collect().await
    }

    fn description(&self) -> &str {
        self.endpoint()
    }
}

/// A failed poll, classified for the render loop's retry policy.
#[derive(Debug, Error)]
pub enum PollError {
    /// Timeout or transport failure; the loop shows stale data and retries.
    #[error("broker unreachable: {0}")]
    Transient(String),

    /// Authentication, missing vhost or a rejected request; ends the session.
    #[error(transparent)]
    Fatal(AdapterError),
}

impl PollError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PollError::Transient(_))
    }
}

impl From<AdapterError> for PollError {
    fn from(err: AdapterError) -> Self {
        if err.is_transient() {
            PollError::Transient(err.to_string())
        } else {
            PollError::Fatal(err)
        }
    }
}
