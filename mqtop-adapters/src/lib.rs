//! # mqtop-adapters
//!
//! Clients for the broker side of mqtop.
//!
//! The only supported broker today is RabbitMQ, reached through its
//! Management HTTP API (`rabbitmq` feature, enabled by default). The client
//! lists queue statistics for the poller and performs the non-destructive
//! message peek used by `mqtop peek`.
//!
//! Every failure is an [`AdapterError`], and every `AdapterError` has an
//! [`ErrorClass`]: callers retry `Transient` errors on their own schedule and
//! give up on `Fatal` ones.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mqtop_adapters::rabbitmq::ManagementClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ManagementClient::builder()
//!         .endpoint("http://127.0.0.1:15672")
//!         .credentials("guest", "guest")
//!         .timeout(Duration::from_secs(5))
//!         .build()?;
//!
//!     let snapshot = client.collect().await?;
//!     println!("{} queues", snapshot.len());
//!     Ok(())
//! }
//! ```

pub mod error;

#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;

pub use error::{AdapterError, ErrorClass};

pub use mqtop_types::{PeekedMessage, QueueSnapshot, Snapshot};
