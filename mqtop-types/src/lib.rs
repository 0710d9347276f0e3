//! # mqtop-types
//!
//! Plain data types exchanged between the broker adapters and the mqtop
//! session: what one poll of the management API looks like, and what a
//! peeked message looks like.
//!
//! ## Features
//!
//! - `serde`: derive `Serialize`/`Deserialize` for all types
//!
//! ## Example
//!
//! ```rust
//! use mqtop_types::Snapshot;
//!
//! let snapshot = Snapshot::builder()
//!     .timestamp_ms(1_700_000_000_000)
//!     .queue("orders", |q| q.ready(12).unacked(3).published(1500).delivered(1488))
//!     .queue("payments", |q| q.vhost("billing").ready(0))
//!     .build();
//!
//! assert_eq!(snapshot.len(), 2);
//! assert_eq!(snapshot.get("orders").unwrap().ready, 12);
//! ```

mod message;
mod queue;
mod snapshot;

pub use message::*;
pub use queue::*;
pub use snapshot::*;
