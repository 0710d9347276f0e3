//! Metrics processing for queue snapshots.
//!
//! ## Submodules
//!
//! - [`duration`]: Parsing and formatting of duration strings (e.g., "1s", "500ms")
//! - [`engine`]: Rate and session-delta computation ([`Engine`], [`DisplayRow`])
//! - [`health`]: Ready-depth thresholds ([`Thresholds`], [`HealthStatus`])
//! - [`history`]: Ready-depth history for sparklines
//!
//! ## Data Flow
//!
//! ```text
//! Snapshot (from the poller)
//!        │
//!        ▼
//! Engine::update()
//!        │
//!        ├──▶ DisplayRow per queue (rates, session deltas, stale/reset flags)
//!        │
//!        └──▶ History::record() (for sparklines)
//! ```

pub mod duration;
pub mod engine;
pub mod health;
pub mod history;

pub use engine::{DisplayRow, Engine, QueueId, QueueSessionState, SessionState, SessionTotals};
pub use health::{HealthStatus, Thresholds};
pub use history::History;
