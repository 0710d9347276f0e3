//! # mqtop
//!
//! A live terminal view of RabbitMQ queue health, with an optional
//! supervised `kubectl port-forward` for brokers that live inside a
//! Kubernetes cluster.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        main thread                           │
//! │  ┌─────────┐    ┌──────────┐    ┌─────────┐    ┌──────────┐  │
//! │  │ events  │───▶│   app    │───▶│   ui    │───▶│ Terminal │  │
//! │  │ (input) │    │ (state)  │    │(render) │    │          │  │
//! │  └─────────┘    └────▲─────┘    └─────────┘    └──────────┘  │
//! │                      │ SessionEvent                          │
//! └──────────────────────┼───────────────────────────────────────┘
//!           ┌────────────┼─────────────┐
//!     ┌─────┴─────┐ ┌────┴─────┐ ┌─────┴─────┐
//!     │  source   │ │  tunnel  │ │  signals  │   tokio tasks
//!     │ (poller)  │ │(superv.) │ │           │
//!     └───────────┘ └──────────┘ └───────────┘
//! ```
//!
//! - **[`source`]**: [`StatsSource`](source::StatsSource) trait and the background poller
//! - **[`data`]**: Rate and session-delta engine, health thresholds, sparkline history
//! - **[`tunnel`]**: Port-forward state machine, launcher, probe, and detached-forward registry
//! - **[`app`]**: The render owner; turns task messages into rows and queued actions
//! - **[`ui`]**: ratatui rendering of the queue table, header, and overlays
//! - **[`config`]**: Providers and session settings from `~/.mqtop/config.toml`
//! - **[`cli`]**: Non-interactive subcommands (`forward`, `providers`, `peek`)
//!
//! ## Usage
//!
//! ```bash
//! # Live view of the only configured provider
//! mqtop
//!
//! # Live view of a named provider, polling every 2 seconds
//! mqtop --provider dev-k8s --refresh 2s
//!
//! # Look at the head of a queue without consuming it
//! mqtop peek orders -n 5
//! ```
//!
//! ### Driving the engine directly
//!
//! ```
//! use mqtop::data::{Engine, Thresholds};
//! use mqtop_types::Snapshot;
//!
//! let mut engine = Engine::new(1, Thresholds::default());
//! engine.update(&Snapshot::builder().timestamp_ms(0).queue("orders", |q| q.published(100)).build());
//! let rows = engine.update(&Snapshot::builder().timestamp_ms(1000).queue("orders", |q| q.published(110)).build());
//! assert_eq!(rows[0].pub_rate, Some(10.0));
//! assert_eq!(rows[0].pub_delta, 10);
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod events;
pub mod runtime;
pub mod session;
pub mod source;
pub mod tunnel;
pub mod ui;

// Re-export main types for convenience
pub use app::App;
pub use config::{Config, Provider, Settings};
pub use data::{DisplayRow, Engine, HealthStatus, Thresholds};
pub use source::StatsSource;
