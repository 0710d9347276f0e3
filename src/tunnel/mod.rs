//! `kubectl port-forward` supervision.
//!
//! A [`Supervisor`] owns at most one forwarding subprocess per provider and
//! moves it through an explicit state machine:
//!
//! ```text
//!            start                 port open
//! Stopped ─────────▶ Starting ────────────────▶ Running
//!    ▲                  │ timeout / exited         │ crash or probe failure
//!    │ stop             ▼                          ▼
//!    └─────────────── Failed ◀──── budget ──── Recovering ───▶ Running
//! ```
//!
//! The process side is behind the [`Launcher`] trait and the readiness
//! check behind [`PortProbe`], so the state machine can be driven in tests
//! without spawning anything.

mod launcher;
mod probe;
pub mod registry;
mod state;
mod supervisor;
mod task;

pub use launcher::{KubectlLauncher, Launcher, Signal};
pub use probe::{PortProbe, TcpProbe};
pub use state::{HealthCheck, TunnelState, TunnelStatus};
pub use supervisor::{Supervisor, SupervisorConfig};
pub use task::{spawn_supervisor, TunnelCommand, TunnelHandle};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything needed to build one port-forward command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardSpec {
    pub context: Option<String>,
    pub namespace: String,
    /// Resource to forward to, e.g. `svc/rabbitmq`.
    pub service: String,
    pub remote_amqp_port: u16,
    pub local_amqp_port: u16,
    pub local_ui_port: Option<u16>,
    pub remote_ui_port: u16,
}

impl ForwardSpec {
    /// Arguments passed to `kubectl`.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(context) = &self.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        args.push("port-forward".to_string());
        args.push(self.service.clone());
        args.push(format!("{}:{}", self.local_amqp_port, self.remote_amqp_port));
        if let Some(local_ui) = self.local_ui_port {
            args.push(format!("{}:{}", local_ui, self.remote_ui_port));
        }
        args.push("-n".to_string());
        args.push(self.namespace.clone());
        args
    }

    /// Local port whose reachability proves the tunnel is up.
    pub fn probe_port(&self) -> u16 {
        self.local_ui_port.unwrap_or(self.local_amqp_port)
    }
}

/// Tunnel failures. Cloneable so the last one can live in [`TunnelState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TunnelError {
    #[error("tunnel is already running")]
    AlreadyRunning,

    #[error("failed to spawn port-forward: {0}")]
    Spawn(String),

    #[error("port {port} not reachable within {timeout:?}")]
    StartupTimeout { port: u16, timeout: Duration },

    #[error("port-forward exited during startup")]
    ExitedDuringStartup,

    #[error("crash loop: {restarts} restarts within {window:?}")]
    CrashLoop { restarts: usize, window: Duration },

    #[error("failed to signal process: {0}")]
    Signal(String),

    #[error("supervisor is not available")]
    Unavailable,
}

impl TunnelError {
    /// Short reason shown in the status badge.
    pub fn short(&self) -> String {
        match self {
            TunnelError::AlreadyRunning => "already running".to_string(),
            TunnelError::Spawn(_) => "spawn failed".to_string(),
            TunnelError::StartupTimeout { .. } => "startup timeout".to_string(),
            TunnelError::ExitedDuringStartup => "exited during startup".to_string(),
            TunnelError::CrashLoop { restarts, .. } => format!("crash loop ({} restarts)", restarts),
            TunnelError::Signal(_) => "signal failed".to_string(),
            TunnelError::Unavailable => "supervisor gone".to_string(),
        }
    }
}
