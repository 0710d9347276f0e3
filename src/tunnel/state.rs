//! Tunnel lifecycle states and the read-only status projection.

use super::TunnelError;

/// Lifecycle of the forwarding subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelState {
    Stopped,
    Starting,
    Running,
    Recovering,
    /// Auto-recovery is suspended until a manual restart.
    Failed(TunnelError),
}

impl TunnelState {
    pub fn label(&self) -> &'static str {
        match self {
            TunnelState::Stopped => "stopped",
            TunnelState::Starting => "starting",
            TunnelState::Running => "running",
            TunnelState::Recovering => "recovering",
            TunnelState::Failed(_) => "failed",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TunnelState::Running)
    }

    /// `Starting`, `Running` and `Recovering` all hold a process.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TunnelState::Starting | TunnelState::Running | TunnelState::Recovering
        )
    }
}

/// Result of one liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheck {
    /// Wall-clock time of the probe (ms since epoch).
    pub at_ms: u64,
    pub process_alive: bool,
    pub port_open: bool,
}

impl HealthCheck {
    pub fn healthy(&self) -> bool {
        self.process_alive && self.port_open
    }
}

/// What the render loop is allowed to see of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStatus {
    pub state: TunnelState,
    pub pid: Option<u32>,
    pub local_port: u16,
    /// Total restarts this session.
    pub restarts: u32,
    /// Launches that reached `Running`; names the process instance a
    /// recovery request was made against.
    pub generation: u64,
    pub last_check: Option<HealthCheck>,
}

impl TunnelStatus {
    pub fn badge(&self) -> String {
        match &self.state {
            TunnelState::Stopped => "tunnel: stopped".to_string(),
            TunnelState::Starting => "tunnel: starting".to_string(),
            TunnelState::Running => match self.pid {
                Some(pid) => format!("tunnel: up pid={}", pid),
                None => "tunnel: up".to_string(),
            },
            TunnelState::Recovering => format!("tunnel: recovering ({})", self.restarts),
            TunnelState::Failed(reason) => format!("tunnel: FAILED {}", reason.short()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: TunnelState) -> TunnelStatus {
        TunnelStatus {
            state,
            pid: Some(4242),
            local_port: 15673,
            restarts: 2,
            generation: 3,
            last_check: None,
        }
    }

    #[test]
    fn test_badges() {
        assert_eq!(status(TunnelState::Running).badge(), "tunnel: up pid=4242");
        assert_eq!(status(TunnelState::Starting).badge(), "tunnel: starting");
        assert_eq!(status(TunnelState::Recovering).badge(), "tunnel: recovering (2)");
        assert_eq!(status(TunnelState::Stopped).badge(), "tunnel: stopped");
        assert_eq!(
            status(TunnelState::Failed(TunnelError::ExitedDuringStartup)).badge(),
            "tunnel: FAILED exited during startup"
        );
    }
}
