//! Messages flowing from background tasks into the render owner.

use mqtop_types::Snapshot;

use crate::source::PollError;
use crate::tunnel::TunnelStatus;

/// Everything the render loop learns from the outside world.
#[derive(Debug)]
pub enum SessionEvent {
    /// Outcome of one poll.
    Poll(Result<Snapshot, PollError>),
    /// Supervisor state after a command or health check.
    Tunnel(TunnelStatus),
    /// SIGINT / SIGTERM / SIGHUP received.
    Terminate(&'static str),
}
