//! Supervisor as a background task.
//!
//! The render loop never awaits the supervisor. It sends
//! [`TunnelCommand`]s through a [`TunnelHandle`] and receives every state
//! change back as a [`SessionEvent::Tunnel`], including the `Starting` and
//! `Recovering` phases of a command that is still running.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Launcher, PortProbe, Supervisor, TunnelError};
use crate::session::SessionEvent;

/// Requests accepted by the supervisor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelCommand {
    Start,
    HealthCheck,
    /// Presume the tunnel of the given generation broken (e.g. after
    /// repeated poll failures). Ignored once that process was replaced.
    Recover(u64),
    /// User-initiated stop + start with a fresh restart budget.
    Restart,
}

/// Sending side used by the render loop. All sends are non-blocking.
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    commands: mpsc::Sender<TunnelCommand>,
    stop: CancellationToken,
    stopped: CancellationToken,
}

impl TunnelHandle {
    /// Queue a command; dropped with a warning if the task is busy or gone.
    pub fn send(&self, command: TunnelCommand) -> Result<(), TunnelError> {
        self.commands.try_send(command).map_err(|e| {
            warn!(error = %e, "tunnel command not delivered");
            TunnelError::Unavailable
        })
    }

    /// Stop the tunnel and wait (bounded) for the task to exit.
    ///
    /// Interrupts a command in progress, so a forwarder that is still
    /// binding its port is terminated too.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), TunnelError> {
        self.stop.cancel();
        tokio::time::timeout(timeout, self.stopped.cancelled())
            .await
            .map_err(|_| TunnelError::Unavailable)
    }
}

/// Spawn the supervisor task. The tunnel is stopped when `cancel` fires.
pub fn spawn_supervisor<L, P>(
    supervisor: Supervisor<L, P>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) -> (TunnelHandle, JoinHandle<()>)
where
    L: Launcher + 'static,
    L::Process: 'static,
    P: PortProbe + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let stop = cancel.child_token();
    let stopped = CancellationToken::new();
    let supervisor = supervisor.with_events(events.clone());
    let task = tokio::spawn(run(supervisor, rx, events, stop.clone(), stopped.clone()));
    let handle = TunnelHandle {
        commands: tx,
        stop,
        stopped,
    };
    (handle, task)
}

async fn run<L, P>(
    mut supervisor: Supervisor<L, P>,
    mut commands: mpsc::Receiver<TunnelCommand>,
    events: mpsc::Sender<SessionEvent>,
    stop: CancellationToken,
    stopped: CancellationToken,
) where
    L: Launcher,
    P: PortProbe,
{
    let _done = stopped.drop_guard();

    loop {
        let command = tokio::select! {
            _ = stop.cancelled() => None,
            command = commands.recv() => command,
        };
        // cancelled, or every handle dropped
        let Some(command) = command else {
            break;
        };

        debug!(?command, "tunnel command");
        let result = tokio::select! {
            _ = stop.cancelled() => None,
            result = execute(&mut supervisor, command) => Some(result),
        };
        let Some(result) = result else {
            debug!(?command, "tunnel command interrupted");
            break;
        };

        if let Err(e) = result {
            warn!(error = %e, "tunnel command failed");
        }
        if events
            .send(SessionEvent::Tunnel(supervisor.status().await))
            .await
            .is_err()
        {
            break;
        }
    }

    if let Err(e) = supervisor.stop().await {
        warn!(error = %e, "tunnel stop failed");
    }
    // the render loop may no longer be draining
    let _ = events.try_send(SessionEvent::Tunnel(supervisor.snapshot()));
    debug!("supervisor task stopped");
}

async fn execute<L: Launcher, P: PortProbe>(
    supervisor: &mut Supervisor<L, P>,
    command: TunnelCommand,
) -> Result<(), TunnelError> {
    match command {
        TunnelCommand::Start => supervisor.start().await,
        TunnelCommand::HealthCheck => supervisor.health_tick().await,
        TunnelCommand::Recover(generation) => supervisor.recover_from(generation).await,
        TunnelCommand::Restart => supervisor.restart().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::supervisor::tests::{supervisor, world};
    use crate::tunnel::{Signal, TunnelState, TunnelStatus};

    async fn next_status(rx: &mut mpsc::Receiver<SessionEvent>) -> TunnelStatus {
        match rx.recv().await {
            Some(SessionEvent::Tunnel(status)) => status,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_publishes_starting_then_running() {
        let world = world();
        let (tx, mut rx) = mpsc::channel(16);
        let (handle, task) = spawn_supervisor(supervisor(&world), tx, CancellationToken::new());

        handle.send(TunnelCommand::Start).unwrap();
        assert_eq!(next_status(&mut rx).await.state, TunnelState::Starting);
        assert_eq!(next_status(&mut rx).await.state, TunnelState::Running);

        handle.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(next_status(&mut rx).await.state, TunnelState::Stopped);
        task.await.unwrap();
        assert!(world.lock().unwrap().alive.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_tunnel() {
        let world = world();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (handle, task) = spawn_supervisor(supervisor(&world), tx, cancel.clone());

        handle.send(TunnelCommand::Start).unwrap();
        next_status(&mut rx).await;
        next_status(&mut rx).await;

        cancel.cancel();
        task.await.unwrap();
        assert!(world.lock().unwrap().alive.is_empty());
        assert_eq!(world.lock().unwrap().signals.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_reports_recovering_before_running() {
        let world = world();
        let (tx, mut rx) = mpsc::channel(16);
        let (handle, task) = spawn_supervisor(supervisor(&world), tx, CancellationToken::new());

        handle.send(TunnelCommand::Start).unwrap();
        next_status(&mut rx).await;
        next_status(&mut rx).await;

        // crash; the replacement is slow to bind
        {
            let mut w = world.lock().unwrap();
            w.alive.clear();
            w.port_open = false;
            w.opens_port = false;
        }
        handle.send(TunnelCommand::HealthCheck).unwrap();

        let status = next_status(&mut rx).await;
        assert_eq!(status.state, TunnelState::Recovering);
        assert_eq!(status.restarts, 1);
        assert_eq!(status.badge(), "tunnel: recovering (1)");

        world.lock().unwrap().port_open = true;
        let status = next_status(&mut rx).await;
        assert_eq!(status.state, TunnelState::Running);
        assert_eq!(status.restarts, 1);

        handle.shutdown(Duration::from_secs(5)).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_queued_during_relaunch_is_ignored() {
        let world = world();
        let (tx, mut rx) = mpsc::channel(16);
        let (handle, task) = spawn_supervisor(supervisor(&world), tx, CancellationToken::new());

        handle.send(TunnelCommand::Start).unwrap();
        next_status(&mut rx).await;
        let first = next_status(&mut rx).await;

        {
            let mut w = world.lock().unwrap();
            w.alive.clear();
            w.port_open = false;
            w.opens_port = false;
        }
        handle.send(TunnelCommand::HealthCheck).unwrap();
        assert_eq!(next_status(&mut rx).await.state, TunnelState::Recovering);

        // poll failures against the crashed process, queued behind the relaunch
        handle.send(TunnelCommand::Recover(first.generation)).unwrap();
        world.lock().unwrap().port_open = true;

        let relaunched = next_status(&mut rx).await;
        assert_eq!(relaunched.state, TunnelState::Running);
        let after = next_status(&mut rx).await;
        assert_eq!(after.state, TunnelState::Running);
        assert_eq!(after.restarts, 1);
        assert_eq!(after.generation, relaunched.generation);
        assert_eq!(world.lock().unwrap().spawns, 2);

        handle.shutdown(Duration::from_secs(5)).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_startup() {
        let world = world();
        world.lock().unwrap().opens_port = false;
        let (tx, mut rx) = mpsc::channel(16);
        let (handle, task) = spawn_supervisor(supervisor(&world), tx, CancellationToken::new());

        handle.send(TunnelCommand::Start).unwrap();
        assert_eq!(next_status(&mut rx).await.state, TunnelState::Starting);

        let started = tokio::time::Instant::now();
        handle.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        task.await.unwrap();

        let w = world.lock().unwrap();
        assert!(w.alive.is_empty());
        assert_eq!(w.signals, vec![Signal::Graceful]);
        drop(w);
        assert_eq!(next_status(&mut rx).await.state, TunnelState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_startup_signals_process() {
        let world = world();
        world.lock().unwrap().opens_port = false;
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let (handle, task) = spawn_supervisor(supervisor(&world), tx, cancel.clone());

        handle.send(TunnelCommand::Start).unwrap();
        assert_eq!(next_status(&mut rx).await.state, TunnelState::Starting);

        cancel.cancel();
        task.await.unwrap();

        let w = world.lock().unwrap();
        assert!(w.alive.is_empty());
        assert_eq!(w.signals, vec![Signal::Graceful]);
        assert_eq!(w.spawns, 1);
    }
}
