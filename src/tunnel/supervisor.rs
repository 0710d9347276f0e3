//! The tunnel state machine.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use mqtop_types::current_timestamp_ms;

use super::{
    ForwardSpec, HealthCheck, Launcher, PortProbe, Signal, TunnelError, TunnelState, TunnelStatus,
};
use crate::config::Settings;
use crate::session::SessionEvent;

/// Time given to a SIGKILLed process to disappear.
const KILL_WAIT: Duration = Duration::from_secs(1);
/// Exit polling period while waiting for a process to stop.
const EXIT_POLL: Duration = Duration::from_millis(50);

/// Timing and retry limits.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub startup_timeout: Duration,
    pub stop_grace: Duration,
    /// Restarts allowed inside `restart_window` before giving up.
    pub restart_budget: u32,
    pub restart_window: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SupervisorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            startup_timeout: settings.startup_timeout,
            stop_grace: settings.stop_grace,
            restart_budget: settings.restart_budget,
            restart_window: settings.restart_window,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        }
    }
}

/// Owns one provider's forwarding subprocess.
///
/// At most one process is held at any time: every path that launches a
/// new one first terminates the old one.
pub struct Supervisor<L: Launcher, P: PortProbe> {
    spec: ForwardSpec,
    launcher: L,
    probe: P,
    config: SupervisorConfig,
    state: TunnelState,
    process: Option<L::Process>,
    pid: Option<u32>,
    restarts: u32,
    recent_restarts: VecDeque<Instant>,
    generation: u64,
    last_check: Option<HealthCheck>,
    /// Receives `Starting` and `Recovering` as they are entered.
    events: Option<mpsc::Sender<SessionEvent>>,
}

impl<L: Launcher, P: PortProbe> Supervisor<L, P> {
    pub fn new(spec: ForwardSpec, launcher: L, probe: P, config: SupervisorConfig) -> Self {
        Self {
            spec,
            launcher,
            probe,
            config,
            state: TunnelState::Stopped,
            process: None,
            pid: None,
            restarts: 0,
            recent_restarts: VecDeque::new(),
            generation: 0,
            last_check: None,
            events: None,
        }
    }

    /// Report transitional states to the render loop while a command is
    /// still in progress.
    pub fn with_events(mut self, events: mpsc::Sender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &TunnelState {
        &self.state
    }

    /// Status projection without probing.
    pub fn snapshot(&self) -> TunnelStatus {
        TunnelStatus {
            state: self.state.clone(),
            pid: self.pid,
            local_port: self.spec.probe_port(),
            restarts: self.restarts,
            generation: self.generation,
            last_check: self.last_check,
        }
    }

    /// Launch the forwarder and wait until its port accepts connections.
    pub async fn start(&mut self) -> Result<(), TunnelError> {
        if matches!(self.state, TunnelState::Starting | TunnelState::Running) {
            return Err(TunnelError::AlreadyRunning);
        }
        self.launch(TunnelState::Starting).await
    }

    /// Current status, refreshing the health check when a process is held.
    pub async fn status(&mut self) -> TunnelStatus {
        if self.process.is_some() {
            self.check().await;
        }
        self.snapshot()
    }

    /// Terminate the forwarder. A no-op when nothing is running.
    pub async fn stop(&mut self) -> Result<(), TunnelError> {
        if self.process.is_none()
            && matches!(self.state, TunnelState::Stopped | TunnelState::Failed(_))
        {
            return Ok(());
        }
        self.terminate().await;
        self.state = TunnelState::Stopped;
        info!(port = self.spec.probe_port(), "tunnel stopped");
        Ok(())
    }

    /// Periodic liveness check; recovers the tunnel if it has died.
    ///
    /// Does nothing unless the tunnel is `Running`.
    pub async fn health_tick(&mut self) -> Result<(), TunnelError> {
        if !self.state.is_running() {
            return Ok(());
        }
        let check = self.check().await;
        if check.healthy() {
            return Ok(());
        }
        warn!(
            process_alive = check.process_alive,
            port_open = check.port_open,
            "tunnel health check failed"
        );
        self.recover().await
    }

    /// Relaunch a `Running` tunnel, unless the restart budget is spent.
    pub async fn recover(&mut self) -> Result<(), TunnelError> {
        if !self.state.is_running() {
            return Ok(());
        }

        self.restarts += 1;
        self.enter(TunnelState::Recovering);

        let now = Instant::now();
        self.recent_restarts.push_back(now);
        while let Some(&oldest) = self.recent_restarts.front() {
            if now.duration_since(oldest) > self.config.restart_window {
                self.recent_restarts.pop_front();
            } else {
                break;
            }
        }

        if self.recent_restarts.len() > self.config.restart_budget as usize {
            self.terminate().await;
            let err = TunnelError::CrashLoop {
                restarts: self.recent_restarts.len(),
                window: self.config.restart_window,
            };
            warn!(error = %err, "giving up on tunnel");
            self.state = TunnelState::Failed(err.clone());
            return Err(err);
        }

        info!(restarts = self.restarts, "recovering tunnel");
        self.terminate().await;
        self.launch(TunnelState::Recovering).await
    }

    /// Recover only if `generation` still names the running process.
    ///
    /// Requests made against a process that has since been replaced are
    /// dropped, so one outage never costs two restarts.
    pub async fn recover_from(&mut self, generation: u64) -> Result<(), TunnelError> {
        if generation != self.generation {
            debug!(
                requested = generation,
                current = self.generation,
                "ignoring recovery for a replaced tunnel"
            );
            return Ok(());
        }
        self.recover().await
    }

    /// User-initiated restart. Clears the crash-loop window so a `Failed`
    /// tunnel gets a fresh budget.
    pub async fn restart(&mut self) -> Result<(), TunnelError> {
        self.recent_restarts.clear();
        self.stop().await?;
        self.start().await
    }

    async fn launch(&mut self, phase: TunnelState) -> Result<(), TunnelError> {
        let process = match self.launcher.spawn(&self.spec) {
            Ok(process) => process,
            Err(err) => {
                self.state = TunnelState::Failed(err.clone());
                return Err(err);
            }
        };
        self.pid = self.launcher.pid(&process);
        self.process = Some(process);
        self.enter(phase);

        let port = self.spec.probe_port();
        let deadline = Instant::now() + self.config.startup_timeout;
        let mut backoff = self.config.initial_backoff;

        loop {
            if !self.process_alive() {
                self.process = None;
                self.pid = None;
                let err = TunnelError::ExitedDuringStartup;
                warn!(port, "port-forward exited during startup");
                self.state = TunnelState::Failed(err.clone());
                return Err(err);
            }

            if self.probe.is_open(port).await {
                self.last_check = Some(HealthCheck {
                    at_ms: current_timestamp_ms(),
                    process_alive: true,
                    port_open: true,
                });
                self.state = TunnelState::Running;
                self.generation += 1;
                info!(port, pid = ?self.pid, generation = self.generation, "tunnel up");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                self.terminate().await;
                let err = TunnelError::StartupTimeout {
                    port,
                    timeout: self.config.startup_timeout,
                };
                warn!(error = %err, "tunnel startup timed out");
                self.state = TunnelState::Failed(err.clone());
                return Err(err);
            }

            sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(self.config.max_backoff);
        }
    }

    fn enter(&mut self, state: TunnelState) {
        if self.state == state {
            return;
        }
        self.state = state;
        if let Some(events) = &self.events {
            // a full channel only loses an intermediate badge
            let _ = events.try_send(SessionEvent::Tunnel(self.snapshot()));
        }
    }

    async fn check(&mut self) -> HealthCheck {
        let process_alive = self.process_alive();
        let port_open = process_alive && self.probe.is_open(self.spec.probe_port()).await;
        let check = HealthCheck {
            at_ms: current_timestamp_ms(),
            process_alive,
            port_open,
        };
        debug!(process_alive, port_open, "tunnel health check");
        self.last_check = Some(check);
        check
    }

    fn process_alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(process) => self.launcher.is_alive(process),
            None => false,
        }
    }

    /// SIGTERM, wait `stop_grace`, then SIGKILL. Drops the process handle.
    async fn terminate(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        self.pid = None;

        if self.launcher.is_alive(&mut process) {
            if let Err(e) = self.launcher.signal(&mut process, Signal::Graceful) {
                warn!(error = %e, "graceful stop failed");
            }
            if !self.wait_exit(&mut process, self.config.stop_grace).await {
                debug!("port-forward ignored SIGTERM, killing");
                if let Err(e) = self.launcher.signal(&mut process, Signal::Force) {
                    warn!(error = %e, "kill failed");
                }
                self.wait_exit(&mut process, KILL_WAIT).await;
            }
        }
    }

    async fn wait_exit(&mut self, process: &mut L::Process, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if !self.launcher.is_alive(process) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(EXIT_POLL).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;

    /// Observable state shared between a test and its fake launcher.
    #[derive(Debug, Default)]
    pub(crate) struct FakeWorld {
        pub spawns: u32,
        pub signals: Vec<Signal>,
        /// Processes currently alive, by id.
        pub alive: Vec<u32>,
        /// Whether the forwarded port accepts connections.
        pub port_open: bool,
        /// New processes open the port immediately.
        pub opens_port: bool,
        /// New processes exit right after spawning.
        pub exits_on_spawn: bool,
        /// Processes ignore SIGTERM.
        pub ignores_term: bool,
    }

    pub(crate) type World = Arc<Mutex<FakeWorld>>;

    pub(crate) fn world() -> World {
        Arc::new(Mutex::new(FakeWorld {
            opens_port: true,
            ..Default::default()
        }))
    }

    pub(crate) struct FakeLauncher(pub World);

    impl Launcher for FakeLauncher {
        type Process = u32;

        fn spawn(&mut self, _spec: &ForwardSpec) -> Result<u32, TunnelError> {
            let mut w = self.0.lock().unwrap();
            w.spawns += 1;
            let id = 1000 + w.spawns;
            if !w.exits_on_spawn {
                w.alive.push(id);
                if w.opens_port {
                    w.port_open = true;
                }
            }
            Ok(id)
        }

        fn pid(&self, process: &u32) -> Option<u32> {
            Some(*process)
        }

        fn signal(&mut self, process: &mut u32, signal: Signal) -> Result<(), TunnelError> {
            let mut w = self.0.lock().unwrap();
            w.signals.push(signal);
            if signal == Signal::Force || !w.ignores_term {
                w.alive.retain(|p| p != process);
                w.port_open = false;
            }
            Ok(())
        }

        fn is_alive(&mut self, process: &mut u32) -> bool {
            self.0.lock().unwrap().alive.contains(process)
        }
    }

    pub(crate) struct FakeProbe(pub World);

    #[async_trait]
    impl PortProbe for FakeProbe {
        async fn is_open(&self, _port: u16) -> bool {
            self.0.lock().unwrap().port_open
        }
    }

    pub(crate) fn spec() -> ForwardSpec {
        ForwardSpec {
            context: None,
            namespace: "messaging".to_string(),
            service: "svc/rabbitmq".to_string(),
            remote_amqp_port: 5672,
            local_amqp_port: 5673,
            local_ui_port: Some(15673),
            remote_ui_port: 15672,
        }
    }

    pub(crate) fn supervisor(world: &World) -> Supervisor<FakeLauncher, FakeProbe> {
        Supervisor::new(
            spec(),
            FakeLauncher(world.clone()),
            FakeProbe(world.clone()),
            SupervisorConfig::default(),
        )
    }

    fn crash(world: &World) {
        let mut w = world.lock().unwrap();
        w.alive.clear();
        w.port_open = false;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reaches_running() {
        let world = world();
        let mut sup = supervisor(&world);

        sup.start().await.unwrap();
        assert_eq!(sup.state(), &TunnelState::Running);

        let status = sup.snapshot();
        assert_eq!(status.pid, Some(1001));
        assert_eq!(status.local_port, 15673);
        assert!(status.last_check.unwrap().healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_is_rejected() {
        let world = world();
        let mut sup = supervisor(&world);

        sup.start().await.unwrap();
        assert_eq!(sup.start().await, Err(TunnelError::AlreadyRunning));
        assert_eq!(world.lock().unwrap().spawns, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_timeout_kills_process() {
        let world = world();
        world.lock().unwrap().opens_port = false;
        let mut sup = supervisor(&world);

        let started = Instant::now();
        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, TunnelError::StartupTimeout { port: 15673, .. }));
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(matches!(sup.state(), TunnelState::Failed(_)));

        let w = world.lock().unwrap();
        assert!(w.alive.is_empty());
        assert_eq!(w.signals, vec![Signal::Graceful]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_during_startup() {
        let world = world();
        world.lock().unwrap().exits_on_spawn = true;
        let mut sup = supervisor(&world);

        assert_eq!(sup.start().await, Err(TunnelError::ExitedDuringStartup));
        assert_eq!(
            sup.state(),
            &TunnelState::Failed(TunnelError::ExitedDuringStartup)
        );
        assert_eq!(sup.snapshot().pid, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_stopped_sends_no_signal() {
        let world = world();
        let mut sup = supervisor(&world);

        sup.stop().await.unwrap();
        assert_eq!(sup.state(), &TunnelState::Stopped);
        assert!(world.lock().unwrap().signals.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_escalates_to_kill() {
        let world = world();
        world.lock().unwrap().ignores_term = true;
        let mut sup = supervisor(&world);
        sup.start().await.unwrap();

        let started = Instant::now();
        sup.stop().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(sup.state(), &TunnelState::Stopped);

        let w = world.lock().unwrap();
        assert_eq!(w.signals, vec![Signal::Graceful, Signal::Force]);
        assert!(w.alive.is_empty());
        assert!(!w.port_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_probes_held_process() {
        let world = world();
        let mut sup = supervisor(&world);
        sup.start().await.unwrap();

        crash(&world);
        let status = sup.status().await;
        let check = status.last_check.unwrap();
        assert!(!check.process_alive);
        assert!(!check.port_open);
        // status only observes; recovery is driven by health_tick
        assert_eq!(status.state, TunnelState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_triggers_one_recovery() {
        let world = world();
        let mut sup = supervisor(&world);
        sup.start().await.unwrap();

        crash(&world);
        sup.health_tick().await.unwrap();

        assert_eq!(sup.state(), &TunnelState::Running);
        assert_eq!(sup.snapshot().restarts, 1);
        assert_eq!(sup.snapshot().pid, Some(1002));
        assert_eq!(world.lock().unwrap().spawns, 2);

        // healthy again: no further spawns
        sup.health_tick().await.unwrap();
        assert_eq!(world.lock().unwrap().spawns, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_failure_replaces_live_process() {
        let world = world();
        let mut sup = supervisor(&world);
        sup.start().await.unwrap();

        world.lock().unwrap().port_open = false;
        sup.health_tick().await.unwrap();

        let w = world.lock().unwrap();
        assert_eq!(w.spawns, 2);
        assert_eq!(w.alive, vec![1002]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_loop_settles_in_failed() {
        let world = world();
        let mut sup = supervisor(&world);
        sup.start().await.unwrap();

        for _ in 0..3 {
            crash(&world);
            sup.health_tick().await.unwrap();
            assert_eq!(sup.state(), &TunnelState::Running);
        }
        assert_eq!(world.lock().unwrap().spawns, 4);

        crash(&world);
        let err = sup.health_tick().await.unwrap_err();
        assert!(matches!(err, TunnelError::CrashLoop { restarts: 4, .. }));
        assert!(matches!(sup.state(), TunnelState::Failed(TunnelError::CrashLoop { .. })));

        sup.health_tick().await.unwrap();
        sup.recover().await.unwrap();
        assert_eq!(world.lock().unwrap().spawns, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_outside_window_are_forgotten() {
        let world = world();
        let mut sup = supervisor(&world);
        sup.start().await.unwrap();

        for _ in 0..6 {
            crash(&world);
            sup.health_tick().await.unwrap();
            tokio::time::advance(Duration::from_secs(30)).await;
        }
        assert_eq!(sup.state(), &TunnelState::Running);
        assert_eq!(sup.snapshot().restarts, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_restart_after_failure() {
        let world = world();
        let mut sup = supervisor(&world);
        sup.start().await.unwrap();
        for _ in 0..4 {
            crash(&world);
            let _ = sup.health_tick().await;
        }
        assert!(matches!(sup.state(), TunnelState::Failed(_)));

        sup.restart().await.unwrap();
        assert_eq!(sup.state(), &TunnelState::Running);

        // fresh budget after user intervention
        crash(&world);
        sup.health_tick().await.unwrap();
        assert_eq!(sup.state(), &TunnelState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_for_replaced_process_is_ignored() {
        let world = world();
        let mut sup = supervisor(&world);
        sup.start().await.unwrap();
        assert_eq!(sup.snapshot().generation, 1);

        crash(&world);
        sup.health_tick().await.unwrap();
        assert_eq!(sup.snapshot().generation, 2);

        // requested while generation 1 was still the one on screen
        sup.recover_from(1).await.unwrap();
        assert_eq!(world.lock().unwrap().spawns, 2);
        assert_eq!(sup.snapshot().restarts, 1);

        sup.recover_from(2).await.unwrap();
        assert_eq!(world.lock().unwrap().spawns, 3);
        assert_eq!(sup.snapshot().generation, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_are_published() {
        let world = world();
        let (tx, mut rx) = mpsc::channel(16);
        let mut sup = supervisor(&world).with_events(tx);

        sup.start().await.unwrap();
        crash(&world);
        sup.health_tick().await.unwrap();

        let mut states = Vec::new();
        while let Ok(SessionEvent::Tunnel(status)) = rx.try_recv() {
            states.push((status.state, status.restarts));
        }
        assert_eq!(
            states,
            vec![(TunnelState::Starting, 0), (TunnelState::Recovering, 1)]
        );
    }
}
