//! The live `top` session.
//!
//! Terminal setup, background task wiring, and the synchronous render loop.
//! Broker polling and tunnel supervision run as tokio tasks; the main
//! thread only draws, reads input, and exchanges messages with them.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mqtop_adapters::rabbitmq::ManagementClient;

use crate::app::{App, AppAction, AppOptions};
use crate::config::{mqtop_dir, Provider, Settings};
use crate::events;
use crate::session::SessionEvent;
use crate::source::{spawn_poller, PollControl, PollerHandle, StatsSource};
use crate::tunnel::{
    spawn_supervisor, KubectlLauncher, Supervisor, SupervisorConfig, TcpProbe, TunnelCommand,
    TunnelHandle,
};
use crate::ui::{self, Theme};

/// Input poll timeout; also the upper bound on reaction time to messages.
const TICK: Duration = Duration::from_millis(100);

/// Log file for `kubectl port-forward` output.
pub const FORWARD_LOG: &str = "kubectl_forward.log";

/// Run the interactive view for one provider until the user quits.
pub fn run_top(settings: &Settings, provider: &Provider, refresh: Option<Duration>) -> Result<()> {
    let refresh = refresh.unwrap_or(settings.refresh);
    let spec = provider.forward_spec()?;

    let mut builder = ManagementClient::builder()
        .endpoint(provider.management_url())
        .credentials(&provider.username, &provider.password)
        .timeout(settings.poll_timeout);
    if let Some(vhost) = &provider.vhost {
        builder = builder.vhost(vhost);
    }
    let client = builder.build().context("Failed to build management client")?;
    let source: Arc<dyn StatsSource> = Arc::new(client);

    let rt = tokio::runtime::Runtime::new()?;
    let enter = rt.enter();

    let (events_tx, events_rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();

    spawn_signal_listener(events_tx.clone(), cancel.clone());

    let (poller, poller_task) = spawn_poller(
        source.clone(),
        settings.poll_timeout,
        PollControl::new(refresh, spec.is_none()),
        events_tx.clone(),
        cancel.clone(),
    );

    let (tunnel, tunnel_task) = match spec {
        Some(spec) => {
            let log_dir = mqtop_dir();
            std::fs::create_dir_all(&log_dir)
                .with_context(|| format!("Failed to create {}", log_dir.display()))?;
            let supervisor = Supervisor::new(
                spec,
                KubectlLauncher::new(log_dir.join(FORWARD_LOG)),
                TcpProbe::default(),
                SupervisorConfig::from(settings),
            );
            let (handle, task) = spawn_supervisor(supervisor, events_tx.clone(), cancel.clone());
            handle.send(TunnelCommand::Start)?;
            (Some(handle), Some(task))
        }
        None => (None, None),
    };
    drop(events_tx);
    drop(enter);

    info!(
        provider = %provider.name,
        source = source.description(),
        refresh = ?refresh,
        tunnelled = tunnel.is_some(),
        "session started"
    );

    let options = AppOptions {
        provider: provider.name.clone(),
        source: source.description().to_string(),
        refresh,
        grace_ticks: settings.grace_ticks,
        failure_threshold: settings.failure_threshold,
        thresholds: settings.thresholds(),
        tunnelled: tunnel.is_some(),
    };
    let mut app = App::new(options, Theme::auto_detect());

    let mut bridge = Bridge {
        events: events_rx,
        poller,
        tunnel,
        health_interval: settings.health_interval,
        last_health: Instant::now(),
    };
    let result = run_tui(&mut app, &mut bridge);

    // Stop the tunnel before cancelling so the subprocess is reaped.
    if let (Some(handle), Some(task)) = (bridge.tunnel.take(), tunnel_task) {
        let budget = settings.stop_grace + Duration::from_secs(2);
        if let Err(e) = rt.block_on(handle.shutdown(budget)) {
            warn!(error = %e, "tunnel shutdown not confirmed");
        }
        cancel.cancel();
        let _ = rt.block_on(async { tokio::time::timeout(budget, task).await });
    }
    cancel.cancel();
    let _ = rt.block_on(async { tokio::time::timeout(Duration::from_secs(1), poller_task).await });
    rt.shutdown_timeout(Duration::from_secs(1));
    info!("session ended");

    result?;
    if let Some(fatal) = app.fatal {
        anyhow::bail!(fatal);
    }
    Ok(())
}

/// The render loop's side of the task channels.
struct Bridge {
    events: mpsc::Receiver<SessionEvent>,
    poller: PollerHandle,
    tunnel: Option<TunnelHandle>,
    health_interval: Duration,
    last_health: Instant,
}

impl Bridge {
    /// Drain messages from the tasks and forward queued actions to them.
    fn tick(&mut self, app: &mut App) {
        while let Ok(event) = self.events.try_recv() {
            app.handle_session_event(event);
        }

        self.poller.set_enabled(app.poller_enabled());

        for action in app.take_actions() {
            match action {
                AppAction::ForceRefresh => self.poller.force(),
                AppAction::SetRefresh(interval) => self.poller.set_interval(interval),
                AppAction::RestartTunnel => self.send_tunnel(TunnelCommand::Restart),
                AppAction::RecoverTunnel(generation) => {
                    self.send_tunnel(TunnelCommand::Recover(generation))
                }
            }
        }

        if self.tunnel.is_some() && self.last_health.elapsed() >= self.health_interval {
            self.send_tunnel(TunnelCommand::HealthCheck);
            self.last_health = Instant::now();
        }
    }

    fn send_tunnel(&self, command: TunnelCommand) {
        if let Some(tunnel) = &self.tunnel {
            // failures are logged by the handle
            let _ = tunnel.send(command);
        }
    }
}

/// Forward SIGINT/SIGTERM/SIGHUP into the session as [`SessionEvent::Terminate`].
fn spawn_signal_listener(events: mpsc::Sender<SessionEvent>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let signal = tokio::select! {
            _ = cancel.cancelled() => return,
            signal = wait_for_signal() => signal,
        };
        match signal {
            Ok(name) => {
                info!(signal = name, "signal received");
                let _ = events.send(SessionEvent::Terminate(name)).await;
            }
            Err(e) => warn!(error = %e, "signal listener failed"),
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    })
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT")
}

/// Set up the terminal, run the loop, and restore the terminal on every exit path.
fn run_tui(app: &mut App, bridge: &mut Bridge) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Setup panic hook to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic);
    }));

    let result = run_app(&mut terminal, app, bridge);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    bridge: &mut Bridge,
) -> Result<()> {
    while app.running {
        terminal.draw(|frame| ui::draw(frame, app))?;

        if let Some(event) = events::poll_event(TICK)? {
            match event {
                Event::Key(key) => events::handle_key_event(app, key),
                Event::Mouse(mouse) => events::handle_mouse_event(app, mouse),
                // Terminal will redraw on next iteration
                Event::Resize(_, _) => {}
                _ => {}
            }
        }

        bridge.tick(app);
    }

    Ok(())
}
