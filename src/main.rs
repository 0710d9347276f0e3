//! `mqtop`: live RabbitMQ queue view with a supervised `kubectl port-forward`.
//!
//! Logs go to a file (default `~/.mqtop/mqtop.log`) so they never corrupt
//! the terminal UI.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mqtop::app::{MAX_REFRESH, MIN_REFRESH};
use mqtop::cli::{self, ForwardStart};
use mqtop::config::{default_config_path, mqtop_dir, Config};
use mqtop::data::duration::{format_duration, parse_duration};
use mqtop::runtime;
use mqtop::tunnel::registry::{ForwardRegistry, StopOutcome};
use mqtop::tunnel::KubectlLauncher;

#[derive(Parser, Debug)]
#[command(name = "mqtop", version)]
#[command(about = "RabbitMQ top with a supervised Kubernetes port-forward")]
struct Cli {
    /// Provider name from the config (section [providers.<name>])
    #[arg(short = 'P', long, global = true, env = "MQTOP_PROVIDER")]
    provider: Option<String>,

    /// Refresh interval (e.g., "1s", "500ms", or plain seconds)
    #[arg(short, long, global = true, value_parser = parse_refresh)]
    refresh: Option<Duration>,

    /// Path to config.toml (default: ~/.mqtop/config.toml)
    #[arg(long, global = true, env = "MQTOP_CONFIG")]
    config: Option<PathBuf>,

    /// Log file path (default: ~/.mqtop/mqtop.log)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Live view of queue depths and rates (the default)
    Top,

    /// Manage a detached port-forward for a `k8s` provider
    Forward {
        #[command(subcommand)]
        action: ForwardAction,
    },

    /// Inspect configured providers
    Providers {
        #[command(subcommand)]
        action: ProvidersAction,
    },

    /// Show messages at the head of a queue without consuming them
    Peek {
        /// Queue name
        queue: String,

        /// Maximum number of messages
        #[arg(short = 'n', long, default_value_t = 10)]
        count: u32,

        /// Virtual host (default: provider vhost, else discovered)
        #[arg(long)]
        vhost: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ForwardAction {
    /// Start `kubectl port-forward` in the background
    Start { name: Option<String> },
    /// Stop a forward started with `forward start`
    Stop { name: Option<String> },
    /// Show whether a recorded forward is still running
    Status { name: Option<String> },
}

#[derive(Subcommand, Debug)]
enum ProvidersAction {
    /// Print providers defined in the config
    List,
}

fn parse_refresh(s: &str) -> Result<Duration, String> {
    let refresh = match s.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
        Ok(_) => return Err(format!("invalid refresh interval: {}", s)),
        Err(_) => parse_duration(s).map_err(|e| e.to_string())?,
    };
    if refresh < MIN_REFRESH || refresh > MAX_REFRESH {
        return Err(format!(
            "refresh must be between {} and {}",
            format_duration(MIN_REFRESH),
            format_duration(MAX_REFRESH)
        ));
    }
    Ok(refresh)
}

/// File-based tracing; stdout/stderr belong to the TUI.
/// The returned guard must be held until exit to flush logs.
fn setup_tracing(cli: &Cli) -> Result<WorkerGuard> {
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mqtop={log_level},mqtop_adapters={log_level}")));

    let log_file = cli
        .log_file
        .clone()
        .unwrap_or_else(|| mqtop_dir().join("mqtop.log"));
    let log_dir = log_file
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let log_name = log_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "mqtop.log".into());
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::never(&log_dir, log_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    Ok(guard)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_tracing(&cli) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "exiting with error");
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = Config::load(&config_path)?;

    match cli.command.unwrap_or(Command::Top) {
        Command::Top => {
            let provider = config.provider(cli.provider.as_deref())?;
            runtime::run_top(&config.settings, provider, cli.refresh)
        }
        Command::Forward { action } => forward(&config, cli.provider.as_deref(), action),
        Command::Providers {
            action: ProvidersAction::List,
        } => {
            println!("{}", cli::providers_table(&config));
            Ok(())
        }
        Command::Peek {
            queue,
            count,
            vhost,
        } => {
            let provider = config.provider(cli.provider.as_deref())?;
            let messages =
                cli::peek(&config.settings, provider, &queue, count, vhost.as_deref())?;
            match cli::peek_table(&messages) {
                Some(table) => println!("{}", table),
                None => println!("No messages to show."),
            }
            Ok(())
        }
    }
}

fn forward(config: &Config, global: Option<&str>, action: ForwardAction) -> Result<()> {
    let name = match &action {
        ForwardAction::Start { name } | ForwardAction::Stop { name } | ForwardAction::Status { name } => {
            name.as_deref().or(global)
        }
    };
    let provider = config.provider(name)?;

    let state_path = cli::forward_state_path();
    let mut registry = ForwardRegistry::load(&state_path)
        .with_context(|| format!("Failed to read {}", state_path.display()))?;

    match action {
        ForwardAction::Start { .. } => {
            let launcher = KubectlLauncher::new(cli::forward_log_path());
            match cli::forward_start(provider, &mut registry, &launcher)? {
                ForwardStart::Started(record) => println!(
                    "Port-forward started:\n{}\n  log={}",
                    cli::describe_forward(&provider.name, &record),
                    launcher.log_path().display()
                ),
                ForwardStart::AlreadyRunning(record) => println!(
                    "Port-forward already running:\n{}",
                    cli::describe_forward(&provider.name, &record)
                ),
                ForwardStart::NotForwarded => {
                    println!("Provider '{}' is not of type 'k8s'; nothing to forward.", provider.name)
                }
            }
        }
        ForwardAction::Stop { .. } => match cli::forward_stop(provider, &mut registry)? {
            StopOutcome::Stopped(pid) => {
                println!("Stopped port-forward for provider '{}' (pid {}).", provider.name, pid)
            }
            StopOutcome::AlreadyExited | StopOutcome::NotRecorded => {
                println!("No active port-forward found for provider '{}'.", provider.name)
            }
        },
        ForwardAction::Status { .. } => match cli::forward_status(provider, &mut registry)? {
            Some(record) => println!(
                "Port-forward is running:\n{}",
                cli::describe_forward(&provider.name, &record)
            ),
            None => println!("No active port-forward for provider '{}'.", provider.name),
        },
    }
    Ok(())
}
