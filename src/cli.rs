//! Non-interactive subcommands: manual port-forwards, provider listing, and peek.
//!
//! Functions here return data or tables; printing is left to `main`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use comfy_table::{ContentArrangement, Table};
use tracing::info;

use mqtop_adapters::rabbitmq::ManagementClient;
use mqtop_types::PeekedMessage;

use crate::config::{mqtop_dir, Config, Provider, ProviderKind, Settings, DEFAULT_MANAGEMENT_PORT};
use crate::runtime::FORWARD_LOG;
use crate::tunnel::registry::{ForwardRecord, ForwardRegistry, StopOutcome};
use crate::tunnel::KubectlLauncher;

/// `~/.mqtop/forward_state.json`
pub fn forward_state_path() -> PathBuf {
    mqtop_dir().join("forward_state.json")
}

/// `~/.mqtop/kubectl_forward.log`
pub fn forward_log_path() -> PathBuf {
    mqtop_dir().join(FORWARD_LOG)
}

/// Result of `forward start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardStart {
    Started(ForwardRecord),
    /// A recorded forward for this provider is still alive.
    AlreadyRunning(ForwardRecord),
    /// `direct` provider: nothing to forward.
    NotForwarded,
}

/// Start a detached port-forward unless a live one is already recorded.
pub fn forward_start(
    provider: &Provider,
    registry: &mut ForwardRegistry,
    launcher: &KubectlLauncher,
) -> Result<ForwardStart> {
    let Some(spec) = provider.forward_spec()? else {
        return Ok(ForwardStart::NotForwarded);
    };

    if let Some(existing) = registry
        .live(&provider.name)
        .with_context(|| format!("Failed to read {}", registry.path().display()))?
    {
        return Ok(ForwardStart::AlreadyRunning(existing));
    }

    let pid = launcher.spawn_detached(&spec)?;
    let record = ForwardRecord {
        pid,
        command: launcher.command_line(&spec),
    };
    registry
        .insert(&provider.name, record.clone())
        .with_context(|| format!("Failed to write {}", registry.path().display()))?;
    info!(provider = %provider.name, pid, "recorded detached forward");

    Ok(ForwardStart::Started(record))
}

/// Terminate the recorded forward for a provider.
pub fn forward_stop(provider: &Provider, registry: &mut ForwardRegistry) -> Result<StopOutcome> {
    registry
        .stop(&provider.name)
        .with_context(|| format!("Failed to update {}", registry.path().display()))
}

/// The recorded forward for a provider, if its process is alive.
pub fn forward_status(
    provider: &Provider,
    registry: &mut ForwardRegistry,
) -> Result<Option<ForwardRecord>> {
    registry
        .live(&provider.name)
        .with_context(|| format!("Failed to read {}", registry.path().display()))
}

/// Multi-line description of a forward record.
pub fn describe_forward(provider: &str, record: &ForwardRecord) -> String {
    format!(
        "  provider={}\n  pid={}\n  command={}",
        provider,
        record.pid,
        record.command.join(" ")
    )
}

/// Table of configured providers.
pub fn providers_table(config: &Config) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["name", "type", "host/context", "details"]);

    if config.providers.is_empty() {
        table.add_row(vec!["(none)", "-", "-", "-"]);
        return table;
    }

    for provider in config.providers.values() {
        let (location, details) = match provider.kind {
            ProviderKind::K8s => (
                provider
                    .context
                    .clone()
                    .unwrap_or_else(|| "(no-context)".to_string()),
                format!(
                    "{}/{} amqp {}->{}",
                    provider.namespace.as_deref().unwrap_or("-"),
                    provider.service.as_deref().unwrap_or("-"),
                    port_or_dash(provider.local_amqp_port),
                    port_or_dash(provider.remote_amqp_port),
                ),
            ),
            ProviderKind::Direct => (
                provider
                    .host
                    .clone()
                    .unwrap_or_else(|| "localhost".to_string()),
                format!(
                    "mgmt:{}",
                    provider.management_port.unwrap_or(DEFAULT_MANAGEMENT_PORT)
                ),
            ),
        };
        table.add_row(vec![
            provider.name.clone(),
            provider.kind.to_string(),
            location,
            details,
        ]);
    }

    table
}

fn port_or_dash(port: Option<u16>) -> String {
    port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Fetch up to `count` messages from `queue` without consuming them.
///
/// For a `k8s` provider the management port must already be forwarded
/// (`mqtop forward start`).
pub fn peek(
    settings: &Settings,
    provider: &Provider,
    queue: &str,
    count: u32,
    vhost: Option<&str>,
) -> Result<Vec<PeekedMessage>> {
    let mut builder = ManagementClient::builder()
        .endpoint(provider.management_url())
        .credentials(&provider.username, &provider.password)
        .timeout(settings.poll_timeout.max(Duration::from_secs(1)));
    if let Some(vhost) = &provider.vhost {
        builder = builder.vhost(vhost);
    }
    let client = builder.build()?;

    let rt = tokio::runtime::Runtime::new()?;
    let messages = rt
        .block_on(client.peek(queue, count, vhost))
        .with_context(|| format!("Failed to peek into '{}'", queue))?;
    Ok(messages)
}

/// Table of peeked messages, or `None` when there is nothing to show.
pub fn peek_table(messages: &[PeekedMessage]) -> Option<Table> {
    if messages.is_empty() {
        return None;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "routing_key", "exchange", "redelivered", "payload"]);

    for (idx, msg) in messages.iter().enumerate() {
        let payload = if msg.payload_encoding == "base64" {
            format!("(base64) {}", msg.payload)
        } else {
            msg.payload.clone()
        };
        table.add_row(vec![
            (idx + 1).to_string(),
            msg.routing_key.clone(),
            msg.exchange.clone(),
            if msg.redelivered { "yes" } else { "no" }.to_string(),
            payload,
        ]);
    }

    Some(table)
}
