//! Provider and session configuration.
//!
//! Configuration lives in `~/.mqtop/config.toml`:
//!
//! ```toml
//! [settings]
//! refresh = "1s"
//! grace_ticks = 1
//!
//! [providers.dev-k8s]
//! type = "k8s"
//! context = "dev"
//! namespace = "messaging"
//! service = "svc/rabbitmq"
//! remote_amqp_port = 5672
//! local_amqp_port = 5673
//! local_ui_port = 15673
//! ```
//!
//! Any key can be overridden from the environment with the `MQTOP__`
//! prefix, e.g. `MQTOP__SETTINGS__REFRESH=500ms`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::data::duration::parse_duration;
use crate::data::Thresholds;
use crate::tunnel::ForwardSpec;

/// Default management UI port on the broker side.
pub const DEFAULT_MANAGEMENT_PORT: u16 = 15672;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "config file not found at {}; copy config.example.toml to ~/.mqtop/config.toml and adjust it",
        .0.display()
    )]
    NotFound(PathBuf),

    #[error("provider '{provider}': missing required field '{field}'")]
    Invalid { provider: String, field: &'static str },

    #[error("provider '{name}' not found in config; available providers: {available}")]
    UnknownProvider { name: String, available: String },

    #[error("several providers are configured ({0}); pick one with --provider")]
    AmbiguousProvider(String),

    #[error("no providers configured")]
    NoProviders,

    #[error("failed to load config: {0}")]
    Load(#[from] config::ConfigError),
}

/// Tunnel mode of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Broker reachable directly over the network.
    #[default]
    Direct,
    /// Broker inside a Kubernetes cluster, reached through `kubectl port-forward`.
    K8s,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Direct => write!(f, "direct"),
            ProviderKind::K8s => write!(f, "k8s"),
        }
    }
}

fn default_guest() -> String {
    "guest".to_string()
}

/// One named broker endpoint from `[providers.<name>]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Provider {
    /// Table key; filled in after loading.
    #[serde(skip)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ProviderKind,

    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub amqp_port: Option<u16>,
    #[serde(default)]
    pub management_port: Option<u16>,
    #[serde(default = "default_guest")]
    pub username: String,
    #[serde(default = "default_guest")]
    pub password: String,
    #[serde(default)]
    pub vhost: Option<String>,

    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub remote_amqp_port: Option<u16>,
    #[serde(default)]
    pub local_amqp_port: Option<u16>,
    #[serde(default)]
    pub local_ui_port: Option<u16>,
    #[serde(default)]
    pub remote_ui_port: Option<u16>,
}

impl Provider {
    /// Base URL of the management API as seen from this machine.
    pub fn management_url(&self) -> String {
        match self.kind {
            ProviderKind::K8s => {
                let port = self
                    .local_ui_port
                    .or(self.management_port)
                    .unwrap_or(DEFAULT_MANAGEMENT_PORT);
                format!("http://127.0.0.1:{}", port)
            }
            ProviderKind::Direct => {
                let host = self.host.as_deref().unwrap_or("127.0.0.1");
                let port = self.management_port.unwrap_or(DEFAULT_MANAGEMENT_PORT);
                format!("http://{}:{}", host, port)
            }
        }
    }

    pub fn is_k8s(&self) -> bool {
        self.kind == ProviderKind::K8s
    }

    /// Port-forward description for a `k8s` provider, `None` for `direct`.
    pub fn forward_spec(&self) -> Result<Option<ForwardSpec>, ConfigError> {
        if !self.is_k8s() {
            return Ok(None);
        }

        let missing = |field: &'static str| ConfigError::Invalid {
            provider: self.name.clone(),
            field,
        };

        Ok(Some(ForwardSpec {
            context: self.context.clone(),
            namespace: self.namespace.clone().ok_or_else(|| missing("namespace"))?,
            service: self.service.clone().ok_or_else(|| missing("service"))?,
            remote_amqp_port: self.remote_amqp_port.ok_or_else(|| missing("remote_amqp_port"))?,
            local_amqp_port: self.local_amqp_port.ok_or_else(|| missing("local_amqp_port"))?,
            local_ui_port: self.local_ui_port,
            remote_ui_port: self.remote_ui_port.unwrap_or(DEFAULT_MANAGEMENT_PORT),
        }))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.forward_spec().map(|_| ())
    }
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Session knobs from the `[settings]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(deserialize_with = "de_duration")]
    pub refresh: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub poll_timeout: Duration,
    /// Ticks a vanished queue stays on screen before it is dropped.
    pub grace_ticks: u32,
    /// Consecutive transient poll failures before tunnel recovery is forced.
    pub failure_threshold: u32,
    #[serde(deserialize_with = "de_duration")]
    pub health_interval: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub startup_timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    pub stop_grace: Duration,
    pub restart_budget: u32,
    #[serde(deserialize_with = "de_duration")]
    pub restart_window: Duration,
    pub ready_warning: u64,
    pub ready_critical: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refresh: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(5),
            grace_ticks: 1,
            failure_threshold: 3,
            health_interval: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(3),
            restart_budget: 3,
            restart_window: Duration::from_secs(60),
            ready_warning: 100,
            ready_critical: 1000,
        }
    }
}

impl Settings {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            ready_warning: self.ready_warning,
            ready_critical: self.ready_critical,
        }
    }
}

/// Complete configuration, read once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub providers: BTreeMap<String, Provider>,
}

/// `~/.mqtop`, or `./.mqtop` when no home directory is known.
pub fn mqtop_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mqtop")
}

pub fn default_config_path() -> PathBuf {
    mqtop_dir().join("config.toml")
}

impl Config {
    /// Load the config file layered with `MQTOP__*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let raw = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("MQTOP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: Config = raw.try_deserialize()?;
        for (name, provider) in cfg.providers.iter_mut() {
            provider.name = name.clone();
        }
        for provider in cfg.providers.values() {
            provider.validate()?;
        }

        tracing::debug!(
            path = %path.display(),
            providers = cfg.providers.len(),
            "loaded config"
        );
        Ok(cfg)
    }

    /// Resolve a provider by name, or the only configured one when no name is given.
    pub fn provider(&self, name: Option<&str>) -> Result<&Provider, ConfigError> {
        match name {
            Some(name) => self
                .providers
                .get(name)
                .ok_or_else(|| ConfigError::UnknownProvider {
                    name: name.to_string(),
                    available: self.available(),
                }),
            None => match self.providers.len() {
                0 => Err(ConfigError::NoProviders),
                1 => self.providers.values().next().ok_or(ConfigError::NoProviders),
                _ => Err(ConfigError::AmbiguousProvider(self.available())),
            },
        }
    }

    fn available(&self) -> String {
        if self.providers.is_empty() {
            "(none)".to_string()
        } else {
            self.providers.keys().cloned().collect::<Vec<_>>().join(", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_direct_provider() {
        let file = write_config(
            r#"
[providers.dev]
type = "direct"
host = "localhost"
amqp_port = 5672
management_port = 15672
username = "user"
password = "pass"
"#,
        );

        let cfg = Config::load(file.path()).unwrap();
        let dev = cfg.provider(Some("dev")).unwrap();
        assert_eq!(dev.name, "dev");
        assert_eq!(dev.kind, ProviderKind::Direct);
        assert_eq!(dev.host.as_deref(), Some("localhost"));
        assert_eq!(dev.username, "user");
        assert_eq!(dev.password, "pass");
        assert_eq!(dev.management_url(), "http://localhost:15672");
        assert!(dev.forward_spec().unwrap().is_none());
    }

    #[test]
    fn test_defaults_applied() {
        let file = write_config(
            r#"
[providers.local]
type = "direct"
"#,
        );

        let cfg = Config::load(file.path()).unwrap();
        let local = cfg.provider(None).unwrap();
        assert_eq!(local.kind, ProviderKind::Direct);
        assert_eq!(local.username, "guest");
        assert_eq!(local.password, "guest");
        assert_eq!(local.management_url(), "http://127.0.0.1:15672");

        assert_eq!(cfg.settings.refresh, Duration::from_secs(1));
        assert_eq!(cfg.settings.grace_ticks, 1);
        assert_eq!(cfg.settings.failure_threshold, 3);
    }

    #[test]
    fn test_settings_durations() {
        let file = write_config(
            r#"
[settings]
refresh = "500ms"
startup_timeout = "30s"
restart_window = "2m"
restart_budget = 5

[providers.local]
type = "direct"
"#,
        );

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.settings.refresh, Duration::from_millis(500));
        assert_eq!(cfg.settings.startup_timeout, Duration::from_secs(30));
        assert_eq!(cfg.settings.restart_window, Duration::from_secs(120));
        assert_eq!(cfg.settings.restart_budget, 5);
        // untouched keys keep their defaults
        assert_eq!(cfg.settings.poll_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_k8s_provider_forward_spec() {
        let file = write_config(
            r#"
[providers.dev-k8s]
type = "k8s"
context = "dev"
namespace = "messaging"
service = "svc/rabbitmq"
remote_amqp_port = 5672
local_amqp_port = 5673
local_ui_port = 15673
"#,
        );

        let cfg = Config::load(file.path()).unwrap();
        let provider = cfg.provider(Some("dev-k8s")).unwrap();
        assert_eq!(provider.management_url(), "http://127.0.0.1:15673");

        let spec = provider.forward_spec().unwrap().unwrap();
        assert_eq!(spec.context.as_deref(), Some("dev"));
        assert_eq!(spec.namespace, "messaging");
        assert_eq!(spec.local_amqp_port, 5673);
        assert_eq!(spec.remote_ui_port, DEFAULT_MANAGEMENT_PORT);
        assert_eq!(spec.probe_port(), 15673);
    }

    #[test]
    fn test_k8s_provider_missing_field() {
        let file = write_config(
            r#"
[providers.broken]
type = "k8s"
namespace = "messaging"
remote_amqp_port = 5672
local_amqp_port = 5673
"#,
        );

        let err = Config::load(file.path()).unwrap_err();
        match err {
            ConfigError::Invalid { provider, field } => {
                assert_eq!(provider, "broken");
                assert_eq!(field, "service");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("nonexistent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
        assert!(err.to_string().contains("config.example.toml"));
    }

    #[test]
    fn test_provider_selection() {
        let file = write_config(
            r#"
[providers.a]
type = "direct"

[providers.b]
type = "direct"
"#,
        );

        let cfg = Config::load(file.path()).unwrap();
        assert!(matches!(cfg.provider(None), Err(ConfigError::AmbiguousProvider(_))));

        let err = cfg.provider(Some("c")).unwrap_err();
        assert!(err.to_string().contains("a, b"));
    }
}
