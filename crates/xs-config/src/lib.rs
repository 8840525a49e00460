//! Settings for the xswitch orchestration service.
//!
//! `Raw Text (JSON/YAML)` -> `Settings` (serde defaults) -> env overrides -> `validate()`.
//!
//! Every field has a default, so an empty document (or no file at all) yields a
//! usable configuration. Durations are carried as milliseconds, matching the
//! JSON the UI edits.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod defaults;

/// Top-level settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub engine: EngineSettings,
    pub tunnel: TunnelSettings,
    pub probe: ProbeSettings,
    pub catalog: CatalogSettings,
}

/// REST/SSE listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSettings {
    #[serde(default = "defaults::api_listen")]
    pub listen: String,
    #[serde(default = "defaults::cors_origins")]
    pub cors_origins: Vec<String>,
    /// How often UIs should poll `/subscriptions/server/status` as a fallback
    /// to the log stream.
    #[serde(default = "defaults::status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            listen: defaults::api_listen(),
            cors_origins: defaults::cors_origins(),
            status_poll_interval_ms: defaults::status_poll_interval_ms(),
        }
    }
}

/// External proxy engine (xray-core) location and log verbosity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// Explicit engine binary; `None` means search `PATH`.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// Exported to the engine as `XRAY_LOCATION_ASSET`.
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_level: EngineLogLevel,
}

/// Log level written into every engine config before launch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineLogLevel {
    Debug,
    Info,
    #[default]
    Warning,
    Error,
    None,
}

impl EngineLogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::None => "none",
        }
    }
}

/// Active tunnel ports and lifecycle timings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelSettings {
    /// Overrides the SOCKS inbound port of whatever server is started.
    #[serde(default)]
    pub socks_port: Option<u16>,
    /// Overrides the HTTP inbound port of whatever server is started.
    #[serde(default)]
    pub http_port: Option<u16>,
    /// Time between the graceful signal and the forced kill.
    #[serde(default = "defaults::stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Upper bound for an engine to open its inbound ports.
    #[serde(default = "defaults::ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            socks_port: None,
            http_port: None,
            stop_grace_ms: defaults::stop_grace_ms(),
            ready_timeout_ms: defaults::ready_timeout_ms(),
        }
    }
}

impl TunnelSettings {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Latency probing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeSettings {
    /// Fixed per-probe budget covering launch, readiness and the test request.
    #[serde(default = "defaults::probe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "defaults::test_url")]
    pub test_url: String,
    #[serde(default = "defaults::probe_port_start")]
    pub port_range_start: u16,
    #[serde(default = "defaults::probe_port_end")]
    pub port_range_end: u16,
    #[serde(default = "defaults::probe_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::probe_timeout_ms(),
            test_url: defaults::test_url(),
            port_range_start: defaults::probe_port_start(),
            port_range_end: defaults::probe_port_end(),
            max_concurrency: defaults::probe_max_concurrency(),
        }
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Where the read-only subscription catalog lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogSettings {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Settings {
    /// Load from a JSON or YAML file, apply `XS_*` env overrides and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("read settings {}", path.display()))?;
        let mut settings = Self::from_str(&text)
            .with_context(|| format!("parse settings {}", path.display()))?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults plus env overrides, for runs without a settings file.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a settings document. JSON is tried first, then YAML.
    pub fn from_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => serde_yaml::from_str(text).context("settings are neither JSON nor YAML")?,
        };
        let settings: Settings = serde_json::from_value(raw)?;
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable port values
    /// are ignored with a warning rather than failing startup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("XS_API_LISTEN") {
            self.api.listen = listen;
        }
        if let Some(binary) = lookup("XS_ENGINE_BINARY") {
            self.engine.binary = Some(PathBuf::from(binary));
        }
        if let Some(catalog) = lookup("XS_CATALOG") {
            self.catalog.path = Some(PathBuf::from(catalog));
        }
        if let Some(raw) = lookup("XS_SOCKS_PORT") {
            match raw.parse::<u16>() {
                Ok(port) => self.tunnel.socks_port = Some(port),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid XS_SOCKS_PORT"),
            }
        }
        if let Some(raw) = lookup("XS_HTTP_PORT") {
            match raw.parse::<u16>() {
                Ok(port) => self.tunnel.http_port = Some(port),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid XS_HTTP_PORT"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, port) in [
            ("socks_port", self.tunnel.socks_port),
            ("http_port", self.tunnel.http_port),
        ] {
            if port == Some(0) {
                bail!("tunnel.{name} must be between 1 and 65535");
            }
        }
        if let (Some(socks), Some(http)) = (self.tunnel.socks_port, self.tunnel.http_port) {
            if socks == http {
                bail!("SOCKS and HTTP ports cannot be the same ({socks})");
            }
        }

        let probe = &self.probe;
        if probe.timeout_ms == 0 {
            bail!("probe.timeout_ms must be greater than zero");
        }
        if probe.port_range_start < 1024 {
            bail!(
                "probe.port_range_start must be at least 1024 (got {})",
                probe.port_range_start
            );
        }
        // Each probe needs a SOCKS and an HTTP port.
        if probe.port_range_end <= probe.port_range_start {
            bail!(
                "probe port range {}..={} is empty",
                probe.port_range_start,
                probe.port_range_end
            );
        }
        if probe.max_concurrency == 0 {
            bail!("probe.max_concurrency must be greater than zero");
        }
        let test_url = url::Url::parse(&probe.test_url)
            .map_err(|e| anyhow!("probe.test_url {:?} is invalid: {e}", probe.test_url))?;
        if !matches!(test_url.scheme(), "http" | "https") {
            bail!("probe.test_url must be http or https (got {})", test_url.scheme());
        }

        if self.tunnel.stop_grace_ms == 0 {
            tracing::debug!("tunnel.stop_grace_ms is 0; engines will be killed without a grace period");
        }
        if self.tunnel.ready_timeout_ms == 0 {
            bail!("tunnel.ready_timeout_ms must be greater than zero");
        }
        Ok(())
    }
}
