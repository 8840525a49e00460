//! Logging pipeline with JSON/compact formats, per-target sampling and exit flush
//!
//! Configured from the environment:
//! - `XS_LOG_FORMAT`: `json` or `compact` (default)
//! - `XS_LOG_LEVEL`: `EnvFilter` directives (default `info`)
//! - `XS_LOG_SAMPLE`: max info/debug events per target per second

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGING_CONFIG: OnceLock<LoggingConfig> = OnceLock::new();

static SAMPLER: OnceLock<Mutex<SamplerState>> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub sampling: Option<SamplingConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct SamplingConfig {
    pub rate_per_second: u32,
    pub window: Duration,
}

#[derive(Debug)]
struct SamplerState {
    samples: HashMap<String, u32>,
    window_start: Instant,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let format = match lookup("XS_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };
        let level = lookup("XS_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let sampling = lookup("XS_LOG_SAMPLE")
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|rate| *rate > 0)
            .map(|rate| SamplingConfig {
                rate_per_second: rate,
                window: Duration::from_secs(1),
            });

        Self {
            format,
            level,
            sampling,
        }
    }
}

/// Install the global subscriber. Fails if called twice.
pub fn init_logging() -> Result<()> {
    let config = LoggingConfig::from_env();
    LOGGING_CONFIG
        .set(config.clone())
        .map_err(|_| anyhow::anyhow!("logging already initialized"))?;

    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let sampling = config.sampling.as_ref().map(|_| SamplingLayer);

    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer().json().with_target(true).with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(sampling)
                .with(fmt_layer.with_filter(env_filter))
                .try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer().compact().with_target(true).with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(sampling)
                .with(fmt_layer.with_filter(env_filter))
                .try_init()?;
        }
    }

    install_panic_hook();

    tracing::debug!(
        format = ?config.format,
        level = %config.level,
        sampling = ?config.sampling,
        "logging initialized"
    );
    Ok(())
}

/// Drops info/debug events once a target exceeds its per-window budget.
struct SamplingLayer;

impl<S> Layer<S> for SamplingLayer
where
    S: tracing::Subscriber,
{
    fn event_enabled(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) -> bool {
        let metadata = event.metadata();
        if !matches!(*metadata.level(), tracing::Level::INFO | tracing::Level::DEBUG) {
            return true;
        }
        match LOGGING_CONFIG.get().and_then(|c| c.sampling.as_ref()) {
            Some(sampling) => should_sample(metadata.target(), sampling),
            None => true,
        }
    }
}

fn should_sample(target: &str, config: &SamplingConfig) -> bool {
    let sampler = SAMPLER.get_or_init(|| {
        Mutex::new(SamplerState {
            samples: HashMap::new(),
            window_start: Instant::now(),
        })
    });
    let Ok(mut sampler) = sampler.lock() else {
        return true;
    };
    let now = Instant::now();

    if now.duration_since(sampler.window_start) >= config.window {
        sampler.samples.clear();
        sampler.window_start = now;
    }

    let count = sampler.samples.entry(target.to_string()).or_insert(0);
    if *count >= config.rate_per_second {
        return false;
    }
    *count += 1;
    true
}

fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        tracing::error!(panic = %panic_info, "panic");
        std::thread::sleep(Duration::from_millis(100));
        original_hook(panic_info);
    }));
}

/// Give buffered writers a moment before the process exits.
pub async fn flush_logs() {
    tracing::debug!("flushing logs before exit");
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> LoggingConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LoggingConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_logging_config_from_env() {
        let config = config(&[
            ("XS_LOG_FORMAT", "json"),
            ("XS_LOG_LEVEL", "debug"),
            ("XS_LOG_SAMPLE", "100"),
        ]);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "debug");
        assert_eq!(config.sampling.as_ref().unwrap().rate_per_second, 100);
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = config(&[("XS_LOG_SAMPLE", "0")]);
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.level, "info");
        assert!(config.sampling.is_none());
    }

    #[test]
    fn test_sampling_rate_limit() {
        let config = SamplingConfig {
            rate_per_second: 2,
            window: Duration::from_secs(60),
        };
        assert!(should_sample("xswitch::test_target", &config));
        assert!(should_sample("xswitch::test_target", &config));
        assert!(!should_sample("xswitch::test_target", &config));
        assert!(should_sample("xswitch::other_target", &config));
    }
}
