//! Default configuration values.
//!
//! Used with `#[serde(default = "...")]` attributes on [`crate::Settings`]
//! sections, so that a partial (or empty) settings file is always valid.

/// Default API listen address (loopback, OS-assigned port).
pub const DEFAULT_API_LISTEN: &str = "127.0.0.1:0";

/// Default SOCKS inbound port for the active tunnel.
pub const DEFAULT_SOCKS_PORT: u16 = 10808;

/// Default HTTP inbound port for the active tunnel.
pub const DEFAULT_HTTP_PORT: u16 = 10809;

/// Test URL used by the probe engine. Answers `204 No Content`.
pub const DEFAULT_TEST_URL: &str = "http://www.gstatic.com/generate_204";

/// Start of the scratch port range handed out to probes.
pub const DEFAULT_PROBE_PORT_START: u16 = 10800;

/// End (inclusive) of the scratch port range handed out to probes.
pub const DEFAULT_PROBE_PORT_END: u16 = 30000;

#[must_use]
pub fn api_listen() -> String {
    DEFAULT_API_LISTEN.to_owned()
}

#[must_use]
pub fn cors_origins() -> Vec<String> {
    vec!["*".to_owned()]
}

/// Client-side status poll cadence advertised to UIs.
#[must_use]
pub fn status_poll_interval_ms() -> u64 {
    3_000
}

#[must_use]
pub fn stop_grace_ms() -> u64 {
    10_000
}

#[must_use]
pub fn ready_timeout_ms() -> u64 {
    3_000
}

#[must_use]
pub fn probe_timeout_ms() -> u64 {
    5_000
}

#[must_use]
pub fn test_url() -> String {
    DEFAULT_TEST_URL.to_owned()
}

#[must_use]
pub fn probe_port_start() -> u16 {
    DEFAULT_PROBE_PORT_START
}

#[must_use]
pub fn probe_port_end() -> u16 {
    DEFAULT_PROBE_PORT_END
}

#[must_use]
pub fn probe_max_concurrency() -> usize {
    32
}
