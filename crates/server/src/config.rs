//! Server configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use scenerelay_client::{ConnectorConfig, DEFAULT_HOST, DEFAULT_PORT};

pub const DEFAULT_HTTP_PORT: u16 = 3001;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Port the HTTP surface listens on
    pub http_port: u16,
    /// Attempt a connection to the remote before serving
    pub connect_on_start: bool,
    pub connector: ConnectorConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            connect_on_start: true,
            connector: ConnectorConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Read the configuration from the process environment.
    ///
    /// Environment variables:
    /// - `PORT`: HTTP listen port (default: 3001)
    /// - `STREAMLABS_HOST` / `STREAMLABS_PORT`: remote address (default: 127.0.0.1:59650)
    /// - `STREAMLABS_TOKEN`: token for the auth call (default: empty)
    /// - `STREAMLABS_REQUEST_TIMEOUT_MS`: reply timeout (default: 10000)
    /// - `STREAMLABS_CONNECT_TIMEOUT_MS`: socket open timeout (default: 5000)
    /// - `STREAMLABS_REVERT_AFTER_MS`: revert delay after a switch; unset or 0 disables it
    /// - `STREAMLABS_CONNECT_ON_START`: "true" | "false" (default: "true")
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ConnectorConfig::default();
        let request_timeout_ms = parse_or(
            &lookup,
            "STREAMLABS_REQUEST_TIMEOUT_MS",
            defaults.request_timeout.as_millis() as u64,
        );
        let connect_timeout_ms = parse_or(
            &lookup,
            "STREAMLABS_CONNECT_TIMEOUT_MS",
            defaults.connect_timeout.as_millis() as u64,
        );
        let revert_after_ms: u64 = parse_or(&lookup, "STREAMLABS_REVERT_AFTER_MS", 0);

        let connector = ConnectorConfig {
            host: lookup("STREAMLABS_HOST")
                .filter(|host| !host.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&lookup, "STREAMLABS_PORT", DEFAULT_PORT),
            token: lookup("STREAMLABS_TOKEN").unwrap_or_default(),
            request_timeout: Duration::from_millis(request_timeout_ms),
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            revert_after: (revert_after_ms > 0).then(|| Duration::from_millis(revert_after_ms)),
        };

        Self {
            http_port: parse_or(&lookup, "PORT", DEFAULT_HTTP_PORT),
            connect_on_start: parse_or(&lookup, "STREAMLABS_CONNECT_ON_START", true),
            connector,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}, using {:?}", key, raw, default);
            default
        }),
    }
}
