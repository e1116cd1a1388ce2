//! Connector configuration.

use std::fmt;
use std::time::Duration;

use url::Url;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 59650;

/// Settings injected into a [`Connector`](crate::Connector) at construction.
#[derive(Clone)]
pub struct ConnectorConfig {
    pub host: String,
    pub port: u16,
    /// Token sent in the authentication call
    pub token: String,
    /// How long a request may wait for its reply before it is rejected
    pub request_timeout: Duration,
    /// How long opening the socket may take
    pub connect_timeout: Duration,
    /// Re-activate the previously active scene this long after a switch.
    /// `None` disables the revert.
    pub revert_after: Option<Duration>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            token: String::new(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            revert_after: None,
        }
    }
}

impl ConnectorConfig {
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_revert_after(mut self, delay: Option<Duration>) -> Self {
        self.revert_after = delay;
        self
    }

    /// Raw websocket endpoint of the remote's SockJS server.
    pub fn socket_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!("ws://{}:{}/api/websocket", self.host, self.port))
    }
}

impl fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("request_timeout", &self.request_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("revert_after", &self.revert_after)
            .finish()
    }
}
