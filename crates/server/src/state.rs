//! Application state shared across request handlers.

use scenerelay_client::Connector;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub connector: Connector,
}

impl AppState {
    pub fn new(connector: Connector) -> Self {
        Self { connector }
    }
}
