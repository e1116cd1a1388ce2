//! Connector between the HTTP relay and a remote streaming-software instance.
//!
//! This crate provides:
//! - A JSON-RPC correlator pairing replies with requests by id
//! - A registry routing pushed events to per-channel handlers
//! - A connection state machine with an authentication handshake
//! - A local mirror of scenes, scene items and audio sources kept in sync
//!   through the initial fetch and incremental events

mod config;
mod connector;
mod error;
mod mirror;
mod rpc;
mod state;
mod subscriptions;
mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{ConnectorConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use connector::Connector;
pub use error::{ConnectorError, RpcError, TransportError};
pub use mirror::{MirrorAnomaly, SceneMirror};
pub use rpc::{Correlator, Outbound, Reply};
pub use state::ConnectionState;
pub use subscriptions::{EventHandler, SubscriptionRegistry};
pub use transport::{Link, Transport, TransportEvent, WsTransport};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
