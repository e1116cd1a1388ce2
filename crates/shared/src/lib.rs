//! Shared types for the scene relay: wire envelopes, scene models and errors.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
