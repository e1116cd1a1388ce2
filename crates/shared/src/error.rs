//! Shared error types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The `error` member of a JSON-RPC response envelope.
///
/// The remote usually sends `{code, message}` but older builds answer with a
/// bare string, so [`RemoteError::from_value`] accepts any shape and keeps the
/// raw payload in `data` when it cannot find a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("remote error {code}: {message}")]
pub struct RemoteError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RemoteError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Interpret an arbitrary `error` value sent by the remote.
    pub fn from_value(value: &Value) -> Self {
        if let Ok(parsed) = serde_json::from_value::<RemoteError>(value.clone()) {
            if !parsed.message.trim().is_empty() {
                return parsed;
            }
        }

        let message = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Self {
            code: 0,
            message,
            data: Some(value.clone()),
        }
    }
}
