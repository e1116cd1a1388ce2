//! Remote control protocol definitions.
//!
//! The remote speaks JSON-RPC 2.0 over a text socket. Every request addresses
//! a `resource` (a named service such as `ScenesService`) and a method on it.
//! Replies carry the request `id`; pushed events carry
//! `result._type == "EVENT"` and the subscription key in `result.resourceId`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RemoteError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Remote resource names
pub const AUTH_RESOURCE: &str = "TcpServerService";
pub const SCENES_SERVICE: &str = "ScenesService";
pub const SOURCES_SERVICE: &str = "SourcesService";
pub const AUDIO_SERVICE: &str = "AudioService";
pub const TRANSITIONS_SERVICE: &str = "TransitionsService";

/// Remote method names
pub const AUTH_METHOD: &str = "auth";
pub const GET_SCENES: &str = "getScenes";
pub const ACTIVE_SCENE_ID: &str = "activeSceneId";
pub const MAKE_SCENE_ACTIVE: &str = "makeSceneActive";
pub const GET_ITEMS: &str = "getItems";
pub const SOURCES_FOR_CURRENT_SCENE: &str = "getSourcesForCurrentScene";
pub const STUDIO_MODE_TRANSITION: &str = "executeStudioModeTransition";

/// Markers identifying a pushed event inside a `result`
pub const EVENT_TYPE: &str = "EVENT";
pub const STREAM_EMITTER: &str = "STREAM";

/// Outbound request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: RpcParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcParams {
    pub resource: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl RpcRequest {
    pub fn new(
        id: u64,
        resource: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params: RpcParams {
                resource: resource.into(),
                args,
            },
        }
    }
}

/// Inbound envelope: either a reply to a request, a pushed event, or both.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl RpcResponse {
    /// The request id this envelope answers. Events usually carry `null`.
    pub fn request_id(&self) -> Option<u64> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Reply outcome: the `error` member wins over `result`.
    pub fn outcome(&self) -> Result<Value, RemoteError> {
        match &self.error {
            Some(error) if !error.is_null() => Err(RemoteError::from_value(error)),
            _ => Ok(self.result.clone().unwrap_or(Value::Null)),
        }
    }

    /// Extract the pushed event carried by this envelope, if any.
    pub fn push_event(&self) -> Option<PushEvent> {
        let result = self.result.as_ref()?;
        let is_event = result.get("_type").and_then(Value::as_str) == Some(EVENT_TYPE)
            && result.get("emitter").and_then(Value::as_str) == Some(STREAM_EMITTER);
        if !is_event {
            return None;
        }
        PushEvent::deserialize(result).ok()
    }
}

/// An event delivered against an active subscription.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    pub resource_id: String,
    #[serde(default)]
    pub data: Value,
}

/// Result of a subscribe call. `resource_id` is the key later events carry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionAck {
    pub resource_id: String,
}

/// The event channels the relay mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventChannel {
    SceneSwitched,
    SceneAdded,
    SceneRemoved,
    SourceUpdated,
    ItemAdded,
    ItemUpdated,
}

impl EventChannel {
    pub const ALL: [EventChannel; 6] = [
        EventChannel::SceneSwitched,
        EventChannel::SceneAdded,
        EventChannel::SceneRemoved,
        EventChannel::SourceUpdated,
        EventChannel::ItemAdded,
        EventChannel::ItemUpdated,
    ];

    /// Resource owning the channel
    pub fn resource(self) -> &'static str {
        match self {
            EventChannel::SourceUpdated => SOURCES_SERVICE,
            _ => SCENES_SERVICE,
        }
    }

    /// Method name used to subscribe
    pub fn method(self) -> &'static str {
        match self {
            EventChannel::SceneSwitched => "sceneSwitched",
            EventChannel::SceneAdded => "sceneAdded",
            EventChannel::SceneRemoved => "sceneRemoved",
            EventChannel::SourceUpdated => "sourceUpdated",
            EventChannel::ItemAdded => "itemAdded",
            EventChannel::ItemUpdated => "itemUpdated",
        }
    }
}
