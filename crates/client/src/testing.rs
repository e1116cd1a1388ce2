//! In-memory stand-in for the remote, for tests.
//!
//! [`FakeStudio`] implements [`Transport`] and answers requests from scripted
//! state the way the real remote does: `auth` checks the token, scene and
//! source queries return the configured lists, subscribe calls return a
//! subscription key of the form `Resource.channel`, and `makeSceneActive`
//! pushes a `sceneSwitched` event when that channel is subscribed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::StreamExt;
use scenerelay_shared::{
    id_from_value, EventChannel, RpcRequest, ACTIVE_SCENE_ID, AUTH_METHOD, GET_ITEMS, GET_SCENES,
    MAKE_SCENE_ACTIVE, SCENES_SERVICE, SOURCES_FOR_CURRENT_SCENE, STUDIO_MODE_TRANSITION,
};
use serde_json::{json, Value};
use url::Url;

use crate::error::TransportError;
use crate::lock;
use crate::transport::{Link, Transport, TransportEvent};

#[derive(Clone, Default)]
pub struct FakeStudio {
    inner: Arc<Studio>,
}

#[derive(Default)]
struct Studio {
    data: Mutex<StudioData>,
    requests: Mutex<Vec<RpcRequest>>,
    socket: Mutex<Option<UnboundedSender<TransportEvent>>>,
    generation: AtomicUsize,
}

#[derive(Default)]
struct StudioData {
    token: String,
    scenes: Vec<Value>,
    active_scene_id: Value,
    sources: Vec<Value>,
    items: HashMap<String, Vec<Value>>,
    channels: HashSet<String>,
    subscribed: HashSet<String>,
    held: HashSet<String>,
    failing: HashMap<String, Value>,
    refuse: bool,
}

/// Resource of a scene as the remote names it.
pub fn scene_resource(id: &str) -> String {
    format!("Scene[\"{}\"]", id)
}

/// Subscription key the fake assigns to `resource.channel`.
pub fn subscription_key(resource: &str, channel: &str) -> String {
    format!("{}.{}", resource, channel)
}

impl FakeStudio {
    pub fn new(token: &str) -> Self {
        let studio = Self::default();
        {
            let mut data = lock(&studio.inner.data);
            data.token = token.to_string();
            data.active_scene_id = Value::Null;
            data.channels = EventChannel::ALL
                .iter()
                .map(|channel| channel.method().to_string())
                .collect();
        }
        studio
    }

    pub fn set_token(&self, token: &str) {
        lock(&self.inner.data).token = token.to_string();
    }

    /// Add a scene. `id` may be a string or a number.
    pub fn add_scene(&self, id: impl Into<Value>, name: &str) {
        let id = id.into();
        let resource = scene_resource(&id_from_value(&id).unwrap_or_default());
        lock(&self.inner.data).scenes.push(json!({
            "_type": "HELPER",
            "id": id,
            "name": name,
            "resourceId": resource,
        }));
    }

    pub fn set_active_scene(&self, id: impl Into<Value>) {
        lock(&self.inner.data).active_scene_id = id.into();
    }

    pub fn active_scene_id(&self) -> Value {
        lock(&self.inner.data).active_scene_id.clone()
    }

    pub fn set_sources(&self, sources: Vec<Value>) {
        lock(&self.inner.data).sources = sources;
    }

    pub fn set_items(&self, scene_id: &str, items: Vec<Value>) {
        lock(&self.inner.data)
            .items
            .insert(scene_resource(scene_id), items);
    }

    /// Accept subscribe calls for another channel name.
    pub fn add_channel(&self, channel: &str) {
        lock(&self.inner.data).channels.insert(channel.to_string());
    }

    /// Record but never answer requests for `method`.
    pub fn hold(&self, method: &str) {
        lock(&self.inner.data).held.insert(method.to_string());
    }

    pub fn release(&self, method: &str) {
        lock(&self.inner.data).held.remove(method);
    }

    /// Answer requests for `method` with this `error` value.
    pub fn fail(&self, method: &str, error: Value) {
        lock(&self.inner.data)
            .failing
            .insert(method.to_string(), error);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.inner.data).refuse = refuse;
    }

    /// Number of sockets opened so far.
    pub fn connections(&self) -> usize {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RpcRequest> {
        lock(&self.inner.requests).clone()
    }

    pub fn requests_for(&self, method: &str) -> Vec<RpcRequest> {
        lock(&self.inner.requests)
            .iter()
            .filter(|request| request.method == method)
            .cloned()
            .collect()
    }

    /// Answer a request by hand, e.g. one that was held.
    pub fn reply(&self, id: u64, result: Value) {
        self.inner
            .send(json!({"jsonrpc": "2.0", "id": id, "result": result}));
    }

    /// Push an event for a subscription key.
    pub fn push_event(&self, key: &str, data: Value) {
        self.inner.send(event_frame(key, data));
    }

    /// Deliver a raw text frame.
    pub fn send_raw(&self, text: &str) {
        self.inner.send_text(text.to_string());
    }

    /// Close the current socket from the remote side.
    pub fn close(&self) {
        if let Some(socket) = lock(&self.inner.socket).take() {
            let _ = socket.unbounded_send(TransportEvent::Closed(Some("remote closed".to_string())));
        }
    }
}

fn event_frame(key: &str, data: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": null,
        "result": {
            "_type": "EVENT",
            "emitter": "STREAM",
            "resourceId": key,
            "data": data,
        }
    })
}

impl Studio {
    fn send(&self, frame: Value) {
        self.send_text(frame.to_string());
    }

    fn send_text(&self, text: String) {
        if let Some(socket) = lock(&self.socket).as_ref() {
            let _ = socket.unbounded_send(TransportEvent::Message(text));
        }
    }

    fn answer(&self, frame: &str) {
        let Ok(request) = serde_json::from_str::<RpcRequest>(frame) else {
            return;
        };
        lock(&self.requests).push(request.clone());

        let (reply, event) = {
            let mut data = lock(&self.data);
            if data.held.contains(&request.method) {
                return;
            }
            match data.failing.get(&request.method) {
                Some(error) => (Err(error.clone()), None),
                None => data.respond(&request),
            }
        };

        let envelope = match reply {
            Ok(result) => json!({"jsonrpc": "2.0", "id": request.id, "result": result}),
            Err(error) => json!({"jsonrpc": "2.0", "id": request.id, "error": error}),
        };
        self.send(envelope);
        if let Some((key, data)) = event {
            self.send(event_frame(&key, data));
        }
    }
}

type Answer = (Result<Value, Value>, Option<(String, Value)>);

impl StudioData {
    fn respond(&mut self, request: &RpcRequest) -> Answer {
        let resource = request.params.resource.as_str();
        let first_arg = request.params.args.first().cloned().unwrap_or(Value::Null);

        match request.method.as_str() {
            AUTH_METHOD => {
                if first_arg.as_str() == Some(self.token.as_str()) {
                    (Ok(json!(true)), None)
                } else {
                    (Err(json!({"code": -32600, "message": "Invalid token"})), None)
                }
            }
            GET_SCENES => (Ok(Value::Array(self.scenes.clone())), None),
            ACTIVE_SCENE_ID => (Ok(self.active_scene_id.clone()), None),
            SOURCES_FOR_CURRENT_SCENE => (Ok(Value::Array(self.sources.clone())), None),
            GET_ITEMS => {
                let items = self.items.get(resource).cloned().unwrap_or_default();
                (Ok(Value::Array(items)), None)
            }
            MAKE_SCENE_ACTIVE => {
                let wanted = id_from_value(&first_arg);
                let found = self
                    .scenes
                    .iter()
                    .find(|scene| scene.get("id").and_then(id_from_value) == wanted)
                    .cloned();
                match found {
                    Some(scene) => {
                        self.active_scene_id = scene.get("id").cloned().unwrap_or(Value::Null);
                        let key = subscription_key(SCENES_SERVICE, "sceneSwitched");
                        let event = self.subscribed.contains(&key).then(|| (key, scene));
                        (Ok(json!(true)), event)
                    }
                    None => (Err(json!({"code": -32602, "message": "Scene not found"})), None),
                }
            }
            STUDIO_MODE_TRANSITION => (Ok(json!(true)), None),
            method if self.channels.contains(method) => {
                let key = subscription_key(resource, method);
                self.subscribed.insert(key.clone());
                (
                    Ok(json!({"_type": "SUBSCRIPTION", "emitter": "STREAM", "resourceId": key})),
                    None,
                )
            }
            _ => (Err(json!({"code": -32601, "message": "Method not found"})), None),
        }
    }
}

#[async_trait]
impl Transport for FakeStudio {
    async fn open(&self, url: &Url) -> Result<Link, TransportError> {
        {
            let mut data = lock(&self.inner.data);
            if data.refuse {
                return Err(TransportError::Open {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            data.subscribed.clear();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (outbound, mut outbound_rx) = unbounded::<String>();
        let (inbound_tx, inbound) = unbounded::<TransportEvent>();
        *lock(&self.inner.socket) = Some(inbound_tx);

        let studio = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.next().await {
                if studio.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                studio.answer(&frame);
            }
            // The connector dropped its end
            if studio.generation.load(Ordering::SeqCst) == generation {
                if let Some(socket) = lock(&studio.socket).take() {
                    let _ = socket.unbounded_send(TransportEvent::Closed(None));
                }
            }
        });

        Ok(Link::new(outbound, inbound))
    }
}
