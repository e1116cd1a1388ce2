//! Connector to a remote streaming-software instance.
//!
//! A [`Connector`] owns one socket at a time. Each successful `connect` opens
//! a new *epoch*: requests, subscriptions and mirror writes are tagged with the
//! epoch they belong to, and anything tagged with an older epoch is discarded.
//!
//! ```text
//!   HTTP handler ──call()──▶ Correlator ──frame──▶ Transport ──▶ remote
//!                                 ▲                    │
//!                                 └──── reply by id ◀──┤
//!   SceneMirror ◀── handler ◀── SubscriptionRegistry ◀─┘ pushed event
//! ```
//!
//! Lock order is always `session` before `mirror`. Event handlers run outside
//! the session lock so they may issue requests themselves.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures_util::future::try_join_all;
use futures_util::StreamExt;
use scenerelay_shared::{
    id_from_value, AudioSource, EventChannel, PushEvent, RemoteError, RpcResponse, Scene,
    SceneItem, SubscriptionAck, ACTIVE_SCENE_ID, AUDIO_SERVICE, AUTH_METHOD, AUTH_RESOURCE,
    GET_ITEMS, GET_SCENES, MAKE_SCENE_ACTIVE, SCENES_SERVICE, SOURCES_FOR_CURRENT_SCENE,
    STUDIO_MODE_TRANSITION, TRANSITIONS_SERVICE,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, RpcError, TransportError};
use crate::lock;
use crate::mirror::SceneMirror;
use crate::rpc::Correlator;
use crate::state::ConnectionState;
use crate::subscriptions::{EventHandler, SubscriptionRegistry};
use crate::transport::{Transport, TransportEvent, WsTransport};

/// Handle to a connector. Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectorConfig,
    transport: Arc<dyn Transport>,
    state: watch::Sender<ConnectionState>,
    session: Mutex<Session>,
    mirror: Mutex<SceneMirror>,
}

struct Session {
    epoch: u64,
    outbound: Option<UnboundedSender<String>>,
    correlator: Correlator,
    subscriptions: SubscriptionRegistry,
}

impl Session {
    fn is_live(&self, epoch: u64) -> bool {
        self.epoch == epoch && self.outbound.is_some()
    }
}

impl Connector {
    pub fn new(config: ConnectorConfig, transport: impl Transport) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                transport: Arc::new(transport),
                state,
                session: Mutex::new(Session {
                    epoch: 0,
                    outbound: None,
                    correlator: Correlator::new(),
                    subscriptions: SubscriptionRegistry::new(),
                }),
                mirror: Mutex::new(SceneMirror::new()),
            }),
        }
    }

    /// Connector speaking websocket to the configured host.
    pub fn websocket(config: ConnectorConfig) -> Self {
        Self::new(config, WsTransport)
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Open the socket, authenticate and synchronize the mirror.
    ///
    /// A no-op when already connected. While another caller's handshake is in
    /// flight this waits for it and reports its outcome.
    pub async fn connect(&self) -> Result<(), ConnectorError> {
        let Some(epoch) = self.inner.begin_attempt() else {
            return self.wait_for_handshake().await;
        };

        let result = match self.inner.establish(epoch).await {
            Ok(()) => self.inner.finish_attempt(epoch),
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            tracing::warn!(epoch, error = %err, "connection attempt failed");
            self.inner.teardown(epoch, "handshake failed");
        }
        result
    }

    async fn wait_for_handshake(&self) -> Result<(), ConnectorError> {
        let mut rx = self.inner.state.subscribe();
        let settled = match rx.wait_for(|state| !state.is_pending()).await {
            Ok(state) => *state,
            Err(_) => ConnectionState::Disconnected,
        };
        if settled.is_connected() {
            Ok(())
        } else {
            Err(ConnectorError::ConnectAborted)
        }
    }

    /// Close the socket, rejecting pending requests and dropping subscriptions.
    pub fn disconnect(&self) {
        let epoch = lock(&self.inner.session).epoch;
        self.inner.teardown(epoch, "disconnect requested");
    }

    /// Send a request and wait for its reply. Only allowed once the
    /// handshake has completed.
    pub async fn call(
        &self,
        resource: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ConnectorError> {
        if !self.state().is_connected() {
            return Err(ConnectorError::NotConnected);
        }
        self.inner.call(resource, method, args).await
    }

    /// Subscribe to a remote event channel for the current, connected session.
    /// Returns the subscription key the remote assigned.
    pub async fn subscribe<F>(
        &self,
        resource: &str,
        channel: &str,
        handler: F,
    ) -> Result<String, ConnectorError>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let epoch = {
            let session = lock(&self.inner.session);
            if session.outbound.is_none() || !self.inner.current_state().is_connected() {
                return Err(ConnectorError::NotConnected);
            }
            session.epoch
        };
        self.inner
            .subscribe_in(epoch, resource, channel, Arc::new(handler))
            .await
    }

    /// Subscription keys of the current connection with the channel each serves.
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        lock(&self.inner.session).subscriptions.describe()
    }

    pub fn scenes(&self) -> Vec<Scene> {
        lock(&self.inner.mirror).scenes().to_vec()
    }

    /// Scene names in the order the remote listed them.
    pub fn scene_names(&self) -> Vec<String> {
        lock(&self.inner.mirror)
            .scenes()
            .iter()
            .map(|scene| scene.name.clone())
            .collect()
    }

    pub fn active_scene(&self) -> Option<Scene> {
        lock(&self.inner.mirror).active_scene().cloned()
    }

    pub fn scene_items(&self) -> Option<Vec<SceneItem>> {
        lock(&self.inner.mirror)
            .scene_items()
            .map(|items| items.to_vec())
    }

    pub fn audio_sources(&self) -> Option<Vec<AudioSource>> {
        lock(&self.inner.mirror)
            .audio_sources()
            .map(|sources| sources.to_vec())
    }

    /// Make the scene called `name` active and run the studio-mode transition.
    ///
    /// With `revert_after` configured, the previously active scene is made
    /// active again once that delay has passed.
    pub async fn switch_scene(&self, name: &str) -> Result<(), ConnectorError> {
        let (previous, target) = {
            let mirror = lock(&self.inner.mirror);
            let target = mirror
                .find_by_name(name)
                .cloned()
                .ok_or_else(|| ConnectorError::SceneNotFound(name.to_string()))?;
            (mirror.active_scene().cloned(), target)
        };

        tracing::info!(scene = %target.name, id = %target.id, "switching scene");
        self.inner
            .call(SCENES_SERVICE, MAKE_SCENE_ACTIVE, vec![json!(target.id)])
            .await?;
        self.inner
            .call(TRANSITIONS_SERVICE, STUDIO_MODE_TRANSITION, vec![])
            .await?;

        if let (Some(delay), Some(previous)) = (self.inner.config.revert_after, previous) {
            if previous.id != target.id {
                self.schedule_revert(delay, previous);
            }
        }
        Ok(())
    }

    fn schedule_revert(&self, delay: std::time::Duration, scene: Scene) {
        tracing::debug!(scene = %scene.name, ?delay, "scheduling revert");
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match inner
                .call(SCENES_SERVICE, MAKE_SCENE_ACTIVE, vec![json!(scene.id)])
                .await
            {
                Ok(_) => tracing::info!(scene = %scene.name, "reverted to previous scene"),
                Err(err) => {
                    tracing::warn!(scene = %scene.name, error = %err, "failed to revert scene")
                }
            }
        });
    }
}

impl Inner {
    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Claim the `Disconnected -> Pending` transition and open a new epoch.
    fn begin_attempt(&self) -> Option<u64> {
        let mut session = lock(&self.session);
        if !self.current_state().is_disconnected() {
            return None;
        }
        session.epoch += 1;
        session.outbound = None;
        let epoch = session.epoch;
        session.subscriptions.open(epoch);
        lock(&self.mirror).reset();
        self.state.send_replace(ConnectionState::Pending);
        Some(epoch)
    }

    fn finish_attempt(&self, epoch: u64) -> Result<(), ConnectorError> {
        let session = lock(&self.session);
        if !session.is_live(epoch) || !self.current_state().is_pending() {
            return Err(ConnectorError::ConnectAborted);
        }
        self.state.send_replace(ConnectionState::Connected);
        tracing::info!(epoch, "connected");
        Ok(())
    }

    async fn establish(self: &Arc<Self>, epoch: u64) -> Result<(), ConnectorError> {
        let url = self.config.socket_url()?;
        tracing::info!(epoch, %url, "connecting");

        let link = tokio::time::timeout(self.config.connect_timeout, self.transport.open(&url))
            .await
            .map_err(|_| ConnectorError::ConnectTimeout(self.config.connect_timeout))??;

        {
            let mut session = lock(&self.session);
            if session.epoch != epoch || !self.current_state().is_pending() {
                tracing::debug!(epoch, "attempt superseded while opening, dropping socket");
                return Err(ConnectorError::ConnectAborted);
            }
            session.outbound = Some(link.outbound);
        }
        tokio::spawn(pump(Arc::downgrade(self), epoch, link.inbound));

        self.authenticate().await?;
        self.synchronize(epoch).await
    }

    async fn authenticate(&self) -> Result<(), ConnectorError> {
        let token = Value::String(self.config.token.clone());
        match self.call(AUTH_RESOURCE, AUTH_METHOD, vec![token]).await {
            Ok(Value::Bool(false)) => Err(ConnectorError::Auth(RpcError::Remote(
                RemoteError::new(0, "authentication rejected"),
            ))),
            Ok(_) => Ok(()),
            Err(ConnectorError::Rpc(err)) => Err(ConnectorError::Auth(err)),
            Err(err) => Err(err),
        }
    }

    /// Initial fetch of scenes and the active scene, plus the event
    /// subscriptions. The active-scene lookup waits for the scene list; the
    /// subscriptions run alongside.
    async fn synchronize(self: &Arc<Self>, epoch: u64) -> Result<(), ConnectorError> {
        let scenes = async {
            let scenes: Vec<Scene> = self.call_as(SCENES_SERVICE, GET_SCENES, vec![]).await?;
            let count = scenes.len();
            self.with_mirror(epoch, |mirror| {
                for scene in scenes {
                    mirror.add_scene(scene);
                }
            })
            .ok_or(ConnectorError::ConnectAborted)?;
            tracing::debug!(epoch, count, "scene list fetched");

            let active = self.call(SCENES_SERVICE, ACTIVE_SCENE_ID, vec![]).await?;
            let id = id_from_value(&active).ok_or_else(|| {
                ConnectorError::Sync(format!("unexpected active scene id {active}"))
            })?;
            let scene = self
                .with_mirror(epoch, |mirror| mirror.mark_active(&id))
                .ok_or(ConnectorError::ConnectAborted)?
                .ok_or_else(|| {
                    ConnectorError::Sync(format!("active scene {id} is not in the scene list"))
                })?;
            self.refresh_active_scene(epoch, &scene).await?;
            Ok::<(), ConnectorError>(())
        };

        let subscriptions = try_join_all(EventChannel::ALL.into_iter().map(|channel| {
            let handler = self.event_handler(epoch, channel);
            self.subscribe_in(epoch, channel.resource(), channel.method(), handler)
        }));

        tokio::try_join!(scenes, subscriptions)?;
        Ok(())
    }

    async fn call(
        &self,
        resource: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ConnectorError> {
        let (id, reply) = {
            let mut session = lock(&self.session);
            let Some(outbound) = session.outbound.clone() else {
                return Err(ConnectorError::NotConnected);
            };
            let request = session.correlator.register(resource, method, args)?;
            if outbound.unbounded_send(request.frame).is_err() {
                session.correlator.forget(request.id);
                return Err(TransportError::Closed.into());
            }
            (request.id, request.reply)
        };
        tracing::trace!(id, resource, method, "request sent");

        match tokio::time::timeout(self.config.request_timeout, reply).await {
            Ok(Ok(outcome)) => outcome.map_err(ConnectorError::from),
            Ok(Err(_)) => Err(RpcError::ConnectionClosed.into()),
            Err(_) => {
                lock(&self.session).correlator.forget(id);
                tracing::warn!(id, resource, method, "request timed out");
                Err(RpcError::Timeout(self.config.request_timeout).into())
            }
        }
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        resource: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, ConnectorError> {
        let value = self.call(resource, method, args).await?;
        serde_json::from_value(value).map_err(|source| ConnectorError::Decode {
            context: format!("{resource}.{method}"),
            source,
        })
    }

    async fn subscribe_in(
        &self,
        epoch: u64,
        resource: &str,
        channel: &str,
        handler: EventHandler,
    ) -> Result<String, ConnectorError> {
        let ack: SubscriptionAck = self.call_as(resource, channel, vec![]).await?;
        let mut session = lock(&self.session);
        if !session
            .subscriptions
            .insert(epoch, ack.resource_id.clone(), resource, channel, handler)
        {
            return Err(ConnectorError::NotConnected);
        }
        tracing::debug!(epoch, key = %ack.resource_id, "subscribed to {}.{}", resource, channel);
        Ok(ack.resource_id)
    }

    /// Run `f` against the mirror if `epoch` is still the live connection.
    fn with_mirror<R>(&self, epoch: u64, f: impl FnOnce(&mut SceneMirror) -> R) -> Option<R> {
        let session = lock(&self.session);
        if !session.is_live(epoch) {
            return None;
        }
        let mut mirror = lock(&self.mirror);
        Some(f(&mut mirror))
    }

    /// Replace the audio-source and scene-item lists for `scene`.
    async fn refresh_active_scene(&self, epoch: u64, scene: &Scene) -> Result<(), ConnectorError> {
        let resource = scene.resource();
        let (sources, items) = tokio::join!(
            self.call_as::<Vec<AudioSource>>(AUDIO_SERVICE, SOURCES_FOR_CURRENT_SCENE, vec![]),
            self.call_as::<Vec<SceneItem>>(&resource, GET_ITEMS, vec![]),
        );
        let (sources, items) = (sources?, items?);

        let applied = self.with_mirror(epoch, |mirror| {
            if mirror.active_scene().map(|s| s.id.as_str()) != Some(scene.id.as_str()) {
                return false;
            }
            mirror.replace_audio_sources(sources);
            mirror.replace_scene_items(items);
            true
        });
        match applied {
            Some(true) => tracing::debug!(epoch, scene = %scene.name, "scene lists refreshed"),
            _ => tracing::debug!(
                epoch,
                scene = %scene.name,
                "discarding lists fetched for a scene that is no longer active"
            ),
        }
        Ok(())
    }

    fn spawn_refresh(self: &Arc<Self>, epoch: u64, scene: Scene) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = inner.refresh_active_scene(epoch, &scene).await {
                tracing::warn!(scene = %scene.name, error = %err, "failed to refresh scene lists");
            }
        });
    }

    fn event_handler(self: &Arc<Self>, epoch: u64, channel: EventChannel) -> EventHandler {
        let weak = Arc::downgrade(self);
        Arc::new(move |payload| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_event(epoch, channel, payload);
            }
        })
    }

    fn apply_event(self: &Arc<Self>, epoch: u64, channel: EventChannel, payload: Value) {
        let switched = self.with_mirror(epoch, |mirror| apply_to_mirror(mirror, channel, payload));
        match switched {
            None => tracing::debug!(epoch, ?channel, "dropping event from a closed connection"),
            Some(Some(scene)) => self.spawn_refresh(epoch, scene),
            Some(None) => {}
        }
    }

    fn handle_message(&self, epoch: u64, text: &str) {
        let envelope: RpcResponse = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, "discarding unparseable frame");
                return;
            }
        };

        let event = envelope.push_event();
        let handler = {
            let mut session = lock(&self.session);
            if !session.is_live(epoch) {
                tracing::debug!(epoch, "discarding frame from a closed connection");
                return;
            }
            if let Some(id) = envelope.request_id() {
                if !session.correlator.complete(id, envelope.outcome()) {
                    tracing::debug!(id, "no pending request for reply");
                }
            }
            let handler = match &event {
                Some(event) => session.subscriptions.handler(&event.resource_id),
                None => None,
            };
            handler
        };

        let Some(PushEvent { resource_id, data }) = event else {
            return;
        };
        match handler {
            Some(handler) => {
                if panic::catch_unwind(AssertUnwindSafe(|| handler(data))).is_err() {
                    tracing::error!(key = %resource_id, "event handler panicked");
                }
            }
            None => tracing::warn!(key = %resource_id, "dropping event for unknown subscription"),
        }
    }

    /// Drop the socket of `epoch` and move to `Disconnected`.
    ///
    /// The epoch is retired as well, so an attempt still opening its socket
    /// for it can no longer install that socket.
    fn teardown(&self, epoch: u64, reason: &str) {
        let (flushed, dropped) = {
            let mut session = lock(&self.session);
            if session.epoch != epoch || self.current_state().is_disconnected() {
                return;
            }
            session.epoch += 1;
            session.outbound = None;
            let flushed = session.correlator.fail_all();
            let dropped = session.subscriptions.clear();
            lock(&self.mirror).reset();
            self.state.send_replace(ConnectionState::Disconnected);
            (flushed, dropped)
        };
        tracing::info!(epoch, reason, flushed, dropped, "disconnected");
    }
}

/// Apply one pushed event. Returns the newly active scene for scene switches.
fn apply_to_mirror(mirror: &mut SceneMirror, channel: EventChannel, payload: Value) -> Option<Scene> {
    match channel {
        EventChannel::SceneSwitched => {
            let Some(id) = payload.get("id").and_then(id_from_value) else {
                tracing::warn!(%payload, "scene switch without an id");
                return None;
            };
            let active = mirror.mark_active(&id);
            if active.is_none() {
                tracing::warn!(scene = %id, "switched to a scene that is not mirrored");
            }
            active
        }
        EventChannel::SceneAdded => {
            match serde_json::from_value::<Scene>(payload) {
                Ok(scene) => mirror.add_scene(scene),
                Err(err) => tracing::warn!(error = %err, "ignoring malformed added scene"),
            }
            None
        }
        EventChannel::SceneRemoved => {
            match payload.get("id").and_then(id_from_value) {
                Some(id) => {
                    if mirror.remove_scene(&id).is_none() {
                        tracing::debug!(scene = %id, "removed scene was not mirrored");
                    }
                }
                None => tracing::warn!(%payload, "scene removal without an id"),
            }
            None
        }
        EventChannel::SourceUpdated => {
            if let Err(anomaly) = mirror.update_audio_source(&payload) {
                tracing::warn!(%anomaly, "ignoring source update");
            }
            None
        }
        EventChannel::ItemAdded => {
            let added = serde_json::from_value::<SceneItem>(payload)
                .map_err(|err| err.to_string())
                .and_then(|item| mirror.add_scene_item(item).map_err(|a| a.to_string()));
            if let Err(reason) = added {
                tracing::debug!(%reason, "ignoring added item");
            }
            None
        }
        EventChannel::ItemUpdated => {
            if let Err(anomaly) = mirror.update_scene_item(&payload) {
                tracing::warn!(%anomaly, "ignoring item update");
            }
            None
        }
    }
}

/// Feed inbound frames of one socket into the connector until it closes.
async fn pump(weak: Weak<Inner>, epoch: u64, mut inbound: UnboundedReceiver<TransportEvent>) {
    let mut reason = String::from("socket closed");
    while let Some(event) = inbound.next().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Message(text) => inner.handle_message(epoch, &text),
            TransportEvent::Closed(why) => {
                if let Some(why) = why {
                    reason = why;
                }
                break;
            }
        }
    }
    if let Some(inner) = weak.upgrade() {
        inner.teardown(epoch, &reason);
    }
}
