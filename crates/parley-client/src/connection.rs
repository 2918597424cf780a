//! Connection manager.
//!
//! [`MessagingClient`] owns the single logical link to the server. A link is
//! a transport task plus a reader task that feeds inbound frames to the
//! dispatcher. Every successful handshake starts a new *generation*:
//! transport handles and the outbound writer belong to exactly one
//! generation, while the registry's callbacks survive across them.
//!
//! The `link` mutex serializes connect, disconnect and reconnect so at most
//! one link is ever active.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use parley_net::{
    Command, Connector, Frame, TransportCommand, TransportEvent, TransportLink, WebSocketConnector,
};
use parley_shared::protocol::{InboundMessage, OutboundMessage};
use parley_shared::types::{ChannelKey, ConnectionState, RoomId, UserId};

use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ConnectError, ConnectStage, SendError};
use crate::heartbeat::Heartbeat;
use crate::reconnect::ReconnectPolicy;
use crate::registry::{Callback, SubscriptionRegistry};
use crate::sender::{OutboundSender, Writer};

/// Identity of the logged-in user as known to this client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub user_id: Option<UserId>,
    pub username: Option<String>,
}

struct ActiveLink {
    generation: u64,
    commands: mpsc::Sender<TransportCommand>,
    reader: JoinHandle<()>,
}

struct ClientInner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Dispatcher,
    sender: OutboundSender,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Session>,
    /// Present between a successful `connect` and `disconnect`; reused by
    /// automatic reconnects.
    token: Mutex<Option<String>>,
    link: tokio::sync::Mutex<Option<ActiveLink>>,
    generation: AtomicU64,
    heartbeat: Mutex<Option<Heartbeat>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Real-time messaging client. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct MessagingClient {
    inner: Arc<ClientInner>,
}

impl MessagingClient {
    pub fn new(mut config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        if let Err(e) = config.reconnect.validate() {
            warn!(error = %e, "Invalid reconnect policy, automatic reconnect disabled");
            config.reconnect.enabled = false;
        }

        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone(), config.dedup_capacity, config.dedup_policy);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                registry,
                dispatcher,
                sender: OutboundSender::new(),
                state_tx,
                session: Mutex::new(Session::default()),
                token: Mutex::new(None),
                link: tokio::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
                heartbeat: Mutex::new(None),
                reconnect_task: Mutex::new(None),
            }),
        }
    }

    /// Client speaking WebSocket to `config.server_url`.
    pub fn with_websocket(config: ClientConfig) -> Self {
        let connector = Arc::new(WebSocketConnector::new(config.server_url.clone()));
        Self::new(config, connector)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Register the local user before connecting so the session can be
    /// announced right after the handshake. Takes effect on the next connect.
    pub fn set_identity(&self, user_id: UserId, username: Option<String>) {
        let mut session = lock(&self.inner.session);
        session.user_id = Some(user_id);
        session.username = username;
    }

    pub fn session(&self) -> Session {
        lock(&self.inner.session).clone()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open the transport and perform the handshake, each within its own
    /// timeout. On failure the client is left `Disconnected`.
    ///
    /// Already-registered subscriptions are (re)issued on the new link.
    /// Calling this while connected returns the current session.
    pub async fn connect(&self, token: &str) -> Result<Session, ConnectError> {
        let inner = &self.inner;
        inner.cancel_reconnect();

        let mut link = inner.link.lock().await;
        if link.is_some() && inner.sender.is_attached() {
            debug!("Already connected");
            return Ok(self.session());
        }
        if let Some(stale) = link.take() {
            inner.retire_stale(stale);
        }

        *lock(&inner.token) = Some(token.to_string());
        match inner.establish(&mut link, token).await {
            Ok(session) => Ok(session),
            Err(e) => {
                *lock(&inner.token) = None;
                inner.set_state(ConnectionState::Disconnected);
                warn!(error = %e, "Connect failed");
                Err(e)
            }
        }
    }

    /// Close the connection and drop every subscription.
    ///
    /// Best effort and bounded by `disconnect_timeout`: failures while
    /// closing are logged, never returned.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.cancel_reconnect();
        *lock(&inner.token) = None;

        let heartbeat = lock(&inner.heartbeat).take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop(inner.config.disconnect_timeout).await;
        }

        let mut link = inner.link.lock().await;
        let handles = inner.registry.teardown_all();
        inner.sender.detach();
        let active = link.take();
        inner.set_state(ConnectionState::Disconnected);

        let Some(active) = active else {
            debug!(dropped = handles.len(), "Disconnect while not connected");
            return;
        };

        let close = async {
            for handle in handles.iter().filter(|h| h.generation == active.generation) {
                let frame = Frame::unsubscribe(&handle.id);
                if active.commands.send(TransportCommand::Send(frame)).await.is_err() {
                    return;
                }
            }
            let receipt = format!("disconnect-{}", uuid::Uuid::new_v4());
            let _ = active
                .commands
                .send(TransportCommand::Send(Frame::disconnect(&receipt)))
                .await;
            let _ = active.commands.send(TransportCommand::Shutdown).await;
        };
        if timeout(inner.config.disconnect_timeout, close).await.is_err() {
            warn!("Timed out closing connection");
        }

        active.reader.abort();
        let _ = timeout(inner.config.disconnect_timeout, active.reader).await;
        info!(unsubscribed = handles.len(), "Disconnected");
    }

    /// Transport up and handshake completed.
    pub fn is_connected(&self) -> bool {
        *self.inner.state_tx.borrow() == ConnectionState::Connected && self.inner.sender.is_attached()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Register `callback` for `key`. A key that is already registered keeps
    /// its first callback and this call is a no-op returning `false`.
    ///
    /// While disconnected the subscription is stored and issued on the next
    /// connect. Callbacks run on the inbound-delivery task and must not block.
    pub async fn subscribe<F>(&self, key: impl Into<ChannelKey>, callback: F) -> bool
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.subscribe_callback(key.into(), callback).await
    }

    /// Like [`subscribe`](Self::subscribe) but delivers into a bounded
    /// channel. Returns `None` if the key is already registered. Messages
    /// are dropped with a warning while the receiver is full.
    pub async fn subscribe_stream(
        &self,
        key: impl Into<ChannelKey>,
        capacity: usize,
    ) -> Option<mpsc::Receiver<InboundMessage>> {
        let key = key.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let channel = key.clone();
        let callback: Callback = Arc::new(move |message: InboundMessage| {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(message) {
                warn!(channel = %channel, "Stream receiver full, message dropped");
            }
        });
        self.subscribe_callback(key, callback).await.then_some(rx)
    }

    async fn subscribe_callback(&self, key: ChannelKey, callback: Callback) -> bool {
        if !self.inner.registry.insert(key.clone(), callback) {
            debug!(channel = %key, "Already subscribed");
            return false;
        }
        match self.inner.sender.writer() {
            Some(writer) => self.inner.bind_and_subscribe(&key, &writer).await,
            None => debug!(channel = %key, "Not connected, subscription pending"),
        }
        true
    }

    /// Stop delivery for `key`. Unknown keys are a no-op.
    pub async fn unsubscribe(&self, key: impl Into<ChannelKey>) {
        let key = key.into();
        let Some(handle) = self.inner.registry.remove(&key) else {
            debug!(channel = %key, "Unsubscribe for unknown or unbound key");
            return;
        };

        let current = self.inner.sender.writer().map(|w| w.generation);
        if current == Some(handle.generation) {
            if let Err(e) = self.inner.sender.send_frame(Frame::unsubscribe(&handle.id)).await {
                debug!(channel = %key, error = %e, "Unsubscribe frame not sent");
            }
        }
        debug!(channel = %key, handle = %handle.id, "Unsubscribed");
    }

    pub fn subscriptions(&self) -> Vec<ChannelKey> {
        self.inner.registry.keys()
    }

    pub fn is_subscribed(&self, key: &ChannelKey) -> bool {
        self.inner.registry.contains(key)
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    pub fn sender(&self) -> OutboundSender {
        self.inner.sender.clone()
    }

    pub async fn send_chat(&self, room_id: RoomId, content: impl Into<String>) -> Result<(), SendError> {
        self.inner.sender.send_chat(room_id, content).await
    }

    pub async fn send_private(
        &self,
        recipient_id: UserId,
        content: impl Into<String>,
    ) -> Result<(), SendError> {
        self.inner.sender.send_private(recipient_id, content).await
    }

    pub async fn send_typing(&self, room_id: RoomId, is_typing: bool) -> Result<(), SendError> {
        self.inner.sender.send_typing(room_id, is_typing).await
    }

    pub async fn send_status(&self, user_id: UserId, is_online: bool) -> Result<(), SendError> {
        self.inner.sender.send_status(user_id, is_online).await
    }

    pub async fn send(&self, message: OutboundMessage) -> Result<(), SendError> {
        self.inner.sender.send(message).await
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    /// Start announcing the local user as online every
    /// `heartbeat_interval`. Replaces a running heartbeat. Returns `false`
    /// when no user id is known.
    pub fn start_heartbeat(&self) -> bool {
        let Some(user_id) = self.session().user_id else {
            warn!("Cannot start heartbeat without a user id");
            return false;
        };
        let heartbeat = Heartbeat::start(
            self.inner.sender.clone(),
            user_id,
            self.inner.config.heartbeat_interval,
        );
        // The previous guard, if any, cancels its task on drop.
        *lock(&self.inner.heartbeat) = Some(heartbeat);
        true
    }

    pub async fn stop_heartbeat(&self) {
        let heartbeat = lock(&self.inner.heartbeat).take();
        if let Some(heartbeat) = heartbeat {
            heartbeat.stop(self.inner.config.disconnect_timeout).await;
        }
    }

    pub fn heartbeat_running(&self) -> bool {
        lock(&self.inner.heartbeat)
            .as_ref()
            .is_some_and(Heartbeat::is_running)
    }
}

impl ClientInner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn token(&self) -> Option<String> {
        lock(&self.token).clone()
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = lock(&self.reconnect_task).take() {
            task.abort();
        }
    }

    /// Open a transport, run the handshake and install the new link.
    /// The caller holds the link lock and sets the state on failure.
    async fn establish(
        self: &Arc<Self>,
        link: &mut Option<ActiveLink>,
        token: &str,
    ) -> Result<Session, ConnectError> {
        self.set_state(ConnectionState::Connecting);

        let TransportLink { commands, mut events } =
            match timeout(self.config.connect_timeout, self.connector.connect()).await {
                Err(_) => return Err(ConnectError::Timeout(ConnectStage::Transport)),
                Ok(Err(e)) => return Err(ConnectError::TransportUnavailable(e.to_string())),
                Ok(Ok(link)) => link,
            };

        let host = self.connector.host();
        if commands
            .send(TransportCommand::Send(Frame::connect(&host, token)))
            .await
            .is_err()
        {
            return Err(ConnectError::TransportUnavailable(
                "transport closed before handshake".to_string(),
            ));
        }

        let connected = match timeout(self.config.handshake_timeout, await_connected(&mut events)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                let _ = commands.try_send(TransportCommand::Shutdown);
                return Err(e);
            }
            Err(_) => {
                let _ = commands.try_send(TransportCommand::Shutdown);
                return Err(ConnectError::Timeout(ConnectStage::Handshake));
            }
        };

        let session = self.merge_session(&connected);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let writer = Writer {
            generation,
            commands: commands.clone(),
            user_id: session.user_id,
            username: session.username.clone(),
        };
        self.sender.attach(writer.clone());

        let reader = tokio::spawn(read_loop(Arc::downgrade(self), generation, events));
        *link = Some(ActiveLink {
            generation,
            commands,
            reader,
        });
        self.set_state(ConnectionState::Connected);
        info!(
            generation,
            user = ?session.user_id,
            host = %host,
            "Connected"
        );

        if let Some(user_id) = session.user_id {
            if let Err(e) = self.sender.register_session(user_id).await {
                warn!(error = %e, "Session registration failed");
            }
        }

        let pending = self.registry.unbound_keys();
        for key in &pending {
            self.bind_and_subscribe(key, &writer).await;
        }
        if !pending.is_empty() {
            info!(count = pending.len(), generation, "Subscriptions issued");
        }

        Ok(session)
    }

    /// Identity set locally wins; the CONNECTED frame fills the gaps.
    fn merge_session(&self, connected: &Frame) -> Session {
        let mut session = lock(&self.session);
        if session.user_id.is_none() {
            session.user_id = connected
                .get("user-id")
                .and_then(|v| v.parse::<i64>().ok())
                .map(UserId);
        }
        if session.username.is_none() {
            session.username = connected.get("user-name").map(str::to_string);
        }
        session.clone()
    }

    async fn bind_and_subscribe(&self, key: &ChannelKey, writer: &Writer) {
        let Some(destination) = key.destination(writer.user_id) else {
            warn!(channel = %key, "No destination without a user id, subscription left pending");
            return;
        };
        let Some(handle) = self.registry.bind(key, destination, writer.generation) else {
            return;
        };

        let frame = Frame::subscribe(&handle.id, &handle.destination);
        match writer.commands.send(TransportCommand::Send(frame)).await {
            Ok(()) => debug!(
                channel = %key,
                handle = %handle.id,
                destination = %handle.destination,
                "Subscribed"
            ),
            Err(_) => warn!(channel = %key, "Transport closed while subscribing"),
        }
    }

    /// The transport of `generation` went away without `disconnect`.
    async fn on_transport_closed(self: &Arc<Self>, generation: u64, reason: Option<String>) {
        let mut link = self.link.lock().await;
        if link.as_ref().map(|l| l.generation) != Some(generation) {
            return;
        }
        // The reader calling us is the one being dropped here; it ends on its own.
        link.take();
        self.sender.detach();
        warn!(generation, reason = ?reason, "Connection lost");

        let policy = self.config.reconnect;
        if policy.enabled && self.token().is_some() {
            self.registry.invalidate_handles();
            self.set_state(ConnectionState::Connecting);
            let task = tokio::spawn(reconnect_loop(Arc::downgrade(self), policy));
            if let Some(previous) = lock(&self.reconnect_task).replace(task) {
                previous.abort();
            }
        } else {
            self.fail();
        }
    }

    /// Settle a link whose transport closed before its reader reported the
    /// loss, leaving the registry as `on_transport_closed` would have.
    fn retire_stale(&self, stale: ActiveLink) {
        self.sender.detach();
        let _ = stale.commands.try_send(TransportCommand::Shutdown);
        stale.reader.abort();
        warn!(generation = stale.generation, "Replacing lost connection");

        if self.config.reconnect.enabled {
            self.registry.invalidate_handles();
        } else {
            self.drop_subscriptions();
        }
    }

    fn drop_subscriptions(&self) -> usize {
        let dropped = self.registry.teardown_all();
        lock(&self.heartbeat).take();
        dropped.len()
    }

    fn fail(&self) {
        let dropped = self.drop_subscriptions();
        *lock(&self.token) = None;
        self.set_state(ConnectionState::Failed);
        info!(dropped, "Connection failed, subscriptions cleared");
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(task) = self
            .reconnect_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        if let Some(active) = self.link.get_mut().take() {
            let _ = active.commands.try_send(TransportCommand::Shutdown);
            active.reader.abort();
        }
    }
}

/// Wait for CONNECTED, translating ERROR and early close into failures.
async fn await_connected(events: &mut mpsc::Receiver<TransportEvent>) -> Result<Frame, ConnectError> {
    loop {
        match events.recv().await {
            Some(TransportEvent::Frame(frame)) => match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => {
                    let message = frame
                        .get("message")
                        .map(str::to_string)
                        .unwrap_or_else(|| String::from_utf8_lossy(&frame.body).into_owned());
                    return Err(ConnectError::HandshakeRejected(message));
                }
                other => debug!(command = %other, "Ignoring frame before CONNECTED"),
            },
            Some(TransportEvent::Closed { reason }) => {
                return Err(ConnectError::TransportUnavailable(
                    reason.unwrap_or_else(|| "connection closed during handshake".to_string()),
                ));
            }
            None => {
                return Err(ConnectError::TransportUnavailable(
                    "connection closed during handshake".to_string(),
                ));
            }
        }
    }
}

/// Inbound-delivery task of one generation.
///
/// Returns a boxed `Send` future: the read loop, reconnect loop and
/// `establish` spawn one another, and the cycle must go through a named type.
fn read_loop(
    inner: Weak<ClientInner>,
    generation: u64,
    mut events: mpsc::Receiver<TransportEvent>,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let mut reason = None;
        while let Some(event) = events.recv().await {
            let Some(client) = inner.upgrade() else {
                return;
            };
            match event {
                TransportEvent::Frame(frame) => match frame.command {
                    Command::Message => {
                        client.dispatcher.dispatch(&frame);
                    }
                    Command::Error => {
                        warn!(message = ?frame.get("message"), "Server reported an error");
                    }
                    Command::Receipt => {
                        debug!(receipt = ?frame.get("receipt-id"), "Receipt");
                    }
                    other => debug!(command = %other, "Ignoring unexpected frame"),
                },
                TransportEvent::Closed { reason: r } => {
                    reason = r;
                    break;
                }
            }
        }

        if let Some(client) = inner.upgrade() {
            client.on_transport_closed(generation, reason).await;
        }
    })
}

async fn reconnect_loop(inner: Weak<ClientInner>, policy: ReconnectPolicy) {
    for attempt in 0..policy.max_attempts {
        let delay = policy.delay_for(attempt);
        debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Reconnecting");
        tokio::time::sleep(delay).await;

        let Some(client) = inner.upgrade() else {
            return;
        };
        let mut link = client.link.lock().await;
        if link.is_some() {
            return;
        }
        let Some(token) = client.token() else {
            return;
        };

        match client.establish(&mut link, &token).await {
            Ok(_) => {
                info!(attempt = attempt + 1, "Reconnected");
                return;
            }
            Err(e) => {
                warn!(attempt = attempt + 1, max = policy.max_attempts, error = %e, "Reconnect failed");
                client.set_state(ConnectionState::Connecting);
            }
        }
    }

    if let Some(client) = inner.upgrade() {
        let link = client.link.lock().await;
        if link.is_none() && client.token().is_some() {
            warn!(attempts = policy.max_attempts, "Giving up on reconnect");
            client.fail();
        }
    }
}
