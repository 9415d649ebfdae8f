use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{ConnectError, SessionError};
use crate::mqtt::client::RumqttConnector;
use crate::mqtt::message::{InboundMessage, Subscription};
use crate::mqtt::transport::{Connector, LinkEvent, LinkEvents, LinkOptions, LinkRequests};
use crate::router::MessageRouter;
use crate::sink::EventSink;

/// How long a graceful disconnect may take before the dispatcher is aborted
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// State transitions and sink delivery share one lock so they never interleave.
struct Shared {
    state_tx: watch::Sender<SessionState>,
    /// Bumped whenever a link is adopted or retired; a dispatcher only
    /// delivers while its generation is current.
    generation: u64,
    sink: Box<dyn EventSink>,
    requests: Option<Arc<dyn LinkRequests>>,
    dispatcher: Option<JoinHandle<()>>,
    connecting: Option<CancellationToken>,
    /// Bumped by every `disconnect` call; a connect started before the bump
    /// gives up even if it never saw the token.
    disconnect_requests: u64,
    /// Last set passed to `subscribe_all`, replayed by `reconnect`
    subscriptions: Vec<Subscription>,
    client_id: Option<String>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("Session state: {} -> {}", self.state(), state);
        self.state_tx.send_replace(state);
    }

    /// Tear down after the link died underneath a connected session
    fn mark_lost(&mut self, generation: u64, reason: Option<&str>) -> bool {
        if self.generation != generation || self.state() != SessionState::Connected {
            return false;
        }
        self.generation += 1;
        self.requests = None;
        self.client_id = None;
        self.set_state(SessionState::Disconnected);
        if let Some(reason) = reason {
            self.sink.on_error(reason);
        }
        self.sink.on_disconnected();
        true
    }
}

/// The long-lived subscriber connection.
///
/// Owns one broker link at a time, routes inbound messages through a
/// [`MessageRouter`] and reports everything to an [`EventSink`]. The session
/// never reconnects on its own; after a drop the caller decides whether to
/// call [`connect`](Self::connect) again.
pub struct MqttSession {
    connector: Arc<dyn Connector>,
    router: Arc<MessageRouter>,
    shared: Arc<Mutex<Shared>>,
    state_rx: watch::Receiver<SessionState>,
    /// Serialises connect and disconnect
    lifecycle: Mutex<()>,
}

impl MqttSession {
    pub fn new(
        connector: Arc<dyn Connector>,
        router: MessageRouter,
        sink: impl EventSink + 'static,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        Self {
            connector,
            router: Arc::new(router),
            shared: Arc::new(Mutex::new(Shared {
                state_tx,
                generation: 0,
                sink: Box::new(sink),
                requests: None,
                dispatcher: None,
                connecting: None,
                disconnect_requests: 0,
                subscriptions: Vec::new(),
                client_id: None,
            })),
            state_rx,
            lifecycle: Mutex::new(()),
        }
    }

    /// Session over a real broker connection with the default sensor router
    pub fn with_rumqtt(sink: impl EventSink + 'static) -> Self {
        Self::new(
            Arc::new(RumqttConnector::new()),
            MessageRouter::default(),
            sink,
        )
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Client id of the current connection, if connected
    pub async fn client_id(&self) -> Option<String> {
        self.shared.lock().await.client_id.clone()
    }

    /// Connect with a freshly generated client id and a clean session.
    ///
    /// Returns once the broker has accepted the connection, after
    /// `on_connected` has fired. On any failure the session is back in
    /// `Disconnected` and no event has fired.
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<(), ConnectError> {
        let disconnects_seen = self.shared.lock().await.disconnect_requests;
        let _lifecycle = self.lifecycle.lock().await;

        let token = CancellationToken::new();
        {
            let mut shared = self.shared.lock().await;
            if shared.state() != SessionState::Disconnected {
                return Err(ConnectError::AlreadyActive);
            }
            if shared.disconnect_requests != disconnects_seen {
                debug!("Disconnect requested before connect started");
                return Err(ConnectError::Cancelled);
            }
            shared.set_state(SessionState::Connecting);
            shared.connecting = Some(token.clone());
        }

        let options = LinkOptions::from_config(config);
        let timeout = config.connect_timeout();
        info!(
            "Connecting to {}:{} with client_id: {}",
            options.host, options.port, options.client_id
        );

        let attempt = tokio::select! {
            _ = token.cancelled() => Err(ConnectError::Cancelled),
            result = tokio::time::timeout(timeout, self.connector.connect(&options)) => match result {
                Ok(Ok(link)) => Ok(link),
                Ok(Err(e)) => Err(ConnectError::from(e)),
                Err(_) => Err(ConnectError::Timeout(timeout)),
            },
        };

        let mut shared = self.shared.lock().await;
        shared.connecting = None;

        let link = match attempt {
            Ok(_) if token.is_cancelled() => {
                // Disconnect arrived between CONNACK and here; dropping the link closes it
                shared.set_state(SessionState::Disconnected);
                return Err(ConnectError::Cancelled);
            }
            Ok(link) => link,
            Err(e) => {
                warn!("Connect to {}:{} failed: {}", options.host, options.port, e);
                shared.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        shared.generation += 1;
        let generation = shared.generation;
        shared.requests = Some(link.requests);
        shared.client_id = Some(options.client_id.clone());
        // Spawned while the lock is held, so no message can overtake on_connected
        shared.dispatcher = Some(tokio::spawn(dispatch(
            Arc::clone(&self.shared),
            Arc::clone(&self.router),
            link.events,
            generation,
        )));
        shared.set_state(SessionState::Connected);
        shared.sink.on_connected();

        info!("Session connected as {}", options.client_id);
        Ok(())
    }

    /// Issue one subscribe request per entry, without waiting for SUBACK.
    ///
    /// Only valid while connected; otherwise returns
    /// [`SessionError::NotConnected`].
    pub async fn subscribe_all(&self, subscriptions: &[Subscription]) -> Result<(), SessionError> {
        let requests = {
            let mut shared = self.shared.lock().await;
            if shared.state() != SessionState::Connected {
                return Err(SessionError::NotConnected);
            }
            let requests = shared.requests.clone().ok_or(SessionError::NotConnected)?;
            shared.subscriptions = subscriptions.to_vec();
            requests
        };

        for subscription in subscriptions {
            info!(
                "Subscribing to: {} with QoS {:?}",
                subscription.topic_filter, subscription.qos
            );
            requests
                .subscribe(&subscription.topic_filter, subscription.qos)
                .await
                .map_err(|e| {
                    error!("Failed to subscribe to {}: {}", subscription.topic_filter, e);
                    SessionError::Subscribe(e)
                })?;
        }
        Ok(())
    }

    /// Gracefully close the connection.
    ///
    /// A no-op unless connected. Also cancels a connect that is still in
    /// flight. Once this returns, the sink receives nothing further from the
    /// closed connection.
    pub async fn disconnect(&self) {
        {
            let mut shared = self.shared.lock().await;
            shared.disconnect_requests += 1;
            if let Some(token) = &shared.connecting {
                debug!("Cancelling in-flight connect");
                token.cancel();
            }
        }

        let _lifecycle = self.lifecycle.lock().await;

        let (requests, dispatcher) = {
            let mut shared = self.shared.lock().await;
            if shared.state() != SessionState::Connected {
                return;
            }
            shared.set_state(SessionState::Disconnecting);
            // Retire the dispatcher before anything else can be delivered
            shared.generation += 1;
            (shared.requests.take(), shared.dispatcher.take())
        };

        if let Some(requests) = requests {
            if let Err(e) = requests.disconnect().await {
                warn!("Failed to send DISCONNECT: {}", e);
            }
        }

        if let Some(mut handle) = dispatcher {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!("Dispatcher did not finish within {:?}, aborting", DISCONNECT_GRACE);
                handle.abort();
            }
        }

        let mut shared = self.shared.lock().await;
        shared.client_id = None;
        shared.set_state(SessionState::Disconnected);
        shared.sink.on_disconnected();
        info!("Disconnected from MQTT broker");
    }

    /// Connect, then subscribe. If subscribing fails the fresh connection is
    /// closed again, so the caller can simply retry.
    pub async fn connect_and_subscribe(
        &self,
        config: &ConnectionConfig,
        subscriptions: &[Subscription],
    ) -> Result<(), SessionError> {
        self.connect(config).await?;
        if let Err(e) = self.subscribe_all(subscriptions).await {
            warn!("Subscribe failed, closing connection: {}", e);
            self.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    /// Disconnect, then connect with a (possibly changed) config and
    /// reissue the subscriptions from the last `subscribe_all`.
    pub async fn reconnect(&self, config: &ConnectionConfig) -> Result<(), SessionError> {
        let subscriptions = self.shared.lock().await.subscriptions.clone();
        self.disconnect().await;
        self.connect_and_subscribe(config, &subscriptions).await
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Ok(mut shared) = self.shared.try_lock() {
            if let Some(token) = shared.connecting.take() {
                token.cancel();
            }
            if let Some(handle) = shared.dispatcher.take() {
                handle.abort();
            }
        }
    }
}

/// Poll one link and deliver its messages until it closes or its
/// generation is retired.
async fn dispatch(
    shared: Arc<Mutex<Shared>>,
    router: Arc<MessageRouter>,
    mut events: Box<dyn LinkEvents>,
    generation: u64,
) {
    loop {
        match events.next_event().await {
            Ok(LinkEvent::Message { topic, payload }) => {
                let msg = InboundMessage::new(topic, payload);
                let mut shared = shared.lock().await;
                if shared.generation != generation {
                    continue;
                }
                shared.sink.on_message(&msg);
                match router.route(&msg) {
                    Some(observation) => shared.sink.on_observation(&observation),
                    None => debug!("No handler for topic {}", msg.topic),
                }
            }
            Ok(LinkEvent::Closed) => {
                debug!("Link closed");
                shared.lock().await.mark_lost(generation, None);
                break;
            }
            Ok(LinkEvent::SubscribeAcked) => {
                debug!("Subscription acknowledged");
            }
            Ok(_) => {}
            Err(e) => {
                let reason = e.to_string();
                if shared.lock().await.mark_lost(generation, Some(&reason)) {
                    error!("MQTT connection lost: {}", reason);
                } else {
                    debug!("Retired link ended: {}", reason);
                }
                break;
            }
        }
    }
}
