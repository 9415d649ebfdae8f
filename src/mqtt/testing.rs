//! In-process fake broker for exercising sessions and publishers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::mqtt::message::QosLevel;
use crate::mqtt::transport::{Connector, Link, LinkEvent, LinkEvents, LinkOptions, LinkRequests};

type EventTx = mpsc::UnboundedSender<Result<LinkEvent, TransportError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QosLevel,
    pub retain: bool,
}

/// What the fake broker saw on one connection
#[derive(Debug)]
pub struct ConnectionRecord {
    pub options: LinkOptions,
    pub subscriptions: Vec<(String, QosLevel)>,
    pub published: Vec<Published>,
    pub graceful_disconnect: bool,
    /// Set once the polling half has been dropped
    pub released: Arc<AtomicBool>,
    /// Polls of the event half after it already returned an error
    pub polls_after_error: Arc<AtomicUsize>,
    events: EventTx,
}

#[derive(Default)]
struct BrokerState {
    refuse_with: Option<TransportError>,
    hang_connect: bool,
    reject_publish: bool,
    fail_link_on_publish: Option<String>,
    reject_subscribe: bool,
    connections: Vec<ConnectionRecord>,
}

#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
    attempts: Arc<AtomicUsize>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn refuse_with(&self, err: TransportError) {
        self.state.lock().unwrap().refuse_with = Some(err);
    }

    pub fn accept(&self) {
        self.state.lock().unwrap().refuse_with = None;
    }

    /// Never answer CONNACK
    pub fn hang_connect(&self) {
        self.state.lock().unwrap().hang_connect = true;
    }

    pub fn reject_publish(&self) {
        self.state.lock().unwrap().reject_publish = true;
    }

    /// Accept the next PUBLISH, then fail the link's event half
    pub fn fail_link_on_publish(&self, reason: &str) {
        self.state.lock().unwrap().fail_link_on_publish = Some(reason.to_string());
    }

    pub fn reject_subscribe(&self) {
        self.state.lock().unwrap().reject_subscribe = true;
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    pub fn with_connection<R>(&self, index: usize, f: impl FnOnce(&ConnectionRecord) -> R) -> R {
        let state = self.state.lock().unwrap();
        f(&state.connections[index])
    }

    pub fn connections<R>(&self, f: impl FnOnce(&[ConnectionRecord]) -> R) -> R {
        let state = self.state.lock().unwrap();
        f(&state.connections)
    }

    /// Deliver an application message on a connection
    pub fn deliver(&self, index: usize, topic: &str, payload: &[u8]) {
        let state = self.state.lock().unwrap();
        let _ = state.connections[index].events.send(Ok(LinkEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        }));
    }

    /// Simulate a network failure on a connection
    pub fn drop_connection(&self, index: usize) {
        let state = self.state.lock().unwrap();
        let _ = state.connections[index]
            .events
            .send(Err(TransportError::Io("connection reset by peer".to_string())));
    }
}

#[async_trait]
impl Connector for FakeBroker {
    async fn connect(&self, options: &LinkOptions) -> Result<Link, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let (refusal, hang) = {
            let state = self.state.lock().unwrap();
            (state.refuse_with.clone(), state.hang_connect)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(err) = refusal {
            return Err(err);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let released = Arc::new(AtomicBool::new(false));
        let polls_after_error = Arc::new(AtomicUsize::new(0));
        let index = {
            let mut state = self.state.lock().unwrap();
            state.connections.push(ConnectionRecord {
                options: options.clone(),
                subscriptions: Vec::new(),
                published: Vec::new(),
                graceful_disconnect: false,
                released: released.clone(),
                polls_after_error: polls_after_error.clone(),
                events: tx.clone(),
            });
            state.connections.len() - 1
        };

        Ok(Link {
            requests: Arc::new(FakeRequests {
                state: self.state.clone(),
                index,
                events: tx,
            }),
            events: Box::new(FakeEvents {
                rx,
                released,
                polls_after_error,
                failed: false,
            }),
        })
    }
}

struct FakeRequests {
    state: Arc<Mutex<BrokerState>>,
    index: usize,
    events: EventTx,
}

#[async_trait]
impl LinkRequests for FakeRequests {
    async fn subscribe(&self, topic_filter: &str, qos: QosLevel) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_subscribe {
            return Err(TransportError::Closed);
        }
        state.connections[self.index]
            .subscriptions
            .push((topic_filter.to_string(), qos));
        let _ = self.events.send(Ok(LinkEvent::SubscribeAcked));
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QosLevel,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_publish {
            return Err(TransportError::Protocol("publish rejected".to_string()));
        }
        state.connections[self.index].published.push(Published {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        let event = match &state.fail_link_on_publish {
            Some(reason) => Err(TransportError::Io(reason.clone())),
            None => Ok(LinkEvent::PublishSent),
        };
        let _ = self.events.send(event);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.connections[self.index].graceful_disconnect = true;
        let _ = self.events.send(Ok(LinkEvent::Closed));
        Ok(())
    }
}

struct FakeEvents {
    rx: mpsc::UnboundedReceiver<Result<LinkEvent, TransportError>>,
    released: Arc<AtomicBool>,
    polls_after_error: Arc<AtomicUsize>,
    failed: bool,
}

#[async_trait]
impl LinkEvents for FakeEvents {
    async fn next_event(&mut self) -> Result<LinkEvent, TransportError> {
        if self.failed {
            self.polls_after_error.fetch_add(1, Ordering::SeqCst);
        }
        let event = match self.rx.recv().await {
            Some(event) => event,
            None => Err(TransportError::Closed),
        };
        if event.is_err() {
            self.failed = true;
        }
        event
    }
}

impl Drop for FakeEvents {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
