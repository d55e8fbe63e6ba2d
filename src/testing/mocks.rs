//! Mock implementations for testing
//!
//! [`MockBroker`] is an in-memory [`Transport`] that can be stopped, restarted
//! and severed on demand, so reconnect behavior can be exercised without a
//! real broker. By default it answers every request envelope by echoing its
//! payload back to the request's reply destination.

use crate::bus::envelope::{Envelope, EnvelopeKind};
use crate::transport::{
    BrokerAddress, CloseReason, Credentials, InboundFrame, InboundSender, OpenError, SendError,
    Transport, TransportHandle,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

pub type PublishedMessage = (String, Vec<u8>);

#[derive(Debug)]
struct BrokerState {
    running: bool,
    reject_credentials: bool,
    echo: bool,
    response_delay: Duration,
    open_hang: bool,
    connections: Vec<Arc<MockConnection>>,
    published: Vec<PublishedMessage>,
}

#[derive(Debug)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    open_count: AtomicUsize,
}

/// In-memory broker for tests
#[derive(Debug, Clone)]
pub struct MockBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    /// Running broker that echoes requests immediately
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState {
                    running: true,
                    reject_credentials: false,
                    echo: true,
                    response_delay: Duration::ZERO,
                    open_hang: false,
                    connections: Vec::new(),
                    published: Vec::new(),
                }),
                open_count: AtomicUsize::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the broker down. Live connections see a broker-initiated close.
    pub fn stop(&self) {
        let connections = {
            let mut state = self.state();
            state.running = false;
            std::mem::take(&mut state.connections)
        };
        for connection in connections {
            connection.terminate(Some(CloseReason::BrokerClosed));
        }
        debug!("Mock broker stopped");
    }

    /// Accept connections again
    pub fn start(&self) {
        self.state().running = true;
        debug!("Mock broker started");
    }

    /// Kill live connections without notifying their owners.
    /// The broker keeps accepting new connections.
    pub fn sever(&self) {
        let connections = std::mem::take(&mut self.state().connections);
        for connection in connections {
            connection.terminate(None);
        }
    }

    pub fn reject_credentials(&self, reject: bool) {
        self.state().reject_credentials = reject;
    }

    pub fn set_echo(&self, echo: bool) {
        self.state().echo = echo;
    }

    pub fn set_response_delay(&self, delay: Duration) {
        self.state().response_delay = delay;
    }

    /// Make `open` never complete, so only the open timeout or shutdown ends it
    pub fn set_open_hang(&self, hang: bool) {
        self.state().open_hang = hang;
    }

    /// Number of `open` calls seen, successful or not
    pub fn open_count(&self) -> usize {
        self.inner.open_count.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    pub fn live_connections(&self) -> usize {
        self.state()
            .connections
            .iter()
            .filter(|connection| connection.is_alive())
            .count()
    }
}

#[async_trait]
impl Transport for MockBroker {
    async fn open(
        &self,
        credentials: &Credentials,
        _address: &BrokerAddress,
        inbound: InboundSender,
    ) -> Result<Arc<dyn TransportHandle>, OpenError> {
        self.inner.open_count.fetch_add(1, Ordering::SeqCst);

        let (running, reject, hang) = {
            let state = self.state();
            (state.running, state.reject_credentials, state.open_hang)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if !running {
            return Err(OpenError::Unreachable {
                reason: "connection refused".to_string(),
            });
        }
        if reject {
            return Err(OpenError::AuthenticationRejected {
                reason: format!("user {:?} not authorized", credentials.username),
            });
        }

        let (close_tx, _) = watch::channel(None);
        let connection = Arc::new(MockConnection {
            alive: AtomicBool::new(true),
            close_tx,
            inbound,
        });
        self.state().connections.push(connection.clone());

        Ok(Arc::new(MockHandle {
            connection,
            broker: self.clone(),
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[derive(Debug)]
struct MockConnection {
    alive: AtomicBool,
    close_tx: watch::Sender<Option<CloseReason>>,
    inbound: InboundSender,
}

impl MockConnection {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Mark dead and, if `reason` is given, fire the close notification once
    fn terminate(&self, reason: Option<CloseReason>) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(reason) = reason {
            self.close_tx.send_if_modified(|current| {
                if current.is_some() {
                    return false;
                }
                *current = Some(reason);
                true
            });
        }
    }
}

struct MockHandle {
    connection: Arc<MockConnection>,
    broker: MockBroker,
}

impl MockHandle {
    fn schedule_echo(&self, request: Envelope, delay: Duration) {
        let Some(reply_to) = request.reply_to.clone() else {
            return;
        };
        let response = Envelope::response_to(&request, &request.message_type, request.payload.clone());
        let Ok(payload) = response.encode() else {
            return;
        };
        let connection = self.connection.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if connection.is_alive() {
                let _ = connection
                    .inbound
                    .send(InboundFrame {
                        source: reply_to,
                        payload,
                    })
                    .await;
            }
        });
    }
}

#[async_trait]
impl TransportHandle for MockHandle {
    async fn send(&self, destination: &str, payload: Bytes) -> Result<(), SendError> {
        if !self.connection.is_alive() {
            return Err(SendError::HandleClosed);
        }

        let (echo, delay) = {
            let mut state = self.broker.state();
            state
                .published
                .push((destination.to_string(), payload.to_vec()));
            (state.echo, state.response_delay)
        };

        if echo {
            if let Ok(envelope) = Envelope::decode(&payload) {
                if envelope.kind == EnvelopeKind::Request {
                    self.schedule_echo(envelope, delay);
                }
            }
        }
        Ok(())
    }

    async fn closed(&self) -> CloseReason {
        let mut rx = self.connection.close_tx.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return CloseReason::ClosedLocally;
            }
        }
    }

    async fn close(&self) {
        self.connection.terminate(Some(CloseReason::ClosedLocally));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn address() -> BrokerAddress {
        BrokerAddress::parse("mqtt://localhost").unwrap()
    }

    #[tokio::test]
    async fn test_open_fails_while_stopped() {
        let broker = MockBroker::new();
        broker.stop();
        let (tx, _rx) = mpsc::channel(1);

        let err = broker
            .open(&Credentials::anonymous(), &address(), tx)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OpenError::Unreachable { .. }));
        assert_eq!(broker.open_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_auth_failures() {
        let broker = MockBroker::new();
        broker.reject_credentials(true);
        let (tx, _rx) = mpsc::channel(1);

        let err = broker
            .open(&Credentials::new("guest", "wrong"), &address(), tx)
            .await
            .err()
            .unwrap();
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn test_stop_fires_close_notification() {
        let broker = MockBroker::new();
        let (tx, _rx) = mpsc::channel(1);
        let handle = broker
            .open(&Credentials::anonymous(), &address(), tx)
            .await
            .unwrap();
        assert_eq!(broker.live_connections(), 1);

        broker.stop();
        assert_eq!(handle.closed().await, CloseReason::BrokerClosed);
        assert!(matches!(
            handle.send("q", Bytes::from_static(b"{}")).await,
            Err(SendError::HandleClosed)
        ));
    }

    #[tokio::test]
    async fn test_sever_kills_without_notifying() {
        let broker = MockBroker::new();
        let (tx, _rx) = mpsc::channel(1);
        let handle = broker
            .open(&Credentials::anonymous(), &address(), tx)
            .await
            .unwrap();

        broker.sever();
        assert!(handle.send("q", Bytes::from_static(b"{}")).await.is_err());
        let notified =
            tokio::time::timeout(Duration::from_millis(20), handle.closed()).await;
        assert!(notified.is_err(), "severed handles stay silent");
    }

    #[tokio::test]
    async fn test_echoes_requests_to_reply_destination() {
        let broker = MockBroker::new();
        let (tx, mut rx) = mpsc::channel(1);
        let handle = broker
            .open(&Credentials::anonymous(), &address(), tx)
            .await
            .unwrap();

        let message = crate::bus::envelope::Message::new(
            "queue:TestCommand",
            "TestRequest",
            serde_json::json!({"message": "m"}),
        );
        let request = Envelope::request(&message, uuid::Uuid::new_v4(), "responses/c1");
        handle
            .send("queue:TestCommand", request.encode().unwrap())
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.source, "responses/c1");
        let response = Envelope::decode(&frame.payload).unwrap();
        assert_eq!(response.response_correlation(), request.correlation_id);
        assert_eq!(response.payload["message"], "m");
        assert_eq!(broker.published().len(), 1);
    }
}
