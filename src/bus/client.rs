//! Bus client facade
//!
//! Wires the connection manager, publisher, request coordinator and health
//! monitor around one transport, and runs the inbound dispatcher that routes
//! correlated responses back to waiting requests.

use super::connection::{ConnectionManager, ConnectionSettings, ConnectionSnapshot, ConnectionState, ReconnectConfig};
use super::envelope::{Envelope, EnvelopeKind, Message, Response};
use super::health_monitor::{HealthMonitor, HealthReport, HealthVerdict};
use super::publisher::Publisher;
use super::request::RequestCoordinator;
use crate::config::BusConfig;
use crate::error::{BusError, BusResult, PublishError, RequestFault};
use crate::transport::{BrokerAddress, Credentials, InboundFrame, Transport};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Capacity of the inbound frame queue between transport and dispatcher
const INBOUND_CAPACITY: usize = 256;

/// Everything needed to build a [`BusClient`]
#[derive(Debug, Clone)]
pub struct BusOptions {
    pub client_id: String,
    pub credentials: Credentials,
    pub address: BrokerAddress,
    pub reconnect: ReconnectConfig,
    pub open_timeout: Duration,
    /// Consecutive failed opens still reported as Degraded
    pub grace_attempts: u32,
    /// Timeout for requests that do not name one
    pub default_timeout: Duration,
    /// Destination responses are delivered to
    pub reply_to: String,
}

impl BusOptions {
    /// Options with default policies for `client_id` at `address`
    pub fn new(client_id: impl Into<String>, address: BrokerAddress) -> Self {
        let client_id = client_id.into();
        Self {
            reply_to: format!("responses/{client_id}"),
            client_id,
            credentials: Credentials::anonymous(),
            address,
            reconnect: ReconnectConfig::default(),
            open_timeout: Duration::from_secs(5),
            grace_attempts: 3,
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// An inbound message that is not a response to one of our requests
#[derive(Debug, Clone)]
pub struct Delivery {
    pub source: String,
    pub envelope: Envelope,
}

/// Resilient message-bus client
pub struct BusClient {
    options: BusOptions,
    manager: Arc<ConnectionManager>,
    publisher: Publisher,
    requests: RequestCoordinator,
    monitor: HealthMonitor,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundFrame>>>,
    event_sender: Arc<Mutex<Option<mpsc::Sender<Delivery>>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BusClient {
    pub fn new(options: BusOptions, transport: Arc<dyn Transport>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let manager = Arc::new(ConnectionManager::new(
            transport,
            ConnectionSettings {
                credentials: options.credentials.clone(),
                address: options.address.clone(),
                reconnect: options.reconnect.clone(),
                open_timeout: options.open_timeout,
            },
            inbound_tx,
        ));

        Self {
            publisher: Publisher::new(manager.clone()),
            requests: RequestCoordinator::new(manager.clone(), options.reply_to.clone()),
            monitor: HealthMonitor::new(manager.clone(), options.grace_attempts),
            manager,
            options,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            event_sender: Arc::new(Mutex::new(None)),
            dispatcher: Mutex::new(None),
        }
    }

    /// Build a client from loaded configuration
    pub fn from_config(config: &BusConfig, transport: Arc<dyn Transport>) -> BusResult<Self> {
        Ok(Self::new(config.to_options()?, transport))
    }

    pub fn options(&self) -> &BusOptions {
        &self.options
    }

    /// Forward inbound events and unmatched messages to `sender`
    pub fn set_event_sender(&self, sender: mpsc::Sender<Delivery>) {
        *self
            .event_sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(sender);
    }

    /// Start the connection supervisor and the inbound dispatcher
    pub async fn start(&self) -> BusResult<()> {
        let span = crate::bus_span!(operation = "start", client_id = %self.options.client_id);
        async {
            self.manager.start().await?;

            let inbound_rx = self
                .inbound_rx
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(inbound_rx) = inbound_rx {
                let handle = tokio::spawn(dispatch_inbound(
                    inbound_rx,
                    self.requests.clone(),
                    self.event_sender.clone(),
                ));
                *self
                    .dispatcher
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
            }

            info!(
                address = %self.options.address,
                reply_to = %self.options.reply_to,
                "Bus client started"
            );
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Stop reconnecting, release the connection and stop dispatching. Terminal.
    pub async fn stop(&self) {
        self.manager.stop().await;
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.abort();
        }
        info!(client_id = %self.options.client_id, "Bus client stopped");
    }

    /// Restart connecting after the connection faulted
    pub async fn reset(&self) -> BusResult<bool> {
        self.manager.reset().await
    }

    /// Fire-and-forget publish; fails fast while disconnected
    pub async fn publish(&self, message: &Message) -> Result<(), PublishError> {
        self.publisher.publish(message).await
    }

    /// Request/response with `timeout`, or the configured default
    pub async fn request(
        &self,
        message: &Message,
        timeout: Option<Duration>,
    ) -> Result<Response, RequestFault> {
        self.requests
            .request(message, timeout.unwrap_or(self.options.default_timeout))
            .await
    }

    pub fn check_health(&self) -> HealthVerdict {
        self.monitor.check_health()
    }

    pub fn probe(&self) -> HealthReport {
        self.monitor.probe()
    }

    pub fn health_monitor(&self) -> HealthMonitor {
        self.monitor.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.manager.current_state()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.manager.snapshot()
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.pending_count()
    }

    /// Wait until the connection is open, up to `timeout`
    pub async fn wait_until_open(&self, timeout: Duration) -> BusResult<ConnectionSnapshot> {
        self.manager
            .wait_for_state(|s| s.state == ConnectionState::Open, timeout)
            .await
            .ok_or_else(|| {
                BusError::internal(format!(
                    "connection not open after {timeout:?}: {}",
                    self.monitor.probe().detail
                ))
            })
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.manager.signal_shutdown_nowait();
        if let Ok(mut dispatcher) = self.dispatcher.lock() {
            if let Some(dispatcher) = dispatcher.take() {
                dispatcher.abort();
            }
        }
    }
}

impl std::fmt::Debug for BusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusClient")
            .field("client_id", &self.options.client_id)
            .field("manager", &self.manager)
            .field("requests", &self.requests)
            .finish()
    }
}

/// What to do with one inbound frame (pure function)
fn classify_frame(frame: &InboundFrame) -> Result<Envelope, serde_json::Error> {
    Envelope::decode(&frame.payload)
}

async fn dispatch_inbound(
    mut inbound_rx: mpsc::Receiver<InboundFrame>,
    requests: RequestCoordinator,
    event_sender: Arc<Mutex<Option<mpsc::Sender<Delivery>>>>,
) {
    debug!("Inbound dispatcher started");
    while let Some(frame) = inbound_rx.recv().await {
        let envelope = match classify_frame(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(source = %frame.source, error = %e, "Dropping undecodable inbound frame");
                continue;
            }
        };

        if envelope.kind == EnvelopeKind::Response {
            if let Some(response) = Response::from_envelope(envelope) {
                requests.deliver_response(response);
            } else {
                warn!(source = %frame.source, "Dropping response without correlation id");
            }
            continue;
        }

        let sender = event_sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let Some(sender) = sender else {
            debug!(source = %frame.source, "No event sender configured, message dropped");
            continue;
        };
        // Never wait on the event consumer; responses share this task
        match sender.try_send(Delivery {
            source: frame.source,
            envelope,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(delivery)) => {
                warn!(source = %delivery.source, "Event receiver is full, dropping inbound message");
            }
            Err(TrySendError::Closed(delivery)) => {
                warn!(source = %delivery.source, "Event receiver dropped, discarding inbound message");
            }
        }
    }
    debug!("Inbound dispatcher stopped");
}
