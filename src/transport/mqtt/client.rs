//! MQTT v5 transport built on `rumqttc`
//!
//! Each [`Transport::open`] call creates a fresh client and event loop, waits
//! for the broker's ConnAck, subscribes to the configured reply topics and
//! spawns a pump task. The pump forwards inbound publishes and fires the
//! handle's close notification on the first event loop error or broker
//! disconnect, then exits. Reconnecting is the connection manager's job, so
//! a handle is never revived.

use super::connection::configure_mqtt_options;
use super::message_handler::{
    classify_connection_error, classify_refusal, close_reason_for, route_mqtt_event,
    should_forward, EventRoute,
};
use crate::transport::{
    BrokerAddress, CloseReason, Credentials, InboundFrame, InboundSender, OpenError, SendError,
    Transport, TransportHandle,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the request channel between client and event loop
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// How long `close` waits for the pump to flush the disconnect
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Opens MQTT connections for the bus engine
#[derive(Debug, Clone)]
pub struct MqttTransport {
    client_id: String,
    subscriptions: Vec<String>,
    keep_alive: Duration,
}

impl MqttTransport {
    pub fn new(client_id: impl Into<String>, subscriptions: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            subscriptions,
            keep_alive: Duration::from_secs(60),
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Poll until the broker acknowledges or refuses the connection
    async fn await_connack(event_loop: &mut EventLoop) -> Result<(), OpenError> {
        loop {
            let event = event_loop
                .poll()
                .await
                .map_err(|e| classify_connection_error(&e))?;
            match route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged => return Ok(()),
                EventRoute::ConnectionRefused(code) => return Err(classify_refusal(code)),
                EventRoute::Disconnected => {
                    return Err(OpenError::Unreachable {
                        reason: "broker disconnected during handshake".to_string(),
                    })
                }
                _ => continue,
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn open(
        &self,
        credentials: &Credentials,
        address: &BrokerAddress,
        inbound: InboundSender,
    ) -> Result<Arc<dyn TransportHandle>, OpenError> {
        let options = configure_mqtt_options(&self.client_id, address, credentials, self.keep_alive);
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        Self::await_connack(&mut event_loop).await?;
        debug!(address = %address, "ConnAck received");

        for topic in &self.subscriptions {
            client
                .subscribe(topic.as_str(), QoS::AtLeastOnce)
                .await
                .map_err(|e| OpenError::Unreachable {
                    reason: format!("failed to subscribe to {topic}: {e}"),
                })?;
            debug!("Subscribed to: {}", topic);
        }

        let (close_tx, _) = watch::channel(None);
        let pump = tokio::spawn(pump_events(event_loop, inbound, close_tx.clone()));
        info!(address = %address, "MQTT connection established");

        Ok(Arc::new(MqttHandle {
            client,
            close_tx,
            pump: Mutex::new(Some(pump)),
        }))
    }

    fn name(&self) -> &str {
        "mqtt"
    }
}

/// Drive the event loop until the connection ends
async fn pump_events(
    mut event_loop: EventLoop,
    inbound: InboundSender,
    close_tx: watch::Sender<Option<CloseReason>>,
) {
    let reason = loop {
        match event_loop.poll().await {
            Ok(event) => match route_mqtt_event(&event) {
                EventRoute::MessageReceived {
                    topic,
                    payload,
                    retain,
                } => {
                    if !should_forward(&topic, retain) {
                        continue;
                    }
                    let frame = InboundFrame {
                        source: topic,
                        payload,
                    };
                    if inbound.send(frame).await.is_err() {
                        warn!("Inbound receiver dropped, closing MQTT connection");
                        break CloseReason::ClosedLocally;
                    }
                }
                EventRoute::Disconnected => {
                    warn!("Broker sent disconnect");
                    break CloseReason::BrokerClosed;
                }
                _ => {}
            },
            Err(e) => {
                if close_tx.borrow().is_none() {
                    error!("MQTT event loop error: {}", e);
                }
                break close_reason_for(&e);
            }
        }
    };

    close_tx.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        true
    });
}

/// Live MQTT connection
struct MqttHandle {
    client: AsyncClient,
    close_tx: watch::Sender<Option<CloseReason>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MqttHandle {
    fn is_closed(&self) -> bool {
        self.close_tx.borrow().is_some()
    }
}

#[async_trait]
impl TransportHandle for MqttHandle {
    async fn send(&self, destination: &str, payload: Bytes) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::HandleClosed);
        }
        self.client
            .publish(destination, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| SendError::Rejected {
                reason: e.to_string(),
            })
    }

    async fn closed(&self) -> CloseReason {
        let mut rx = self.close_tx.subscribe();
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
        let first_close = self.close_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(CloseReason::ClosedLocally);
            true
        });
        if first_close {
            if let Err(e) = self.client.disconnect().await {
                debug!("Disconnect request not delivered: {}", e);
            }
        }

        let pump = self
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut pump) = pump {
            if tokio::time::timeout(CLOSE_GRACE, &mut pump).await.is_err() {
                pump.abort();
            }
        }
    }
}
