//! Pure routing and classification of MQTT events
//!
//! Turns `rumqttc` events into routing decisions and connection errors into
//! [`OpenError`] or [`CloseReason`] values the engine understands.

use crate::transport::{CloseReason, OpenError};
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::{ConnectionError, Event};
use tracing::debug;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged,
    /// Broker refused the connection in its ConnAck
    ConnectionRefused(ConnectReturnCode),
    /// Message received on a subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// Broker sent a Disconnect
    Disconnected,
    /// Keepalives, acks and other protocol traffic
    InfrastructureEvent,
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Route MQTT event to appropriate handler (pure routing decision)
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(connack) if connack.code == ConnectReturnCode::Success => {
                EventRoute::ConnectionAcknowledged
            }
            Packet::ConnAck(connack) => EventRoute::ConnectionRefused(connack.code),
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.clone(),
                retain: publish.retain,
            },
            Packet::Disconnect(_) => EventRoute::Disconnected,
            _ => EventRoute::InfrastructureEvent,
        },
        Event::Outgoing(_) => EventRoute::OutgoingEvent,
    }
}

/// Retained messages are replays from before this connection existed
pub fn should_forward(topic: &str, retain: bool) -> bool {
    if retain {
        debug!("Ignoring retained message on topic: {}", topic);
        return false;
    }
    true
}

/// Authentication refusals are kept apart so they can fault the connection
pub fn classify_refusal(code: ConnectReturnCode) -> OpenError {
    match code {
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
            OpenError::AuthenticationRejected {
                reason: format!("{code:?}"),
            }
        }
        other => OpenError::Unreachable {
            reason: format!("connection refused: {other:?}"),
        },
    }
}

/// Map an event loop error during the handshake to an [`OpenError`] (pure function)
pub fn classify_connection_error(error: &ConnectionError) -> OpenError {
    match error {
        ConnectionError::ConnectionRefused(code) => classify_refusal(*code),
        other => OpenError::Unreachable {
            reason: other.to_string(),
        },
    }
}

/// Map an event loop error on an open connection to a [`CloseReason`] (pure function)
pub fn close_reason_for(error: &ConnectionError) -> CloseReason {
    CloseReason::NetworkError(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, Disconnect, DisconnectReasonCode, Publish};
    use rumqttc::v5::mqttbytes::QoS;

    fn connack(code: ConnectReturnCode) -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code,
            properties: None,
        }))
    }

    #[test]
    fn test_route_connack() {
        assert_eq!(
            route_mqtt_event(&connack(ConnectReturnCode::Success)),
            EventRoute::ConnectionAcknowledged
        );
        assert_eq!(
            route_mqtt_event(&connack(ConnectReturnCode::NotAuthorized)),
            EventRoute::ConnectionRefused(ConnectReturnCode::NotAuthorized)
        );
    }

    #[test]
    fn test_route_disconnect_and_publish() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(route_mqtt_event(&disconnect), EventRoute::Disconnected);

        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("responses/client-1"),
            pkid: 1,
            payload: Bytes::from("{}"),
            properties: None,
        }));
        assert_eq!(
            route_mqtt_event(&publish),
            EventRoute::MessageReceived {
                topic: "responses/client-1".to_string(),
                payload: Bytes::from("{}"),
                retain: false,
            }
        );
    }

    #[test]
    fn test_should_forward_skips_retained() {
        assert!(should_forward("responses/c", false));
        assert!(!should_forward("responses/c", true));
    }

    #[test]
    fn test_classify_refusals() {
        assert!(classify_refusal(ConnectReturnCode::BadUserNamePassword).is_auth_failure());
        assert!(classify_refusal(ConnectReturnCode::NotAuthorized).is_auth_failure());
        assert!(matches!(
            classify_refusal(ConnectReturnCode::ServerUnavailable),
            OpenError::Unreachable { .. }
        ));
    }

    #[test]
    fn test_classify_connection_error() {
        let refused = ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        assert!(classify_connection_error(&refused).is_auth_failure());

        let io = ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(matches!(
            classify_connection_error(&io),
            OpenError::Unreachable { .. }
        ));
        assert!(matches!(close_reason_for(&io), CloseReason::NetworkError(_)));
    }
}
