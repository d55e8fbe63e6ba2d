//! Bus envelope carrying correlation metadata
//!
//! Payloads are opaque JSON values; the envelope only adds what the engine
//! needs to route a response back to the request that caused it.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What role a message plays on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Event,
    Request,
    Response,
}

/// Wire envelope handed to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: Uuid,
    pub kind: EnvelopeKind,
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub payload: Value,
}

impl Envelope {
    pub fn event(message: &Message) -> Self {
        Self::build(EnvelopeKind::Event, message, None, None)
    }

    pub fn request(message: &Message, correlation_id: Uuid, reply_to: &str) -> Self {
        Self::build(
            EnvelopeKind::Request,
            message,
            Some(correlation_id),
            Some(reply_to.to_string()),
        )
    }

    /// Response to `request` carrying `payload`, correlated by the request's id
    pub fn response_to(request: &Envelope, message_type: &str, payload: Value) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            kind: EnvelopeKind::Response,
            message_type: message_type.to_string(),
            correlation_id: request.correlation_id,
            reply_to: None,
            sent_at: Utc::now(),
            payload,
        }
    }

    fn build(
        kind: EnvelopeKind,
        message: &Message,
        correlation_id: Option<Uuid>,
        reply_to: Option<String>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            kind,
            message_type: message.message_type.clone(),
            correlation_id,
            reply_to,
            sent_at: Utc::now(),
            payload: message.payload.clone(),
        }
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Correlation id, only for responses
    pub fn response_correlation(&self) -> Option<Uuid> {
        match self.kind {
            EnvelopeKind::Response => self.correlation_id,
            _ => None,
        }
    }
}

/// Outbound message addressed to a destination
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub destination: String,
    pub message_type: String,
    pub payload: Value,
}

impl Message {
    pub fn new(destination: impl Into<String>, message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            destination: destination.into(),
            message_type: message_type.into(),
            payload,
        }
    }

    /// Build a message from any serializable body
    pub fn from_body<T: Serialize>(
        destination: impl Into<String>,
        message_type: impl Into<String>,
        body: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(destination, message_type, serde_json::to_value(body)?))
    }
}

/// Settled response to a request
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub correlation_id: Uuid,
    pub message_type: String,
    pub payload: Value,
}

impl Response {
    pub fn from_envelope(envelope: Envelope) -> Option<Self> {
        let correlation_id = envelope.response_correlation()?;
        Some(Self {
            correlation_id,
            message_type: envelope.message_type,
            payload: envelope.payload,
        })
    }

    /// Decode the payload into a typed body
    pub fn body<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestRequest {
        message: String,
    }

    #[test]
    fn test_request_envelope_carries_correlation_and_reply_to() {
        let message = Message::from_body(
            "queue:TestCommand",
            "TestRequest",
            &TestRequest {
                message: "test-message".into(),
            },
        )
        .unwrap();
        let correlation_id = Uuid::new_v4();

        let envelope = Envelope::request(&message, correlation_id, "responses/client-1");
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();

        assert_eq!(decoded.kind, EnvelopeKind::Request);
        assert_eq!(decoded.correlation_id, Some(correlation_id));
        assert_eq!(decoded.reply_to.as_deref(), Some("responses/client-1"));
        assert_eq!(decoded.payload, json!({"message": "test-message"}));
        // Requests are not responses, even with a correlation id
        assert_eq!(decoded.response_correlation(), None);
    }

    #[test]
    fn test_event_envelope_omits_correlation_fields() {
        let message = Message::new("TestEvent", "TestEvent", json!({}));
        let encoded = Envelope::event(&message).encode().unwrap();
        let raw: Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(raw["kind"], "event");
        assert!(raw.get("correlation_id").is_none());
        assert!(raw.get("reply_to").is_none());
    }

    #[test]
    fn test_response_decodes_typed_body() {
        let message = Message::new("q", "TestRequest", json!({"message": "m"}));
        let request = Envelope::request(&message, Uuid::new_v4(), "replies");
        let reply = Envelope::response_to(&request, "TestRequest", request.payload.clone());

        let response = Response::from_envelope(reply).unwrap();
        assert_eq!(Some(response.correlation_id), request.correlation_id);
        let body: TestRequest = response.body().unwrap();
        assert_eq!(body.message, "m");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Envelope::decode(b"not json").is_err());
    }
}
