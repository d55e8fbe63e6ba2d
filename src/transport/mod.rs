//! Transport capability consumed by the bus engine
//!
//! The engine never speaks a broker protocol itself. It asks a [`Transport`]
//! to open a [`TransportHandle`], sends bytes through that handle, and waits
//! on the handle's one-shot close notification. Everything else (framing,
//! acknowledgements, sockets) belongs to the implementation behind the trait.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub mod mqtt;

/// Credentials presented when opening a connection
#[derive(Clone, Default, PartialEq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }
}

// Never print the password, even at trace level
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Broker address parsed from the configured URL
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerAddress {
    url: Url,
}

impl BrokerAddress {
    pub fn parse(raw: &str) -> Result<Self, OpenError> {
        let url = Url::parse(raw).map_err(|_| OpenError::InvalidConfiguration {
            reason: format!("invalid broker URL: {raw}"),
        })?;
        if url.host_str().is_none() {
            return Err(OpenError::InvalidConfiguration {
                reason: format!("broker URL has no host: {raw}"),
            });
        }
        Ok(Self { url })
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn is_tls(&self) -> bool {
        self.url.scheme() == "mqtts"
    }

    /// Port from the URL, falling back to the scheme default
    pub fn port(&self) -> u16 {
        self.url
            .port()
            .unwrap_or(if self.is_tls() { 8883 } else { 1883 })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host(), self.port())
    }
}

/// A frame received from the broker, handed to the inbound sink
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub source: String,
    pub payload: Bytes,
}

/// Sink that transports push inbound frames into
pub type InboundSender = mpsc::Sender<InboundFrame>;

/// Why a handle stopped being usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Broker sent a disconnect or went away
    BrokerClosed,
    /// Socket or protocol level failure
    NetworkError(String),
    /// The local side closed the handle
    ClosedLocally,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::BrokerClosed => write!(f, "broker closed the connection"),
            CloseReason::NetworkError(e) => write!(f, "network error: {e}"),
            CloseReason::ClosedLocally => write!(f, "closed locally"),
        }
    }
}

/// Failure to open a transport handle
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OpenError {
    #[error("Broker unreachable: {reason}")]
    Unreachable { reason: String },
    #[error("Authentication rejected: {reason}")]
    AuthenticationRejected { reason: String },
    #[error("Invalid transport configuration: {reason}")]
    InvalidConfiguration { reason: String },
    #[error("Open timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },
}

impl OpenError {
    /// Authentication and configuration errors will not fix themselves
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            OpenError::AuthenticationRejected { .. } | OpenError::InvalidConfiguration { .. }
        )
    }
}

/// Failure of a single send on an open handle
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SendError {
    #[error("Transport handle is closed")]
    HandleClosed,
    #[error("Transport rejected the send: {reason}")]
    Rejected { reason: String },
}

/// Opens connections to a broker
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new handle. Inbound frames for this connection go to `inbound`.
    async fn open(
        &self,
        credentials: &Credentials,
        address: &BrokerAddress,
        inbound: InboundSender,
    ) -> Result<Arc<dyn TransportHandle>, OpenError>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// A live connection to the broker
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Hand a payload to the broker for `destination`
    async fn send(&self, destination: &str, payload: Bytes) -> Result<(), SendError>;

    /// Resolves once, when the handle becomes unusable. Safe to await repeatedly.
    async fn closed(&self) -> CloseReason;

    /// Release the connection. Idempotent.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_address_defaults_port_by_scheme() {
        let plain = BrokerAddress::parse("mqtt://broker.local").unwrap();
        assert_eq!(plain.port(), 1883);
        assert!(!plain.is_tls());

        let tls = BrokerAddress::parse("mqtts://broker.local").unwrap();
        assert_eq!(tls.port(), 8883);
        assert!(tls.is_tls());

        let explicit = BrokerAddress::parse("mqtt://broker.local:61616").unwrap();
        assert_eq!(explicit.port(), 61616);
        assert_eq!(explicit.to_string(), "broker.local:61616");
    }

    #[test]
    fn test_broker_address_rejects_garbage() {
        assert!(matches!(
            BrokerAddress::parse("not a url"),
            Err(OpenError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("admin", "hunter2");
        let printed = format!("{creds:?}");
        assert!(printed.contains("admin"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_open_error_auth_classification() {
        assert!(OpenError::AuthenticationRejected {
            reason: "bad password".into()
        }
        .is_auth_failure());
        assert!(!OpenError::Unreachable {
            reason: "refused".into()
        }
        .is_auth_failure());
        assert!(!OpenError::TimedOut { after_ms: 10 }.is_auth_failure());
    }
}
