//! Message-bus engine
//!
//! - [`connection`] - Connection manager: single owner of the transport handle
//!   and the generation counter, plus the reconnect supervisor
//! - [`channel`] - Generation-stamped channels and their validation
//! - [`publisher`] - Fire-and-forget publishing that fails fast while down
//! - [`request`] - Correlated request/response with timeout and fault settlement
//! - [`health_monitor`] - Pure health and reconnection policy
//! - [`envelope`] - Wire envelope and message types
//! - [`client`] - Facade wiring all of the above around one transport

pub mod channel;
pub mod client;
pub mod connection;
pub mod envelope;
pub mod health_monitor;
pub mod publisher;
pub mod request;

pub use channel::{Channel, ChannelRegistry};
pub use client::{BusClient, BusOptions, Delivery};
pub use connection::{
    ConnectionManager, ConnectionSettings, ConnectionSnapshot, ConnectionState, ReconnectConfig,
};
pub use envelope::{Envelope, EnvelopeKind, Message, Response};
pub use health_monitor::{
    HealthMonitor, HealthReport, HealthStatus, HealthVerdict, ReconnectionDecision,
};
pub use publisher::Publisher;
pub use request::RequestCoordinator;
