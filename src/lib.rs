//! Resilient Bus - message-bus client
//!
//! A message-bus client that survives broker outages without ever publishing
//! on a dead connection or leaving a caller waiting on a response that can no
//! longer arrive.
//!
//! # Overview
//!
//! - A single connection manager owns the transport handle and a generation
//!   counter; every successful open starts a new generation
//! - Channels are stamped with the generation they were obtained under and
//!   are only valid while the connection is open at that generation
//! - Publishing fails fast with [`error::ChannelUnavailable`] while the
//!   connection is down
//! - Requests settle exactly once: response, timeout or fault when the
//!   generation they were issued on is lost
//! - Health is derived from the same state the publish path sees
//!
//! # Quick Start
//!
//! ```rust
//! use resilient_bus::bus::{BusClient, BusOptions, Message};
//! use resilient_bus::testing::MockBroker;
//! use resilient_bus::transport::BrokerAddress;
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let broker = MockBroker::new();
//! let address = BrokerAddress::parse("mqtt://localhost:1883")?;
//! let client = BusClient::new(BusOptions::new("orders", address), Arc::new(broker));
//!
//! client.start().await?;
//! client.wait_until_open(Duration::from_secs(1)).await?;
//!
//! client
//!     .publish(&Message::new("orders/created", "OrderCreated", json!({"id": 7})))
//!     .await?;
//!
//! let response = client
//!     .request(&Message::new("queue:Quote", "QuoteRequest", json!({"sku": "a"})), None)
//!     .await?;
//! assert_eq!(response.payload["sku"], "a");
//!
//! client.stop().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod observability;
pub mod testing;
pub mod transport;

pub use bus::{
    BusClient, BusOptions, ConnectionState, HealthStatus, HealthVerdict, Message, Response,
};
pub use config::{BusConfig, ConfigError};
pub use error::{BusError, BusResult, ChannelUnavailable, PublishError, RequestFault};
pub use transport::mqtt::MqttTransport;
pub use transport::{BrokerAddress, Credentials, Transport, TransportHandle};
