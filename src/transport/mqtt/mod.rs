//! MQTT implementation of the transport capability
//!
//! - [`connection`] - Pure option building from address and credentials
//! - [`message_handler`] - Pure event routing and error classification
//! - [`client`] - The `rumqttc` event loop pump and handle I/O
//!
//! # Usage
//!
//! ```rust,no_run
//! use resilient_bus::transport::mqtt::MqttTransport;
//! use resilient_bus::transport::{BrokerAddress, Credentials, Transport};
//!
//! # tokio_test::block_on(async {
//! let transport = MqttTransport::new("orders", vec!["responses/orders".to_string()]);
//! let address = BrokerAddress::parse("mqtt://localhost:1883")?;
//! let (inbound_tx, _inbound_rx) = tokio::sync::mpsc::channel(64);
//! let handle = transport
//!     .open(&Credentials::anonymous(), &address, inbound_tx)
//!     .await?;
//! handle.close().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use message_handler::EventRoute;
