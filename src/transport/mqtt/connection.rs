//! MQTT connection option building
//!
//! Pure functions turning a [`BrokerAddress`] and [`Credentials`] into
//! `rumqttc` options.

use crate::transport::{BrokerAddress, Credentials};
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Largest packet accepted or sent, in bytes
pub const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Unique client id per connection attempt, so a lingering session from a
/// previous generation never collides with the new one
pub fn connection_client_id(client_id: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{client_id}-{timestamp}")
}

/// Build `rumqttc` options for one connection attempt (pure function)
pub fn configure_mqtt_options(
    client_id: &str,
    address: &BrokerAddress,
    credentials: &Credentials,
    keep_alive: Duration,
) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(connection_client_id(client_id), address.host(), address.port());

    if address.is_tls() {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &credentials.username {
        let password = credentials.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, &password);
    }

    mqtt_options.set_keep_alive(keep_alive);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));
    mqtt_options
}
