//! Fail-fast publish pipeline
//!
//! A publish either reaches the current handle or returns
//! [`ChannelUnavailable`](crate::error::ChannelUnavailable) right away. Nothing is buffered for later.

use super::channel::{Channel, ChannelRegistry};
use super::connection::ConnectionManager;
use super::envelope::{Envelope, Message};
use crate::error::PublishError;
use crate::observability::metrics::metrics;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Publisher {
    registry: ChannelRegistry,
    manager: Arc<ConnectionManager>,
}

impl Publisher {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            registry: ChannelRegistry::new(manager.clone()),
            manager,
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Publish `message` as an event on the current connection
    pub async fn publish(&self, message: &Message) -> Result<(), PublishError> {
        let channel = match self.registry.obtain() {
            Ok(channel) => channel,
            Err(e) => {
                metrics().record_publish_rejected();
                debug!(
                    destination = %message.destination,
                    state = %e.state,
                    "Publish rejected, no open channel"
                );
                return Err(e.into());
            }
        };

        let envelope = Envelope::event(message);
        match self.send_on(&channel, &message.destination, &envelope).await {
            Ok(()) => {
                metrics().record_publish_succeeded();
                debug!(
                    destination = %message.destination,
                    message_id = %envelope.message_id,
                    generation = channel.generation(),
                    "Published event"
                );
                Ok(())
            }
            Err(e) => {
                metrics().record_publish_rejected();
                warn!(
                    destination = %message.destination,
                    generation = channel.generation(),
                    error = %e,
                    "Publish failed"
                );
                Err(e)
            }
        }
    }

    /// Encode `envelope` and send it through `channel`
    pub(crate) async fn send_on(
        &self,
        channel: &Channel,
        destination: &str,
        envelope: &Envelope,
    ) -> Result<(), PublishError> {
        let bytes = envelope.encode()?;
        self.manager.send_on(channel, destination, bytes).await?;
        Ok(())
    }
}
