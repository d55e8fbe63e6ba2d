//! Generation-scoped channels
//!
//! A [`Channel`] is nothing but the generation it was obtained under. It never
//! holds the transport handle, so invalidation is a value comparison against
//! the manager's current generation, checked at the point of use.

use super::connection::ConnectionManager;
use crate::error::ChannelUnavailable;
use std::sync::Arc;

/// Logical send handle, valid only while its generation is the open one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel {
    generation: u64,
}

impl Channel {
    pub(crate) fn new(generation: u64) -> Self {
        Self { generation }
    }

    /// Connection generation this channel was obtained under
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Derives channels from the manager's current connection
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    manager: Arc<ConnectionManager>,
}

impl ChannelRegistry {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// Channel stamped with the current generation, or `ChannelUnavailable`
    /// if the connection is not open right now
    pub fn obtain(&self) -> Result<Channel, ChannelUnavailable> {
        self.manager.obtain_channel()
    }

    /// Reject `channel` if its generation is no longer the open one
    pub fn validate(&self, channel: &Channel) -> Result<(), ChannelUnavailable> {
        self.manager.validate(channel)
    }

    pub fn is_valid(&self, channel: &Channel) -> bool {
        self.validate(channel).is_ok()
    }
}
