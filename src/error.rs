//! Error types for bus operations
//!
//! Callers only ever see a small, transport-independent surface:
//! [`ChannelUnavailable`] for anything that failed because no usable
//! connection existed, and [`RequestFault`] for the terminal outcome of a
//! request. Raw transport errors stay inside the engine.

use crate::bus::connection::{ConnectionSnapshot, ConnectionState};
use crate::transport::OpenError;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// No usable connection at the moment of the operation
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Channel unavailable: connection is {state} at generation {current_generation}")]
pub struct ChannelUnavailable {
    pub state: ConnectionState,
    pub current_generation: u64,
    /// Generation of the channel that was rejected, if one was presented
    pub channel_generation: Option<u64>,
}

impl ChannelUnavailable {
    pub(crate) fn observed(snapshot: &ConnectionSnapshot, channel_generation: Option<u64>) -> Self {
        Self {
            state: snapshot.state,
            current_generation: snapshot.generation,
            channel_generation,
        }
    }
}

/// Failure of a fire-and-forget publish
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    ChannelUnavailable(#[from] ChannelUnavailable),
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PublishError {
    pub fn is_channel_unavailable(&self) -> bool {
        matches!(self, PublishError::ChannelUnavailable(_))
    }
}

/// Why a request did not produce a response
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FaultCause {
    #[error("timed out after {after:?}")]
    Timeout { after: Duration },
    #[error(transparent)]
    ChannelUnavailable(ChannelUnavailable),
    #[error("request could not be encoded: {reason}")]
    Malformed { reason: String },
}

/// Terminal outcome of a request that did not resolve with a response
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Request {correlation_id} faulted: {cause}")]
pub struct RequestFault {
    pub correlation_id: Uuid,
    #[source]
    pub cause: FaultCause,
}

impl RequestFault {
    pub fn timeout(correlation_id: Uuid, after: Duration) -> Self {
        Self {
            correlation_id,
            cause: FaultCause::Timeout { after },
        }
    }

    pub fn channel_unavailable(correlation_id: Uuid, cause: ChannelUnavailable) -> Self {
        Self {
            correlation_id,
            cause: FaultCause::ChannelUnavailable(cause),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, FaultCause::Timeout { .. })
    }

    pub fn is_channel_unavailable(&self) -> bool {
        matches!(self.cause, FaultCause::ChannelUnavailable(_))
    }
}

/// Application-level error for bus client operations
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Request(#[from] RequestFault),

    #[error("Transport open failed: {0}")]
    Open(#[from] OpenError),

    #[error("Bus client has been stopped")]
    ClientStopped,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BusError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for bus client operations
pub type BusResult<T> = Result<T, BusError>;
