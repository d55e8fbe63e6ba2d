//! Request/response coordination
//!
//! Each request registers a pending entry keyed by a fresh correlation id and
//! then races three outcomes: the response, its deadline, and loss of the
//! generation it was sent on. Whoever removes the entry from the pending map
//! settles the request; everyone else backs off.

use super::channel::Channel;
use super::connection::ConnectionManager;
use super::envelope::{Envelope, Message, Response};
use super::publisher::Publisher;
use crate::error::{ChannelUnavailable, FaultCause, PublishError, RequestFault};
use crate::observability::metrics::metrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

struct PendingRequest {
    responder: oneshot::Sender<Response>,
    generation: u64,
    issued_at: Instant,
}

/// Deadlines this far out are as good as never
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `issued_at + timeout`, saturating at a far-future instant instead of overflowing
fn deadline_for(issued_at: Instant, timeout: Duration) -> Instant {
    issued_at
        .checked_add(timeout)
        .unwrap_or_else(|| issued_at + FAR_FUTURE)
}

type PendingMap = Arc<Mutex<HashMap<Uuid, PendingRequest>>>;

fn lock_pending(pending: &PendingMap) -> MutexGuard<'_, HashMap<Uuid, PendingRequest>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes the pending entry when the request future goes away, settled or not
struct PendingGuard {
    pending: PendingMap,
    correlation_id: Uuid,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if lock_pending(&self.pending)
            .remove(&self.correlation_id)
            .is_some()
        {
            debug!(correlation_id = %self.correlation_id, "Request abandoned by caller");
        }
    }
}

/// Correlates requests with their responses
#[derive(Clone)]
pub struct RequestCoordinator {
    publisher: Publisher,
    manager: Arc<ConnectionManager>,
    pending: PendingMap,
    reply_to: String,
}

impl RequestCoordinator {
    pub fn new(manager: Arc<ConnectionManager>, reply_to: impl Into<String>) -> Self {
        Self {
            publisher: Publisher::new(manager.clone()),
            manager,
            pending: Arc::new(Mutex::new(HashMap::new())),
            reply_to: reply_to.into(),
        }
    }

    /// Destination responses are expected on
    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    /// Number of requests still waiting for settlement
    pub fn pending_count(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    /// Send `message` as a request and wait for its response.
    ///
    /// Settles exactly once: with the response, with
    /// [`FaultCause::Timeout`] once `timeout` elapses, or with
    /// [`FaultCause::ChannelUnavailable`] if no channel was open or the
    /// generation it went out on is lost before the response arrives.
    /// Dropping the returned future abandons the request.
    pub async fn request(
        &self,
        message: &Message,
        timeout: Duration,
    ) -> Result<Response, RequestFault> {
        let correlation_id = Uuid::new_v4();
        metrics().record_request_issued();
        let span = crate::request_span!(
            correlation_id = %correlation_id,
            destination = %message.destination,
            message_type = %message.message_type
        );
        self.run(correlation_id, message, timeout)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        correlation_id: Uuid,
        message: &Message,
        timeout: Duration,
    ) -> Result<Response, RequestFault> {
        let issued_at = Instant::now();
        let deadline = deadline_for(issued_at, timeout);

        let channel = match self.publisher.registry().obtain() {
            Ok(channel) => channel,
            Err(unavailable) => {
                metrics().record_request_faulted();
                debug!(state = %unavailable.state, "Request rejected, no open channel");
                return Err(RequestFault::channel_unavailable(correlation_id, unavailable));
            }
        };

        let (responder, mut slot) = oneshot::channel();
        lock_pending(&self.pending).insert(
            correlation_id,
            PendingRequest {
                responder,
                generation: channel.generation(),
                issued_at,
            },
        );
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            correlation_id,
        };

        let envelope = Envelope::request(message, correlation_id, &self.reply_to);
        let sent = tokio::time::timeout_at(
            deadline,
            self.publisher
                .send_on(&channel, &message.destination, &envelope),
        )
        .await;

        match sent {
            Ok(Ok(())) => {
                debug!(generation = channel.generation(), "Request sent");
            }
            Ok(Err(PublishError::ChannelUnavailable(unavailable))) => {
                return self.settle(
                    correlation_id,
                    &mut slot,
                    FaultCause::ChannelUnavailable(unavailable),
                );
            }
            Ok(Err(PublishError::Encode(e))) => {
                return self.settle(
                    correlation_id,
                    &mut slot,
                    FaultCause::Malformed {
                        reason: e.to_string(),
                    },
                );
            }
            Err(_) => {
                return self.settle(correlation_id, &mut slot, FaultCause::Timeout { after: timeout });
            }
        }

        tokio::select! {
            biased;
            delivered = &mut slot => match delivered {
                Ok(response) => Ok(response),
                Err(_) => {
                    let cause = self.lost_cause(&channel);
                    self.settle(correlation_id, &mut slot, cause)
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                self.settle(correlation_id, &mut slot, FaultCause::Timeout { after: timeout })
            }
            _ = self.manager.generation_lost(channel.generation()) => {
                let cause = self.lost_cause(&channel);
                self.settle(correlation_id, &mut slot, cause)
            }
        }
    }

    fn lost_cause(&self, channel: &Channel) -> FaultCause {
        FaultCause::ChannelUnavailable(ChannelUnavailable::observed(
            &self.manager.snapshot(),
            Some(channel.generation()),
        ))
    }

    /// Try to settle with `cause`. If a response was delivered first, return it instead.
    fn settle(
        &self,
        correlation_id: Uuid,
        slot: &mut oneshot::Receiver<Response>,
        cause: FaultCause,
    ) -> Result<Response, RequestFault> {
        let removed = lock_pending(&self.pending).remove(&correlation_id);
        if removed.is_none() {
            // deliver_response won; it sends while holding the lock
            if let Ok(response) = slot.try_recv() {
                return Ok(response);
            }
        }

        match &cause {
            FaultCause::Timeout { after } => {
                metrics().record_request_timed_out();
                warn!(after_ms = after.as_millis() as u64, "Request timed out");
            }
            other => {
                metrics().record_request_faulted();
                warn!(cause = %other, "Request faulted");
            }
        }
        Err(RequestFault {
            correlation_id,
            cause,
        })
    }

    /// Hand a response to its pending request.
    ///
    /// Returns false if the correlation id is unknown or already settled; such
    /// responses are dropped.
    pub fn deliver_response(&self, response: Response) -> bool {
        let correlation_id = response.correlation_id;
        let mut pending = lock_pending(&self.pending);
        let Some(entry) = pending.remove(&correlation_id) else {
            drop(pending);
            metrics().record_late_response();
            debug!(correlation_id = %correlation_id, "Dropping response with no pending request");
            return false;
        };

        let latency = entry.issued_at.elapsed();
        if entry.responder.send(response).is_err() {
            return false;
        }
        drop(pending);

        metrics().record_request_resolved(latency);
        debug!(
            correlation_id = %correlation_id,
            generation = entry.generation,
            latency_ms = latency.as_millis() as u64,
            "Response delivered"
        );
        true
    }
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("reply_to", &self.reply_to)
            .field("pending", &self.pending_count())
            .finish()
    }
}
