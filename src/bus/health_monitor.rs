//! Health verdicts and reconnection decisions
//!
//! Everything here is a pure function of a [`ConnectionSnapshot`] or the
//! reconnect counters, so it can be called from any task without locking
//! beyond the single snapshot read.

use super::connection::{ConnectionManager, ConnectionSnapshot, ConnectionState, ReconnectConfig};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Three-level health taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of the bus connection at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthVerdict {
    pub status: HealthStatus,
    pub last_observed_state: ConnectionState,
    pub consecutive_failures: u32,
    pub generation: u64,
}

/// Operator-facing probe result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub detail: String,
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Sleep `delay_ms`, then make attempt number `attempt`
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts exceeded
    AbortRetryBudgetExhausted { attempts: u32 },
    /// Abort reconnection - credentials keep being rejected
    AbortAuthenticationRejected { attempts: u32 },
}

/// Samples the connection manager and reports a health verdict
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    manager: Arc<ConnectionManager>,
    grace_attempts: u32,
}

impl HealthMonitor {
    pub fn new(manager: Arc<ConnectionManager>, grace_attempts: u32) -> Self {
        Self {
            manager,
            grace_attempts,
        }
    }

    /// Synchronous, side-effect-free health check
    pub fn check_health(&self) -> HealthVerdict {
        Self::evaluate(&self.manager.snapshot(), self.grace_attempts)
    }

    /// Verdict plus a human-readable explanation for probes
    pub fn probe(&self) -> HealthReport {
        self.inspect().1
    }

    /// Verdict and report taken from the same snapshot
    pub fn inspect(&self) -> (HealthVerdict, HealthReport) {
        let snapshot = self.manager.snapshot();
        let verdict = Self::evaluate(&snapshot, self.grace_attempts);
        let report = HealthReport {
            status: verdict.status,
            detail: Self::describe(&snapshot, self.grace_attempts),
        };
        (verdict, report)
    }

    /// Map a snapshot to a verdict (pure function)
    pub fn evaluate(snapshot: &ConnectionSnapshot, grace_attempts: u32) -> HealthVerdict {
        let status = match snapshot.state {
            ConnectionState::Open => HealthStatus::Healthy,
            ConnectionState::Connecting if snapshot.consecutive_failures <= grace_attempts => {
                HealthStatus::Degraded
            }
            ConnectionState::Connecting
            | ConnectionState::Closed
            | ConnectionState::Closing
            | ConnectionState::Faulted => HealthStatus::Unhealthy,
        };
        HealthVerdict {
            status,
            last_observed_state: snapshot.state,
            consecutive_failures: snapshot.consecutive_failures,
            generation: snapshot.generation,
        }
    }

    fn describe(snapshot: &ConnectionSnapshot, grace_attempts: u32) -> String {
        let base = match snapshot.state {
            ConnectionState::Open => {
                format!("connection open (generation {})", snapshot.generation)
            }
            ConnectionState::Connecting => format!(
                "reconnecting, {} consecutive failures (grace {})",
                snapshot.consecutive_failures, grace_attempts
            ),
            ConnectionState::Closed if snapshot.generation == 0 => {
                "connection not started".to_string()
            }
            ConnectionState::Closed => {
                format!("connection lost (generation {})", snapshot.generation)
            }
            ConnectionState::Closing => "client stopped".to_string(),
            ConnectionState::Faulted => {
                "connection faulted, manual reset required".to_string()
            }
        };
        match &snapshot.last_error {
            Some(last_error) if snapshot.state != ConnectionState::Open => {
                format!("{base}: {last_error}")
            }
            _ => base,
        }
    }

    /// Decide whether to retry after `failures` consecutive failed opens (pure function)
    pub fn should_attempt_reconnection(
        failures: u32,
        auth_failures: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if config.auth_failure_budget > 0 && auth_failures >= config.auth_failure_budget {
            return ReconnectionDecision::AbortAuthenticationRejected {
                attempts: auth_failures,
            };
        }

        if let Some(max_attempts) = config.max_attempts {
            if failures >= max_attempts {
                return ReconnectionDecision::AbortRetryBudgetExhausted { attempts: failures };
            }
        }

        ReconnectionDecision::Proceed {
            attempt: failures + 1,
            delay_ms: config.calculate_backoff_delay(failures),
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Open)
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Open) => {
                info!("Bus connection established");
            }
            (ConnectionState::Open, ConnectionState::Closed) => {
                warn!("Bus connection lost, channels invalidated");
            }
            (ConnectionState::Closed, ConnectionState::Connecting) => {
                info!("Reconnecting to broker");
            }
            (ConnectionState::Faulted, ConnectionState::Connecting) => {
                info!("Reconnecting to broker after reset");
            }
            (_, ConnectionState::Faulted) => {
                error!("Bus connection faulted: {:?} -> Faulted", from);
            }
            (_, ConnectionState::Closing) => {
                info!("Bus connection closing");
            }
            _ => {
                info!("Bus connection state: {:?} -> {:?}", from, to);
            }
        }
    }

    /// Validate reconnect configuration
    pub fn validate_reconnect_config(config: &ReconnectConfig) -> Result<(), String> {
        if let Some(max_attempts) = config.max_attempts {
            if max_attempts == 0 {
                return Err("max_attempts must be greater than 0 or unset for unlimited".to_string());
            }
        }

        if config.initial_delay_ms == 0 {
            return Err("initial_delay_ms must be greater than 0".to_string());
        }

        if !config.multiplier.is_finite() || config.multiplier < 1.0 {
            return Err("multiplier must be a finite number >= 1.0".to_string());
        }

        if config.max_delay_ms < config.initial_delay_ms {
            return Err("max_delay_ms must not be smaller than initial_delay_ms".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: ConnectionState, failures: u32) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state,
            generation: 4,
            consecutive_failures: failures,
            last_error: None,
        }
    }

    #[test]
    fn test_evaluate_maps_states_to_verdicts() {
        let grace = 3;
        let cases = [
            (ConnectionState::Open, 0, HealthStatus::Healthy),
            (ConnectionState::Connecting, 0, HealthStatus::Degraded),
            (ConnectionState::Connecting, 3, HealthStatus::Degraded),
            (ConnectionState::Connecting, 4, HealthStatus::Unhealthy),
            (ConnectionState::Closed, 0, HealthStatus::Unhealthy),
            (ConnectionState::Closing, 0, HealthStatus::Unhealthy),
            (ConnectionState::Faulted, 7, HealthStatus::Unhealthy),
        ];

        for (state, failures, expected) in cases {
            let verdict = HealthMonitor::evaluate(&snapshot(state, failures), grace);
            assert_eq!(verdict.status, expected, "{state:?} with {failures} failures");
            assert_eq!(verdict.last_observed_state, state);
            assert_eq!(verdict.consecutive_failures, failures);
        }
    }

    #[test]
    fn test_describe_includes_last_error_when_not_open() {
        let mut snap = snapshot(ConnectionState::Connecting, 2);
        snap.last_error = Some("Broker unreachable: refused".to_string());
        let detail = HealthMonitor::describe(&snap, 5);
        assert!(detail.contains("2 consecutive failures"));
        assert!(detail.contains("refused"));

        let mut open = snapshot(ConnectionState::Open, 0);
        open.last_error = Some("stale".to_string());
        assert_eq!(
            HealthMonitor::describe(&open, 5),
            "connection open (generation 4)"
        );
    }

    #[test]
    fn test_should_attempt_reconnection() {
        let config = ReconnectConfig::default();

        let decision = HealthMonitor::should_attempt_reconnection(1, 0, &config, false);
        assert_eq!(
            decision,
            ReconnectionDecision::Proceed {
                attempt: 2,
                delay_ms: 25
            }
        );

        let decision = HealthMonitor::should_attempt_reconnection(1, 0, &config, true);
        assert_eq!(decision, ReconnectionDecision::AbortShutdownRequested);

        let decision = HealthMonitor::should_attempt_reconnection(10, 0, &config, false);
        assert_eq!(
            decision,
            ReconnectionDecision::Proceed {
                attempt: 11,
                delay_ms: 250
            }
        );

        let limited = ReconnectConfig {
            max_attempts: Some(5),
            ..Default::default()
        };
        let decision = HealthMonitor::should_attempt_reconnection(5, 0, &limited, false);
        assert_eq!(
            decision,
            ReconnectionDecision::AbortRetryBudgetExhausted { attempts: 5 }
        );
    }

    #[test]
    fn test_auth_rejections_exhaust_their_own_budget() {
        let config = ReconnectConfig {
            auth_failure_budget: 2,
            ..Default::default()
        };

        assert!(matches!(
            HealthMonitor::should_attempt_reconnection(1, 1, &config, false),
            ReconnectionDecision::Proceed { .. }
        ));
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(2, 2, &config, false),
            ReconnectionDecision::AbortAuthenticationRejected { attempts: 2 }
        );

        // A zero budget disables the auth check entirely
        let unlimited = ReconnectConfig {
            auth_failure_budget: 0,
            ..Default::default()
        };
        assert!(matches!(
            HealthMonitor::should_attempt_reconnection(9, 9, &unlimited, false),
            ReconnectionDecision::Proceed { .. }
        ));
    }

    #[test]
    fn test_can_publish() {
        assert!(HealthMonitor::can_publish(ConnectionState::Open));
        assert!(!HealthMonitor::can_publish(ConnectionState::Connecting));
        assert!(!HealthMonitor::can_publish(ConnectionState::Closed));
        assert!(!HealthMonitor::can_publish(ConnectionState::Closing));
        assert!(!HealthMonitor::can_publish(ConnectionState::Faulted));
    }

    #[test]
    fn test_validate_reconnect_config() {
        assert!(HealthMonitor::validate_reconnect_config(&ReconnectConfig::default()).is_ok());

        let zero_attempts = ReconnectConfig {
            max_attempts: Some(0),
            ..Default::default()
        };
        assert!(HealthMonitor::validate_reconnect_config(&zero_attempts).is_err());

        let shrinking = ReconnectConfig {
            multiplier: 0.5,
            ..Default::default()
        };
        assert!(HealthMonitor::validate_reconnect_config(&shrinking).is_err());

        let inverted = ReconnectConfig {
            initial_delay_ms: 500,
            max_delay_ms: 100,
            ..Default::default()
        };
        assert!(HealthMonitor::validate_reconnect_config(&inverted).is_err());
    }

    #[test]
    fn test_health_status_strings() {
        assert_eq!(HealthStatus::Healthy.as_str(), "healthy");
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }
}
