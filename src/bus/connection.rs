//! Connection manager and reconnect supervisor
//!
//! The manager owns the single current [`TransportHandle`] and the connection
//! generation. Both live in one `watch` cell together with the observable
//! [`ConnectionSnapshot`], so every reader sees state, generation and handle
//! from the same write. The supervisor task is the only thing that opens
//! handles; the close path and `report_send_failure` are the only things that
//! invalidate them.

use super::channel::Channel;
use super::health_monitor::{HealthMonitor, ReconnectionDecision};
use crate::error::{BusError, BusResult, ChannelUnavailable};
use crate::observability::metrics::metrics;
use crate::transport::{
    BrokerAddress, CloseReason, Credentials, InboundSender, OpenError, Transport, TransportHandle,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Lifecycle state of the logical bus connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Opening a handle, or backing off between attempts
    Connecting,
    /// A handle is current and channels may be obtained
    Open,
    /// `stop()` was called; terminal
    Closing,
    /// The last handle was lost and no new one is open yet
    Closed,
    /// Retry budget exhausted; terminal until `reset()`
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Open => "Open",
            ConnectionState::Closing => "Closing",
            ConnectionState::Closed => "Closed",
            ConnectionState::Faulted => "Faulted",
        };
        f.write_str(name)
    }
}

/// Reconnection backoff policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Growth factor applied per consecutive failure
    pub multiplier: f64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
    /// Consecutive failed opens before faulting (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Consecutive authentication rejections before faulting
    pub auth_failure_budget: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 25,
            multiplier: 2.0,
            max_delay_ms: 250,
            max_attempts: None,
            auth_failure_budget: 3,
        }
    }
}

impl ReconnectConfig {
    /// Total time spent backing off before the budget is exhausted.
    /// Returns None if unlimited retries are configured.
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            (1..max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }

    /// Delay to wait after `failures` consecutive failed opens
    pub fn calculate_backoff_delay(&self, failures: u32) -> u64 {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        if raw.is_finite() {
            raw.min(self.max_delay_ms as f64) as u64
        } else {
            self.max_delay_ms
        }
    }
}

/// Everything the supervisor needs to open a handle
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub credentials: Credentials,
    pub address: BrokerAddress,
    pub reconnect: ReconnectConfig,
    pub open_timeout: Duration,
}

/// Consistent view of the connection at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    /// Incremented on every successful open; 0 means never opened
    pub generation: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl ConnectionSnapshot {
    fn initial() -> Self {
        Self {
            state: ConnectionState::Closed,
            generation: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

/// Snapshot plus the handle it describes. Only ever replaced as a unit.
pub(crate) struct ConnectionCell {
    pub(crate) snapshot: ConnectionSnapshot,
    handle: Option<Arc<dyn TransportHandle>>,
}

impl ConnectionCell {
    pub(crate) fn accepts(&self, channel: &Channel) -> bool {
        self.snapshot.state == ConnectionState::Open
            && self.snapshot.generation == channel.generation()
    }

    fn is_terminal(&self) -> bool {
        self.snapshot.state == ConnectionState::Closing
    }
}

#[derive(Default)]
struct SupervisorControl {
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    stopped: bool,
}

/// Owns the transport handle lifecycle and runs the reconnect loop
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    settings: ConnectionSettings,
    inbound: InboundSender,
    cell: watch::Sender<ConnectionCell>,
    control: Mutex<SupervisorControl>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: ConnectionSettings,
        inbound: InboundSender,
    ) -> Self {
        let (cell, _) = watch::channel(ConnectionCell {
            snapshot: ConnectionSnapshot::initial(),
            handle: None,
        });
        Self {
            transport,
            settings,
            inbound,
            cell,
            control: Mutex::new(SupervisorControl::default()),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Sink every opened handle delivers inbound frames to
    pub fn inbound_sender(&self) -> InboundSender {
        self.inbound.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.cell.borrow().snapshot.state
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.cell.borrow().snapshot.clone()
    }

    /// Channel stamped with the current generation, if the connection is open
    pub fn current_channel(&self) -> Option<Channel> {
        self.obtain_channel().ok()
    }

    pub(crate) fn obtain_channel(&self) -> Result<Channel, ChannelUnavailable> {
        let cell = self.cell.borrow();
        if cell.snapshot.state == ConnectionState::Open {
            Ok(Channel::new(cell.snapshot.generation))
        } else {
            Err(ChannelUnavailable::observed(&cell.snapshot, None))
        }
    }

    pub(crate) fn validate(&self, channel: &Channel) -> Result<(), ChannelUnavailable> {
        let cell = self.cell.borrow();
        if cell.accepts(channel) {
            Ok(())
        } else {
            Err(ChannelUnavailable::observed(
                &cell.snapshot,
                Some(channel.generation()),
            ))
        }
    }

    /// Send through the handle that `channel` was obtained from.
    /// The channel is re-validated and the handle cloned under the same read.
    pub(crate) async fn send_on(
        &self,
        channel: &Channel,
        destination: &str,
        payload: Bytes,
    ) -> Result<(), ChannelUnavailable> {
        let handle = {
            let cell = self.cell.borrow();
            match (&cell.handle, cell.accepts(channel)) {
                (Some(handle), true) => handle.clone(),
                _ => {
                    return Err(ChannelUnavailable::observed(
                        &cell.snapshot,
                        Some(channel.generation()),
                    ))
                }
            }
        };

        if let Err(e) = handle.send(destination, payload).await {
            warn!(
                generation = channel.generation(),
                destination = %destination,
                error = %e,
                "Send failed on open channel, invalidating generation"
            );
            self.report_send_failure(channel.generation());
            let cell = self.cell.borrow();
            return Err(ChannelUnavailable::observed(
                &cell.snapshot,
                Some(channel.generation()),
            ));
        }
        Ok(())
    }

    /// Treat a failed send as loss of `generation`. No-op if it is no longer current.
    pub fn report_send_failure(&self, generation: u64) -> bool {
        self.invalidate(
            generation,
            &CloseReason::NetworkError("send failed on current handle".to_string()),
        )
    }

    /// Resolves once `generation` is no longer the open generation
    pub(crate) async fn generation_lost(&self, generation: u64) {
        let mut rx = self.cell.subscribe();
        loop {
            {
                let cell = rx.borrow_and_update();
                if cell.snapshot.state != ConnectionState::Open
                    || cell.snapshot.generation != generation
                {
                    return;
                }
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait until the state satisfies `predicate`, or the timeout elapses
    pub async fn wait_for_state<F>(&self, predicate: F, timeout: Duration) -> Option<ConnectionSnapshot>
    where
        F: Fn(&ConnectionSnapshot) -> bool,
    {
        let mut rx = self.cell.subscribe();
        let wait = async {
            loop {
                {
                    let cell = rx.borrow_and_update();
                    if predicate(&cell.snapshot) {
                        return Some(cell.snapshot.clone());
                    }
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    /// Spawn the reconnect supervisor. Idempotent while running.
    pub async fn start(self: &Arc<Self>) -> BusResult<()> {
        let mut control = self.control.lock().await;
        if control.stopped {
            return Err(BusError::ClientStopped);
        }
        if control.task.is_some() {
            debug!("Connection supervisor already running");
            return Ok(());
        }
        self.spawn_supervisor(&mut control);
        Ok(())
    }

    /// Restart the supervisor after the connection faulted
    pub async fn reset(self: &Arc<Self>) -> BusResult<bool> {
        let mut control = self.control.lock().await;
        if control.stopped {
            return Err(BusError::ClientStopped);
        }
        if self.current_state() != ConnectionState::Faulted {
            return Ok(false);
        }
        if let Some(task) = control.task.take() {
            // Faulted supervisors have already returned
            let _ = task.await;
        }
        self.transition(|snapshot| {
            snapshot.consecutive_failures = 0;
            snapshot.last_error = None;
            snapshot.state = ConnectionState::Connecting;
        });
        info!("Connection reset after fault, restarting supervisor");
        self.spawn_supervisor(&mut control);
        Ok(true)
    }

    fn spawn_supervisor(self: &Arc<Self>, control: &mut SupervisorControl) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let span = crate::connection_span!(
            transport = self.transport.name(),
            address = %self.settings.address
        );
        control.shutdown_tx = Some(shutdown_tx);
        control.task = Some(tokio::spawn(
            async move {
                manager.supervise(shutdown_rx).await;
            }
            .instrument(span),
        ));
    }

    /// Stop reconnecting and release the current handle. Terminal.
    ///
    /// Pending requests are not settled here; they observe the generation
    /// loss through their own wait.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        if control.stopped {
            return;
        }
        control.stopped = true;

        if let Some(shutdown_tx) = control.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
            debug!("Sent shutdown signal to connection supervisor");
        }

        let from = self.current_state();
        let mut released = None;
        self.cell.send_modify(|cell| {
            cell.snapshot.state = ConnectionState::Closing;
            released = cell.handle.take();
        });
        HealthMonitor::log_state_transition(from, ConnectionState::Closing);

        if let Some(handle) = released {
            handle.close().await;
        }

        if let Some(mut task) = control.task.take() {
            match tokio::time::timeout(Duration::from_secs(2), &mut task).await {
                Ok(Ok(())) => debug!("Connection supervisor shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Connection supervisor ended with error: {}", e)
                }
                Err(_) => {
                    warn!("Connection supervisor didn't stop in time, aborting");
                    task.abort();
                }
                _ => {}
            }
        }
        info!("Connection manager stopped");
    }

    pub(crate) fn signal_shutdown_nowait(&self) {
        if let Ok(mut control) = self.control.try_lock() {
            control.stopped = true;
            if let Some(shutdown_tx) = control.shutdown_tx.take() {
                let _ = shutdown_tx.send(true);
            }
            if let Some(task) = control.task.take() {
                task.abort();
            }
        }
    }

    /// Apply `update` unless the manager is already closing. Returns whether it ran.
    fn transition<F>(&self, update: F) -> bool
    where
        F: FnOnce(&mut ConnectionSnapshot),
    {
        let mut from = None;
        let mut to = None;
        self.cell.send_if_modified(|cell| {
            if cell.is_terminal() {
                return false;
            }
            let before = cell.snapshot.clone();
            update(&mut cell.snapshot);
            if cell.snapshot.state != ConnectionState::Open {
                cell.handle = None;
            }
            from = Some(before.state);
            to = Some(cell.snapshot.state);
            cell.snapshot != before
        });
        match (from, to) {
            (Some(from), Some(to)) => {
                if from != to {
                    HealthMonitor::log_state_transition(from, to);
                }
                true
            }
            _ => false,
        }
    }

    /// Make `handle` current under a fresh generation
    fn install_handle(&self, handle: Arc<dyn TransportHandle>) -> Option<u64> {
        let mut installed = None;
        self.cell.send_if_modified(|cell| {
            if cell.is_terminal() {
                return false;
            }
            cell.snapshot.generation += 1;
            cell.snapshot.state = ConnectionState::Open;
            cell.snapshot.consecutive_failures = 0;
            cell.snapshot.last_error = None;
            cell.handle = Some(handle);
            installed = Some(cell.snapshot.generation);
            true
        });
        if let Some(generation) = installed {
            metrics().record_connection_established(generation);
            info!(
                generation,
                address = %self.settings.address,
                "Connection open"
            );
        }
        installed
    }

    /// Close `generation` if it is still the open one
    fn invalidate(&self, generation: u64, reason: &CloseReason) -> bool {
        let mut invalidated = false;
        self.cell.send_if_modified(|cell| {
            if cell.snapshot.generation != generation
                || cell.snapshot.state != ConnectionState::Open
            {
                return false;
            }
            cell.snapshot.state = ConnectionState::Closed;
            cell.snapshot.last_error = Some(reason.to_string());
            cell.handle = None;
            invalidated = true;
            true
        });
        if invalidated {
            metrics().record_connection_lost();
            warn!(generation, reason = %reason, "Connection lost");
            HealthMonitor::log_state_transition(ConnectionState::Open, ConnectionState::Closed);
        }
        invalidated
    }

    async fn open_once(&self) -> Result<Arc<dyn TransportHandle>, OpenError> {
        let open = self.transport.open(
            &self.settings.credentials,
            &self.settings.address,
            self.inbound.clone(),
        );
        match tokio::time::timeout(self.settings.open_timeout, open).await {
            Ok(result) => result,
            Err(_) => Err(OpenError::TimedOut {
                after_ms: self.settings.open_timeout.as_millis() as u64,
            }),
        }
    }

    async fn supervise(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            transport = self.transport.name(),
            address = %self.settings.address,
            "Starting connection supervisor"
        );
        let reconnect = self.settings.reconnect.clone();
        let mut failures = 0u32;
        let mut auth_failures = 0u32;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if !self.transition(|snapshot| snapshot.state = ConnectionState::Connecting) {
                break;
            }
            metrics().record_connection_attempt();

            let outcome = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, cancelling open attempt");
                    break;
                }
                result = self.open_once() => result,
            };

            match outcome {
                Ok(handle) => {
                    failures = 0;
                    auth_failures = 0;
                    let Some(generation) = self.install_handle(handle.clone()) else {
                        handle.close().await;
                        break;
                    };

                    let reason = tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            info!(generation, "Shutdown signal received while open");
                            break;
                        }
                        reason = handle.closed() => reason,
                        _ = self.generation_lost(generation) => {
                            CloseReason::NetworkError("send failure reported".to_string())
                        }
                    };

                    self.invalidate(generation, &reason);
                    handle.close().await;
                    // First attempt after a loss is immediate
                }
                Err(open_error) => {
                    failures += 1;
                    if open_error.is_auth_failure() {
                        auth_failures += 1;
                    } else {
                        auth_failures = 0;
                    }
                    metrics().record_connection_failure();

                    let decision = HealthMonitor::should_attempt_reconnection(
                        failures,
                        auth_failures,
                        &reconnect,
                        *shutdown_rx.borrow(),
                    );

                    match decision {
                        ReconnectionDecision::Proceed { attempt, delay_ms } => {
                            let error_text = open_error.to_string();
                            self.transition(|snapshot| {
                                snapshot.state = ConnectionState::Connecting;
                                snapshot.consecutive_failures = failures;
                                snapshot.last_error = Some(error_text);
                            });
                            let max_display = reconnect
                                .max_attempts
                                .map_or("∞".to_string(), |max| max.to_string());
                            info!(
                                attempt,
                                delay_ms,
                                error = %open_error,
                                "Open failed, reconnection attempt {}/{} after {}ms",
                                attempt,
                                max_display,
                                delay_ms
                            );
                            if !Self::interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
                                break;
                            }
                        }
                        ReconnectionDecision::AbortShutdownRequested => {
                            info!("Shutdown signal received, stopping reconnection");
                            break;
                        }
                        ReconnectionDecision::AbortRetryBudgetExhausted { attempts }
                        | ReconnectionDecision::AbortAuthenticationRejected { attempts } => {
                            let reason = format!("{open_error} (after {attempts} attempts)");
                            error!(attempts, error = %open_error, "Giving up on connection");
                            self.transition(|snapshot| {
                                snapshot.state = ConnectionState::Faulted;
                                snapshot.consecutive_failures = failures;
                                snapshot.last_error = Some(reason);
                            });
                            break;
                        }
                    }
                }
            }
        }
        info!("Connection supervisor stopped");
    }

    /// Returns true if the sleep completed, false if shutdown was requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.transport.name())
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockBroker;
    use tokio::sync::mpsc;

    fn test_settings() -> ConnectionSettings {
        ConnectionSettings {
            credentials: Credentials::anonymous(),
            address: BrokerAddress::parse("mqtt://localhost:1883").unwrap(),
            reconnect: ReconnectConfig {
                initial_delay_ms: 5,
                multiplier: 2.0,
                max_delay_ms: 20,
                max_attempts: None,
                auth_failure_budget: 2,
            },
            open_timeout: Duration::from_millis(200),
        }
    }

    fn test_manager(broker: &MockBroker) -> Arc<ConnectionManager> {
        let (inbound_tx, _inbound_rx) = mpsc::channel(16);
        Arc::new(ConnectionManager::new(
            Arc::new(broker.clone()),
            test_settings(),
            inbound_tx,
        ))
    }

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.initial_delay_ms, 25);
        assert_eq!(config.max_delay_ms, 250);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let config = ReconnectConfig::default();

        assert_eq!(config.calculate_backoff_delay(1), 25);
        assert_eq!(config.calculate_backoff_delay(2), 50);
        assert_eq!(config.calculate_backoff_delay(3), 100);
        assert_eq!(config.calculate_backoff_delay(4), 200);

        // Capped once the curve passes max_delay
        assert_eq!(config.calculate_backoff_delay(5), 250);
        assert_eq!(config.calculate_backoff_delay(100), 250);
        assert_eq!(config.calculate_backoff_delay(u32::MAX), 250);
    }

    #[test]
    fn test_calculate_max_total_time() {
        let limited = ReconnectConfig {
            max_attempts: Some(4),
            ..Default::default()
        };
        // Three sleeps happen between four attempts
        assert_eq!(limited.calculate_max_total_time(), Some(25 + 50 + 100));
        assert_eq!(ReconnectConfig::default().calculate_max_total_time(), None);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Open.to_string(), "Open");
        assert_eq!(ConnectionState::Faulted.to_string(), "Faulted");
    }

    #[tokio::test]
    async fn test_initial_state_is_closed_at_generation_zero() {
        let broker = MockBroker::new();
        let manager = test_manager(&broker);

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Closed);
        assert_eq!(snapshot.generation, 0);
        assert!(manager.current_channel().is_none());
    }

    #[tokio::test]
    async fn test_start_opens_and_stamps_generation() {
        let broker = MockBroker::new();
        let manager = test_manager(&broker);

        manager.start().await.unwrap();
        let snapshot = manager
            .wait_for_state(|s| s.state == ConnectionState::Open, Duration::from_secs(1))
            .await
            .expect("manager should open");

        assert_eq!(snapshot.generation, 1);
        assert_eq!(manager.current_channel().unwrap().generation(), 1);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_close_notification_invalidates_then_reconnects() {
        let broker = MockBroker::new();
        let manager = test_manager(&broker);
        manager.start().await.unwrap();
        manager
            .wait_for_state(|s| s.state == ConnectionState::Open, Duration::from_secs(1))
            .await
            .unwrap();
        let stale = manager.current_channel().unwrap();

        broker.stop();
        manager
            .wait_for_state(|s| s.state != ConnectionState::Open, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(manager.validate(&stale).is_err());

        broker.start();
        let snapshot = manager
            .wait_for_state(
                |s| s.state == ConnectionState::Open && s.generation == 2,
                Duration::from_secs(1),
            )
            .await
            .expect("manager should reconnect");
        assert_eq!(snapshot.generation, 2);
        assert!(manager.validate(&stale).is_err());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_report_send_failure_only_affects_current_generation() {
        let broker = MockBroker::new();
        let manager = test_manager(&broker);
        manager.start().await.unwrap();
        manager
            .wait_for_state(|s| s.state == ConnectionState::Open, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(!manager.report_send_failure(42));
        assert_eq!(manager.current_state(), ConnectionState::Open);

        assert!(manager.report_send_failure(1));
        manager
            .wait_for_state(|s| s.generation == 2, Duration::from_secs(1))
            .await
            .expect("supervisor should reopen after a reported failure");
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let broker = MockBroker::new();
        let manager = test_manager(&broker);
        manager.start().await.unwrap();
        manager
            .wait_for_state(|s| s.state == ConnectionState::Open, Duration::from_secs(1))
            .await
            .unwrap();

        manager.stop().await;
        assert_eq!(manager.current_state(), ConnectionState::Closing);
        assert!(matches!(manager.start().await, Err(BusError::ClientStopped)));

        let opens = broker.open_count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.open_count(), opens, "no reconnect after stop");
        assert_eq!(manager.current_state(), ConnectionState::Closing);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        let completed = ConnectionManager::interruptible_sleep(shutdown_rx, 1_000).await;
        assert!(!completed, "sleep should be interrupted by shutdown signal");
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(ConnectionManager::interruptible_sleep(shutdown_rx, 5).await);
    }
}
