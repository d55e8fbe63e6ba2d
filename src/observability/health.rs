//! Health check HTTP server for container orchestration
//!
//! Serves the bus health verdict to operators and orchestration platforms.
//! `/health` reports Healthy and Degraded as 200 so a client riding out a
//! short reconnect is not restarted; `/ready` only passes while the
//! connection is open.

use crate::bus::health_monitor::{HealthMonitor, HealthStatus, HealthVerdict};
use crate::bus::connection::ConnectionState;
use crate::observability::metrics::metrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    client_id: String,
    port: u16,
    monitor: HealthMonitor,
}

impl HealthServer {
    pub fn new(client_id: impl Into<String>, port: u16, monitor: HealthMonitor) -> Self {
        Self {
            client_id: client_id.into(),
            port,
            monitor,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// All endpoints as one warp filter
    pub fn routes(
        self: &Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let ready_server = self.clone();

        // GET /health - verdict plus detail
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || {
                let (status, body) = health_server.health_response();
                warp::reply::with_status(warp::reply::json(&body), status)
            });

        // GET /ready - readiness probe
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || {
                let (status, body) = readiness_response(&ready_server.monitor.check_health());
                warp::reply::with_status(warp::reply::json(&body), status)
            });

        // GET /live - liveness probe
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        // GET / - API documentation
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let endpoints: BTreeMap<&str, &str> = [
                ("/health", "Bus health verdict and detail"),
                ("/ready", "Readiness probe, passes only while connected"),
                ("/live", "Liveness probe"),
                ("/metrics", "Connection, publish and request metrics"),
            ]
            .into_iter()
            .collect();
            warp::reply::json(&ApiDocumentationResponse { endpoints })
        });

        health_route
            .or(ready_route)
            .or(live_route)
            .or(metrics_route)
            .or(root_route)
            .with(warp::cors().allow_any_origin())
    }

    /// Serve until `shutdown` resolves
    pub async fn start<F>(self: Arc<Self>, shutdown: F) -> Result<(), warp::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let routes = self.routes();
        let (addr, server): (SocketAddr, _) =
            warp::serve(routes).try_bind_with_graceful_shutdown(([0, 0, 0, 0], self.port), shutdown)?;

        tracing::info!("Starting health server on {}", addr);
        server.await;
        tracing::info!("Health server stopped");
        Ok(())
    }

    fn health_response(&self) -> (StatusCode, HealthResponse) {
        let (verdict, report) = self.monitor.inspect();
        let status = status_code_for(verdict.status);
        (
            status,
            HealthResponse {
                status: report.status,
                detail: report.detail,
                client_id: self.client_id.clone(),
                connection_state: verdict.last_observed_state,
                generation: verdict.generation,
                consecutive_failures: verdict.consecutive_failures,
                timestamp: current_timestamp(),
            },
        )
    }
}

/// Healthy and Degraded pass, Unhealthy fails (pure function)
pub fn status_code_for(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn readiness_response(verdict: &HealthVerdict) -> (StatusCode, ReadinessResponse) {
    let ready = verdict.status == HealthStatus::Healthy;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        ReadinessResponse {
            ready,
            timestamp: current_timestamp(),
        },
    )
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: HealthStatus,
    detail: String,
    client_id: String,
    connection_state: ConnectionState,
    generation: u64,
    consecutive_failures: u32,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: BTreeMap<&'static str, &'static str>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::connection::{ConnectionManager, ConnectionSettings, ReconnectConfig};
    use crate::testing::mocks::MockBroker;
    use crate::transport::{BrokerAddress, Credentials};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn server_for(broker: &MockBroker) -> (Arc<ConnectionManager>, Arc<HealthServer>) {
        let (inbound_tx, _) = mpsc::channel(8);
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(broker.clone()),
            ConnectionSettings {
                credentials: Credentials::anonymous(),
                address: BrokerAddress::parse("mqtt://localhost").unwrap(),
                reconnect: ReconnectConfig::default(),
                open_timeout: Duration::from_millis(100),
            },
            inbound_tx,
        ));
        let monitor = HealthMonitor::new(manager.clone(), 3);
        let server = Arc::new(HealthServer::new("test-client", 8080, monitor));
        (manager, server)
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(status_code_for(HealthStatus::Healthy), StatusCode::OK);
        assert_eq!(status_code_for(HealthStatus::Degraded), StatusCode::OK);
        assert_eq!(
            status_code_for(HealthStatus::Unhealthy),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_health_endpoint_before_start_is_unavailable() {
        let broker = MockBroker::new();
        let (_manager, server) = server_for(&broker);
        let routes = server.routes();

        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "unhealthy");
        assert_eq!(body["client_id"], "test-client");
        assert_eq!(body["generation"], 0);
    }

    #[tokio::test]
    async fn test_health_and_ready_when_open() {
        let broker = MockBroker::new();
        let (manager, server) = server_for(&broker);
        manager.start().await.unwrap();
        manager
            .wait_for_state(|s| s.state == ConnectionState::Open, Duration::from_secs(1))
            .await
            .unwrap();
        let routes = server.routes();

        let health = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(health.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(health.body()).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connection_state"], "Open");
        assert_eq!(body["generation"], 1);
        assert_eq!(body["consecutive_failures"], 0);

        let ready = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(ready.status(), StatusCode::OK);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_live_and_metrics_always_answer() {
        let broker = MockBroker::new();
        let (_manager, server) = server_for(&broker);
        let routes = server.routes();

        let live = warp::test::request().path("/live").reply(&routes).await;
        assert_eq!(live.status(), StatusCode::OK);

        let metrics = warp::test::request().path("/metrics").reply(&routes).await;
        assert_eq!(metrics.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(metrics.body()).unwrap();
        assert!(body.get("connection").is_some());

        let ready = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
