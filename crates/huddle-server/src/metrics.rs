//! Metrics collection and export for huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use huddle_core::{HubHandle, HubStats};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const UPGRADES_REFUSED_TOTAL: &str = "huddle_upgrades_refused_total";
    pub const CLIENTS_REGISTERED: &str = "huddle_clients_registered";
    pub const ROOMS_ACTIVE: &str = "huddle_rooms_active";
    pub const ADMIN_BROADCASTS_TOTAL: &str = "huddle_admin_broadcasts_total";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of WebSocket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open WebSocket connections"
    );
    metrics::describe_counter!(
        names::UPGRADES_REFUSED_TOTAL,
        "Upgrade requests refused for a missing or invalid token"
    );
    metrics::describe_gauge!(names::CLIENTS_REGISTERED, "Clients registered with the hub");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Rooms with at least one member");
    metrics::describe_counter!(
        names::ADMIN_BROADCASTS_TOTAL,
        "System notices injected over HTTP"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a refused upgrade.
pub fn record_upgrade_refused(reason: &'static str) {
    counter!(names::UPGRADES_REFUSED_TOTAL, "reason" => reason).increment(1);
}

/// Record a system notice injected over HTTP.
pub fn record_admin_broadcast() {
    counter!(names::ADMIN_BROADCASTS_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Publish a hub snapshot as gauges.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::CLIENTS_REGISTERED).set(stats.total_clients as f64);
    gauge!(names::ROOMS_ACTIVE).set(stats.total_rooms as f64);
}

/// Periodically sample hub statistics until the hub stops.
pub fn spawn_stats_sampler(hub: HubHandle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match hub.stats().await {
                Ok(stats) => record_hub_stats(&stats),
                Err(e) => {
                    debug!(error = %e, "Stats sampler stopping");
                    break;
                }
            }
        }
    })
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
