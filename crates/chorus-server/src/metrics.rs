//! Metrics collection and export for Chorus.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Hub and pump metrics are recorded by
//! `chorus-core`; this module describes them alongside the
//! connection-level ones recorded here.

use anyhow::{Context, Result};
use chorus_core::{ReaderExit, WriterExit};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub use chorus_core::metrics::names::{CLIENTS_REGISTERED, DELIVERIES_DROPPED, MESSAGES_TOTAL};

    pub const CONNECTIONS_TOTAL: &str = "chorus_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chorus_connections_active";
    pub const REJECTIONS_TOTAL: &str = "chorus_rejections_total";
    pub const DISCONNECTS_TOTAL: &str = "chorus_disconnects_total";
    pub const ERRORS_TOTAL: &str = "chorus_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::REJECTIONS_TOTAL,
        "Upgrade requests rejected before a connection was made"
    );
    metrics::describe_counter!(
        names::DISCONNECTS_TOTAL,
        "Connections ended, labelled by the reader's exit reason"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages processed");
    metrics::describe_counter!(
        names::DELIVERIES_DROPPED,
        "Deliveries skipped because a client's queue was full"
    );
    metrics::describe_gauge!(
        names::CLIENTS_REGISTERED,
        "Current number of clients registered with the hub"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

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

/// Record an upgrade request turned away.
pub fn record_rejection(reason: &'static str) {
    counter!(names::REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Record how a client's pumps ended.
pub fn record_exit(reader: Option<&ReaderExit>, writer: Option<&WriterExit>) {
    let reason = match reader {
        Some(ReaderExit::PeerClosed) => "peer_closed",
        Some(ReaderExit::Timeout) => "timeout",
        Some(ReaderExit::Error(_)) => "error",
        Some(ReaderExit::HubClosed) => "hub_closed",
        None => "panic",
    };
    counter!(names::DISCONNECTS_TOTAL, "reason" => reason).increment(1);

    match writer {
        Some(WriterExit::Timeout) => record_error("write_timeout"),
        Some(WriterExit::Error(_)) => record_error("write"),
        Some(WriterExit::ReaderClosed | WriterExit::QueueClosed) => {}
        None => record_error("writer_panic"),
    }
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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
