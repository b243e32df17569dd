//! Metric names and recorders for hub and pump activity.
//!
//! Recording goes through the `metrics` facade, so nothing is collected
//! unless the embedding binary installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const MESSAGES_TOTAL: &str = "chorus_messages_total";
    pub const DELIVERIES_DROPPED: &str = "chorus_deliveries_dropped_total";
    pub const CLIENTS_REGISTERED: &str = "chorus_clients_registered";
}

/// Record a message passing through the system.
///
/// `direction` is one of `inbound`, `broadcast` or `outbound`.
pub(crate) fn record_message(direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
}

/// Record deliveries skipped because a client's queue was full.
pub(crate) fn record_dropped(count: u64) {
    if count > 0 {
        counter!(names::DELIVERIES_DROPPED).increment(count);
    }
}

/// Update the registered client gauge.
pub(crate) fn set_registered_clients(count: usize) {
    gauge!(names::CLIENTS_REGISTERED).set(count as f64);
}
