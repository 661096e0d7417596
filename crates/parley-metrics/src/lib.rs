//! Prometheus metrics for the Parley services.
//!
//! Counters cover the delivery pipeline end to end: connections at the
//! gateway, messages through the message service, events across the broker.
//! Every service exposes them on `GET /metrics` via [`metrics_handler`].

use anyhow::Result;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use once_cell::sync::Lazy;
use prometheus::{
    opts, register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

// ============================================================================
// Gateway
// ============================================================================

/// Total number of client socket connections accepted.
pub static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "parley_connections_total",
        "Total number of client socket connections"
    ))
    .expect("Failed to register CONNECTIONS_TOTAL metric")
});

/// Connections closed because a newer one arrived for the same user.
pub static CONNECTIONS_SUPERSEDED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "parley_connections_superseded_total",
        "Connections force-closed by a newer connection for the same user"
    ))
    .expect("Failed to register CONNECTIONS_SUPERSEDED_TOTAL metric")
});

/// Connections closed for missing the pong deadline.
pub static CONNECTIONS_STALE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "parley_connections_stale_total",
        "Connections closed after missing the keepalive deadline"
    ))
    .expect("Failed to register CONNECTIONS_STALE_TOTAL metric")
});

/// Frames written to client sockets, labeled by event kind.
pub static FRAMES_DELIVERED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "parley_frames_delivered_total",
            "Socket frames delivered to connected clients"
        ),
        &["kind"]
    )
    .expect("Failed to register FRAMES_DELIVERED_TOTAL metric")
});

/// Broker events acked without a local delivery target.
pub static EVENTS_UNROUTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "parley_events_unrouted_total",
        "Broker events acked with no local connection for the target user"
    ))
    .expect("Failed to register EVENTS_UNROUTED_TOTAL metric")
});

// ============================================================================
// Message service
// ============================================================================

/// Total messages accepted by POST /messages.
pub static MESSAGES_SENT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "parley_messages_sent_total",
        "Total number of messages persisted"
    ))
    .expect("Failed to register MESSAGES_SENT_TOTAL metric")
});

/// Per-recipient copies produced by group fan-out.
pub static FANOUT_COPIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "parley_fanout_copies_total",
        "Broker events produced by group fan-out"
    ))
    .expect("Failed to register FANOUT_COPIES_TOTAL metric")
});

/// Status transitions applied, labeled by the status reached.
pub static STATUS_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "parley_status_transitions_total",
            "Message status transitions applied"
        ),
        &["status"]
    )
    .expect("Failed to register STATUS_TRANSITIONS_TOTAL metric")
});

/// Publishes that fell back to the direct queue or were dropped.
pub static PUBLISH_FALLBACKS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "parley_publish_fallbacks_total",
        "Routed publishes that fell back to the direct queue"
    ))
    .expect("Failed to register PUBLISH_FALLBACKS_TOTAL metric")
});

// ============================================================================
// User service
// ============================================================================

/// Accounts created.
pub static USERS_REGISTERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "parley_users_registered_total",
        "Total number of registered users"
    ))
    .expect("Failed to register USERS_REGISTERED_TOTAL metric")
});

/// Successful logins.
pub static LOGINS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!("parley_logins_total", "Total successful logins"))
        .expect("Failed to register LOGINS_TOTAL metric")
});

// ============================================================================
// Exposition
// ============================================================================

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// `GET /metrics` handler shared by all services.
pub async fn metrics_handler() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to gather metrics: {}", e),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_register_and_render() {
        CONNECTIONS_TOTAL.inc();
        MESSAGES_SENT_TOTAL.inc_by(2);
        FRAMES_DELIVERED_TOTAL.with_label_values(&["message"]).inc();
        STATUS_TRANSITIONS_TOTAL
            .with_label_values(&["delivered"])
            .inc();

        let rendered = gather_metrics().unwrap();
        assert!(rendered.contains("parley_connections_total"));
        assert!(rendered.contains("parley_messages_sent_total"));
        assert!(rendered.contains("parley_frames_delivered_total"));
    }
}
