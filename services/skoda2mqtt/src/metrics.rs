//! Prometheus metrics exposition
//!
//! - `skoda_polls_total` (counter): label `outcome`
//! - `skoda_poll_duration_seconds` (histogram): full poll + publish pass
//! - `skoda_messages_published_total` (counter): label `kind` (`state`, `discovery`)
//! - `skoda_auth_attempts_total` (counter): label `result`, recorded by the session
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

const POLL_DURATION: &str = "skoda_poll_duration_seconds";
const POLL_BUCKETS: &[f64] = &[0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(POLL_DURATION.to_string()), POLL_BUCKETS)
}

/// Install the global recorder and serve `/metrics` on `listen`.
///
/// Must be called from within the tokio runtime; the exporter spawns its
/// HTTP listener there.
pub fn install_exporter(listen: SocketAddr) -> Result<(), BuildError> {
    builder()?.with_http_listener(listen).install()
}

/// Record one vehicle poll with its outcome label.
pub fn record_poll(outcome: &str) {
    metrics::counter!("skoda_polls_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record the duration of a full poll + publish pass.
pub fn record_cycle_duration(duration_secs: f64) {
    metrics::histogram!(POLL_DURATION).record(duration_secs);
}

/// Record one message handed to the broker client.
pub fn record_published(kind: &'static str) {
    metrics::counter!("skoda_messages_published_total", "kind" => kind).increment(1);
}
