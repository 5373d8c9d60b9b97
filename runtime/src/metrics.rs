//! Prometheus metrics for the bridge.
//!
//! Recorders are plain functions over the `metrics` facade; they are no-ops
//! until a recorder is installed, e.g. by [`MetricsServer::start`].
//!
//! # Example
//!
//! ```rust,no_run
//! use courier_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(rendered) = server.render() {
//!     println!("{rendered}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics exporter.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create an exporter that will report `addr` as its scrape address.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all bridge metrics and install the Prometheus recorder.
    ///
    /// A recorder that is already installed (common in tests) is tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// The Prometheus handle, once started.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("courier_requests_sent_total", "Requests published by the dispatcher");
    describe_counter!(
        "courier_replies_received_total",
        "Replies that resolved a waiting request"
    );
    describe_counter!("courier_request_timeouts_total", "Requests that timed out");
    describe_counter!(
        "courier_remote_errors_total",
        "Replies carrying an error from the remote service"
    );
    describe_counter!(
        "courier_malformed_messages_total",
        "Undecodable messages dropped by a listener or consumer"
    );
    describe_counter!(
        "courier_replies_parked_total",
        "Replies parked in the completion store for another instance"
    );
    describe_counter!(
        "courier_requests_handled_total",
        "Requests handled by the request consumer"
    );
    describe_counter!(
        "courier_handler_errors_total",
        "Requests whose handler returned an error"
    );
    describe_counter!(
        "courier_gateway_responses_total",
        "HTTP responses returned by the gateway, by status"
    );
    describe_histogram!(
        "courier_request_duration_seconds",
        "Time from publishing a request to receiving its reply"
    );
    describe_gauge!("courier_pending_requests", "Requests awaiting a reply");
}

/// Bridge metrics recorder.
pub struct BridgeMetrics;

impl BridgeMetrics {
    /// Record a published request.
    pub fn record_request_sent() {
        counter!("courier_requests_sent_total").increment(1);
    }

    /// Record a reply received `duration` after publishing.
    pub fn record_reply(duration: Duration) {
        counter!("courier_replies_received_total").increment(1);
        histogram!("courier_request_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a timed out request.
    pub fn record_timeout() {
        counter!("courier_request_timeouts_total").increment(1);
    }

    /// Record an error reply.
    pub fn record_remote_error() {
        counter!("courier_remote_errors_total").increment(1);
    }

    /// Record a dropped malformed message.
    pub fn record_malformed() {
        counter!("courier_malformed_messages_total").increment(1);
    }

    /// Record a reply parked for another instance.
    pub fn record_parked() {
        counter!("courier_replies_parked_total").increment(1);
    }

    /// Record a handled request and whether its handler failed.
    pub fn record_handled(failed: bool) {
        counter!("courier_requests_handled_total").increment(1);
        if failed {
            counter!("courier_handler_errors_total").increment(1);
        }
    }

    /// Record the current number of pending requests.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_pending(count: usize) {
        gauge!("courier_pending_requests").set(count as f64);
    }
}
