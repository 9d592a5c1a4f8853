//! Prometheus metrics for observability and monitoring.
//!
//! Every store reports through the global `metrics` recorder, labelled with
//! its key:
//! - Dispatch submissions and rejections
//! - Pipeline duration and failures
//! - Notification rounds and observer panics
//! - Active subscriptions
//!
//! Without an installed recorder the macros are no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use flowstore_runtime::metrics::install_prometheus;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let exporter = install_prometheus()?;
//!
//! // ... run stores ...
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Events accepted by `dispatch`
pub const DISPATCH_TOTAL: &str = "flowstore_dispatch_total";

/// Events refused by `dispatch` because the store is poisoned or gone
pub const DISPATCH_REJECTED_TOTAL: &str = "flowstore_dispatch_rejected_total";

/// Pipeline runs that failed and poisoned their store
pub const PIPELINE_FAILURES_TOTAL: &str = "flowstore_pipeline_failures_total";

/// Observer callbacks invoked
pub const NOTIFICATIONS_TOTAL: &str = "flowstore_notifications_total";

/// Observer callbacks that panicked
pub const OBSERVER_PANICS_TOTAL: &str = "flowstore_observer_panics_total";

/// Wall time of one pipeline run, commit and publish included
pub const PIPELINE_DURATION_SECONDS: &str = "flowstore_pipeline_duration_seconds";

/// Registered subscriptions
pub const ACTIVE_SUBSCRIPTIONS: &str = "flowstore_active_subscriptions";

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

/// Installed Prometheus recorder.
///
/// Holds the handle used to render the exposition text. The handle is `None`
/// when another recorder was already installed in this process.
#[derive(Clone)]
pub struct PrometheusExporter {
    handle: Option<PrometheusHandle>,
}

impl PrometheusExporter {
    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this exporter does not own the global recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

/// Describe all store metrics and install a Prometheus recorder.
///
/// # Errors
///
/// Returns error if the exporter cannot be built or installed.
///
/// # Note
///
/// If a recorder is already installed (e.g., in tests), this succeeds with an
/// exporter that cannot render.
pub fn install_prometheus() -> Result<PrometheusExporter, MetricsError> {
    register_metrics();

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?;

    match builder.install_recorder() {
        Ok(handle) => {
            tracing::info!("Prometheus recorder installed");
            Ok(PrometheusExporter {
                handle: Some(handle),
            })
        },
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains("already initialized") {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(PrometheusExporter { handle: None })
            } else {
                Err(MetricsError::Install(err_msg))
            }
        },
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(DISPATCH_TOTAL, "Total number of events accepted by dispatch");
    describe_counter!(
        DISPATCH_REJECTED_TOTAL,
        "Total number of events refused because the store was poisoned or stopped"
    );
    describe_counter!(
        PIPELINE_FAILURES_TOTAL,
        "Total number of pipeline runs that failed and poisoned their store"
    );
    describe_counter!(NOTIFICATIONS_TOTAL, "Total number of observer callbacks invoked");
    describe_counter!(OBSERVER_PANICS_TOTAL, "Total number of observer callbacks that panicked");
    describe_histogram!(
        PIPELINE_DURATION_SECONDS,
        "Time taken to run, commit and publish one dispatched event"
    );
    describe_gauge!(ACTIVE_SUBSCRIPTIONS, "Number of registered subscriptions");
}

/// Per-store metric recorder.
pub(crate) struct StoreMetrics;

impl StoreMetrics {
    /// Record an accepted dispatch.
    pub(crate) fn record_dispatch(key: &str) {
        metrics::counter!(DISPATCH_TOTAL, "store" => key.to_string()).increment(1);
    }

    /// Record a refused dispatch.
    pub(crate) fn record_rejection(key: &str) {
        metrics::counter!(DISPATCH_REJECTED_TOTAL, "store" => key.to_string()).increment(1);
    }

    /// Record a completed pipeline run.
    pub(crate) fn record_pipeline(key: &str, duration: Duration) {
        metrics::histogram!(PIPELINE_DURATION_SECONDS, "store" => key.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a pipeline failure.
    pub(crate) fn record_failure(key: &str, stage: &'static str) {
        metrics::counter!(PIPELINE_FAILURES_TOTAL, "store" => key.to_string(), "stage" => stage)
            .increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn install_is_repeatable() {
        let first = install_prometheus().unwrap();
        let second = install_prometheus().unwrap();

        // At most one exporter owns the global recorder
        assert!(!(first.handle().is_some() && second.handle().is_some()));
    }

    #[test]
    fn render_includes_recorded_store_metrics() {
        let exporter = install_prometheus().unwrap();

        StoreMetrics::record_dispatch("metrics.test.store");
        StoreMetrics::record_pipeline("metrics.test.store", Duration::from_micros(40));
        StoreMetrics::record_failure("metrics.test.store", "reducer");

        // If another test installed the recorder first, handle is None. That's
        // OK - metrics are still being recorded.
        if let Some(rendered) = exporter.render() {
            assert!(rendered.contains(DISPATCH_TOTAL));
            assert!(rendered.contains(PIPELINE_FAILURES_TOTAL));
        }
    }
}
