//! Prometheus metrics for the admission endpoints.
//!
//! Metrics tracked:
//! - `sriov_webhook_admissions_total` - admissions by object kind and outcome
//! - `sriov_webhook_allocation_duration_seconds` - allocation latency by object kind

use crate::error::ControllerError;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// How an admission ended, as reported in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// The object was patched
    Allocated,
    /// The object was admitted unchanged
    Skipped,
    /// Denied with a 400
    ClientError,
    /// Denied with a 500
    ServerError,
}

impl AdmissionOutcome {
    /// Value of the `outcome` label.
    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionOutcome::Allocated => "allocated",
            AdmissionOutcome::Skipped => "skipped",
            AdmissionOutcome::ClientError => "client_error",
            AdmissionOutcome::ServerError => "server_error",
        }
    }
}

/// Webhook metrics and the registry they are exported from.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    admissions_total: IntCounterVec,
    allocation_duration_seconds: HistogramVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates and registers all webhook metrics.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let admissions_total = IntCounterVec::new(
            Opts::new("sriov_webhook_admissions_total", "Admission requests handled"),
            &["kind", "outcome"],
        )?;
        let allocation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "sriov_webhook_allocation_duration_seconds",
                "Time spent allocating networks for one admission, in seconds",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(admissions_total.clone()))?;
        registry.register(Box::new(allocation_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            admissions_total,
            allocation_duration_seconds,
        })
    }

    /// Counts one finished admission.
    pub fn record_admission(&self, kind: &str, outcome: AdmissionOutcome) {
        self.admissions_total
            .with_label_values(&[kind, outcome.as_str()])
            .inc();
    }

    /// Observes how long one allocation took, denied or not.
    pub fn record_allocation_duration(&self, kind: &str, elapsed: Duration) {
        self.allocation_duration_seconds
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    /// Number of admissions recorded for `kind` and `outcome`
    #[cfg(test)]
    pub fn admissions(&self, kind: &str, outcome: AdmissionOutcome) -> u64 {
        self.admissions_total
            .with_label_values(&[kind, outcome.as_str()])
            .get()
    }

    /// Gathers all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, ControllerError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ControllerError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_exports_recorded_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.record_admission("pod", AdmissionOutcome::Allocated);
        metrics.record_admission("pod", AdmissionOutcome::Allocated);
        metrics.record_allocation_duration("pod", Duration::from_millis(12));

        assert_eq!(metrics.admissions("pod", AdmissionOutcome::Allocated), 2);
        let text = metrics.gather().unwrap();
        assert!(text.contains(r#"sriov_webhook_admissions_total{kind="pod",outcome="allocated"} 2"#));
        assert!(text.contains("sriov_webhook_allocation_duration_seconds_count"));
    }
}
