//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Instant;

/// Disbursement pipeline metrics
pub struct Metrics {
    registry: Registry,

    // Counters
    pub disbursements_total: IntCounter,
    pub disbursements_success: IntCounter,
    pub disbursements_failed: IntCounter,
    pub guard_rejections: IntCounter,
    pub holding_accounts_created: IntCounter,
    pub blockhash_rebuilds: IntCounter,
    pub errors_by_category: IntCounterVec,

    // Histograms
    pub disbursement_latency: Histogram,
    pub confirmation_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance with its own registry
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let disbursements_total = IntCounter::with_opts(Opts::new(
            "disbursements_total",
            "Total number of disbursement requests received",
        ))?;

        let disbursements_success = IntCounter::with_opts(Opts::new(
            "disbursements_success",
            "Number of confirmed disbursements",
        ))?;

        let disbursements_failed = IntCounter::with_opts(Opts::new(
            "disbursements_failed",
            "Number of disbursements that ended in an error",
        ))?;

        let guard_rejections = IntCounter::with_opts(Opts::new(
            "guard_rejections",
            "Requests rejected locally because the daily limit would be exceeded",
        ))?;

        let holding_accounts_created = IntCounter::with_opts(Opts::new(
            "holding_accounts_created",
            "Confirmed disbursements that created the recipient holding account",
        ))?;

        let blockhash_rebuilds = IntCounter::with_opts(Opts::new(
            "blockhash_rebuilds",
            "Transactions rebuilt after blockhash expiry",
        ))?;

        let errors_by_category = IntCounterVec::new(
            Opts::new("errors_by_category", "Pipeline errors by category"),
            &["category"],
        )?;

        let disbursement_latency = Histogram::with_opts(
            HistogramOpts::new(
                "disbursement_latency_seconds",
                "End-to-end disbursement latency",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Time from submission to confirmation",
            )
            .buckets(vec![0.4, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        )?;

        registry.register(Box::new(disbursements_total.clone()))?;
        registry.register(Box::new(disbursements_success.clone()))?;
        registry.register(Box::new(disbursements_failed.clone()))?;
        registry.register(Box::new(guard_rejections.clone()))?;
        registry.register(Box::new(holding_accounts_created.clone()))?;
        registry.register(Box::new(blockhash_rebuilds.clone()))?;
        registry.register(Box::new(errors_by_category.clone()))?;
        registry.register(Box::new(disbursement_latency.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;

        Ok(Self {
            registry,
            disbursements_total,
            disbursements_success,
            disbursements_failed,
            guard_rejections,
            holding_accounts_created,
            blockhash_rebuilds,
            errors_by_category,
            disbursement_latency,
            confirmation_latency,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_error(&self, category: &str) {
        self.errors_by_category.with_label_values(&[category]).inc();
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.disbursements_total.inc();
        metrics.record_error("rate_limit");

        let text = metrics.render();
        assert!(text.contains("disbursements_total 1"));
        assert!(text.contains("errors_by_category{category=\"rate_limit\"} 1"));
    }

    #[test]
    fn test_timer_observes() {
        let metrics = Metrics::new().unwrap();
        let timer = Timer::new();
        timer.observe_duration(&metrics.confirmation_latency);
        assert_eq!(metrics.confirmation_latency.get_sample_count(), 1);
    }
}
