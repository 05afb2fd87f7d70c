//! Observability infrastructure for the parking engine
//!
//! Provides:
//! - Prometheus metrics (poll latency, carparks tracked, fetch errors,
//!   active alerts, narrative failures)
//! - Structured JSON logging of cycle and alert events with tracing

use crate::models::Agency;
use prometheus::{
    register_histogram, register_int_gauge, register_int_gauge_vec, Histogram, IntGauge,
    IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for poll cycle latency (in seconds)
const POLL_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    poll_cycle_latency_seconds: Histogram,
    carparks_tracked: IntGauge,
    available_lots: IntGauge,
    system_health_percent: IntGauge,
    active_alerts: IntGaugeVec,
    agency_health_percent: IntGaugeVec,
    agency_stale_records: IntGaugeVec,
    fetch_errors: IntGaugeVec,
    narrative_failures: IntGauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            poll_cycle_latency_seconds: register_histogram!(
                "parksense_poll_cycle_latency_seconds",
                "Time spent fetching, reconciling and scoring one cycle",
                POLL_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register poll_cycle_latency_seconds"),

            carparks_tracked: register_int_gauge!(
                "parksense_carparks_tracked",
                "Number of carparks in the latest unified snapshot"
            )
            .expect("Failed to register carparks_tracked"),

            available_lots: register_int_gauge!(
                "parksense_available_lots",
                "Total available lots in the latest unified snapshot"
            )
            .expect("Failed to register available_lots"),

            system_health_percent: register_int_gauge!(
                "parksense_system_health_percent",
                "System-wide health score, -1 when unscorable"
            )
            .expect("Failed to register system_health_percent"),

            active_alerts: register_int_gauge_vec!(
                "parksense_active_alerts",
                "Active alerts from the latest cycle by severity",
                &["severity"]
            )
            .expect("Failed to register active_alerts"),

            agency_health_percent: register_int_gauge_vec!(
                "parksense_agency_health_percent",
                "Per-agency health score, -1 when unscorable",
                &["agency"]
            )
            .expect("Failed to register agency_health_percent"),

            agency_stale_records: register_int_gauge_vec!(
                "parksense_agency_stale_records",
                "Records carried stale for an agency in the latest cycle",
                &["agency"]
            )
            .expect("Failed to register agency_stale_records"),

            fetch_errors: register_int_gauge_vec!(
                "parksense_fetch_errors_total",
                "Total feed fetch failures by agency",
                &["agency"]
            )
            .expect("Failed to register fetch_errors"),

            narrative_failures: register_int_gauge!(
                "parksense_narrative_failures_total",
                "Total narrative service failures"
            )
            .expect("Failed to register narrative_failures"),
        }
    }
}

/// Engine metrics for Prometheus exposition.
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_poll_latency(&self, duration_secs: f64) {
        self.inner().poll_cycle_latency_seconds.observe(duration_secs);
    }

    pub fn set_carparks_tracked(&self, count: i64) {
        self.inner().carparks_tracked.set(count);
    }

    pub fn set_available_lots(&self, lots: i64) {
        self.inner().available_lots.set(lots);
    }

    /// `None` maps to -1 so an unscorable system is distinguishable from 0
    pub fn set_system_health(&self, percent: Option<f64>) {
        self.inner()
            .system_health_percent
            .set(percent.map(|p| p.round() as i64).unwrap_or(-1));
    }

    pub fn set_active_alerts(&self, severity: &str, count: i64) {
        self.inner()
            .active_alerts
            .with_label_values(&[severity])
            .set(count);
    }

    pub fn set_agency_health(&self, agency: Agency, percent: Option<f64>) {
        self.inner()
            .agency_health_percent
            .with_label_values(&[agency.as_str()])
            .set(percent.map(|p| p.round() as i64).unwrap_or(-1));
    }

    pub fn set_agency_stale_records(&self, agency: Agency, count: i64) {
        self.inner()
            .agency_stale_records
            .with_label_values(&[agency.as_str()])
            .set(count);
    }

    pub fn inc_fetch_errors(&self, agency: Agency) {
        self.inner()
            .fetch_errors
            .with_label_values(&[agency.as_str()])
            .inc();
    }

    pub fn inc_narrative_failures(&self) {
        self.inner().narrative_failures.inc();
    }
}

/// Structured logger for engine events.
///
/// Emits consistent JSON-formatted events for cycles, alerts, and feed
/// degradation.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a completed poll cycle
    pub fn log_cycle(
        &self,
        carparks: usize,
        available_lots: u64,
        system_health: Option<f64>,
        alerts: usize,
        duration_secs: f64,
    ) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            carparks = carparks,
            available_lots = available_lots,
            system_health = ?system_health,
            alerts = alerts,
            duration_secs = duration_secs,
            "Poll cycle completed"
        );
    }

    /// Log one raised alert
    pub fn log_alert(&self, severity: &str, scope: &str, title: &str, message: &str) {
        match severity {
            "critical" => {
                warn!(
                    event = "alert_raised",
                    instance = %self.instance,
                    severity = %severity,
                    scope = %scope,
                    title = %title,
                    details = %message,
                    "Critical alert raised"
                );
            }
            _ => {
                info!(
                    event = "alert_raised",
                    instance = %self.instance,
                    severity = %severity,
                    scope = %scope,
                    title = %title,
                    details = %message,
                    "Alert raised"
                );
            }
        }
    }

    /// Log an agency fetch failure and how it was handled
    pub fn log_fetch_failure(&self, agency: Agency, error: &str, fail_cycles: u32, excluded: bool) {
        warn!(
            event = "feed_fetch_failed",
            instance = %self.instance,
            agency = %agency,
            error = %error,
            fail_cycles = fail_cycles,
            excluded = excluded,
            "Agency feed fetch failed"
        );
    }

    /// Log a data-quality finding from normalization or reconciliation
    pub fn log_data_quality(&self, kind: &str, detail: &str) {
        info!(
            event = "data_quality",
            instance = %self.instance,
            kind = %kind,
            detail = %detail,
            "Data quality event"
        );
    }

    /// Log a narrative service failure (never fatal)
    pub fn log_narrative_failure(&self, error: &str) {
        warn!(
            event = "narrative_failed",
            instance = %self.instance,
            error = %error,
            "Narrative generation failed, continuing without narrative"
        );
    }

    pub fn log_startup(&self, version: &str, poll_interval_secs: u64) {
        info!(
            event = "engine_started",
            instance = %self.instance,
            version = %version,
            poll_interval_secs = poll_interval_secs,
            "Parking engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Parking engine shutting down"
        );
    }
}
