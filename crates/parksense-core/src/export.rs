//! Snapshot export: CSV, JSON report, and plain-text report
//!
//! Exports are rendered from the scored snapshot on demand; nothing is
//! written to disk here.

use crate::history::{AvailabilityChange, SnapshotHistory};
use crate::models::{Agency, AgencyHealth, ScoredSnapshot};
use crate::scorer::Alert;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Machine-readable cycle report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    pub generated_at: DateTime<Utc>,
    pub snapshot_taken_at: DateTime<Utc>,
    pub system_status: String,
    pub system_health_percent: Option<f64>,
    pub total_carparks: usize,
    pub total_available_lots: u64,
    pub total_capacity_lots: u64,
    pub agencies: BTreeMap<Agency, AgencyHealth>,
    pub alerts: Vec<Alert>,
    pub availability_change: Option<AvailabilityChange>,
}

impl JsonReport {
    pub fn build(scored: &ScoredSnapshot, alerts: &[Alert], history: &SnapshotHistory) -> Self {
        Self {
            generated_at: Utc::now(),
            snapshot_taken_at: scored.snapshot.taken_at,
            system_status: scored.system_status_word().to_string(),
            system_health_percent: scored.system_health_percent,
            total_carparks: scored.total_carparks,
            total_available_lots: scored.total_available_lots,
            total_capacity_lots: scored.total_capacity_lots,
            agencies: scored.agencies.clone(),
            alerts: alerts.to_vec(),
            availability_change: history.availability_change(),
        }
    }
}

/// Render all carpark records as CSV, one row per carpark
pub fn to_csv(scored: &ScoredSnapshot) -> String {
    let mut out = String::from(
        "carpark_id,agency,name,area,available_lots,total_lots,occupancy,status,stale,last_updated\n",
    );

    for (id, record) in &scored.snapshot.records {
        let status = scored
            .status(id)
            .map(|s| s.to_string())
            .unwrap_or_default();
        let occupancy = record
            .occupancy_ratio()
            .map(|o| format!("{o:.3}"))
            .unwrap_or_default();

        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{}",
            csv_field(&id.to_string()),
            id.agency,
            csv_field(&record.name),
            csv_field(record.area.as_deref().unwrap_or("")),
            record.available_lots,
            record.total_lots,
            occupancy,
            status,
            record.stale,
            record.last_updated.to_rfc3339(),
        );
    }

    out
}

/// Quote a field when it contains CSV metacharacters
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render an operator-facing plain-text report
pub fn to_text_report(scored: &ScoredSnapshot, alerts: &[Alert], history: &SnapshotHistory) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "PARKING SYSTEM REPORT");
    let _ = writeln!(out, "Generated: {}", Utc::now().to_rfc3339());
    let _ = writeln!(out, "Snapshot:  {}", scored.snapshot.taken_at.to_rfc3339());
    let _ = writeln!(out);

    let health = scored
        .system_health_percent
        .map(|h| format!("{h:.1}%"))
        .unwrap_or_else(|| "n/a".to_string());
    let _ = writeln!(
        out,
        "System: {} (health {health}), {} carparks, {} of {} lots available",
        scored.system_status_word(),
        scored.total_carparks,
        scored.total_available_lots,
        scored.total_capacity_lots,
    );
    if let Some(change) = history.availability_change() {
        let _ = writeln!(
            out,
            "Change since last cycle: {:+} lots ({:+.1}%)",
            change.delta_lots, change.percent
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "AGENCIES (ranked)");
    let mut ranked: Vec<&AgencyHealth> = scored.agencies.values().collect();
    ranked.sort_by_key(|h| h.rank);
    for health in ranked {
        let score = health
            .health_percent
            .map(|h| format!("{h:.1}%"))
            .unwrap_or_else(|| "n/a".to_string());
        let _ = writeln!(
            out,
            "  {}. {} health {score}, {} carparks, {}/{} lots available, {} stressed, {} stale{}",
            health.rank,
            health.agency,
            health.carparks,
            health.available_lots,
            health.total_lots,
            health.stressed,
            health.stale_count,
            if health.degraded { " [DEGRADED]" } else { "" },
        );
    }
    let _ = writeln!(out);

    let critical = scored.critical_carparks();
    if !critical.is_empty() {
        let _ = writeln!(out, "CRITICAL CARPARKS ({})", critical.len());
        for record in critical {
            let _ = writeln!(
                out,
                "  {} ({}): {}/{} lots free",
                record.name, record.id, record.available_lots, record.total_lots
            );
        }
        let _ = writeln!(out);
    }

    if alerts.is_empty() {
        let _ = writeln!(out, "No active alerts.");
    } else {
        let _ = writeln!(out, "ALERTS ({})", alerts.len());
        for alert in alerts {
            let _ = writeln!(out, "  [{}] {}: {}", alert.severity, alert.title, alert.message);
        }
    }

    out
}
