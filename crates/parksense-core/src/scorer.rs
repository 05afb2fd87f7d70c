//! Health scoring and alert generation
//!
//! Scoring is a pure function over the reconciled snapshot plus a small
//! cross-cycle state (per-carpark critical streaks). Alerts are regenerated
//! fresh every cycle; the engine reports current condition, not incident
//! history.

use crate::models::{
    Agency, AgencyHealth, CarparkId, HealthStatus, ScoredSnapshot, UnifiedSnapshot,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Critical => write!(f, "critical"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Info => write!(f, "info"),
        }
    }
}

/// What an alert refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "target", rename_all = "lowercase")]
pub enum AlertScope {
    Carpark(CarparkId),
    Agency(Agency),
    System,
}

/// A condition raised by the scorer for one cycle.
///
/// Alerts have no persistence or acknowledgement state; each cycle rebuilds
/// the full set from the current snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    #[serde(flatten)]
    pub scope: AlertScope,
    pub title: String,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

/// Scoring thresholds, all tunable
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Consecutive Critical cycles before a carpark-scope alert fires
    pub critical_streak: u32,
    /// Agency health below this raises an agency Warning
    pub agency_floor_percent: f64,
    /// Fraction of an agency's records carried stale before the agency is
    /// considered degraded
    pub stale_fraction: f64,
    /// Fraction of stressed carparks raising a system Warning
    pub system_warning_fraction: f64,
    /// Fraction of stressed carparks raising a system Critical
    pub system_critical_fraction: f64,
    /// Grid cell size in degrees (~1 km) for zero-availability clustering
    pub cluster_grid_degrees: f64,
    /// Full carparks in one cell to count as a cluster
    pub cluster_min_full: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            critical_streak: 3,
            agency_floor_percent: 55.0,
            stale_fraction: 0.5,
            system_warning_fraction: 0.20,
            system_critical_fraction: 0.30,
            cluster_grid_degrees: 0.01,
            cluster_min_full: 3,
        }
    }
}

/// Cross-cycle scorer state: consecutive Critical counts per carpark.
///
/// This is the only thing the scorer remembers between cycles.
#[derive(Debug, Default)]
pub struct ScorerState {
    critical_streaks: HashMap<CarparkId, u32>,
}

impl ScorerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current streak for a carpark (0 when not tracked)
    pub fn streak(&self, id: &CarparkId) -> u32 {
        self.critical_streaks.get(id).copied().unwrap_or(0)
    }
}

/// Computes scored snapshots and the cycle's alert set
pub struct Scorer {
    config: ScorerConfig,
}

impl Scorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    /// Score a snapshot and derive the cycle's alerts.
    ///
    /// `degraded_agencies` are agencies excluded by the reconciler (past
    /// their staleness grace period); they get agency-scope Critical alerts
    /// here.
    pub fn score(
        &self,
        snapshot: &UnifiedSnapshot,
        degraded_agencies: &[Agency],
        state: &mut ScorerState,
    ) -> (ScoredSnapshot, Vec<Alert>) {
        let now = snapshot.taken_at;

        let mut statuses: BTreeMap<CarparkId, HealthStatus> = BTreeMap::new();
        for (id, record) in &snapshot.records {
            statuses.insert(id.clone(), HealthStatus::from_occupancy(record.occupancy_ratio()));
        }

        let agencies = self.agency_aggregates(snapshot, &statuses, degraded_agencies);
        let system_health_percent = system_health(&agencies);

        let total_available_lots: u64 = snapshot
            .records
            .values()
            .map(|r| r.available_lots as u64)
            .sum();
        let total_capacity_lots: u64 = snapshot
            .records
            .values()
            .map(|r| r.total_lots as u64)
            .sum();

        let scored = ScoredSnapshot {
            snapshot: snapshot.clone(),
            statuses,
            agencies,
            system_health_percent,
            total_carparks: snapshot.len(),
            total_available_lots,
            total_capacity_lots,
        };

        let mut alerts = Vec::new();
        self.carpark_alerts(&scored, state, now, &mut alerts);
        self.agency_alerts(&scored, degraded_agencies, now, &mut alerts);
        self.system_alerts(&scored, now, &mut alerts);
        self.cluster_alerts(&scored, now, &mut alerts);

        alerts.sort_by_key(|a| a.severity);

        (scored, alerts)
    }

    fn agency_aggregates(
        &self,
        snapshot: &UnifiedSnapshot,
        statuses: &BTreeMap<CarparkId, HealthStatus>,
        degraded_agencies: &[Agency],
    ) -> BTreeMap<Agency, AgencyHealth> {
        let mut out = BTreeMap::new();

        for agency in Agency::ALL {
            let mut carparks = 0usize;
            let mut total_lots = 0u64;
            let mut available_lots = 0u64;
            let mut stressed = 0usize;
            let mut stale_count = 0usize;
            let mut weighted_occupancy = 0.0f64;
            let mut weight = 0.0f64;

            for record in snapshot.agency_records(agency) {
                carparks += 1;
                total_lots += record.total_lots as u64;
                available_lots += record.available_lots as u64;
                if record.stale {
                    stale_count += 1;
                }
                if statuses
                    .get(&record.id)
                    .map(|s| s.is_stressed())
                    .unwrap_or(false)
                {
                    stressed += 1;
                }
                // Unknown-capacity records stay in inventory totals but
                // carry no weight in the health ratio
                if let Some(occ) = record.occupancy_ratio() {
                    weighted_occupancy += occ * record.total_lots as f64;
                    weight += record.total_lots as f64;
                }
            }

            let health_percent = if weight > 0.0 {
                Some(100.0 * (1.0 - weighted_occupancy / weight))
            } else {
                None
            };

            out.insert(
                agency,
                AgencyHealth {
                    agency,
                    carparks,
                    total_lots,
                    available_lots,
                    health_percent,
                    stressed,
                    stale_count,
                    rank: 0,
                    degraded: degraded_agencies.contains(&agency),
                },
            );
        }

        // Rank healthiest first; agencies without a score sort last
        let mut order: Vec<Agency> = out.keys().copied().collect();
        order.sort_by(|a, b| {
            let ha = out[a].health_percent.unwrap_or(f64::NEG_INFINITY);
            let hb = out[b].health_percent.unwrap_or(f64::NEG_INFINITY);
            hb.partial_cmp(&ha).unwrap_or(std::cmp::Ordering::Equal)
        });
        for (i, agency) in order.iter().enumerate() {
            if let Some(h) = out.get_mut(agency) {
                h.rank = i + 1;
            }
        }

        out
    }

    fn carpark_alerts(
        &self,
        scored: &ScoredSnapshot,
        state: &mut ScorerState,
        now: DateTime<Utc>,
        alerts: &mut Vec<Alert>,
    ) {
        // Advance or clear streaks from this cycle's statuses
        for (id, status) in &scored.statuses {
            if *status == HealthStatus::Critical {
                *state.critical_streaks.entry(id.clone()).or_insert(0) += 1;
            } else {
                state.critical_streaks.remove(id);
            }
        }
        // Forget carparks that left the snapshot
        state
            .critical_streaks
            .retain(|id, _| scored.snapshot.records.contains_key(id));

        for (id, streak) in &state.critical_streaks {
            if *streak < self.config.critical_streak {
                continue;
            }
            let Some(record) = scored.snapshot.records.get(id) else {
                continue;
            };

            let (title, message) = if record.available_lots == 0 {
                (
                    format!("{} full", record.name),
                    format!(
                        "{} ({}) has had no available lots for {} consecutive cycles",
                        record.name, id.agency, streak
                    ),
                )
            } else {
                (
                    format!("{} critically full", record.name),
                    format!(
                        "{} ({}) has been at critical occupancy for {} consecutive cycles ({} of {} lots free)",
                        record.name, id.agency, streak, record.available_lots, record.total_lots
                    ),
                )
            };

            alerts.push(Alert {
                severity: AlertSeverity::Critical,
                scope: AlertScope::Carpark(id.clone()),
                title,
                message,
                triggered_at: now,
            });
        }
    }

    fn agency_alerts(
        &self,
        scored: &ScoredSnapshot,
        degraded_agencies: &[Agency],
        now: DateTime<Utc>,
        alerts: &mut Vec<Alert>,
    ) {
        for (agency, health) in &scored.agencies {
            if degraded_agencies.contains(agency) {
                alerts.push(Alert {
                    severity: AlertSeverity::Critical,
                    scope: AlertScope::Agency(*agency),
                    title: format!("{agency} feed degraded"),
                    message: format!(
                        "{agency} has exceeded its staleness grace period; its records are excluded from this cycle"
                    ),
                    triggered_at: now,
                });
                continue;
            }

            if health.carparks > 0 {
                let stale_fraction = health.stale_count as f64 / health.carparks as f64;
                if stale_fraction > self.config.stale_fraction {
                    alerts.push(Alert {
                        severity: AlertSeverity::Critical,
                        scope: AlertScope::Agency(*agency),
                        title: format!("{agency} coverage degraded"),
                        message: format!(
                            "{:.0}% of {agency} records ({}/{}) are stale carry-overs from a prior poll",
                            stale_fraction * 100.0,
                            health.stale_count,
                            health.carparks
                        ),
                        triggered_at: now,
                    });
                    continue;
                }
            }

            if let Some(h) = health.health_percent {
                if h < self.config.agency_floor_percent {
                    alerts.push(Alert {
                        severity: AlertSeverity::Warning,
                        scope: AlertScope::Agency(*agency),
                        title: format!("{agency} health low"),
                        message: format!(
                            "{agency} health is {h:.1}%, below the {:.0}% floor ({} of {} carparks stressed)",
                            self.config.agency_floor_percent, health.stressed, health.carparks
                        ),
                        triggered_at: now,
                    });
                }
            }
        }
    }

    fn system_alerts(&self, scored: &ScoredSnapshot, now: DateTime<Utc>, alerts: &mut Vec<Alert>) {
        let scoreable = scored
            .statuses
            .values()
            .filter(|s| **s != HealthStatus::Unknown)
            .count();
        if scoreable == 0 {
            return;
        }

        let stressed = scored.statuses.values().filter(|s| s.is_stressed()).count();
        let fraction = stressed as f64 / scoreable as f64;

        if fraction >= self.config.system_critical_fraction {
            alerts.push(Alert {
                severity: AlertSeverity::Critical,
                scope: AlertScope::System,
                title: "System under critical stress".to_string(),
                message: format!(
                    "{:.1}% of carparks ({stressed}) are at limited or critical occupancy",
                    fraction * 100.0
                ),
                triggered_at: now,
            });
        } else if fraction >= self.config.system_warning_fraction {
            alerts.push(Alert {
                severity: AlertSeverity::Warning,
                scope: AlertScope::System,
                title: "Elevated system stress".to_string(),
                message: format!(
                    "{:.1}% of carparks ({stressed}) are at limited or critical occupancy",
                    fraction * 100.0
                ),
                triggered_at: now,
            });
        }
    }

    /// Flag grid cells where several carparks report zero availability at
    /// once; adjacent full carparks usually share a cause
    fn cluster_alerts(&self, scored: &ScoredSnapshot, now: DateTime<Utc>, alerts: &mut Vec<Alert>) {
        let mut cells: HashMap<(i64, i64), usize> = HashMap::new();

        for record in scored.snapshot.records.values() {
            if record.available_lots != 0 {
                continue;
            }
            let (Some(lat), Some(lon)) = (record.lat, record.lon) else {
                continue;
            };
            let cell = (
                (lat / self.config.cluster_grid_degrees) as i64,
                (lon / self.config.cluster_grid_degrees) as i64,
            );
            *cells.entry(cell).or_insert(0) += 1;
        }

        let clusters: Vec<usize> = cells
            .into_values()
            .filter(|count| *count >= self.config.cluster_min_full)
            .collect();

        if !clusters.is_empty() {
            let largest = clusters.iter().max().copied().unwrap_or(0);
            alerts.push(Alert {
                severity: AlertSeverity::Info,
                scope: AlertScope::System,
                title: "Zero-availability cluster detected".to_string(),
                message: format!(
                    "{} area(s) have {} or more fully occupied carparks within ~1 km (largest: {})",
                    clusters.len(),
                    self.config.cluster_min_full,
                    largest
                ),
                triggered_at: now,
            });
        }
    }
}

/// Lots-weighted mean of agency health scores
fn system_health(agencies: &BTreeMap<Agency, AgencyHealth>) -> Option<f64> {
    let mut weighted = 0.0;
    let mut weight = 0.0;

    for health in agencies.values() {
        if let Some(h) = health.health_percent {
            weighted += h * health.total_lots as f64;
            weight += health.total_lots as f64;
        }
    }

    if weight > 0.0 {
        Some(weighted / weight)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CarparkRecord;

    fn record(agency: Agency, local_id: &str, available: u32, total: u32) -> CarparkRecord {
        CarparkRecord {
            id: CarparkId::new(agency, local_id),
            name: format!("Carpark {local_id}"),
            area: None,
            lat: None,
            lon: None,
            lot_type: None,
            total_lots: total,
            available_lots: available,
            last_updated: Utc::now(),
            stale: false,
        }
    }

    fn snapshot(records: Vec<CarparkRecord>) -> UnifiedSnapshot {
        let mut snap = UnifiedSnapshot::new(Utc::now());
        for r in records {
            snap.records.insert(r.id.clone(), r);
        }
        snap
    }

    #[test]
    fn test_status_at_90_percent_occupancy() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();
        let snap = snapshot(vec![record(Agency::Lta, "1", 10, 100)]);

        let (scored, _) = scorer.score(&snap, &[], &mut state);

        let id = CarparkId::new(Agency::Lta, "1");
        assert_eq!(scored.status(&id), Some(HealthStatus::Limited));
        let occ = scored.snapshot.records[&id].occupancy_ratio().unwrap();
        assert!((occ - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_agency_health_formula() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();
        // Occupancies: 0.9 weighted 100, 0.5 weighted 300
        let snap = snapshot(vec![
            record(Agency::Hdb, "A", 10, 100),
            record(Agency::Hdb, "B", 150, 300),
        ]);

        let (scored, _) = scorer.score(&snap, &[], &mut state);

        let health = scored.agencies[&Agency::Hdb].health_percent.unwrap();
        // weighted occupancy = (0.9*100 + 0.5*300) / 400 = 0.6
        assert!((health - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_capacity_excluded_from_health_but_counted() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();
        let snap = snapshot(vec![
            record(Agency::Ura, "U1", 50, 100),
            record(Agency::Ura, "U2", 0, 0),
        ]);

        let (scored, _) = scorer.score(&snap, &[], &mut state);

        let ura = &scored.agencies[&Agency::Ura];
        assert_eq!(ura.carparks, 2);
        assert!((ura.health_percent.unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(
            scored.status(&CarparkId::new(Agency::Ura, "U2")),
            Some(HealthStatus::Unknown)
        );
    }

    #[test]
    fn test_health_monotonic_in_availability() {
        let scorer = Scorer::new(ScorerConfig::default());

        let mut prev = f64::NEG_INFINITY;
        for available in [0u32, 10, 25, 50, 75, 100] {
            let mut state = ScorerState::new();
            let snap = snapshot(vec![
                record(Agency::Lta, "1", available, 100),
                record(Agency::Lta, "2", 40, 200),
            ]);
            let (scored, _) = scorer.score(&snap, &[], &mut state);
            let health = scored.agencies[&Agency::Lta].health_percent.unwrap();
            assert!(health >= prev, "health decreased when availability rose");
            prev = health;
        }
    }

    #[test]
    fn test_critical_streak_alert_fires_on_third_cycle() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();
        let id = CarparkId::new(Agency::Hdb, "A1");

        for cycle in 1..=3 {
            let snap = snapshot(vec![record(Agency::Hdb, "A1", 0, 100)]);
            let (_, alerts) = scorer.score(&snap, &[], &mut state);

            let carpark_alerts: Vec<_> = alerts
                .iter()
                .filter(|a| matches!(&a.scope, AlertScope::Carpark(c) if *c == id))
                .collect();

            if cycle < 3 {
                assert!(carpark_alerts.is_empty(), "alert fired early on cycle {cycle}");
            } else {
                assert_eq!(carpark_alerts.len(), 1);
                assert_eq!(carpark_alerts[0].severity, AlertSeverity::Critical);
                assert!(carpark_alerts[0].title.contains("full"));
            }
        }
    }

    #[test]
    fn test_streak_resets_when_carpark_recovers() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();
        let id = CarparkId::new(Agency::Hdb, "A1");

        for _ in 0..2 {
            let snap = snapshot(vec![record(Agency::Hdb, "A1", 0, 100)]);
            scorer.score(&snap, &[], &mut state);
        }
        assert_eq!(state.streak(&id), 2);

        let snap = snapshot(vec![record(Agency::Hdb, "A1", 80, 100)]);
        scorer.score(&snap, &[], &mut state);
        assert_eq!(state.streak(&id), 0);
    }

    #[test]
    fn test_agency_floor_warning() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();
        // Occupancy 0.6 -> health 40%, below the 55% floor
        let snap = snapshot(vec![record(Agency::Ura, "U1", 40, 100)]);

        let (_, alerts) = scorer.score(&snap, &[], &mut state);

        assert!(alerts.iter().any(|a| {
            a.severity == AlertSeverity::Warning
                && matches!(a.scope, AlertScope::Agency(Agency::Ura))
        }));
    }

    #[test]
    fn test_degraded_agency_critical_alert() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();
        let snap = snapshot(vec![record(Agency::Hdb, "A1", 80, 100)]);

        let (_, alerts) = scorer.score(&snap, &[Agency::Lta], &mut state);

        let degraded: Vec<_> = alerts
            .iter()
            .filter(|a| matches!(a.scope, AlertScope::Agency(Agency::Lta)))
            .collect();
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].severity, AlertSeverity::Critical);
        assert!(degraded[0].title.contains("degraded"));
    }

    #[test]
    fn test_stale_coverage_critical_alert() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();

        let mut stale_a = record(Agency::Hdb, "A1", 80, 100);
        stale_a.stale = true;
        let mut stale_b = record(Agency::Hdb, "A2", 80, 100);
        stale_b.stale = true;
        let snap = snapshot(vec![stale_a, stale_b, record(Agency::Hdb, "A3", 80, 100)]);

        let (_, alerts) = scorer.score(&snap, &[], &mut state);

        assert!(alerts.iter().any(|a| {
            a.severity == AlertSeverity::Critical
                && matches!(a.scope, AlertScope::Agency(Agency::Hdb))
                && a.title.contains("coverage")
        }));
    }

    #[test]
    fn test_system_stress_alerts() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();
        // 2 of 4 carparks stressed -> 50%, above the critical fraction
        let snap = snapshot(vec![
            record(Agency::Hdb, "A1", 2, 100),
            record(Agency::Hdb, "A2", 5, 100),
            record(Agency::Lta, "1", 80, 100),
            record(Agency::Ura, "U1", 80, 100),
        ]);

        let (_, alerts) = scorer.score(&snap, &[], &mut state);

        assert!(alerts.iter().any(|a| {
            a.severity == AlertSeverity::Critical
                && a.scope == AlertScope::System
                && a.title.contains("critical stress")
        }));
    }

    #[test]
    fn test_zero_availability_cluster_info_alert() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();

        let mut records = Vec::new();
        for i in 0..3 {
            let mut r = record(Agency::Ura, &format!("U{i}"), 0, 100);
            r.lat = Some(1.3001 + i as f64 * 0.0001);
            r.lon = Some(103.8001);
            records.push(r);
        }
        let snap = snapshot(records);

        let (_, alerts) = scorer.score(&snap, &[], &mut state);

        assert!(alerts.iter().any(|a| {
            a.severity == AlertSeverity::Info && a.title.contains("cluster")
        }));
    }

    #[test]
    fn test_alerts_sorted_critical_first() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();

        // Degraded LTA (critical) + low URA health (warning)
        let snap = snapshot(vec![record(Agency::Ura, "U1", 40, 100)]);
        let (_, alerts) = scorer.score(&snap, &[Agency::Lta], &mut state);

        assert!(alerts.len() >= 2);
        for pair in alerts.windows(2) {
            assert!(pair[0].severity <= pair[1].severity);
        }
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_agency_ranking() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();
        let snap = snapshot(vec![
            record(Agency::Hdb, "A1", 90, 100), // health 90
            record(Agency::Lta, "1", 50, 100),  // health 50
            record(Agency::Ura, "U1", 20, 100), // health 20
        ]);

        let (scored, _) = scorer.score(&snap, &[], &mut state);

        assert_eq!(scored.agencies[&Agency::Hdb].rank, 1);
        assert_eq!(scored.agencies[&Agency::Lta].rank, 2);
        assert_eq!(scored.agencies[&Agency::Ura].rank, 3);
    }

    #[test]
    fn test_system_health_weighted_across_agencies() {
        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();
        let snap = snapshot(vec![
            record(Agency::Hdb, "A1", 90, 100), // health 90, weight 100
            record(Agency::Lta, "1", 150, 300), // health 50, weight 300
        ]);

        let (scored, _) = scorer.score(&snap, &[], &mut state);

        // (90*100 + 50*300) / 400 = 60
        assert!((scored.system_health_percent.unwrap() - 60.0).abs() < 1e-9);
        assert_eq!(scored.system_status_word(), "Good");
    }
}
