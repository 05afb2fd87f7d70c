//! Bounded per-cycle history for trend reporting
//!
//! Keeps lightweight aggregates of recent cycles in a rolling window so
//! consumers can show availability deltas and per-agency trends without any
//! storage layer. Full snapshots are never retained here.

use crate::models::{Agency, ScoredSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Default number of cycles retained (~1 hour at a 60 s poll interval)
const DEFAULT_MAX_CYCLES: usize = 60;

/// Aggregate figures for one completed cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CyclePoint {
    pub at: DateTime<Utc>,
    pub total_carparks: usize,
    pub total_available_lots: u64,
    pub system_health_percent: Option<f64>,
    pub agency_available: BTreeMap<Agency, u64>,
    pub agency_health: BTreeMap<Agency, Option<f64>>,
}

impl CyclePoint {
    fn from_scored(scored: &ScoredSnapshot) -> Self {
        let mut agency_available = BTreeMap::new();
        let mut agency_health = BTreeMap::new();
        for (agency, health) in &scored.agencies {
            agency_available.insert(*agency, health.available_lots);
            agency_health.insert(*agency, health.health_percent);
        }

        Self {
            at: scored.snapshot.taken_at,
            total_carparks: scored.total_carparks,
            total_available_lots: scored.total_available_lots,
            system_health_percent: scored.system_health_percent,
            agency_available,
            agency_health,
        }
    }
}

/// Cycle-over-cycle availability movement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityChange {
    pub delta_lots: i64,
    pub percent: f64,
}

/// Rolling window of cycle aggregates
#[derive(Debug)]
pub struct SnapshotHistory {
    max_cycles: usize,
    points: VecDeque<CyclePoint>,
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CYCLES)
    }
}

impl SnapshotHistory {
    pub fn new(max_cycles: usize) -> Self {
        Self {
            max_cycles: max_cycles.max(1),
            points: VecDeque::new(),
        }
    }

    /// Record one completed cycle, evicting the oldest past the window
    pub fn record(&mut self, scored: &ScoredSnapshot) {
        self.points.push_back(CyclePoint::from_scored(scored));
        while self.points.len() > self.max_cycles {
            self.points.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&CyclePoint> {
        self.points.back()
    }

    /// All retained points, oldest first
    pub fn points(&self) -> impl Iterator<Item = &CyclePoint> {
        self.points.iter()
    }

    /// Change in total availability versus the previous cycle
    pub fn availability_change(&self) -> Option<AvailabilityChange> {
        let len = self.points.len();
        if len < 2 {
            return None;
        }
        let prev = &self.points[len - 2];
        let curr = &self.points[len - 1];

        let delta = curr.total_available_lots as i64 - prev.total_available_lots as i64;
        let percent = if prev.total_available_lots > 0 {
            delta as f64 / prev.total_available_lots as f64 * 100.0
        } else {
            0.0
        };

        Some(AvailabilityChange {
            delta_lots: delta,
            percent,
        })
    }

    /// Net availability movement per agency across the retained window
    /// (first point to latest)
    pub fn agency_trends(&self) -> BTreeMap<Agency, i64> {
        let mut out = BTreeMap::new();
        let (Some(first), Some(last)) = (self.points.front(), self.points.back()) else {
            return out;
        };

        for agency in Agency::ALL {
            let start = first.agency_available.get(&agency).copied().unwrap_or(0);
            let end = last.agency_available.get(&agency).copied().unwrap_or(0);
            out.insert(agency, end as i64 - start as i64);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CarparkId, CarparkRecord, UnifiedSnapshot};
    use crate::scorer::{Scorer, ScorerConfig, ScorerState};

    fn scored_with_availability(available: u32) -> ScoredSnapshot {
        let mut snap = UnifiedSnapshot::new(Utc::now());
        let rec = CarparkRecord {
            id: CarparkId::new(Agency::Hdb, "A1"),
            name: "Carpark A1".to_string(),
            area: None,
            lat: None,
            lon: None,
            lot_type: None,
            total_lots: 100,
            available_lots: available,
            last_updated: Utc::now(),
            stale: false,
        };
        snap.records.insert(rec.id.clone(), rec);

        let scorer = Scorer::new(ScorerConfig::default());
        let mut state = ScorerState::new();
        scorer.score(&snap, &[], &mut state).0
    }

    #[test]
    fn test_window_eviction() {
        let mut history = SnapshotHistory::new(3);
        for i in 0..5 {
            history.record(&scored_with_availability(10 + i));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.latest().unwrap().total_available_lots, 14);
    }

    #[test]
    fn test_availability_change() {
        let mut history = SnapshotHistory::default();
        assert!(history.availability_change().is_none());

        history.record(&scored_with_availability(50));
        assert!(history.availability_change().is_none());

        history.record(&scored_with_availability(40));
        let change = history.availability_change().unwrap();
        assert_eq!(change.delta_lots, -10);
        assert!((change.percent - -20.0).abs() < 1e-9);
    }

    #[test]
    fn test_agency_trends_first_to_last() {
        let mut history = SnapshotHistory::default();
        history.record(&scored_with_availability(30));
        history.record(&scored_with_availability(45));
        history.record(&scored_with_availability(60));

        let trends = history.agency_trends();
        assert_eq!(trends[&Agency::Hdb], 30);
        assert_eq!(trends[&Agency::Lta], 0);
    }
}
