//! Multi-agency reconciliation
//!
//! Merges the per-agency normalized records of one poll cycle into a single
//! `UnifiedSnapshot`. Identity is the composite (agency, local id) key, so
//! cross-agency collisions cannot occur; the only merge conflict possible is
//! an agency repeating a local id within one cycle, which is resolved by
//! timestamp and recorded as a data-quality event.
//!
//! A failing agency keeps its last-good records, marked stale, for a bounded
//! number of cycles before being excluded entirely.

use crate::error::{DataQualityEvent, FetchError};
use crate::models::{Agency, CarparkRecord, UnifiedSnapshot};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Reconciliation configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Number of consecutive failed cycles an agency's last-good records
    /// are carried forward as stale before being excluded
    pub grace_cycles: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { grace_cycles: 5 }
    }
}

/// Result of reconciling one poll cycle
#[derive(Debug)]
pub struct ReconcileOutcome {
    pub snapshot: UnifiedSnapshot,
    /// Agencies excluded this cycle (no usable records, or past the grace
    /// window); the scorer raises the agency-degraded alert
    pub degraded_agencies: Vec<Agency>,
    pub quality_events: Vec<DataQualityEvent>,
}

/// Merges per-agency cycle outputs into unified snapshots, carrying
/// last-good records across failed cycles
pub struct Reconciler {
    config: ReconcilerConfig,
    last_good: HashMap<Agency, Vec<CarparkRecord>>,
    fail_cycles: HashMap<Agency, u32>,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            last_good: HashMap::new(),
            fail_cycles: HashMap::new(),
        }
    }

    /// Consecutive failed cycles for an agency
    pub fn fail_cycles(&self, agency: Agency) -> u32 {
        self.fail_cycles.get(&agency).copied().unwrap_or(0)
    }

    /// Reconcile one cycle's per-agency results into a unified snapshot.
    ///
    /// `inputs` holds each agency's normalized records or its fetch error.
    /// All agencies must be present; reconciliation is a join over the full
    /// set, not a pipeline.
    pub fn reconcile(
        &mut self,
        now: DateTime<Utc>,
        inputs: Vec<(Agency, Result<Vec<CarparkRecord>, FetchError>)>,
    ) -> ReconcileOutcome {
        let mut snapshot = UnifiedSnapshot::new(now);
        let mut degraded_agencies = Vec::new();
        let mut quality_events = Vec::new();

        for (agency, result) in inputs {
            match result {
                Ok(records) => {
                    self.fail_cycles.insert(agency, 0);
                    let deduped = dedupe(records, &mut quality_events);
                    for record in &deduped {
                        snapshot.records.insert(record.id.clone(), record.clone());
                    }
                    debug!(agency = %agency, records = deduped.len(), "Agency reconciled");
                    self.last_good.insert(agency, deduped);
                }
                Err(err) => {
                    let fails = self.fail_cycles.entry(agency).or_insert(0);
                    *fails += 1;
                    let fails = *fails;

                    match self.last_good.get(&agency) {
                        Some(prior) if fails <= self.config.grace_cycles => {
                            warn!(
                                agency = %agency,
                                error = %err,
                                fail_cycles = fails,
                                grace_cycles = self.config.grace_cycles,
                                "Agency fetch failed, carrying stale records"
                            );
                            for record in prior {
                                let mut stale = record.clone();
                                stale.stale = true;
                                snapshot.records.insert(stale.id.clone(), stale);
                            }
                        }
                        _ => {
                            warn!(
                                agency = %agency,
                                error = %err,
                                fail_cycles = fails,
                                "Agency fetch failed past grace period, excluding records"
                            );
                            degraded_agencies.push(agency);
                        }
                    }
                }
            }
        }

        ReconcileOutcome {
            snapshot,
            degraded_agencies,
            quality_events,
        }
    }
}

/// Drop same-id duplicates within one agency's cycle output; the later
/// `last_updated` wins
fn dedupe(
    records: Vec<CarparkRecord>,
    events: &mut Vec<DataQualityEvent>,
) -> Vec<CarparkRecord> {
    let mut by_id: HashMap<crate::models::CarparkId, CarparkRecord> = HashMap::new();

    for record in records {
        match by_id.get(&record.id) {
            Some(existing) => {
                events.push(DataQualityEvent::DuplicateId {
                    id: record.id.clone(),
                });
                if record.last_updated > existing.last_updated {
                    by_id.insert(record.id.clone(), record);
                }
            }
            None => {
                by_id.insert(record.id.clone(), record);
            }
        }
    }

    let mut out: Vec<CarparkRecord> = by_id.into_values().collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}
