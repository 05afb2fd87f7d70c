//! What-if policy simulation
//!
//! Applies transparent elasticity-based transforms to a copy of the current
//! snapshot and re-scores the copy. Transforms are pure; the baseline
//! snapshot is never mutated. Elasticity coefficients come from
//! transportation research literature and are deliberately simple and
//! inspectable.

use crate::models::{Agency, ScoredSnapshot};
use crate::scorer::{Scorer, ScorerConfig, ScorerState};
use serde::{Deserialize, Serialize};

/// 10% price increase -> 3% demand decrease
pub const PRICE_ELASTICITY: f64 = -0.3;
/// Fraction of added capacity absorbed by induced demand
pub const CAPACITY_ELASTICITY: f64 = 0.5;
/// Share of displaced demand that lands on other agencies' carparks
pub const SPILLOVER_RATE: f64 = 0.15;

/// The policy lever being simulated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PolicyKind {
    Pricing { price_change_percent: f64 },
    Capacity { capacity_change_percent: f64 },
}

/// One policy scenario to evaluate against the current snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyScenario {
    pub name: String,
    #[serde(flatten)]
    pub kind: PolicyKind,
    /// Restrict the transform to one agency, or apply system-wide
    pub target_agency: Option<Agency>,
}

/// Headline figures for one side of a simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFigures {
    pub total_available_lots: u64,
    pub stressed_carparks: usize,
    pub system_health_percent: Option<f64>,
}

impl ScenarioFigures {
    fn from_scored(scored: &ScoredSnapshot) -> Self {
        Self {
            total_available_lots: scored.total_available_lots,
            stressed_carparks: scored.statuses.values().filter(|s| s.is_stressed()).count(),
            system_health_percent: scored.system_health_percent,
        }
    }
}

/// Outcome of simulating one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub scenario: PolicyScenario,
    pub baseline: ScenarioFigures,
    pub projected: ScenarioFigures,
    /// Full re-scored counterfactual for downstream consumers
    pub projected_snapshot: ScoredSnapshot,
}

impl SimulationResult {
    /// Positive when the scenario reduces stressed carparks
    pub fn stress_reduction(&self) -> i64 {
        self.baseline.stressed_carparks as i64 - self.projected.stressed_carparks as i64
    }
}

/// Ranking of several simulated scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioComparison {
    /// Scenario names ordered by stress reduction, best first
    pub ranking: Vec<String>,
    pub recommendation: Option<String>,
}

/// Runs policy transforms and re-scores the counterfactual snapshot
pub struct PolicySimulator {
    scorer: Scorer,
}

impl PolicySimulator {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            scorer: Scorer::new(config),
        }
    }

    /// Simulate one scenario against the current scored snapshot.
    ///
    /// The counterfactual is scored with fresh state and no degraded
    /// agencies, so streak-based alerts never leak into projections.
    pub fn simulate(&self, baseline: &ScoredSnapshot, scenario: &PolicyScenario) -> SimulationResult {
        let mut snapshot = baseline.snapshot.clone();

        match scenario.kind {
            PolicyKind::Pricing {
                price_change_percent,
            } => {
                let demand_change = PRICE_ELASTICITY * price_change_percent / 100.0;
                let mut displaced: f64 = 0.0;

                for record in snapshot.records.values_mut() {
                    if !targets(scenario.target_agency, record.id.agency) {
                        continue;
                    }
                    if record.total_lots == 0 {
                        continue;
                    }
                    let occupied = (record.total_lots - record.available_lots) as f64;
                    let new_occupied = (occupied * (1.0 + demand_change))
                        .round()
                        .clamp(0.0, record.total_lots as f64);
                    displaced += occupied - new_occupied;
                    record.available_lots = record.total_lots - new_occupied as u32;
                }

                // Displaced demand partially lands on untargeted carparks
                if scenario.target_agency.is_some() && displaced > 0.0 {
                    let spill = displaced * SPILLOVER_RATE;
                    let other_available: u64 = snapshot
                        .records
                        .values()
                        .filter(|r| !targets(scenario.target_agency, r.id.agency))
                        .map(|r| r.available_lots as u64)
                        .sum();

                    if other_available > 0 {
                        for record in snapshot.records.values_mut() {
                            if targets(scenario.target_agency, record.id.agency) {
                                continue;
                            }
                            let share =
                                record.available_lots as f64 / other_available as f64;
                            let loss = (spill * share).round() as u32;
                            record.available_lots =
                                record.available_lots.saturating_sub(loss);
                        }
                    }
                }
            }
            PolicyKind::Capacity {
                capacity_change_percent,
            } => {
                for record in snapshot.records.values_mut() {
                    if !targets(scenario.target_agency, record.id.agency) {
                        continue;
                    }
                    if record.total_lots == 0 {
                        continue;
                    }
                    let old_total = record.total_lots as f64;
                    let new_total =
                        (old_total * (1.0 + capacity_change_percent / 100.0)).round().max(0.0);
                    let delta = new_total - old_total;
                    // Added capacity induces some new demand; removed
                    // capacity releases some
                    let induced = delta * CAPACITY_ELASTICITY;
                    let new_available = (record.available_lots as f64 + delta - induced)
                        .round()
                        .clamp(0.0, new_total);

                    record.total_lots = new_total as u32;
                    record.available_lots = new_available as u32;
                }
            }
        }

        let mut state = ScorerState::new();
        let (projected_snapshot, _) = self.scorer.score(&snapshot, &[], &mut state);

        SimulationResult {
            scenario: scenario.clone(),
            baseline: ScenarioFigures::from_scored(baseline),
            projected: ScenarioFigures::from_scored(&projected_snapshot),
            projected_snapshot,
        }
    }

    /// Rank several simulation results by stress reduction
    pub fn compare(&self, results: &[SimulationResult]) -> ScenarioComparison {
        let mut ranked: Vec<&SimulationResult> = results.iter().collect();
        ranked.sort_by_key(|r| -r.stress_reduction());

        let ranking: Vec<String> =
            ranked.iter().map(|r| r.scenario.name.clone()).collect();
        let recommendation = ranking.first().cloned();

        ScenarioComparison {
            ranking,
            recommendation,
        }
    }
}

fn targets(target: Option<Agency>, agency: Agency) -> bool {
    target.map(|t| t == agency).unwrap_or(true)
}
