//! Poll cycle engine
//!
//! Drives the fetch -> normalize -> reconcile -> score pipeline on a fixed
//! interval with jitter. The three agency fetches run concurrently; the
//! cycle result is swapped atomically into shared state for the HTTP API,
//! so readers always see a complete cycle or none at all.

use crate::adapter::{normalize, CapacityTable, FeedAdapter};
use crate::error::FetchError;
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::history::SnapshotHistory;
use crate::insight::{NarrativeDepth, NarrativeRequest, NarrativeService};
use crate::models::{Agency, CarparkRecord, ScoredSnapshot};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::reconcile::{Reconciler, ReconcilerConfig};
use crate::scorer::{Alert, AlertScope, Scorer, ScorerConfig, ScorerState};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, Instant};
use tracing::{debug, info};

/// Configuration for the poll loop
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Base poll interval (default: 60 seconds)
    pub interval: Duration,
    /// Maximum jitter added to each tick (default: 2 seconds)
    pub jitter: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            jitter: Duration::from_secs(2),
        }
    }
}

/// Output of one completed poll cycle
#[derive(Debug, Clone)]
pub struct CycleOutput {
    pub scored: ScoredSnapshot,
    pub alerts: Vec<Alert>,
    /// Best-effort; `None` when the narrative service is absent or failed
    pub narrative: Option<String>,
}

/// State shared between the engine and the HTTP API
#[derive(Debug, Default)]
pub struct EngineState {
    pub latest: Option<CycleOutput>,
    pub history: SnapshotHistory,
}

pub type SharedState = Arc<RwLock<EngineState>>;

/// The poll cycle engine.
///
/// Owns the adapters and the full scoring pipeline; publishes each cycle's
/// output to `SharedState`.
pub struct CycleEngine {
    adapters: Vec<Arc<dyn FeedAdapter>>,
    capacities: CapacityTable,
    reconciler: Reconciler,
    scorer: Scorer,
    scorer_state: ScorerState,
    narrative: Option<Arc<dyn NarrativeService>>,
    poll_config: PollConfig,
    state: SharedState,
    health: HealthRegistry,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl CycleEngine {
    /// Run one full poll cycle and publish the result
    pub async fn run_cycle(&mut self) -> Result<()> {
        let start = Instant::now();
        let now = Utc::now();

        let inputs = self.fetch_all().await;
        let outcome = self.reconciler.reconcile(now, inputs);

        for event in &outcome.quality_events {
            self.logger
                .log_data_quality(event.kind(), &format!("{event:?}"));
        }

        self.update_feed_health(&outcome.degraded_agencies).await;

        let (scored, alerts) = self.scorer.score(
            &outcome.snapshot,
            &outcome.degraded_agencies,
            &mut self.scorer_state,
        );

        for alert in &alerts {
            let scope = match &alert.scope {
                AlertScope::Carpark(id) => id.to_string(),
                AlertScope::Agency(agency) => agency.to_string(),
                AlertScope::System => "system".to_string(),
            };
            self.logger
                .log_alert(&alert.severity.to_string(), &scope, &alert.title, &alert.message);
        }

        self.update_pipeline_health(&outcome.degraded_agencies, &scored)
            .await;

        let duration_secs = start.elapsed().as_secs_f64();
        self.publish_metrics(&scored, &alerts, duration_secs);
        self.logger.log_cycle(
            scored.total_carparks,
            scored.total_available_lots,
            scored.system_health_percent,
            alerts.len(),
            duration_secs,
        );

        // Publish before the narrative call so narrative latency cannot
        // delay scores or alerts
        {
            let mut state = self.state.write().await;
            state.history.record(&scored);
            state.latest = Some(CycleOutput {
                scored: scored.clone(),
                alerts: alerts.clone(),
                narrative: None,
            });
        }
        self.health.set_ready(true).await;

        if let Some(text) = self.generate_narrative(&scored, &alerts).await {
            let mut state = self.state.write().await;
            if let Some(latest) = state.latest.as_mut() {
                latest.narrative = Some(text);
            }
        }

        Ok(())
    }

    /// Run the poll loop until shutdown is signalled
    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.poll_config.interval.as_secs(),
            "Starting poll cycle loop"
        );

        // Created once; re-creating it per iteration would tick immediately
        // and poll the feeds continuously
        let mut ticker = interval(self.current_interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        debug!(error = %e, "Poll cycle failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down poll cycle loop");
                    break;
                }
            }
        }
    }

    /// Fetch and normalize all agency feeds concurrently
    async fn fetch_all(&self) -> Vec<(Agency, Result<Vec<CarparkRecord>, FetchError>)> {
        let now = Utc::now();
        let fetches = self.adapters.iter().map(|adapter| {
            let adapter = Arc::clone(adapter);
            async move { (adapter.agency(), adapter.fetch().await) }
        });

        let raw_results = futures::future::join_all(fetches).await;

        let mut out = Vec::with_capacity(raw_results.len());
        for (agency, result) in raw_results {
            match result {
                Ok(raw_records) => {
                    let mut events = Vec::new();
                    let records: Vec<CarparkRecord> = raw_records
                        .into_iter()
                        .filter_map(|raw| {
                            normalize(&raw, agency, now, &self.capacities, &mut events)
                        })
                        .collect();
                    for event in &events {
                        self.logger
                            .log_data_quality(event.kind(), &format!("{event:?}"));
                    }
                    out.push((agency, Ok(records)));
                }
                Err(err) => {
                    self.metrics.inc_fetch_errors(agency);
                    out.push((agency, Err(err)));
                }
            }
        }
        out
    }

    /// Reflect each agency's reconciliation outcome in the health registry
    async fn update_feed_health(&self, degraded_agencies: &[Agency]) {
        for agency in Agency::ALL {
            let name = components::feed(agency);
            let fails = self.reconciler.fail_cycles(agency);

            let health = if degraded_agencies.contains(&agency) {
                ComponentHealth::unhealthy(format!(
                    "feed failing for {fails} cycles, records excluded"
                ))
            } else if fails > 0 {
                ComponentHealth::degraded(format!(
                    "feed failing for {fails} cycles, carrying stale records"
                ))
            } else {
                ComponentHealth::healthy()
            };
            self.health.update(&name, health).await;
        }
    }

    /// Reflect the reconcile and score stages in the health registry
    async fn update_pipeline_health(&self, degraded_agencies: &[Agency], scored: &ScoredSnapshot) {
        let excluded = degraded_agencies.len();
        let reconciler = if excluded == Agency::ALL.len() {
            ComponentHealth::unhealthy("all agency feeds excluded")
        } else if excluded > 0 {
            ComponentHealth::degraded(format!("{excluded} agency feed(s) excluded"))
        } else {
            ComponentHealth::healthy()
        };
        self.health.update(components::RECONCILER, reconciler).await;

        let scorer = if scored.total_carparks > 0 && scored.system_health_percent.is_none() {
            ComponentHealth::degraded("no carpark has known capacity")
        } else {
            ComponentHealth::healthy()
        };
        self.health.update(components::SCORER, scorer).await;
    }

    /// Best-effort narrative; failures are logged and swallowed
    async fn generate_narrative(
        &self,
        scored: &ScoredSnapshot,
        alerts: &[Alert],
    ) -> Option<String> {
        let service = self.narrative.as_ref()?;
        let request = NarrativeRequest::from_scored(scored, alerts, NarrativeDepth::Full);

        match service.narrate(&request).await {
            Ok(text) => {
                self.health.set_healthy(components::NARRATIVE).await;
                Some(text)
            }
            Err(err) => {
                self.metrics.inc_narrative_failures();
                self.logger.log_narrative_failure(&err.to_string());
                self.health
                    .set_degraded(components::NARRATIVE, err.to_string())
                    .await;
                None
            }
        }
    }

    fn publish_metrics(&self, scored: &ScoredSnapshot, alerts: &[Alert], duration_secs: f64) {
        self.metrics.observe_poll_latency(duration_secs);
        self.metrics.set_carparks_tracked(scored.total_carparks as i64);
        self.metrics
            .set_available_lots(scored.total_available_lots as i64);
        self.metrics.set_system_health(scored.system_health_percent);

        for severity in ["critical", "warning", "info"] {
            let count = alerts
                .iter()
                .filter(|a| a.severity.to_string() == severity)
                .count();
            self.metrics.set_active_alerts(severity, count as i64);
        }

        for (agency, health) in &scored.agencies {
            self.metrics.set_agency_health(*agency, health.health_percent);
            self.metrics
                .set_agency_stale_records(*agency, health.stale_count as i64);
        }
    }

    fn current_interval(&self) -> Duration {
        let jitter_ms = rand_jitter(self.poll_config.jitter.as_millis() as u64);
        self.poll_config.interval + Duration::from_millis(jitter_ms)
    }
}

/// Jitter between 0 and max_ms to keep pollers from aligning
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}

/// Builder for the cycle engine
pub struct CycleEngineBuilder {
    adapters: Vec<Arc<dyn FeedAdapter>>,
    capacities: CapacityTable,
    reconciler_config: ReconcilerConfig,
    scorer_config: ScorerConfig,
    narrative: Option<Arc<dyn NarrativeService>>,
    poll_config: PollConfig,
    history_cycles: Option<usize>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl CycleEngineBuilder {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
            capacities: CapacityTable::new(),
            reconciler_config: ReconcilerConfig::default(),
            scorer_config: ScorerConfig::default(),
            narrative: None,
            poll_config: PollConfig::default(),
            history_cycles: None,
            health: None,
            logger: None,
        }
    }

    pub fn adapter(mut self, adapter: Arc<dyn FeedAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn capacities(mut self, capacities: CapacityTable) -> Self {
        self.capacities = capacities;
        self
    }

    pub fn reconciler_config(mut self, config: ReconcilerConfig) -> Self {
        self.reconciler_config = config;
        self
    }

    pub fn scorer_config(mut self, config: ScorerConfig) -> Self {
        self.scorer_config = config;
        self
    }

    pub fn narrative(mut self, service: Arc<dyn NarrativeService>) -> Self {
        self.narrative = Some(service);
        self
    }

    pub fn poll_config(mut self, config: PollConfig) -> Self {
        self.poll_config = config;
        self
    }

    pub fn history_cycles(mut self, cycles: usize) -> Self {
        self.history_cycles = Some(cycles);
        self
    }

    pub fn health(mut self, registry: HealthRegistry) -> Self {
        self.health = Some(registry);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the engine and its shared state handle
    pub fn build(self) -> Result<(CycleEngine, SharedState)> {
        if self.adapters.is_empty() {
            anyhow::bail!("at least one feed adapter is required");
        }

        let state: SharedState = Arc::new(RwLock::new(EngineState {
            latest: None,
            history: self
                .history_cycles
                .map(SnapshotHistory::new)
                .unwrap_or_default(),
        }));

        let engine = CycleEngine {
            adapters: self.adapters,
            capacities: self.capacities,
            reconciler: Reconciler::new(self.reconciler_config),
            scorer: Scorer::new(self.scorer_config),
            scorer_state: ScorerState::new(),
            narrative: self.narrative,
            poll_config: self.poll_config,
            state: Arc::clone(&state),
            health: self.health.unwrap_or_default(),
            metrics: EngineMetrics::new(),
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new("parksense")),
        };

        Ok((engine, state))
    }
}

impl Default for CycleEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NarrativeError;
    use crate::insight::NarrativeRequest;
    use crate::models::RawFeedRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockAdapter {
        agency: Agency,
        fail: AtomicBool,
        fetches: AtomicUsize,
        records: Vec<(String, u32)>,
    }

    impl MockAdapter {
        fn new(agency: Agency, records: Vec<(&str, u32)>) -> Self {
            Self {
                agency,
                fail: AtomicBool::new(false),
                fetches: AtomicUsize::new(0),
                records: records
                    .into_iter()
                    .map(|(id, lots)| (id.to_string(), lots))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl FeedAdapter for MockAdapter {
        fn agency(&self) -> Agency {
            self.agency
        }

        async fn fetch(&self) -> Result<Vec<RawFeedRecord>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::Unavailable("mock outage".to_string()));
            }
            Ok(self
                .records
                .iter()
                .map(|(id, lots)| {
                    serde_json::from_value(serde_json::json!({
                        "CarParkID": id,
                        "Development": format!("Carpark {id}"),
                        "AvailableLots": lots,
                        "TotalLots": 100,
                        "Agency": self.agency.as_str(),
                    }))
                    .unwrap()
                })
                .collect())
        }
    }

    struct FailingNarrator;

    #[async_trait]
    impl NarrativeService for FailingNarrator {
        async fn narrate(&self, _request: &NarrativeRequest) -> Result<String, NarrativeError> {
            Err(NarrativeError::Timeout)
        }
    }

    struct SlowNarrator;

    #[async_trait]
    impl NarrativeService for SlowNarrator {
        async fn narrate(&self, _request: &NarrativeRequest) -> Result<String, NarrativeError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok("All quiet across agencies.".to_string())
        }
    }

    fn engine_with(
        hdb: Arc<MockAdapter>,
        narrative: Option<Arc<dyn NarrativeService>>,
    ) -> (CycleEngine, SharedState) {
        let mut builder = CycleEngineBuilder::new()
            .adapter(hdb)
            .adapter(Arc::new(MockAdapter::new(Agency::Lta, vec![("1", 20)])))
            .adapter(Arc::new(MockAdapter::new(Agency::Ura, vec![("U1", 30)])));
        if let Some(service) = narrative {
            builder = builder.narrative(service);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_builder_requires_adapters() {
        assert!(CycleEngineBuilder::new().build().is_err());
    }

    #[tokio::test]
    async fn test_run_cycle_publishes_state_and_readiness() {
        let hdb = Arc::new(MockAdapter::new(Agency::Hdb, vec![("A1", 10), ("A2", 50)]));
        let (mut engine, state) = engine_with(hdb, None);
        let health = engine.health.clone();

        assert!(!health.readiness().await.ready);
        engine.run_cycle().await.unwrap();

        let state = state.read().await;
        let output = state.latest.as_ref().expect("cycle output published");
        assert_eq!(output.scored.total_carparks, 4);
        assert_eq!(state.history.len(), 1);
        assert!(output.narrative.is_none());
        drop(state);

        assert!(health.readiness().await.ready);

        let report = health.health().await;
        assert_eq!(
            report.components[components::RECONCILER].status,
            crate::health::ComponentStatus::Healthy
        );
        assert_eq!(
            report.components[components::SCORER].status,
            crate::health::ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_all_feeds_failing_marks_reconciler_unhealthy() {
        let mut builder = CycleEngineBuilder::new();
        for agency in Agency::ALL {
            let adapter = Arc::new(MockAdapter::new(agency, vec![("X", 5)]));
            adapter.fail.store(true, Ordering::SeqCst);
            builder = builder.adapter(adapter);
        }
        let (mut engine, _state) = builder.build().unwrap();

        engine.run_cycle().await.unwrap();

        let health = engine.health.health().await;
        assert_eq!(
            health.components[components::RECONCILER].status,
            crate::health::ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_failing_feed_marks_component_and_carries_stale() {
        let hdb = Arc::new(MockAdapter::new(Agency::Hdb, vec![("A1", 10)]));
        let (mut engine, state) = engine_with(Arc::clone(&hdb), None);

        engine.run_cycle().await.unwrap();
        hdb.fail.store(true, Ordering::SeqCst);
        engine.run_cycle().await.unwrap();

        let state = state.read().await;
        let output = state.latest.as_ref().unwrap();
        assert_eq!(output.scored.snapshot.stale_count(Agency::Hdb), 1);

        let health = engine.health.health().await;
        assert_eq!(
            health.components["feed_hdb"].status,
            crate::health::ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_narrative_failure_does_not_block_cycle() {
        let hdb = Arc::new(MockAdapter::new(Agency::Hdb, vec![("A1", 10)]));
        let (mut engine, state) = engine_with(hdb, Some(Arc::new(FailingNarrator)));

        engine.run_cycle().await.unwrap();

        let state = state.read().await;
        let output = state.latest.as_ref().unwrap();
        assert!(output.narrative.is_none());
        assert_eq!(output.scored.total_carparks, 3);
    }

    #[tokio::test]
    async fn test_poll_loop_waits_a_full_interval_between_cycles() {
        let hdb = Arc::new(MockAdapter::new(Agency::Hdb, vec![("A1", 10)]));
        let (engine, _state) = CycleEngineBuilder::new()
            .adapter(Arc::clone(&hdb) as Arc<dyn FeedAdapter>)
            .poll_config(PollConfig {
                interval: Duration::from_millis(100),
                jitter: Duration::ZERO,
            })
            .build()
            .unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
        let handle = tokio::spawn(engine.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(350)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        // Four ticks fit in 350ms at a 100ms interval (the first fires
        // immediately); anything far beyond that means the loop is not
        // waiting between cycles
        let fetches = hdb.fetches.load(Ordering::SeqCst);
        assert!(fetches >= 2, "loop barely polled: {fetches} fetches");
        assert!(fetches <= 8, "loop polled continuously: {fetches} fetches");
    }

    #[tokio::test]
    async fn test_cycle_published_before_narrative_resolves() {
        let hdb = Arc::new(MockAdapter::new(Agency::Hdb, vec![("A1", 10)]));
        let (mut engine, state) = engine_with(hdb, Some(Arc::new(SlowNarrator)));

        let handle = tokio::spawn(async move { engine.run_cycle().await.unwrap() });

        // The narrator takes a full second; scores and alerts must be
        // visible well before it resolves
        tokio::time::sleep(Duration::from_millis(250)).await;
        {
            let state = state.read().await;
            let output = state
                .latest
                .as_ref()
                .expect("cycle published while narrative pending");
            assert!(output.narrative.is_none());
            assert_eq!(output.scored.total_carparks, 3);
        }

        handle.await.unwrap();
        let state = state.read().await;
        assert_eq!(
            state.latest.as_ref().unwrap().narrative.as_deref(),
            Some("All quiet across agencies.")
        );
    }
}
