//! ParkSense - multi-agency parking reconciliation and health daemon
//!
//! Polls the HDB, LTA and URA availability feeds, reconciles them into a
//! unified snapshot, scores system health, and serves the result over HTTP.

use anyhow::Result;
use parksense_core::adapter::{CapacityTable, DataMallAdapter, DataMallConfig};
use parksense_core::cycle::{CycleEngineBuilder, PollConfig};
use parksense_core::health::HealthRegistry;
use parksense_core::insight::{GroqConfig, GroqNarrator, NarrativeService};
use parksense_core::models::Agency;
use parksense_core::observability::StructuredLogger;
use parksense_core::policy::PolicySimulator;
use parksense_core::reconcile::ReconcilerConfig;
use parksense_core::scorer::ScorerConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs with env-filter control
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting parksense");

    let config = config::DaemonConfig::load()?;
    info!(instance = %config.instance, "Daemon configured");

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(VERSION, config.poll_interval_secs);

    // One adapter per agency over the shared availability feed
    let mut builder = CycleEngineBuilder::new()
        .capacities(CapacityTable::new())
        .reconciler_config(ReconcilerConfig {
            grace_cycles: config.grace_cycles,
        })
        .scorer_config(ScorerConfig::default())
        .poll_config(PollConfig {
            interval: Duration::from_secs(config.poll_interval_secs),
            ..PollConfig::default()
        })
        .history_cycles(config.history_cycles)
        .health(health_registry.clone())
        .logger(logger.clone());

    for agency in Agency::ALL {
        let adapter = DataMallAdapter::new(
            agency,
            DataMallConfig {
                endpoint: config.datamall_endpoint.clone(),
                account_key: config.datamall_account_key.clone(),
                ..DataMallConfig::default()
            },
        )
        .map_err(|e| anyhow::anyhow!("failed to build {agency} adapter: {e}"))?;
        builder = builder.adapter(Arc::new(adapter));
    }

    if config.groq_api_key.is_empty() {
        info!("No Groq API key configured, narratives disabled");
    } else {
        let narrator = GroqNarrator::new(GroqConfig {
            endpoint: config.groq_endpoint.clone(),
            api_key: config.groq_api_key.clone(),
            ..GroqConfig::default()
        })
        .map_err(|e| anyhow::anyhow!("failed to build narrative client: {e}"))?;
        let narrator: Arc<dyn NarrativeService> = Arc::new(narrator);
        builder = builder.narrative(narrator);
    }

    let (engine, engine_state) = builder.build()?;

    let simulator = Arc::new(PolicySimulator::new(ScorerConfig::default()));
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        engine_state,
        simulator,
    ));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let engine_handle = tokio::spawn(engine.run(shutdown_tx.subscribe()));
    let _api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());
    let _ = engine_handle.await;
    info!("Shutting down");

    Ok(())
}
