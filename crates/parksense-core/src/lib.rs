//! Core library for multi-agency parking reconciliation and health scoring
//!
//! This crate provides the core functionality for:
//! - Agency feed adapters and record normalization
//! - Snapshot reconciliation with staleness handling
//! - Health scoring and alert generation
//! - Policy what-if simulation and narrative insights
//! - Health checks and observability

pub mod adapter;
pub mod cycle;
pub mod error;
pub mod export;
pub mod health;
pub mod history;
pub mod insight;
pub mod models;
pub mod observability;
pub mod policy;
pub mod reconcile;
pub mod scorer;

pub use cycle::{CycleEngine, CycleEngineBuilder, CycleOutput, EngineState, SharedState};
pub use error::{DataQualityEvent, FetchError, NarrativeError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use scorer::{Alert, AlertScope, AlertSeverity};
