//! Error taxonomy for the parking engine
//!
//! Fetch and parse failures are contained per-agency and converted to
//! staleness; data-quality events are logged and never interrupt scoring;
//! narrative failures surface as an explicit unavailable state.

use crate::models::{Agency, CarparkId};
use thiserror::Error;

/// Failure to obtain a usable feed from one agency
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, timeout, or non-success status from the feed
    #[error("feed unavailable: {0}")]
    Unavailable(String),
    /// Payload received but not decodable into feed records
    #[error("feed parse error: {0}")]
    Parse(String),
}

/// Failure of the external narrative service
#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("narrative service unavailable: {0}")]
    Unavailable(String),
    #[error("narrative request timed out")]
    Timeout,
}

/// Non-fatal data-quality finding during normalization/reconciliation.
///
/// Recorded and logged each cycle; never aborts the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum DataQualityEvent {
    /// Two records with the same local id in one poll cycle; the earlier
    /// timestamp was dropped
    DuplicateId { id: CarparkId },
    /// No capacity figure available or derivable for a record
    MissingCapacity { id: CarparkId },
    /// Reported availability exceeded reported capacity; capacity was
    /// raised to match
    LotsExceedCapacity { id: CarparkId, available: u32, total: u32 },
    /// Location field present but not a parseable "lat lon" pair
    BadLocation { id: CarparkId, raw: String },
    /// Record skipped entirely (unknown agency tag etc.)
    SkippedRecord { agency: Agency, reason: String },
}

impl DataQualityEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DataQualityEvent::DuplicateId { .. } => "duplicate_id",
            DataQualityEvent::MissingCapacity { .. } => "missing_capacity",
            DataQualityEvent::LotsExceedCapacity { .. } => "lots_exceed_capacity",
            DataQualityEvent::BadLocation { .. } => "bad_location",
            DataQualityEvent::SkippedRecord { .. } => "skipped_record",
        }
    }
}
