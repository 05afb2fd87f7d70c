//! Agency feed adapters
//!
//! One adapter instance per agency. Each adapter fetches its agency's raw
//! feed over the network; normalization into common carpark records is a
//! pure transform shared by all adapters.

mod datamall;

pub use datamall::{DataMallAdapter, DataMallConfig};

use crate::error::{DataQualityEvent, FetchError};
use crate::models::{Agency, CarparkId, CarparkRecord, RawFeedRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub use async_trait::async_trait;

/// Assumed utilization used to estimate capacity when the feed reports
/// availability only
const ASSUMED_UTILIZATION: f64 = 0.7;

/// Known capacities keyed by carpark identity, overriding feed values and
/// estimation
pub type CapacityTable = HashMap<CarparkId, u32>;

/// Trait for agency feed implementations
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    /// The agency this adapter is responsible for
    fn agency(&self) -> Agency;

    /// Fetch the current raw feed for this agency
    async fn fetch(&self) -> Result<Vec<RawFeedRecord>, FetchError>;
}

/// Normalize one raw feed record into the common carpark form.
///
/// Returns `None` (with an event) when the record cannot be attributed to
/// the expected agency. Capacity resolution order: feed value, override
/// table, estimate from availability, else zero with a missing-capacity
/// event.
pub fn normalize(
    raw: &RawFeedRecord,
    agency: Agency,
    now: DateTime<Utc>,
    capacities: &CapacityTable,
    events: &mut Vec<DataQualityEvent>,
) -> Option<CarparkRecord> {
    match raw.agency.parse::<Agency>() {
        Ok(a) if a == agency => {}
        _ => {
            events.push(DataQualityEvent::SkippedRecord {
                agency,
                reason: format!("record '{}' tagged with agency '{}'", raw.carpark_id, raw.agency),
            });
            return None;
        }
    }

    let id = CarparkId::new(agency, raw.carpark_id.clone());

    let (lat, lon) = match &raw.location {
        Some(loc) => match parse_location(loc) {
            Some((lat, lon)) => (Some(lat), Some(lon)),
            None => {
                if !loc.trim().is_empty() {
                    events.push(DataQualityEvent::BadLocation {
                        id: id.clone(),
                        raw: loc.clone(),
                    });
                }
                (None, None)
            }
        },
        None => (None, None),
    };

    let mut total_lots = raw
        .total_lots
        .or_else(|| capacities.get(&id).copied())
        .unwrap_or_else(|| estimate_capacity(raw.available_lots));

    if total_lots == 0 {
        events.push(DataQualityEvent::MissingCapacity { id: id.clone() });
    } else if total_lots < raw.available_lots {
        events.push(DataQualityEvent::LotsExceedCapacity {
            id: id.clone(),
            available: raw.available_lots,
            total: total_lots,
        });
        total_lots = raw.available_lots;
    }

    Some(CarparkRecord {
        id,
        name: raw.development.clone(),
        area: raw.area.clone().filter(|a| !a.is_empty()),
        lat,
        lon,
        lot_type: raw.lot_type,
        total_lots,
        available_lots: raw.available_lots,
        last_updated: now,
        stale: false,
    })
}

/// Estimate total capacity from availability assuming typical utilization
fn estimate_capacity(available: u32) -> u32 {
    if available == 0 {
        return 0;
    }
    (available as f64 / (1.0 - ASSUMED_UTILIZATION)).round() as u32
}

/// Parse a "lat lon" pair from a single space-separated string
fn parse_location(location: &str) -> Option<(f64, f64)> {
    let mut parts = location.split_whitespace();
    let lat = parts.next()?.parse::<f64>().ok()?;
    let lon = parts.next()?.parse::<f64>().ok()?;
    Some((lat, lon))
}
