//! Core data models for the parking engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Source agency for a carpark feed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Agency {
    #[serde(rename = "HDB")]
    Hdb,
    #[serde(rename = "LTA")]
    Lta,
    #[serde(rename = "URA")]
    Ura,
}

impl Agency {
    /// All agencies in reconciliation order
    pub const ALL: [Agency; 3] = [Agency::Hdb, Agency::Lta, Agency::Ura];

    pub fn as_str(&self) -> &'static str {
        match self {
            Agency::Hdb => "HDB",
            Agency::Lta => "LTA",
            Agency::Ura => "URA",
        }
    }
}

impl fmt::Display for Agency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Agency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HDB" => Ok(Agency::Hdb),
            "LTA" => Ok(Agency::Lta),
            "URA" => Ok(Agency::Ura),
            other => Err(format!("unknown agency: {other}")),
        }
    }
}

/// Lot type reported by the feed (cars, heavy vehicles, motorcycles)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotType {
    #[serde(rename = "C")]
    Car,
    #[serde(rename = "H")]
    HeavyVehicle,
    #[serde(rename = "Y")]
    Motorcycle,
}

impl LotType {
    pub fn description(&self) -> &'static str {
        match self {
            LotType::Car => "Cars",
            LotType::HeavyVehicle => "Heavy Vehicles",
            LotType::Motorcycle => "Motorcycles",
        }
    }
}

/// Raw record as delivered by an agency feed, before normalization.
///
/// `available_lots` arrives as either a JSON number or a string depending
/// on the feed; `total_lots` is optional because some feeds report
/// availability only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFeedRecord {
    #[serde(rename = "CarParkID")]
    pub carpark_id: String,
    #[serde(rename = "Area", default)]
    pub area: Option<String>,
    #[serde(rename = "Development", default)]
    pub development: String,
    /// "lat lon" pair as a single space-separated string
    #[serde(rename = "Location", default)]
    pub location: Option<String>,
    #[serde(rename = "AvailableLots", deserialize_with = "de_lots")]
    pub available_lots: u32,
    #[serde(rename = "TotalLots", default)]
    pub total_lots: Option<u32>,
    #[serde(rename = "LotType", default)]
    pub lot_type: Option<LotType>,
    #[serde(rename = "Agency")]
    pub agency: String,
}

/// Accept lot counts encoded as numbers or numeric strings; anything else
/// coerces to zero, matching the feed's own loose typing.
fn de_lots<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lots {
        Num(i64),
        Text(String),
    }

    Ok(match Lots::deserialize(deserializer)? {
        Lots::Num(n) => n.max(0) as u32,
        Lots::Text(s) => s.trim().parse::<u32>().unwrap_or(0),
    })
}

/// Globally unique carpark identity: agency plus the agency-local id.
///
/// The composite key makes uniqueness hold by construction across
/// agencies; physical duplicates near agency boundaries stay distinct
/// records rather than being merged by fuzzy matching.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CarparkId {
    pub agency: Agency,
    pub local_id: String,
}

impl CarparkId {
    pub fn new(agency: Agency, local_id: impl Into<String>) -> Self {
        Self {
            agency,
            local_id: local_id.into(),
        }
    }
}

impl fmt::Display for CarparkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.agency, self.local_id)
    }
}

impl FromStr for CarparkId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (agency, local_id) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid carpark id: {s}"))?;
        Ok(Self {
            agency: agency.parse()?,
            local_id: local_id.to_string(),
        })
    }
}

// Serialized as the display string so ids can key JSON maps
impl Serialize for CarparkId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CarparkId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Normalized carpark record, common across agencies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarparkRecord {
    pub id: CarparkId,
    pub name: String,
    pub area: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub lot_type: Option<LotType>,
    pub total_lots: u32,
    pub available_lots: u32,
    pub last_updated: DateTime<Utc>,
    /// Carried forward from a prior successful poll while the agency feed
    /// is failing
    pub stale: bool,
}

impl CarparkRecord {
    /// Occupancy in [0,1]; `None` when capacity is unknown
    pub fn occupancy_ratio(&self) -> Option<f64> {
        if self.total_lots == 0 {
            None
        } else {
            Some(1.0 - self.available_lots as f64 / self.total_lots as f64)
        }
    }
}

/// One reconciled view of all carparks as of a single poll cycle.
///
/// Keyed by `CarparkId`, so no two records can share an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedSnapshot {
    pub taken_at: DateTime<Utc>,
    pub records: BTreeMap<CarparkId, CarparkRecord>,
}

impl UnifiedSnapshot {
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            records: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate records belonging to one agency
    pub fn agency_records(&self, agency: Agency) -> impl Iterator<Item = &CarparkRecord> {
        self.records.values().filter(move |r| r.id.agency == agency)
    }

    /// Number of records carried stale for one agency
    pub fn stale_count(&self, agency: Agency) -> usize {
        self.agency_records(agency).filter(|r| r.stale).count()
    }
}

/// Per-carpark availability status derived from occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Available,
    Moderate,
    Limited,
    Critical,
    /// Capacity unknown; excluded from ratio aggregates
    Unknown,
}

impl HealthStatus {
    /// Map an occupancy ratio onto the status bands
    pub fn from_occupancy(occupancy: Option<f64>) -> Self {
        match occupancy {
            None => HealthStatus::Unknown,
            Some(o) if o >= 0.95 => HealthStatus::Critical,
            Some(o) if o >= 0.80 => HealthStatus::Limited,
            Some(o) if o >= 0.50 => HealthStatus::Moderate,
            Some(_) => HealthStatus::Available,
        }
    }

    /// Counts toward stress metrics (near or at capacity)
    pub fn is_stressed(&self) -> bool {
        matches!(self, HealthStatus::Limited | HealthStatus::Critical)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Available => "Available",
            HealthStatus::Moderate => "Moderate",
            HealthStatus::Limited => "Limited",
            HealthStatus::Critical => "Critical",
            HealthStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Aggregate health figures for one agency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgencyHealth {
    pub agency: Agency,
    pub carparks: usize,
    pub total_lots: u64,
    pub available_lots: u64,
    /// 100 x (1 - lots-weighted mean occupancy); `None` when no record has
    /// known capacity
    pub health_percent: Option<f64>,
    pub stressed: usize,
    pub stale_count: usize,
    /// 1 = healthiest agency this cycle
    pub rank: usize,
    /// Past its staleness grace period with no usable records
    pub degraded: bool,
}

/// Scored view of a snapshot: statuses plus agency and system aggregates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSnapshot {
    pub snapshot: UnifiedSnapshot,
    pub statuses: BTreeMap<CarparkId, HealthStatus>,
    pub agencies: BTreeMap<Agency, AgencyHealth>,
    /// Lots-weighted mean of agency health
    pub system_health_percent: Option<f64>,
    pub total_carparks: usize,
    pub total_available_lots: u64,
    pub total_capacity_lots: u64,
}

impl ScoredSnapshot {
    pub fn status(&self, id: &CarparkId) -> Option<HealthStatus> {
        self.statuses.get(id).copied()
    }

    /// Carparks currently at `Critical`, worst (fewest lots) first
    pub fn critical_carparks(&self) -> Vec<&CarparkRecord> {
        let mut out: Vec<&CarparkRecord> = self
            .statuses
            .iter()
            .filter(|(_, s)| **s == HealthStatus::Critical)
            .filter_map(|(id, _)| self.snapshot.records.get(id))
            .collect();
        out.sort_by_key(|r| r.available_lots);
        out
    }

    /// Descriptive banding of the system health score
    pub fn system_status_word(&self) -> &'static str {
        match self.system_health_percent {
            Some(h) if h >= 80.0 => "Excellent",
            Some(h) if h >= 60.0 => "Good",
            Some(h) if h >= 40.0 => "Moderate",
            Some(h) if h >= 20.0 => "Stressed",
            Some(_) => "Critical",
            None => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agency_parsing() {
        assert_eq!("HDB".parse::<Agency>().unwrap(), Agency::Hdb);
        assert_eq!("URA".parse::<Agency>().unwrap(), Agency::Ura);
        assert!("NPB".parse::<Agency>().is_err());
    }

    #[test]
    fn test_carpark_id_display_and_parse() {
        let id = CarparkId::new(Agency::Lta, "C123");
        assert_eq!(id.to_string(), "LTA:C123");
        assert_eq!("LTA:C123".parse::<CarparkId>().unwrap(), id);
        assert!("no-separator".parse::<CarparkId>().is_err());
    }

    #[test]
    fn test_carpark_id_serializes_as_string() {
        let id = CarparkId::new(Agency::Hdb, "A1");
        assert_eq!(serde_json::to_value(&id).unwrap(), "HDB:A1");

        let mut snap = UnifiedSnapshot::new(Utc::now());
        snap.records.insert(
            id.clone(),
            CarparkRecord {
                id: id.clone(),
                name: "Test".to_string(),
                area: None,
                lat: None,
                lon: None,
                lot_type: None,
                total_lots: 100,
                available_lots: 10,
                last_updated: Utc::now(),
                stale: false,
            },
        );
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json["records"]["HDB:A1"].is_object());
    }

    #[test]
    fn test_occupancy_ratio() {
        let mut rec = CarparkRecord {
            id: CarparkId::new(Agency::Hdb, "A1"),
            name: "Test".to_string(),
            area: None,
            lat: None,
            lon: None,
            lot_type: Some(LotType::Car),
            total_lots: 100,
            available_lots: 10,
            last_updated: Utc::now(),
            stale: false,
        };
        assert!((rec.occupancy_ratio().unwrap() - 0.90).abs() < 1e-9);

        rec.total_lots = 0;
        assert!(rec.occupancy_ratio().is_none());
    }

    #[test]
    fn test_status_bands() {
        assert_eq!(
            HealthStatus::from_occupancy(Some(0.1)),
            HealthStatus::Available
        );
        assert_eq!(
            HealthStatus::from_occupancy(Some(0.5)),
            HealthStatus::Moderate
        );
        assert_eq!(
            HealthStatus::from_occupancy(Some(0.80)),
            HealthStatus::Limited
        );
        assert_eq!(
            HealthStatus::from_occupancy(Some(0.95)),
            HealthStatus::Critical
        );
        assert_eq!(HealthStatus::from_occupancy(None), HealthStatus::Unknown);
    }

    #[test]
    fn test_raw_record_lots_as_string() {
        let raw: RawFeedRecord = serde_json::from_value(serde_json::json!({
            "CarParkID": "1",
            "Development": "Suntec City",
            "Location": "1.29375 103.85718",
            "AvailableLots": "42",
            "LotType": "C",
            "Agency": "LTA"
        }))
        .unwrap();
        assert_eq!(raw.available_lots, 42);
        assert!(raw.total_lots.is_none());
    }

    #[test]
    fn test_raw_record_garbage_lots_coerce_to_zero() {
        let raw: RawFeedRecord = serde_json::from_value(serde_json::json!({
            "CarParkID": "2",
            "Development": "X",
            "AvailableLots": "n/a",
            "Agency": "HDB"
        }))
        .unwrap();
        assert_eq!(raw.available_lots, 0);
    }
}
