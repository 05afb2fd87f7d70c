//! DataMall carpark availability adapter
//!
//! The DataMall endpoint serves one paginated feed covering all three
//! agencies; each adapter instance fetches the feed and keeps only its own
//! agency's records so the three fetches stay independent.

use super::FeedAdapter;
use crate::error::FetchError;
use crate::models::{Agency, RawFeedRecord};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// DataMall returns at most this many records per page
const PAGE_SIZE: usize = 500;

/// Hard cap on pagination to bound a misbehaving feed
const MAX_PAGES: usize = 40;

/// Configuration for the DataMall feed client
#[derive(Debug, Clone)]
pub struct DataMallConfig {
    /// Carpark availability endpoint URL
    pub endpoint: String,
    /// DataMall account key sent in the `AccountKey` header
    pub account_key: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for DataMallConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://datamall2.mytransport.sg/ltaodataservice/CarParkAvailabilityv2"
                .to_string(),
            account_key: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Paginated envelope around feed records
#[derive(Debug, Deserialize)]
struct FeedPage {
    #[serde(rename = "value", default)]
    value: Vec<RawFeedRecord>,
}

/// Feed adapter backed by the DataMall availability endpoint
pub struct DataMallAdapter {
    agency: Agency,
    config: DataMallConfig,
    client: reqwest::Client,
}

impl DataMallAdapter {
    pub fn new(agency: Agency, config: DataMallConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;

        Ok(Self {
            agency,
            config,
            client,
        })
    }

    /// Fetch one page of the feed at the given offset
    async fn fetch_page(&self, skip: usize) -> Result<Vec<RawFeedRecord>, FetchError> {
        let url = format!("{}?$skip={}", self.config.endpoint, skip);

        let response = self
            .client
            .get(&url)
            .header("AccountKey", &self.config.account_key)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Unavailable("request timed out".to_string())
                } else {
                    FetchError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unavailable(format!(
                "feed returned status {status}"
            )));
        }

        let page: FeedPage = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        Ok(page.value)
    }
}

#[async_trait]
impl FeedAdapter for DataMallAdapter {
    fn agency(&self) -> Agency {
        self.agency
    }

    async fn fetch(&self) -> Result<Vec<RawFeedRecord>, FetchError> {
        let mut all = Vec::new();
        let mut skip = 0;

        for _ in 0..MAX_PAGES {
            let page = self.fetch_page(skip).await?;
            let page_len = page.len();
            all.extend(page);

            if page_len < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
        }

        let agency_tag = self.agency.as_str();
        let records: Vec<RawFeedRecord> =
            all.into_iter().filter(|r| r.agency == agency_tag).collect();

        debug!(
            agency = %self.agency,
            records = records.len(),
            "Fetched agency feed"
        );

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(endpoint: String) -> DataMallConfig {
        DataMallConfig {
            endpoint,
            account_key: "test-key".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_fetch_filters_to_own_agency() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "value": [
                {"CarParkID": "1", "Development": "A", "AvailableLots": 10, "Agency": "LTA"},
                {"CarParkID": "B12", "Development": "B", "AvailableLots": 20, "Agency": "HDB"},
                {"CarParkID": "2", "Development": "C", "AvailableLots": 30, "Agency": "LTA"}
            ]
        });
        let _m = server
            .mock("GET", "/feed")
            .match_query(mockito::Matcher::UrlEncoded("$skip".into(), "0".into()))
            .match_header("AccountKey", "test-key")
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let adapter = DataMallAdapter::new(
            Agency::Lta,
            test_config(format!("{}/feed", server.url())),
        )
        .unwrap();

        let records = adapter.fetch().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.agency == "LTA"));
    }

    #[tokio::test]
    async fn test_fetch_paginates_until_short_page() {
        let mut server = mockito::Server::new_async().await;

        // Full first page forces a second request
        let full_page: Vec<serde_json::Value> = (0..PAGE_SIZE)
            .map(|i| {
                serde_json::json!({
                    "CarParkID": format!("H{i}"),
                    "Development": "Block",
                    "AvailableLots": 5,
                    "Agency": "HDB"
                })
            })
            .collect();
        let _m1 = server
            .mock("GET", "/feed")
            .match_query(mockito::Matcher::UrlEncoded("$skip".into(), "0".into()))
            .with_status(200)
            .with_body(serde_json::json!({ "value": full_page }).to_string())
            .create_async()
            .await;
        let _m2 = server
            .mock("GET", "/feed")
            .match_query(mockito::Matcher::UrlEncoded("$skip".into(), "500".into()))
            .with_status(200)
            .with_body(serde_json::json!({ "value": [] }).to_string())
            .create_async()
            .await;

        let adapter = DataMallAdapter::new(
            Agency::Hdb,
            test_config(format!("{}/feed", server.url())),
        )
        .unwrap();

        let records = adapter.fetch().await.unwrap();
        assert_eq!(records.len(), PAGE_SIZE);
    }

    #[tokio::test]
    async fn test_fetch_non_success_status_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/feed")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let adapter = DataMallAdapter::new(
            Agency::Ura,
            test_config(format!("{}/feed", server.url())),
        )
        .unwrap();

        let err = adapter.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_fetch_malformed_payload_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/feed")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("not json at all")
            .create_async()
            .await;

        let adapter = DataMallAdapter::new(
            Agency::Ura,
            test_config(format!("{}/feed", server.url())),
        )
        .unwrap();

        let err = adapter.fetch().await.unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }
}
