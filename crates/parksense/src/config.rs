//! Daemon configuration

use anyhow::Result;
use serde::Deserialize;

/// Daemon configuration, loaded from PARKSENSE_-prefixed environment
/// variables
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Instance name used in structured log events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for snapshot/health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Consecutive failed cycles an agency's records are carried stale
    #[serde(default = "default_grace_cycles")]
    pub grace_cycles: u32,

    /// Cycles of trend history retained in memory
    #[serde(default = "default_history_cycles")]
    pub history_cycles: usize,

    /// Carpark availability feed endpoint
    #[serde(default = "default_datamall_endpoint")]
    pub datamall_endpoint: String,

    /// DataMall account key; required for live polling
    #[serde(default)]
    pub datamall_account_key: String,

    /// Groq API key; narrative generation is disabled when empty
    #[serde(default)]
    pub groq_api_key: String,

    /// Groq chat-completion endpoint
    #[serde(default = "default_groq_endpoint")]
    pub groq_endpoint: String,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "parksense".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_poll_interval() -> u64 {
    60
}

fn default_grace_cycles() -> u32 {
    5
}

fn default_history_cycles() -> usize {
    60
}

fn default_datamall_endpoint() -> String {
    "https://datamall2.mytransport.sg/ltaodataservice/CarParkAvailabilityv2".to_string()
}

fn default_groq_endpoint() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}

impl DaemonConfig {
    /// Load configuration from the environment.
    ///
    /// Every field has a serde default, so an empty environment loads
    /// cleanly; a malformed value is an error rather than a silent fall
    /// back to defaults.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("PARKSENSE"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
