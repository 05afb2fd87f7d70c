//! Narrative generation over scored snapshots
//!
//! Builds a bounded plain-text summary of the current cycle and asks an
//! external LLM service to turn it into an operator-facing narrative. The
//! narrative path is strictly best-effort: every failure maps to
//! `NarrativeError` and nothing here can influence scoring or alerting.

use crate::error::NarrativeError;
use crate::models::ScoredSnapshot;
use crate::scorer::Alert;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Carparks listed by name in the prompt, worst first
const MAX_HIGHLIGHTED_CARPARKS: usize = 5;

/// Alerts quoted in the prompt
const MAX_QUOTED_ALERTS: usize = 8;

/// Requested narrative depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrativeDepth {
    /// Larger model, fuller analysis
    Full,
    /// Smaller model, quick summary
    Fast,
}

/// Bounded text summary of one cycle, safe to send to an external service.
///
/// Only aggregate figures and carpark names appear here; the full record
/// set never leaves the process.
#[derive(Debug, Clone)]
pub struct NarrativeRequest {
    pub depth: NarrativeDepth,
    pub summary: String,
}

impl NarrativeRequest {
    pub fn from_scored(scored: &ScoredSnapshot, alerts: &[Alert], depth: NarrativeDepth) -> Self {
        let mut lines = Vec::new();

        lines.push(format!(
            "System status: {} ({})",
            scored.system_status_word(),
            scored
                .system_health_percent
                .map(|h| format!("{h:.1}% health"))
                .unwrap_or_else(|| "no score".to_string()),
        ));
        lines.push(format!(
            "{} carparks tracked, {} of {} lots available",
            scored.total_carparks, scored.total_available_lots, scored.total_capacity_lots
        ));

        for health in scored.agencies.values() {
            let score = health
                .health_percent
                .map(|h| format!("{h:.1}%"))
                .unwrap_or_else(|| "unscored".to_string());
            lines.push(format!(
                "{}: rank {}, health {}, {} carparks ({} stressed, {} stale){}",
                health.agency,
                health.rank,
                score,
                health.carparks,
                health.stressed,
                health.stale_count,
                if health.degraded { ", feed degraded" } else { "" },
            ));
        }

        let critical = scored.critical_carparks();
        if !critical.is_empty() {
            lines.push(format!("{} carparks at critical occupancy:", critical.len()));
            for record in critical.iter().take(MAX_HIGHLIGHTED_CARPARKS) {
                lines.push(format!(
                    "- {} ({}): {} of {} lots free",
                    record.name, record.id.agency, record.available_lots, record.total_lots
                ));
            }
        }

        if !alerts.is_empty() {
            lines.push(format!("{} active alerts:", alerts.len()));
            for alert in alerts.iter().take(MAX_QUOTED_ALERTS) {
                lines.push(format!("- [{}] {}", alert.severity, alert.title));
            }
        }

        Self {
            depth,
            summary: lines.join("\n"),
        }
    }
}

/// Produces operator-facing narratives from cycle summaries
#[async_trait]
pub trait NarrativeService: Send + Sync {
    async fn narrate(&self, request: &NarrativeRequest) -> Result<String, NarrativeError>;
}

/// Configuration for the Groq chat-completion backend
#[derive(Debug, Clone)]
pub struct GroqConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Model for `NarrativeDepth::Full`
    pub model: String,
    /// Model for `NarrativeDepth::Fast`
    pub fast_model: String,
    pub timeout: Duration,
}

impl Default for GroqConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "llama-3.3-70b-versatile".to_string(),
            fast_model: "llama-3.1-8b-instant".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

const SYSTEM_PROMPT: &str = "You are an analyst for a city parking operations team. \
Given a cycle summary of carpark availability across the HDB, LTA and URA agencies, \
write a concise operational narrative: overall condition, notable hotspots, and any \
agency-level concerns. Be factual and avoid speculation beyond the figures given.";

/// Narrative backend calling the Groq chat-completion API
pub struct GroqNarrator {
    config: GroqConfig,
    client: reqwest::Client,
}

impl GroqNarrator {
    pub fn new(config: GroqConfig) -> Result<Self, NarrativeError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NarrativeError::Unavailable(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn model_for(&self, depth: NarrativeDepth) -> &str {
        match depth {
            NarrativeDepth::Full => &self.config.model,
            NarrativeDepth::Fast => &self.config.fast_model,
        }
    }
}

#[async_trait]
impl NarrativeService for GroqNarrator {
    async fn narrate(&self, request: &NarrativeRequest) -> Result<String, NarrativeError> {
        let body = ChatRequest {
            model: self.model_for(request.depth),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &request.summary,
                },
            ],
            temperature: 0.7,
            max_tokens: 2000,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NarrativeError::Timeout
                } else {
                    NarrativeError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NarrativeError::Unavailable(format!(
                "narrative service returned status {status}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| NarrativeError::Unavailable(e.to_string()))?;

        let narrative = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| NarrativeError::Unavailable("empty completion".to_string()))?;

        debug!(chars = narrative.len(), "Narrative generated");
        Ok(narrative)
    }
}
