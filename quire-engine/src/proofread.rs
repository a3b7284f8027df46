//! Proofreading service boundary.
//!
//! The service sees plain text and answers with `{text, suggestion, type}`
//! objects. Placement and application of suggestions is done by
//! [`quire_core::suggest`]; nothing here touches stored chapters.

use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use quire_core::{config::ProofreadingConfig, locate_suggestions, LocatedSuggestion, Suggestion};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are a professional editor. Analyze the text for grammar, style, \
and spelling issues. Return only a JSON array of suggestions in the format \
[{\"text\": string, \"suggestion\": string, \"type\": \"grammar\"|\"style\"|\"spelling\"}], \
where text is copied verbatim from the input.";

#[derive(Error, Debug)]
pub enum ProofreadError {
    #[error("proofreading request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("proofreading service returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unreadable proofreading reply: {0}")]
    MalformedReply(String),

    #[error("environment variable {0} is not set")]
    MissingKey(String),

    #[error("selection {start}..{end} is not a valid range of the text")]
    InvalidSelection { start: usize, end: usize },
}

#[async_trait]
pub trait Proofreader: Send + Sync {
    /// Suggestions for `text`, in the order the service returned them.
    async fn proofread(&self, text: &str) -> Result<Vec<Suggestion>, ProofreadError>;
}

/// Chat-completions client.
#[derive(Clone)]
pub struct OpenAiProofreader {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiProofreader {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProofreadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    /// Build from configuration, reading the key from `api_key_env`.
    pub fn from_config(config: &ProofreadingConfig) -> Result<Self, ProofreadError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| ProofreadError::MissingKey(config.api_key_env.clone()))?;
        Self::new(
            &config.endpoint,
            &config.model,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl Proofreader for OpenAiProofreader {
    async fn proofread(&self, text: &str) -> Result<Vec<Suggestion>, ProofreadError> {
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": text}
            ],
            "temperature": 0.2
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProofreadError::Api { status, body });
        }

        #[derive(Deserialize)]
        struct Message {
            content: String,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            choices: Vec<Choice>,
        }

        let reply: ApiResponse = response.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProofreadError::MalformedReply("no choices".into()))?;
        debug!(model = %self.model, bytes = content.len(), "proofreading reply received");
        parse_suggestions(&content)
    }
}

/// Extract the suggestion array from a model reply, tolerating prose or
/// code fences around it.
pub fn parse_suggestions(reply: &str) -> Result<Vec<Suggestion>, ProofreadError> {
    let (Some(start), Some(end)) = (reply.find('['), reply.rfind(']')) else {
        return Err(ProofreadError::MalformedReply("no JSON array in reply".into()));
    };
    if end < start {
        return Err(ProofreadError::MalformedReply("no JSON array in reply".into()));
    }
    serde_json::from_str(&reply[start..=end])
        .map_err(|e| ProofreadError::MalformedReply(e.to_string()))
}

/// Proofread `content` (or just `selection` of it) and pin each suggestion
/// to its place in `content`.
pub async fn review(
    proofreader: &dyn Proofreader,
    content: &str,
    selection: Option<Range<usize>>,
) -> Result<Vec<LocatedSuggestion>, ProofreadError> {
    let range = selection.unwrap_or(0..content.len());
    let text = content
        .get(range.clone())
        .ok_or(ProofreadError::InvalidSelection {
            start: range.start,
            end: range.end,
        })?;
    let suggestions = proofreader.proofread(text).await?;
    Ok(locate_suggestions(content, range.start, suggestions))
}
