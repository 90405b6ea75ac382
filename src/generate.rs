//! Text generation collaborator
//!
//! The analysis core only needs `prompt in, text out`. [`GeminiGenerator`] fulfils that
//! against the Gemini `generateContent` REST endpoint and folds every failure into a
//! user-facing message so callers never see an error.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_SYSTEM_INSTRUCTION: &str =
    "You are an expert root cause analysis assistant. Provide objective, concise, and practical analysis.";
pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

pub const MISSING_KEY_MESSAGE: &str = "Error: API Key is missing. Please configure GEMINI_API_KEY.";
pub const EMPTY_RESPONSE_MESSAGE: &str = "Could not generate response.";
pub const CONNECTION_ERROR_MESSAGE: &str = "Error connecting to AI assistant. Please try again.";

/// Produces text for a prompt. Implementations never fail; failures become text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, system_instruction: Option<&str>) -> String;
}

/// Failures talking to the Gemini endpoint
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("API key is missing")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("response contained no text")]
    EmptyResponse,
}

/// Connection settings for [`GeminiGenerator`]
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Client for the Gemini `generateContent` endpoint
#[derive(Clone)]
pub struct GeminiGenerator {
    client: Client,
    config: GeminiConfig,
}

impl GeminiGenerator {
    pub fn new(mut config: GeminiConfig) -> Result<Self, GenerateError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self { client, config })
    }

    /// Performs one request, surfacing every failure as a [`GenerateError`]
    pub async fn try_generate(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<String, GenerateError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(GenerateError::MissingApiKey)?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url, self.config.model
        );
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: prompt }],
            }],
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system_instruction.unwrap_or(DEFAULT_SYSTEM_INSTRUCTION),
                }],
            },
        };

        debug!(
            model = %self.config.model,
            prompt_chars = prompt.len(),
            "Calling text generation service"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerateError::Timeout {
                        timeout_ms: self.config.timeout_ms,
                    }
                } else {
                    GenerateError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerateError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateContentResponse =
            response
                .json()
                .await
                .map_err(|e| GenerateError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        let text = parsed.text();
        if text.is_empty() {
            return Err(GenerateError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str, system_instruction: Option<&str>) -> String {
        let start = Instant::now();
        match self.try_generate(prompt, system_instruction).await {
            Ok(text) => {
                info!(
                    model = %self.config.model,
                    latency_ms = start.elapsed().as_millis(),
                    "Text generation succeeded"
                );
                text
            }
            Err(GenerateError::MissingApiKey) => {
                warn!(
                    model = %self.config.model,
                    "API key not found, skipping text generation"
                );
                MISSING_KEY_MESSAGE.to_string()
            }
            Err(GenerateError::EmptyResponse) => EMPTY_RESPONSE_MESSAGE.to_string(),
            Err(e) => {
                error!(
                    model = %self.config.model,
                    error = %e,
                    latency_ms = start.elapsed().as_millis(),
                    "Text generation failed"
                );
                CONNECTION_ERROR_MESSAGE.to_string()
            }
        }
    }
}
