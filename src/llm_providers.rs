use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

static QUOTA_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(quota|rate[\s_-]?limit|resource[\s_]exhausted|too many requests)")
        .expect("quota pattern is a valid regex")
});

static TRANSIENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(timed?[\s_-]?out|deadline exceeded|temporarily unavailable|overloaded)")
        .expect("transient pattern is a valid regex")
});

/// One account key for the generation service. The raw value is only reachable
/// through `expose()`; `Debug` and `masked()` never print it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        mask_secret(&self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

/// Mask a secret for logging, keeping at most four characters on each side
pub fn mask_secret(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

/// How a failed call should be handled by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Quota,
    Transient,
    Fatal,
}

/// Error returned by a generation endpoint or model resolution
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_quota(&self) -> bool {
        self.status == Some(429) || QUOTA_PATTERN.is_match(&self.message)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.status, Some(500) | Some(503)) || TRANSIENT_PATTERN.is_match(&self.message)
    }

    /// Quota is checked before transient so that a 429 is never just backed off
    pub fn classify(&self) -> FailureClass {
        if self.is_quota() {
            FailureClass::Quota
        } else if self.is_transient() {
            FailureClass::Transient
        } else {
            FailureClass::Fatal
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // The request URL carries the key as a query parameter
        let err = err.without_url();
        if err.is_timeout() {
            ProviderError::new(None, "request timed out")
        } else if err.is_connect() {
            ProviderError::new(None, "connection failed: service temporarily unavailable")
        } else {
            ProviderError::new(err.status().map(|s| s.as_u16()), err.to_string())
        }
    }
}

/// A callable text-generation endpoint bound to one credential and one model
#[async_trait]
pub trait GenerationEndpoint: Send + Sync {
    async fn generate_content(&self, prompt: &str) -> Result<String, ProviderError>;

    fn model_name(&self) -> &str;
}

/// Turns a credential + model name into a ready-to-call endpoint
#[async_trait]
pub trait ModelResolver: Send + Sync {
    async fn resolve(
        &self,
        credential: &Credential,
        model: &str,
    ) -> Result<Arc<dyn GenerationEndpoint>, ProviderError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "topK")]
    top_k: i32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i32,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Pull a readable message out of a Gemini error body, falling back to the raw text
fn gemini_error_message(body: &str) -> String {
    match serde_json::from_str::<GeminiErrorEnvelope>(body) {
        Ok(envelope) => match envelope.error.status {
            Some(status) if !status.is_empty() => format!("{} ({})", envelope.error.message, status),
            _ => envelope.error.message,
        },
        Err(_) if body.trim().is_empty() => "Unknown error".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// Gemini `generateContent` endpoint for one key and model
#[derive(Clone)]
pub struct GeminiEndpoint {
    client: Client,
    credential: Credential,
    base_url: String,
    model: String,
}

impl GeminiEndpoint {
    pub fn new(client: Client, credential: Credential, base_url: String, model: String) -> Self {
        Self {
            client,
            credential,
            base_url,
            model,
        }
    }
}

#[async_trait]
impl GenerationEndpoint for GeminiEndpoint {
    async fn generate_content(&self, prompt: &str) -> Result<String, ProviderError> {
        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: 0.7,
                top_k: 40,
                top_p: 0.9,
                max_output_tokens: 8192,
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        info!(
            provider = "Gemini",
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Making LLM request"
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.credential.expose())])
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            let message = gemini_error_message(&error_text);
            error!(
                provider = "Gemini",
                model = %self.model,
                status = %status,
                error = %message,
                "LLM API request failed"
            );
            return Err(ProviderError::new(Some(status.as_u16()), message));
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let text = gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| ProviderError::new(None, "No candidates in Gemini response"))?;

        info!(
            provider = "Gemini",
            model = %self.model,
            response_length = text.len(),
            "Successfully received LLM response"
        );

        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Resolves Gemini models by checking that the model is visible to the key
#[derive(Clone)]
pub struct GeminiModelResolver {
    client: Client,
    base_url: String,
}

impl GeminiModelResolver {
    /// `http_timeout` bounds every lookup and generation call made with this resolver
    pub fn new(base_url: Option<String>, http_timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(http_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl ModelResolver for GeminiModelResolver {
    async fn resolve(
        &self,
        credential: &Credential,
        model: &str,
    ) -> Result<Arc<dyn GenerationEndpoint>, ProviderError> {
        let url = format!("{}/models/{}", self.base_url, model);
        let response = self
            .client
            .get(&url)
            .query(&[("key", credential.expose())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                Some(status.as_u16()),
                gemini_error_message(&error_text),
            ));
        }

        debug!(model = %model, credential = %credential.masked(), "Model resolved");

        Ok(Arc::new(GeminiEndpoint::new(
            self.client.clone(),
            credential.clone(),
            self.base_url.clone(),
            model.to_string(),
        )))
    }
}
