//! LLM text-completion client.
//!
//! The learner depends on [`TextCompletion`] only; [`ChatCompletionClient`]
//! implements it over any OpenAI-compatible `/chat/completions` endpoint
//! (OpenRouter by default).

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use subjectscan_shared::{LlmSettings, Result, ScanError};

/// Sends a single prompt, returns the model's free-form reply.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct ChatCompletionClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ScanError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| ScanError::config(format!("invalid LLM API key: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Title", HeaderValue::from_static("SubjectScan"));
        Ok(headers)
    }
}

#[async_trait]
impl TextCompletion for ChatCompletionClient {
    #[instrument(skip_all, fields(model = %self.model, prompt_len = prompt.len()))]
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| ScanError::Completion(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScanError::Completion(format!("API error ({status}): {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ScanError::Completion(format!("invalid response body: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ScanError::Completion("empty completion".into()))?;

        debug!(reply_len = content.len(), "completion received");
        Ok(content)
    }
}
