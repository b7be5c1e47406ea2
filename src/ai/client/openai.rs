//! OpenAI-compatible Chat Completions client
//!
//! One HTTP client serves all three tiers; the tier only selects the model
//! name and its price. Works against any endpoint speaking the Chat
//! Completions protocol.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ModelClient, ModelPrompt, ModelReply, TierTable};
use crate::config::LlmConfig;
use crate::types::{CascadeError, ErrorCategory, ModelCallError, ModelTier, Result};

const BACKEND: &str = "openai";

/// API key is stored as a [`SecretString`] and never appears in logs or
/// debug output.
pub struct OpenAiClient {
    api_key: SecretString,
    api_base: String,
    temperature: f32,
    tiers: TierTable,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("temperature", &self.temperature)
            .field("tiers", &self.tiers)
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig, tiers: TierTable) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                CascadeError::Config(
                    "API key not found. Set OPENAI_API_KEY or llm.api_key in config".to_string(),
                )
            })?;

        let api_base = validate_api_base(&config.api_base)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| CascadeError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            api_base,
            temperature: config.temperature,
            tiers,
            client,
        })
    }

    fn build_request(&self, tier: ModelTier, prompt: &ModelPrompt) -> ChatCompletionRequest {
        let profile = self.tiers.get(tier);
        ChatCompletionRequest {
            model: profile.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            temperature: self.temperature,
            max_tokens: Some(prompt.max_output_tokens.min(profile.max_output_tokens)),
            response_format: prompt.expects_json.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }
}

/// Parse and normalize the base URL. Only http(s) is accepted.
fn validate_api_base(api_base: &str) -> Result<String> {
    let url = url::Url::parse(api_base)
        .map_err(|e| CascadeError::Config(format!("Invalid API base URL '{api_base}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(CascadeError::Config(format!(
            "API base must use http or https scheme, got: {}",
            url.scheme()
        )));
    }

    if url.scheme() == "http"
        && let Some(host) = url.host_str()
        && !matches!(host, "localhost" | "127.0.0.1" | "::1")
    {
        warn!(host, "API base uses plain http on a non-local host");
    }

    Ok(url.to_string().trim_end_matches('/').to_string())
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn call_model(
        &self,
        tier: ModelTier,
        prompt: &ModelPrompt,
    ) -> std::result::Result<ModelReply, ModelCallError> {
        let request = self.build_request(tier, prompt);
        let url = format!("{}/chat/completions", self.api_base);
        debug!(%tier, model = %request.model, kind = %prompt.kind, "Sending chat completion");

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelCallError::new(ErrorCategory::Timeout, e.to_string(), BACKEND)
                } else {
                    ModelCallError::classify(&e.to_string(), BACKEND)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelCallError::from_http_status(
                status.as_u16(),
                &body,
                BACKEND,
            ));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            ModelCallError::new(
                ErrorCategory::Unavailable,
                format!("Failed to parse response: {e}"),
                BACKEND,
            )
        })?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        // Some compatible servers omit usage; fall back to the request cap.
        let tokens_used = body
            .usage
            .map(|u| u.prompt_tokens + u.completion_tokens)
            .unwrap_or_else(|| request.max_tokens.unwrap_or_default());
        let cost_usd = self.tiers.get(tier).estimate_cost(tokens_used);

        debug!(
            %tier,
            tokens_used,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chat completion received"
        );

        Ok(ModelReply {
            text,
            tokens_used,
            cost_usd,
        })
    }

    fn name(&self) -> &str {
        BACKEND
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::PromptKind;

    fn config() -> LlmConfig {
        LlmConfig {
            api_key: Some("sk-test-secret".into()),
            ..LlmConfig::default()
        }
    }

    fn prompt(expects_json: bool) -> ModelPrompt {
        ModelPrompt {
            kind: PromptKind::Repair,
            system: "sys".into(),
            user: "fix this".into(),
            max_output_tokens: 100_000,
            expects_json,
        }
    }

    #[test]
    fn test_validate_api_base() {
        assert_eq!(
            validate_api_base("https://api.example.com/v1/").unwrap(),
            "https://api.example.com/v1"
        );
        assert!(validate_api_base("ftp://example.com").is_err());
        assert!(validate_api_base("not a url").is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let client = OpenAiClient::new(&config(), TierTable::default()).unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-test-secret"));
    }

    #[test]
    fn test_request_uses_tier_model_and_caps_output() {
        let tiers = TierTable::default();
        let client = OpenAiClient::new(&config(), tiers.clone()).unwrap();

        let request = client.build_request(ModelTier::Tier2, &prompt(true));
        assert_eq!(request.model, tiers.tier2.model);
        assert_eq!(request.max_tokens, Some(tiers.tier2.max_output_tokens));
        assert!(request.response_format.is_some());

        let request = client.build_request(ModelTier::Tier1, &prompt(false));
        assert_eq!(request.model, tiers.tier1.model);
        assert!(request.response_format.is_none());
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"choices":[{"message":{"content":"{\"a\":1}"}}],
                       "usage":{"prompt_tokens":10,"completion_tokens":5}}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("{\"a\":1}"));
        let usage = parsed.usage.unwrap();
        assert_eq!(usage.prompt_tokens + usage.completion_tokens, 15);
    }
}
