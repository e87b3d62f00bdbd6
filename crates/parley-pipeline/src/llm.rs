//! Completion providers.
//!
//! The completion contract: an ordered list of chat messages in,
//! a single assistant text out, with auth, rate-limit, and network
//! failures kept distinct. The OpenAI backend targets any
//! chat-completions-compatible endpoint; the mock backend is the
//! explicit per-session no-credentials fallback.

use crate::error::LlmError;
use parley_types::{ChatMessage, LlmConfig};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Bounded timeout for one completion request.
const LLM_TIMEOUT: Duration = Duration::from_secs(30);

/// A failure the mock backend can be scripted to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmFailure {
    Auth,
    RateLimited,
    Network,
}

#[derive(Debug, Clone)]
enum LlmBackend {
    OpenAi {
        client: reqwest::Client,
        base_url: String,
        api_key: String,
    },
    Mock {
        fail: Option<LlmFailure>,
    },
}

/// Completion-service client for one session.
#[derive(Debug, Clone)]
pub struct CompletionService {
    backend: LlmBackend,
}

impl CompletionService {
    /// Client for an OpenAI-compatible chat-completions endpoint.
    pub fn openai(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(LLM_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            backend: LlmBackend::OpenAi {
                client,
                base_url: base_url.into(),
                api_key: api_key.into(),
            },
        }
    }

    /// No-op completion: echoes the user's utterance back. Used when no
    /// credentials are configured and mock fallback is permitted.
    pub fn mock() -> Self {
        Self {
            backend: LlmBackend::Mock { fail: None },
        }
    }

    /// A mock that always fails with the given failure kind.
    pub fn mock_failing(fail: LlmFailure) -> Self {
        Self {
            backend: LlmBackend::Mock { fail: Some(fail) },
        }
    }

    /// Requests one assistant reply for the given ordered context.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        config: &LlmConfig,
    ) -> Result<String, LlmError> {
        match &self.backend {
            LlmBackend::OpenAi {
                client,
                base_url,
                api_key,
            } => complete_openai(client, base_url, api_key, messages, config).await,
            LlmBackend::Mock { fail } => {
                if let Some(failure) = fail {
                    return Err(match failure {
                        LlmFailure::Auth => LlmError::Auth("mock auth failure".to_string()),
                        LlmFailure::RateLimited => {
                            LlmError::RateLimited("mock rate limit".to_string())
                        }
                        LlmFailure::Network => LlmError::Network("mock network failure".to_string()),
                    });
                }
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| matches!(m.role, parley_types::ChatRole::User))
                    .map(|m| m.content.as_str())
                    .unwrap_or("");
                debug!(chars = last_user.len(), "mock completion echoing utterance");
                Ok(format!("You said: {}", last_user))
            }
        }
    }
}

async fn complete_openai(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    messages: &[ChatMessage],
    config: &LlmConfig,
) -> Result<String, LlmError> {
    let body = json!({
        "model": config.model,
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
        "messages": messages,
    });

    let response = client
        .post(format!("{}/chat/completions", base_url.trim_end_matches('/')))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(LLM_TIMEOUT.as_secs())
            } else {
                LlmError::Network(e.to_string())
            }
        })?;

    let status = response.status();
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(LlmError::Auth(format!("completion endpoint returned {}", status)));
    }
    if status.as_u16() == 429 {
        return Err(LlmError::RateLimited(format!(
            "completion endpoint returned {}",
            status
        )));
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(LlmError::Provider(format!("{}: {}", status, text)));
    }

    let value: Value = response
        .json()
        .await
        .map_err(|e| LlmError::Provider(format!("malformed response body: {}", e)))?;
    value["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| LlmError::Provider("response missing choices[0].message.content".to_string()))
}
