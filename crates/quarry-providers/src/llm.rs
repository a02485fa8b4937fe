use quarry_core::ProviderError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for query-expansion calls.
pub const EXPANSION_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout for synthesis / completion calls.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat-completion backend used by the optional query-expansion and
/// synthesis adapters. The engine core never requires one.
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;

    fn is_available(&self) -> bool;

    /// Complete a conversation within `timeout`. `model` overrides the
    /// provider's default model when given.
    fn complete(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<String, ProviderError>;
}

/// OpenAI-style chat-completions client.
pub struct HttpLlmProvider {
    id: String,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpLlmProvider {
    pub fn new(
        id: &str,
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(COMPLETION_TIMEOUT)
            .build()
            .map_err(|err| ProviderError::Network {
                id: id.to_string(),
                detail: err.to_string(),
            })?;
        Ok(Self {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
            client,
        })
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

impl LlmProvider for HttpLlmProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_available(&self) -> bool {
        !self.endpoint.is_empty()
    }

    fn complete(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let payload = json!({
            "model": model.unwrap_or(&self.model),
            "messages": messages,
            "temperature": 0.2,
        });
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|err| {
            if err.is_timeout() {
                ProviderError::Timeout {
                    id: self.id.clone(),
                    seconds: timeout.as_secs(),
                }
            } else {
                ProviderError::Network {
                    id: self.id.clone(),
                    detail: err.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(ProviderError::RateLimited {
                id: self.id.clone(),
                retry_after_secs,
            });
        }
        let body = response.text().map_err(|err| ProviderError::Network {
            id: self.id.clone(),
            detail: err.to_string(),
        })?;
        if !status.is_success() {
            return Err(ProviderError::Api {
                id: self.id.clone(),
                code: status.as_u16(),
                message: body.chars().take(300).collect(),
            });
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&body).map_err(|err| ProviderError::Api {
                id: self.id.clone(),
                code: status.as_u16(),
                message: format!("unparsable completion payload: {err}"),
            })?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Api {
                id: self.id.clone(),
                code: status.as_u16(),
                message: "completion carried no choices".to_string(),
            })
    }
}

/// Ordered chain of LLM providers with first-success semantics.
pub struct LlmChain {
    providers: Vec<Arc<dyn LlmProvider>>,
}

impl LlmChain {
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        Self { providers }
    }

    /// A chain with no providers at all; every call fails fast.
    pub fn empty() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.providers.iter().any(|p| p.is_available())
    }

    pub fn complete(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let mut failures: Vec<String> = Vec::new();
        for provider in &self.providers {
            if !provider.is_available() {
                failures.push(format!("{}: not available", provider.id()));
                continue;
            }
            match provider.complete(messages, model, timeout) {
                Ok(text) => return Ok(text),
                Err(err) => {
                    tracing::debug!(provider = provider.id(), %err, "llm provider failed");
                    failures.push(format!("{}: {err}", provider.id()));
                }
            }
        }
        Err(ProviderError::AllProvidersFailed {
            summary: if failures.is_empty() {
                "no providers configured".to_string()
            } else {
                failures.join("; ")
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) struct ScriptedLlm {
        pub reply: String,
    }

    impl LlmProvider for ScriptedLlm {
        fn id(&self) -> &str {
            "scripted"
        }
        fn is_available(&self) -> bool {
            true
        }
        fn complete(
            &self,
            _messages: &[ChatMessage],
            _model: Option<&str>,
            _timeout: Duration,
        ) -> Result<String, ProviderError> {
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn empty_chain_fails_fast() {
        let chain = LlmChain::empty();
        assert!(!chain.is_available());
        let err = chain
            .complete(&[ChatMessage::user("hi")], None, EXPANSION_TIMEOUT)
            .expect_err("must fail");
        assert!(matches!(err, ProviderError::AllProvidersFailed { .. }));
    }

    #[test]
    fn chain_returns_first_success() {
        let chain = LlmChain::new(vec![Arc::new(ScriptedLlm {
            reply: "expanded".to_string(),
        })]);
        let reply = chain
            .complete(&[ChatMessage::user("hi")], None, EXPANSION_TIMEOUT)
            .expect("complete");
        assert_eq!(reply, "expanded");
    }

    #[test]
    fn chat_messages_serialize_with_role_and_content() {
        let json = serde_json::to_string(&ChatMessage::system("be brief")).expect("json");
        assert!(json.contains("\"role\":\"system\""));
        assert!(json.contains("\"content\":\"be brief\""));
    }
}
