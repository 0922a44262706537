use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One chat message sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
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

/// Outbound completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: ChoiceMessage,
}

/// Provider response (only the fields the processor reads).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl CompletionResponse {
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: ChoiceMessage {
                    content: Some(content.into()),
                },
            }],
        }
    }

    /// Content of the first choice, trimmed; `None` when missing or blank.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Job request payload as submitted by clients.
///
/// Stored opaquely on the job; parsed by the processor right before the
/// provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPayload {
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl PromptPayload {
    pub const MAX_PROMPT_CHARS: usize = 16_000;

    pub fn from_json(value: &serde_json::Value) -> Result<Self, CompletionError> {
        let payload: PromptPayload = serde_json::from_value(value.clone())
            .map_err(|e| CompletionError::InvalidRequest(format!("malformed request payload: {e}")))?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn validate(&self) -> Result<(), CompletionError> {
        if self.prompt.trim().is_empty() {
            return Err(CompletionError::InvalidRequest("prompt must not be empty".into()));
        }
        if self.prompt.chars().count() > Self::MAX_PROMPT_CHARS {
            return Err(CompletionError::InvalidRequest(format!(
                "prompt longer than {} characters",
                Self::MAX_PROMPT_CHARS
            )));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(CompletionError::InvalidRequest(
                    "temperature must be within [0, 2]".into(),
                ));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(CompletionError::InvalidRequest("max_tokens must be positive".into()));
        }
        Ok(())
    }
}

/// Defaults from the (read-only) prompt settings store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDefaults {
    pub model: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for PromptDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            system_prompt: None,
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

impl CompletionRequest {
    /// Merge a client payload over the configured defaults.
    pub fn from_payload(payload: &PromptPayload, defaults: &PromptDefaults) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = payload.system.as_ref().or(defaults.system_prompt.as_ref()) {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(payload.prompt.clone()));

        Self {
            model: payload.model.clone().unwrap_or_else(|| defaults.model.clone()),
            messages,
            max_tokens: payload.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: payload.temperature.unwrap_or(defaults.temperature),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("invalid completion request: {0}")]
    InvalidRequest(String),

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider unreachable: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider returned no content")]
    EmptyContent,

    #[error("provider call timed out")]
    Timeout,
}

/// External text-completion API.
///
/// Implementations are called outside any ledger transaction, from worker
/// tasks, and may be slow.
#[async_trait]
pub trait CompletionProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, CompletionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_overrides_defaults() {
        let payload = PromptPayload::from_json(&serde_json::json!({
            "prompt": "Thank the reviewer",
            "model": "custom-model",
            "maxTokens": 64,
        }))
        .unwrap();

        let defaults = PromptDefaults {
            system_prompt: Some("You reply to reviews.".into()),
            ..PromptDefaults::default()
        };
        let req = CompletionRequest::from_payload(&payload, &defaults);

        assert_eq!(req.model, "custom-model");
        assert_eq!(req.max_tokens, 64);
        assert_eq!(req.temperature, defaults.temperature);
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, "system");
        assert_eq!(req.messages[1], ChatMessage::user("Thank the reviewer"));
    }

    #[test]
    fn payload_validation() {
        assert!(PromptPayload::from_json(&serde_json::json!({"prompt": "  "})).is_err());
        assert!(PromptPayload::from_json(&serde_json::json!({"prompt": "x", "temperature": 3.5})).is_err());
        assert!(PromptPayload::from_json(&serde_json::json!({"text": "wrong field"})).is_err());
    }

    #[test]
    fn first_content_ignores_blank_and_missing() {
        let resp: CompletionResponse =
            serde_json::from_value(serde_json::json!({"choices": [{"message": {"content": "  hi \n"}}]})).unwrap();
        assert_eq!(resp.first_content(), Some("hi"));

        let blank: CompletionResponse =
            serde_json::from_value(serde_json::json!({"choices": [{"message": {"content": "   "}}]})).unwrap();
        assert_eq!(blank.first_content(), None);

        let missing: CompletionResponse = serde_json::from_value(serde_json::json!({"choices": [{}]})).unwrap();
        assert_eq!(missing.first_content(), None);

        let none: CompletionResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(none.first_content(), None);
    }
}
