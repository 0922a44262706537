//! OpenAI-compatible chat completion provider over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::completion::{CompletionError, CompletionProvider, CompletionRequest, CompletionResponse};

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpCompletionProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpCompletionProvider {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(base_url: impl AsRef<str>, api_key: Option<String>, timeout: Duration) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.as_ref().trim_end_matches('/')),
            api_key,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let res = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Timeout
            } else {
                CompletionError::Transport(e.to_string())
            }
        })?;

        let status = res.status();
        if !status.is_success() {
            let mut body = res.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            warn!(status = status.as_u16(), model = %request.model, "completion provider rejected request");
            return Err(CompletionError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = res
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;

        if parsed.first_content().is_none() {
            return Err(CompletionError::EmptyContent);
        }

        debug!(model = %request.model, choices = parsed.choices.len(), "completion received");
        Ok(parsed)
    }
}
