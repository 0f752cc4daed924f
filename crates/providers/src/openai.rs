use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::Serialize;
use shared::agent_api::ChatMessage;
use shared::settings::BackendConfig;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{ProviderError, Result};
use crate::response::{parse_completion_text, truncate, Completion, StreamAccumulator, StreamDelta};
use crate::sse::SseParser;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

/// Characters of an error body kept in [`ProviderError::Http`]
const ERROR_DETAIL_CHARS: usize = 800;

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

// ── Client ───────────────────────────────────────────────────────────

/// A chat completions endpoint speaking the OpenAI wire format.
pub struct OpenAiCompatClient {
    http: Client,
    config: BackendConfig,
}

impl OpenAiCompatClient {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            config: config.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Sends one chat call. When streaming is enabled and `deltas` is given,
    /// text is forwarded there as it arrives; the full answer is returned
    /// either way.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        deltas: Option<&UnboundedSender<StreamDelta>>,
    ) -> Result<Completion> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| ProviderError::MissingApiKey(self.config.model.clone()))?;

        let req = CompletionRequest {
            model: &self.config.model,
            messages,
            stream: self.config.stream,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
        };

        tracing::debug!(
            endpoint = %self.config.endpoint,
            model = %self.config.model,
            messages = messages.len(),
            stream = self.config.stream,
            "sending chat completion"
        );

        let resp = self
            .http
            .post(&self.config.endpoint)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let mut detail = truncate(body.trim(), ERROR_DETAIL_CHARS);
            if detail.is_empty() {
                detail = status.canonical_reason().unwrap_or("no body").to_string();
            }
            tracing::warn!(status = status.as_u16(), "chat completion rejected");
            return Err(ProviderError::Http {
                status: status.as_u16(),
                detail,
            });
        }

        // Some servers ignore `stream: true` and answer with a plain body
        let is_event_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| !v.starts_with("application/json"))
            .unwrap_or(true);

        if self.config.stream && is_event_stream {
            self.read_stream(resp, deltas).await
        } else {
            let text = resp
                .text()
                .await
                .map_err(|e| ProviderError::Stream(e.to_string()))?;
            let completion = parse_completion_text(&text)?;
            if let Some(tx) = deltas {
                let _ = tx.send(StreamDelta::Content(completion.text().to_string()));
            }
            Ok(completion)
        }
    }

    async fn read_stream(
        &self,
        resp: Response,
        deltas: Option<&UnboundedSender<StreamDelta>>,
    ) -> Result<Completion> {
        let mut parser = SseParser::new();
        let mut acc = StreamAccumulator::new();
        let mut stream = resp.bytes_stream();

        'read: while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| ProviderError::Stream(e.to_string()))?;
            for line in parser.feed(&bytes) {
                for delta in acc.apply(&line) {
                    if let Some(tx) = deltas {
                        // Receiver gone means nobody is rendering; keep reading
                        let _ = tx.send(delta);
                    }
                }
                if acc.is_done() {
                    break 'read;
                }
            }
        }
        if !acc.is_done() {
            for line in parser.finish() {
                for delta in acc.apply(&line) {
                    if let Some(tx) = deltas {
                        let _ = tx.send(delta);
                    }
                }
            }
        }

        if acc.skipped() > 0 {
            tracing::debug!(skipped = acc.skipped(), "stream finished with skipped chunks");
        }
        acc.finish()
    }
}
