use crate::openai::OpenAiCompatClient;
use crate::response::{Completion, StreamDelta};
use crate::{ChatBackend, ProviderError};
use async_trait::async_trait;
use shared::agent_api::ChatMessage;
use shared::settings::{BackendConfig, ChatSettings};
use tokio::sync::mpsc::UnboundedSender;

/// Picks the text or the multimodal backend for each call.
pub struct BackendRouter {
    text: OpenAiCompatClient,
    multimodal: OpenAiCompatClient,
}

impl BackendRouter {
    pub fn new(text: &BackendConfig, multimodal: &BackendConfig) -> Self {
        Self {
            text: OpenAiCompatClient::from_config(text),
            multimodal: OpenAiCompatClient::from_config(multimodal),
        }
    }

    pub fn from_settings(settings: &ChatSettings) -> Self {
        Self::new(&settings.text, &settings.multimodal)
    }

    pub fn client(&self, multimodal: bool) -> &OpenAiCompatClient {
        if multimodal {
            &self.multimodal
        } else {
            &self.text
        }
    }
}

#[async_trait]
impl ChatBackend for BackendRouter {
    async fn send(
        &self,
        messages: Vec<ChatMessage>,
        multimodal: bool,
        deltas: Option<UnboundedSender<StreamDelta>>,
    ) -> Result<Completion, ProviderError> {
        let client = self.client(multimodal);
        tracing::info!(
            model = %client.model(),
            multimodal,
            messages = messages.len(),
            "routing chat request"
        );
        client.complete(&messages, deltas.as_ref()).await
    }
}
