//! Chat backends speaking the OpenAI-compatible completions protocol.

use async_trait::async_trait;
use shared::agent_api::ChatMessage;
use tokio::sync::mpsc::UnboundedSender;

pub mod error;
pub mod openai;
pub mod response;
pub mod router;
pub mod sse;

pub use error::ProviderError;
pub use openai::OpenAiCompatClient;
pub use response::{Completion, ResponseShape, StreamAccumulator, StreamDelta};
pub use router::BackendRouter;

/// Sends one assembled message list and returns the assistant's answer.
///
/// `multimodal` selects the vision-capable backend. When `deltas` is given
/// and the backend streams, partial text is forwarded as it arrives.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send(
        &self,
        messages: Vec<ChatMessage>,
        multimodal: bool,
        deltas: Option<UnboundedSender<StreamDelta>>,
    ) -> Result<Completion, ProviderError>;
}
