//! One chat sidebar's worth of state: the conversation store, the backend,
//! and whatever the user has queued up for the next message.

use attachments::{AttachmentEncoder, AttachmentFailure, AttachmentSource, TurnBuilder};
use providers::{ChatBackend, ProviderError, StreamDelta};
use shared::conversation::Message;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::conversation_store::ConversationStore;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("nothing to send: no text, selected text or attachments")]
    EmptyTurn,

    #[error("none of the {} attachment(s) could be encoded", .0.len())]
    NothingEncoded(Vec<AttachmentFailure>),

    #[error("conversation {0} no longer exists")]
    ConversationGone(String),
}

/// Outcome of one submitted turn.
#[derive(Debug)]
pub struct TurnReport {
    pub conversation_id: String,
    /// Text recorded as the assistant message
    pub reply: String,
    pub reasoning: Option<String>,
    pub error: Option<ProviderError>,
    /// Attachments that were dropped from the turn
    pub failures: Vec<AttachmentFailure>,
    pub images_sent: usize,
    pub multimodal: bool,
}

impl TurnReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub struct ChatSession {
    store: ConversationStore,
    backend: Arc<dyn ChatBackend>,
    encoder: AttachmentEncoder,
    history_limit: usize,
    pending_attachments: Vec<AttachmentSource>,
    pending_selections: Vec<String>,
    deltas: Option<UnboundedSender<StreamDelta>>,
}

impl ChatSession {
    pub fn new(
        store: ConversationStore,
        backend: Arc<dyn ChatBackend>,
        encoder: AttachmentEncoder,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            backend,
            encoder,
            history_limit,
            pending_attachments: Vec::new(),
            pending_selections: Vec::new(),
            deltas: None,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConversationStore {
        &mut self.store
    }

    /// Forwards streamed text of every following turn to `tx`.
    pub fn stream_to(&mut self, tx: UnboundedSender<StreamDelta>) {
        self.deltas = Some(tx);
    }

    /// Queues an attachment for the next turn. Returns the queue length.
    pub fn attach(&mut self, source: AttachmentSource) -> usize {
        self.pending_attachments.push(source);
        self.pending_attachments.len()
    }

    pub fn remove_attachment(&mut self, index: usize) -> Option<AttachmentSource> {
        (index < self.pending_attachments.len()).then(|| self.pending_attachments.remove(index))
    }

    pub fn pending_attachments(&self) -> &[AttachmentSource] {
        &self.pending_attachments
    }

    /// Queues a snippet of page text. Blank snippets are ignored.
    pub fn add_selected_text(&mut self, text: impl Into<String>) -> bool {
        let text = text.into();
        if text.trim().is_empty() {
            return false;
        }
        self.pending_selections.push(text);
        true
    }

    pub fn remove_selected_text(&mut self, index: usize) -> Option<String> {
        (index < self.pending_selections.len()).then(|| self.pending_selections.remove(index))
    }

    pub fn pending_selections(&self) -> &[String] {
        &self.pending_selections
    }

    pub fn clear_pending(&mut self) {
        self.pending_attachments.clear();
        self.pending_selections.clear();
    }

    /// Sends `text` plus everything queued to the current conversation.
    ///
    /// The pending queues are emptied whatever the outcome. A backend failure
    /// is recorded as an assistant message explaining it and reported in the
    /// returned [`TurnReport`], not as an `Err`.
    pub async fn submit(&mut self, text: &str) -> Result<TurnReport, SessionError> {
        let text = text.trim();
        let nothing_queued =
            self.pending_attachments.is_empty() && self.pending_selections.is_empty();
        if text.is_empty() && nothing_queued {
            return Err(SessionError::EmptyTurn);
        }
        let sources = std::mem::take(&mut self.pending_attachments);
        let selections = std::mem::take(&mut self.pending_selections);

        let conversation_id = self.store.current_id().to_string();
        let history = self
            .store
            .current()
            .map(|c| c.history(self.history_limit))
            .unwrap_or_default();

        let mut builder = TurnBuilder::new(&self.encoder);
        for selection in &selections {
            builder.add_selected_text(selection);
        }
        builder.add_text(text);
        for source in &sources {
            builder.add_attachment(source);
        }
        let turn = builder.finish();

        if turn.messages.is_empty() {
            return Err(SessionError::NothingEncoded(turn.failures));
        }

        let user_message = Message::user(text)
            .with_attachments(turn.attachments.clone())
            .with_selected_texts(selections);
        if !self.store.append(&conversation_id, user_message) {
            return Err(SessionError::ConversationGone(conversation_id));
        }
        if turn.is_multimodal() {
            self.store.mark_multimodal(&conversation_id);
        }
        let multimodal = self
            .store
            .get(&conversation_id)
            .map(|c| c.is_multimodal())
            .unwrap_or(false);

        let images_sent = turn.image_count();
        let mut messages = history;
        messages.extend(turn.messages);
        tracing::info!(
            conversation = %conversation_id,
            entries = messages.len(),
            images = images_sent,
            multimodal,
            "submitting turn"
        );

        let (reply, reasoning, error) = match self
            .backend
            .send(messages, multimodal, self.deltas.clone())
            .await
        {
            Ok(completion) => (completion.text().to_string(), completion.reasoning, None),
            Err(e) => {
                tracing::warn!(error = %e, "chat request failed");
                (e.user_message(), None, Some(e))
            }
        };
        if !self
            .store
            .append(&conversation_id, Message::assistant(reply.clone()))
        {
            tracing::warn!(
                conversation = %conversation_id,
                "reply arrived for a dropped conversation"
            );
            return Err(SessionError::ConversationGone(conversation_id));
        }

        Ok(TurnReport {
            conversation_id,
            reply,
            reasoning,
            error,
            failures: turn.failures,
            images_sent,
            multimodal,
        })
    }
}
