//! Change notifications published by the conversation store.

use crate::conversation::ModelType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ConversationCreated { id: String },
    CurrentChanged { id: String },
    MessageAppended { conversation_id: String, index: usize },
    MessageDeleted { conversation_id: String, index: usize },
    TitleChanged { conversation_id: String, title: String },
    ModelTypeChanged { conversation_id: String, model_type: ModelType },
    ConversationDeleted { id: String },
    HistoryCleared,
    /// Older conversations were dropped to fit retention or quota
    Trimmed { retained: usize },
}
