//! Conversation store: the ordered list of conversation threads, which one
//! is current, and their persistence.
//!
//! The list is kept newest first. Every mutation writes a full snapshot of
//! both keys through the injected [`KeyValueStore`] and publishes
//! [`StoreEvent`]s to subscribers.

use serde_json::Value;
use shared::conversation::{Conversation, Message};
use shared::events::StoreEvent;
use shared::settings::StoreSettings;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::kv::{KeyValueStore, StorageError};

pub const CONVERSATIONS_KEY: &str = "conversations";
pub const CURRENT_ID_KEY: &str = "currentConversationId";

pub struct ConversationStore {
    backend: Box<dyn KeyValueStore>,
    settings: StoreSettings,
    conversations: Vec<Conversation>,
    current_id: String,
    subscribers: Vec<UnboundedSender<StoreEvent>>,
}

impl ConversationStore {
    /// Restores the persisted state. Unreadable data is logged and treated as
    /// empty; a store always comes back with a current conversation.
    pub fn load(backend: Box<dyn KeyValueStore>, settings: StoreSettings) -> Self {
        let conversations = read_conversations(backend.as_ref());
        let stored_current = match backend.get(CURRENT_ID_KEY) {
            Ok(Some(Value::String(id))) => Some(id),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "could not read current conversation id");
                None
            }
        };

        let mut store = Self {
            backend,
            settings,
            conversations,
            current_id: String::new(),
            subscribers: Vec::new(),
        };

        let mut dirty = false;
        match stored_current.filter(|id| store.get(id).is_some()) {
            Some(id) => store.current_id = id,
            None => {
                dirty = true;
                match store.conversations.first() {
                    Some(front) => store.current_id = front.id.clone(),
                    None => store.insert_fresh(),
                }
            }
        }

        if store.settings.new_conversation_on_start
            && store.current().map(|c| !c.messages.is_empty()).unwrap_or(true)
        {
            store.insert_fresh();
            dirty = true;
        }

        tracing::info!(
            conversations = store.conversations.len(),
            current = %store.current_id,
            "conversation store loaded"
        );
        if dirty {
            store.persist();
        }
        store
    }

    /// Receives every change made from now on.
    pub fn subscribe(&mut self) -> UnboundedReceiver<StoreEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn current_id(&self) -> &str {
        &self.current_id
    }

    pub fn current(&self) -> Option<&Conversation> {
        self.get(&self.current_id)
    }

    /// Opens a fresh conversation at the front and makes it current.
    pub fn create_new(&mut self) -> &Conversation {
        self.insert_fresh();
        self.persist();
        &self.conversations[0]
    }

    /// Appends to conversation `id`. Unknown ids change nothing.
    pub fn append(&mut self, id: &str, message: Message) -> bool {
        let title_max_chars = self.settings.title_max_chars;
        let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == id) else {
            tracing::debug!(conversation = %id, "append to unknown conversation ignored");
            return false;
        };
        let title = conversation.push(message, title_max_chars);
        let index = conversation.messages.len() - 1;

        self.emit(StoreEvent::MessageAppended {
            conversation_id: id.to_string(),
            index,
        });
        if let Some(title) = title {
            self.emit(StoreEvent::TitleChanged {
                conversation_id: id.to_string(),
                title,
            });
        }
        self.persist();
        true
    }

    /// Flips `id` to multimodal. It never flips back.
    pub fn mark_multimodal(&mut self, id: &str) -> bool {
        let flipped = self
            .conversations
            .iter_mut()
            .find(|c| c.id == id)
            .map(|c| c.mark_multimodal())
            .unwrap_or(false);
        if flipped {
            tracing::debug!(conversation = %id, "conversation switched to multimodal");
            self.emit(StoreEvent::ModelTypeChanged {
                conversation_id: id.to_string(),
                model_type: shared::conversation::ModelType::Multimodal,
            });
            self.persist();
        }
        flipped
    }

    /// Makes `id` current. False when it already is, or does not exist.
    pub fn switch_conversation(&mut self, id: &str) -> bool {
        if self.current_id == id || self.get(id).is_none() {
            return false;
        }
        self.set_current(id.to_string());
        self.persist();
        true
    }

    pub fn delete(&mut self, id: &str) -> bool {
        let Some(pos) = self.conversations.iter().position(|c| c.id == id) else {
            return false;
        };
        self.conversations.remove(pos);
        self.emit(StoreEvent::ConversationDeleted { id: id.to_string() });

        if self.current_id == id {
            match self.conversations.first() {
                Some(front) => {
                    let front = front.id.clone();
                    self.set_current(front);
                }
                None => self.insert_fresh(),
            }
        }
        self.persist();
        true
    }

    /// Removes one message from conversation `id`.
    pub fn delete_message(&mut self, id: &str, index: usize) -> bool {
        let removed = self
            .conversations
            .iter_mut()
            .find(|c| c.id == id)
            .and_then(|c| c.remove_message(index))
            .is_some();
        if removed {
            self.emit(StoreEvent::MessageDeleted {
                conversation_id: id.to_string(),
                index,
            });
            self.persist();
        }
        removed
    }

    /// Drops every conversation and both persisted keys, then opens a fresh
    /// conversation.
    pub fn clear_history(&mut self) {
        if let Err(e) = self.backend.remove_many(&[CONVERSATIONS_KEY, CURRENT_ID_KEY]) {
            tracing::warn!(error = %e, "failed to clear persisted conversations");
        }
        self.conversations.clear();
        self.emit(StoreEvent::HistoryCleared);
        self.insert_fresh();
        self.persist();
    }

    /// Writes both keys. Applies the retention cap first; on a quota error
    /// trims to `quota_fallback` and retries once.
    pub fn save(&mut self) -> Result<(), StorageError> {
        self.retain_newest(self.settings.max_conversations);
        match self.write_snapshot() {
            Err(e) if e.is_quota() && self.conversations.len() > self.settings.quota_fallback => {
                tracing::warn!(
                    error = %e,
                    keep = self.settings.quota_fallback,
                    "storage quota exceeded, dropping older conversations"
                );
                self.retain_newest(self.settings.quota_fallback);
                self.write_snapshot()
            }
            result => result,
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "failed to save conversations");
        }
    }

    fn write_snapshot(&mut self) -> Result<(), StorageError> {
        let conversations = if self.settings.persist_inline_data {
            serde_json::to_value(&self.conversations)?
        } else {
            let mut snapshot = self.conversations.clone();
            for attachment in snapshot
                .iter_mut()
                .flat_map(|c| c.messages.iter_mut())
                .flat_map(|m| m.attachments.iter_mut())
            {
                attachment.strip_inline();
            }
            serde_json::to_value(&snapshot)?
        };

        self.backend.set_many(&[
            (CONVERSATIONS_KEY, conversations),
            (CURRENT_ID_KEY, Value::String(self.current_id.clone())),
        ])?;
        tracing::debug!(conversations = self.conversations.len(), "conversations saved");
        Ok(())
    }

    /// Keeps `cap` conversations: the current one plus the newest others.
    /// At least one always survives.
    fn retain_newest(&mut self, cap: usize) {
        let cap = cap.max(1);
        if self.conversations.len() <= cap {
            return;
        }
        let current_pos = self.conversations.iter().position(|c| c.id == self.current_id);
        match current_pos {
            Some(pos) if pos >= cap => {
                let current = self.conversations.remove(pos);
                self.conversations.truncate(cap - 1);
                // Older than everything kept, so it stays last
                self.conversations.push(current);
            }
            _ => self.conversations.truncate(cap),
        }
        self.emit(StoreEvent::Trimmed { retained: cap });
        if current_pos.is_none() {
            let front = self.conversations[0].id.clone();
            self.set_current(front);
        }
    }

    fn insert_fresh(&mut self) {
        let conversation = Conversation::new();
        let id = conversation.id.clone();
        self.conversations.insert(0, conversation);
        self.emit(StoreEvent::ConversationCreated { id: id.clone() });
        self.set_current(id);
    }

    fn set_current(&mut self, id: String) {
        self.current_id = id.clone();
        self.emit(StoreEvent::CurrentChanged { id });
    }

    fn emit(&mut self, event: StoreEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn read_conversations(backend: &dyn KeyValueStore) -> Vec<Conversation> {
    match backend.get(CONVERSATIONS_KEY) {
        Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "stored conversations are unreadable, starting empty");
            Vec::new()
        }),
        Ok(None) => Vec::new(),
        Err(e) => {
            tracing::warn!(error = %e, "could not read stored conversations, starting empty");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_store::JsonFileStore;
    use crate::kv::MemoryStore;
    use crate::sqlite_store::SqliteStore;
    use serde_json::json;
    use shared::conversation::{AttachmentKind, AttachmentMeta, ModelType, DEFAULT_TITLE};
    use tempfile::TempDir;

    fn memory_store(settings: StoreSettings) -> (ConversationStore, MemoryStore) {
        let backend = MemoryStore::new();
        let store = ConversationStore::load(Box::new(backend.clone()), settings);
        (store, backend)
    }

    fn drain(rx: &mut UnboundedReceiver<StoreEvent>) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_first_load_creates_and_persists_current() {
        let (store, backend) = memory_store(StoreSettings::default());
        assert_eq!(store.conversations().len(), 1);
        let current = store.current().unwrap();
        assert_eq!(current.title, DEFAULT_TITLE);
        assert_eq!(
            backend.get(CURRENT_ID_KEY).unwrap(),
            Some(json!(store.current_id()))
        );
    }

    #[test]
    fn test_create_new_goes_to_front_and_becomes_current() {
        let (mut store, _backend) = memory_store(StoreSettings::default());
        let first = store.current_id().to_string();
        let id = store.create_new().id.clone();

        assert_eq!(store.conversations()[0].id, id);
        assert_eq!(store.conversations()[1].id, first);
        assert_eq!(store.current_id(), id);
    }

    #[test]
    fn test_append_to_unknown_id_changes_nothing() {
        let (mut store, backend) = memory_store(StoreSettings::default());
        let before = backend.get(CONVERSATIONS_KEY).unwrap();

        assert!(!store.append("no-such-id", Message::user("hello")));
        assert_eq!(backend.get(CONVERSATIONS_KEY).unwrap(), before);
        assert!(store.current().unwrap().messages.is_empty());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let (mut store, backend) = memory_store(StoreSettings::default());
        let id = store.current_id().to_string();
        store.append(&id, Message::user("What is Rust?"));
        store.append(&id, Message::assistant("A systems language."));
        store.create_new();
        store.switch_conversation(&id);

        let reloaded = ConversationStore::load(Box::new(backend), StoreSettings::default());
        assert_eq!(reloaded.conversations(), store.conversations());
        assert_eq!(reloaded.current_id(), id);
        assert_eq!(reloaded.current().unwrap().title, "What is Rust?");
    }

    #[test]
    fn test_switch_to_current_is_a_no_op() {
        let (mut store, _backend) = memory_store(StoreSettings::default());
        let mut rx = store.subscribe();
        let current = store.current_id().to_string();

        assert!(!store.switch_conversation(&current));
        assert!(!store.switch_conversation("missing"));
        assert_eq!(store.current_id(), current);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_title_from_first_message_only() {
        let (mut store, _backend) = memory_store(StoreSettings::default());
        let id = store.current_id().to_string();
        let mut rx = store.subscribe();

        store.append(&id, Message::user("Please summarize this article for me"));
        store.append(&id, Message::user("Another message"));
        assert_eq!(store.current().unwrap().title, "Please summarize thi...");

        let events = drain(&mut rx);
        assert_eq!(
            events[..2],
            [
                StoreEvent::MessageAppended {
                    conversation_id: id.clone(),
                    index: 0
                },
                StoreEvent::TitleChanged {
                    conversation_id: id.clone(),
                    title: "Please summarize thi...".into()
                },
            ]
        );
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_retention_keeps_newest() {
        let settings = StoreSettings {
            max_conversations: 5,
            ..Default::default()
        };
        let (mut store, backend) = memory_store(settings);
        let mut created = Vec::new();
        for _ in 0..8 {
            created.push(store.create_new().id.clone());
        }

        assert_eq!(store.conversations().len(), 5);
        let kept: Vec<_> = store.conversations().iter().map(|c| c.id.clone()).collect();
        let newest: Vec<_> = created.iter().rev().take(5).cloned().collect();
        assert_eq!(kept, newest);
        assert_eq!(store.current_id(), created[7]);

        let persisted = backend.get(CONVERSATIONS_KEY).unwrap().unwrap();
        assert_eq!(persisted.as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_retention_keeps_current_conversation() {
        let (mut store, backend) = memory_store(StoreSettings::default());
        let oldest = store.current_id().to_string();
        store.create_new();
        let front = store.create_new().id.clone();
        store.switch_conversation(&oldest);

        let settings = StoreSettings {
            max_conversations: 2,
            ..Default::default()
        };
        let mut reloaded = ConversationStore::load(Box::new(backend.clone()), settings);
        assert_eq!(reloaded.current_id(), oldest);
        reloaded.save().unwrap();

        let kept: Vec<_> = reloaded.conversations().iter().map(|c| c.id.clone()).collect();
        assert_eq!(kept, vec![front, oldest.clone()]);
        assert_eq!(reloaded.current_id(), oldest);
        assert_eq!(backend.get(CURRENT_ID_KEY).unwrap(), Some(json!(oldest)));
    }

    #[test]
    fn test_quota_trim_keeps_current_conversation() {
        let backend = MemoryStore::with_quota(9_000);
        let mut store =
            ConversationStore::load(Box::new(backend.clone()), StoreSettings::default());
        let oldest = store.current_id().to_string();
        for _ in 0..11 {
            let id = store.create_new().id.clone();
            store.append(&id, Message::user("a".repeat(400)));
        }
        assert_eq!(store.conversations().len(), 12);
        assert!(store.switch_conversation(&oldest));

        assert!(store.append(&oldest, Message::user("x".repeat(2_000))));
        assert_eq!(store.conversations().len(), 10);
        assert_eq!(store.current_id(), oldest);
        assert_eq!(store.conversations()[9].id, oldest);
        assert_eq!(store.current().unwrap().messages.len(), 1);

        let persisted = backend.get(CONVERSATIONS_KEY).unwrap().unwrap();
        assert_eq!(persisted.as_array().unwrap().len(), 10);
        assert_eq!(backend.get(CURRENT_ID_KEY).unwrap(), Some(json!(oldest)));
    }

    #[test]
    fn test_quota_exceeded_keeps_ten_newest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conversations.json");
        let long_text = "lorem ipsum ".repeat(84);

        {
            let backend = JsonFileStore::open(&path).unwrap();
            let mut store = ConversationStore::load(Box::new(backend), StoreSettings::default());
            for _ in 0..60 {
                let id = store.create_new().id.clone();
                store.append(&id, Message::user(long_text.clone()));
            }
            assert_eq!(store.conversations().len(), 50);
        }

        let backend = JsonFileStore::open(&path).unwrap().with_quota(20_000);
        let mut store = ConversationStore::load(Box::new(backend), StoreSettings::default());
        let mut rx = store.subscribe();
        let newest = store.conversations()[0].id.clone();
        assert_eq!(store.conversations().len(), 50);

        assert!(store.append(&newest, Message::assistant("noted")));
        assert_eq!(store.conversations().len(), 10);
        assert_eq!(store.conversations()[0].id, newest);
        assert!(drain(&mut rx).contains(&StoreEvent::Trimmed { retained: 10 }));

        let persisted = JsonFileStore::open(&path).unwrap();
        let list = persisted.get(CONVERSATIONS_KEY).unwrap().unwrap();
        assert_eq!(list.as_array().unwrap().len(), 10);
    }

    #[test]
    fn test_quota_error_surfaces_when_nothing_to_trim() {
        let backend = MemoryStore::with_quota(10);
        let mut store = ConversationStore::load(Box::new(backend), StoreSettings::default());
        let err = store.save().unwrap_err();
        assert!(err.is_quota());
        assert_eq!(store.conversations().len(), 1);
    }

    #[test]
    fn test_inline_data_is_stripped_before_persisting() {
        let (mut store, backend) = memory_store(StoreSettings::default());
        let id = store.current_id().to_string();
        let mut meta = AttachmentMeta::new("screenshot.png", AttachmentKind::Image);
        meta.url = Some("data:image/png;base64,aGVsbG8=".into());
        store.append(&id, Message::user("look").with_attachments(vec![meta]));

        let persisted = backend.get(CONVERSATIONS_KEY).unwrap().unwrap();
        let attachment = &persisted[0]["messages"][0]["attachments"][0];
        assert_eq!(attachment["name"], "screenshot.png");
        assert_eq!(attachment["type"], "image");
        assert!(attachment.get("url").is_none());
        // The live copy keeps the payload
        assert!(store.current().unwrap().messages[0].attachments[0].is_inline());

        let settings = StoreSettings {
            persist_inline_data: true,
            ..Default::default()
        };
        let mut keeping = ConversationStore::load(Box::new(backend.clone()), settings);
        let mut meta = AttachmentMeta::new("shot.png", AttachmentKind::Image);
        meta.url = Some("data:image/png;base64,aGVsbG8=".into());
        keeping.append(&id, Message::user("again").with_attachments(vec![meta]));
        let persisted = backend.get(CONVERSATIONS_KEY).unwrap().unwrap();
        assert_eq!(
            persisted[0]["messages"][1]["attachments"][0]["url"],
            "data:image/png;base64,aGVsbG8="
        );
    }

    #[test]
    fn test_delete_current_promotes_front() {
        let (mut store, _backend) = memory_store(StoreSettings::default());
        let older = store.current_id().to_string();
        let newer = store.create_new().id.clone();

        assert!(store.delete(&newer));
        assert_eq!(store.current_id(), older);
        assert!(!store.delete(&newer));

        assert!(store.delete(&older));
        assert_eq!(store.conversations().len(), 1);
        assert_ne!(store.current_id(), older);
    }

    #[test]
    fn test_delete_message() {
        let (mut store, _backend) = memory_store(StoreSettings::default());
        let id = store.current_id().to_string();
        store.append(&id, Message::user("one"));
        store.append(&id, Message::assistant("two"));

        assert!(store.delete_message(&id, 0));
        assert!(!store.delete_message(&id, 5));
        let messages = &store.current().unwrap().messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "two");
    }

    #[test]
    fn test_mark_multimodal_is_sticky() {
        let (mut store, _backend) = memory_store(StoreSettings::default());
        let id = store.current_id().to_string();
        assert!(store.mark_multimodal(&id));
        assert!(!store.mark_multimodal(&id));
        assert!(!store.mark_multimodal("missing"));
        assert_eq!(store.current().unwrap().model_type, ModelType::Multimodal);
    }

    #[test]
    fn test_clear_history() {
        let (mut store, backend) = memory_store(StoreSettings::default());
        let old = store.current_id().to_string();
        store.append(&old, Message::user("hi"));
        store.create_new();
        let mut rx = store.subscribe();

        store.clear_history();
        assert_eq!(store.conversations().len(), 1);
        assert_ne!(store.current_id(), old);
        assert_eq!(drain(&mut rx)[0], StoreEvent::HistoryCleared);
        let persisted = backend.get(CONVERSATIONS_KEY).unwrap().unwrap();
        assert_eq!(persisted.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_data_is_treated_as_empty() {
        let mut backend = MemoryStore::new();
        backend
            .set_many(&[(CONVERSATIONS_KEY, json!("garbage")), (CURRENT_ID_KEY, json!(42))])
            .unwrap();
        let store = ConversationStore::load(Box::new(backend), StoreSettings::default());
        assert_eq!(store.conversations().len(), 1);
        assert!(store.current().is_some());
    }

    #[test]
    fn test_garbage_file_still_loads_with_current_conversation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conversations.json");
        std::fs::write(&path, "\u{0}\u{1} definitely not json").unwrap();

        let backend = JsonFileStore::open(&path).unwrap();
        let store = ConversationStore::load(Box::new(backend), StoreSettings::default());
        assert_eq!(store.conversations().len(), 1);
        assert!(store.current().is_some());

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(CURRENT_ID_KEY).unwrap(),
            Some(json!(store.current_id()))
        );
    }

    #[test]
    fn test_new_conversation_on_start_reuses_empty_current() {
        let settings = StoreSettings {
            new_conversation_on_start: true,
            ..Default::default()
        };
        let (mut store, backend) = memory_store(settings.clone());
        let first = store.current_id().to_string();

        let reloaded = ConversationStore::load(Box::new(backend.clone()), settings.clone());
        assert_eq!(reloaded.current_id(), first);
        assert_eq!(reloaded.conversations().len(), 1);

        store.append(&first, Message::user("hello"));
        let reloaded = ConversationStore::load(Box::new(backend), settings);
        assert_ne!(reloaded.current_id(), first);
        assert_eq!(reloaded.conversations().len(), 2);
    }

    #[test]
    fn test_sqlite_backend() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_dir.path().join("sidechat.db");
        let id = {
            let backend = SqliteStore::open(&db).unwrap();
            let mut store = ConversationStore::load(Box::new(backend), StoreSettings::default());
            let id = store.current_id().to_string();
            store.append(&id, Message::user("persisted in sqlite"));
            id
        };

        let backend = SqliteStore::open(&db).unwrap();
        let store = ConversationStore::load(Box::new(backend), StoreSettings::default());
        assert_eq!(store.current_id(), id);
        assert_eq!(store.current().unwrap().messages[0].text, "persisted in sqlite");
    }
}
