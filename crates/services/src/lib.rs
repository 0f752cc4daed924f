pub mod chat_session;
pub mod conversation_store;
pub mod file_store;
pub mod kv;
pub mod sqlite_store;

pub use chat_session::{ChatSession, SessionError, TurnReport};
pub use conversation_store::ConversationStore;
pub use file_store::JsonFileStore;
pub use kv::{KeyValueStore, MemoryStore, StorageError};
pub use sqlite_store::SqliteStore;
