//! 记忆层：记忆条目、任务记忆日志、按 key 持久化

pub mod conversation;
pub mod log;
pub mod persistence;

pub use conversation::{MemoryEntry, Message, Role};
pub use log::MemoryLog;
pub use persistence::{sanitize_key, InMemoryStore, JsonFileStore, MemoryStore};
