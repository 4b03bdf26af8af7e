//! 任务记忆日志
//!
//! 单个任务执行循环独占的追加式日志：按插入顺序保存，不重排、不去重；
//! 每次 append 后立即整体写回存储，保证崩溃后可带完整上下文恢复（读己之写）。

use std::sync::Arc;

use crate::core::AgentError;
use crate::memory::{MemoryEntry, MemoryStore, Message, Role};

pub struct MemoryLog {
    key: String,
    entries: Vec<MemoryEntry>,
    store: Arc<dyn MemoryStore>,
}

impl MemoryLog {
    /// 从存储加载 key 对应的日志；不存在时为空日志
    pub fn load(store: Arc<dyn MemoryStore>, key: impl Into<String>) -> Result<Self, AgentError> {
        let key = key.into();
        let entries = store.load(&key)?;
        tracing::debug!(key = %key, entries = entries.len(), "memory log loaded");
        Ok(Self {
            key,
            entries,
            store,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 追加一条记录并写回存储；写回失败时内存中也不保留该条
    pub fn append(
        &mut self,
        role: Role,
        content: impl Into<String>,
        action_type: impl Into<String>,
        memorized: bool,
    ) -> Result<(), AgentError> {
        self.entries
            .push(MemoryEntry::new(role, content, action_type, memorized));
        if let Err(e) = self.persist() {
            self.entries.pop();
            return Err(e);
        }
        Ok(())
    }

    /// 按插入顺序返回条目；limit 为 Some(n) 时只返回最近 n 条
    pub fn entries(&self, limit: Option<usize>) -> &[MemoryEntry] {
        match limit {
            Some(n) if n < self.entries.len() => &self.entries[self.entries.len() - n..],
            _ => &self.entries,
        }
    }

    pub fn last(&self) -> Option<&MemoryEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 决策源使用的 {role, content} 历史
    pub fn history(&self) -> Vec<Message> {
        self.entries.iter().map(MemoryEntry::to_message).collect()
    }

    /// 所有 memorized 条目按插入顺序拼接，每条形如 `THINKING: ...`，换行分隔
    pub fn memorized_digest(&self) -> String {
        self.entries
            .iter()
            .filter(|e| e.memorized)
            .map(|e| format!("{}: {}", e.action_type.to_uppercase(), e.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 只保留最近 max 条（近期上限），并写回
    pub fn truncate_to(&mut self, max: usize) -> Result<(), AgentError> {
        if self.entries.len() > max {
            self.entries.drain(..self.entries.len() - max);
            self.persist()?;
        }
        Ok(())
    }

    /// 清空内存中的日志并删除持久化文件
    pub fn clear(&mut self) -> Result<(), AgentError> {
        self.entries.clear();
        self.store.remove(&self.key)?;
        Ok(())
    }

    fn persist(&self) -> Result<(), AgentError> {
        self.store.save(&self.key, &self.entries)?;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLog")
            .field("key", &self.key)
            .field("entries", &self.entries.len())
            .finish()
    }
}
