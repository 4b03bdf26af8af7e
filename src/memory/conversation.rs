//! 记忆条目模型
//!
//! Message 是交给决策源的 {role, content} 投影；MemoryEntry 是记忆日志里落盘的完整记录
//! （附带动作标签、是否计入总结、时间戳），追加后不可变。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// 记忆日志中的一条记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: Role,
    pub content: String,
    /// 自由标签，如 thinking / reflection / observation
    #[serde(default)]
    pub action_type: String,
    /// 是否计入任务最终的 memorized 总结
    #[serde(default)]
    pub memorized: bool,
    pub timestamp: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(
        role: Role,
        content: impl Into<String>,
        action_type: impl Into<String>,
        memorized: bool,
    ) -> Self {
        Self {
            role,
            content: content.into(),
            action_type: action_type.into(),
            memorized,
            timestamp: Utc::now(),
        }
    }

    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}
