//! 任务模型

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// completed / failed 不再执行
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// 完成时写入：产出内容 + 记忆摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub content: String,
    #[serde(default)]
    pub memorized: String,
}

/// 一个任务；由规划方创建，只通过 TaskManager 的状态转移修改，从不删除
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    #[serde(alias = "requirement")]
    pub description: String,
    /// 规划方授权的工具；第一个为主工具
    #[serde(default, alias = "required_tools")]
    pub tools: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>, tools: Vec<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            tools,
            status: TaskStatus::Pending,
            result: None,
            error: None,
        }
    }

    /// 主工具：成功一次即视为任务完成；无工具时为 None（不会自动完成）
    pub fn primary_tool(&self) -> Option<&str> {
        self.tools.first().map(String::as_str)
    }
}

/// 规划方常输出数字 id，统一转为字符串
fn id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "task id must be a string or number, got {}",
            other
        ))),
    }
}

/// 状态转移附带的数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskUpdate {
    None,
    Result(TaskResult),
    Error(String),
}

/// 进度统计；percent = completed / total * 100
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub percent: f64,
}
