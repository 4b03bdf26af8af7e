//! 运行时适配器：执行工具动作并返回 ActionResult
//!
//! 适配器必须在派发前校验动作类型属于自己声明的工具集合，否则直接返回 RuntimeError（不执行）。
//! 工具自身的失败通过 ActionResult::failure 表达，交由反思步骤处理。

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::RuntimeError;
use crate::react::ToolInvocation;
use crate::tools::ToolSpec;

pub use local::LocalRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failure,
}

/// 一次动作执行的结果；error 仅在 Failure 时存在
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn success(meta: Map<String, Value>) -> Self {
        Self {
            status: ActionStatus::Success,
            meta,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failure,
            meta: Map::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }

    /// meta.content：字符串原样返回，其它 JSON 值序列化为文本
    pub fn content(&self) -> Option<String> {
        self.meta.get("content").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn filepath(&self) -> Option<&str> {
        self.meta.get("filepath").and_then(|v| v.as_str())
    }
}

/// 派发动作时附带的上下文
#[derive(Debug, Clone, Default)]
pub struct ActionContext {
    pub conversation_id: String,
}

impl ActionContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
        }
    }
}

#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// 支持的工具目录（名称、描述、参数 schema）
    fn tool_catalogue(&self) -> Vec<ToolSpec>;

    fn supported_tools(&self) -> Vec<String> {
        self.tool_catalogue().into_iter().map(|t| t.name).collect()
    }

    async fn execute_action(
        &self,
        action: &ToolInvocation,
        ctx: &ActionContext,
        task_id: &str,
    ) -> Result<ActionResult, RuntimeError>;
}
