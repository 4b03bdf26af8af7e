//! 错误类型
//!
//! 执行循环只把「基础设施故障」作为 Err 向上抛出（决策源调用失败、运行时拒绝派发、持久化失败）；
//! 解析失败与反思失败属于逻辑失败，在循环内按重试预算处理，不会出现在这里。

use thiserror::Error;

/// 运行时适配器在派发前的校验错误（fail fast，不执行工具）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Unsupported tool: {0}")]
    UnsupportedTool(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),
}

/// Agent 运行过程中的硬故障
#[derive(Error, Debug)]
pub enum AgentError {
    /// 决策源（LLM）调用失败
    #[error("Decision source error: {0}")]
    Decision(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// 记忆日志 / 任务列表读写失败
    #[error("Persistence error: {0}")]
    Persistence(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 去掉分类前缀的原始错误文本（任务列表里记录的就是它）
    pub fn raw_message(&self) -> String {
        match self {
            AgentError::Decision(msg) | AgentError::Config(msg) => msg.clone(),
            AgentError::Runtime(RuntimeError::UnsupportedTool(msg))
            | AgentError::Runtime(RuntimeError::InvalidAction(msg)) => msg.clone(),
            AgentError::Persistence(e) => e.to_string(),
            AgentError::Serialization(e) => e.to_string(),
        }
    }
}
