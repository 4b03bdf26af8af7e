//! LLM 层：决策源抽象与实现（OpenAI 兼容 / 脚本化 Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{DecisionCall, ScriptedDecisionSource};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{request_messages, DecisionSource};
