//! 决策源抽象
//!
//! 执行循环每轮 THINKING 调用一次 decide：prompt 为空表示纯续写（history 非空时必须可用）。
//! 返回 Err 视为基础设施故障，循环不会重试。

use async_trait::async_trait;

use crate::memory::Message;

#[async_trait]
pub trait DecisionSource: Send + Sync {
    /// 根据新 prompt（可为空）与有序历史给出决策文本
    async fn decide(&self, prompt: &str, history: &[Message]) -> Result<String, String>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 历史 + 非空 prompt 拼成一次请求的消息列表
pub fn request_messages(prompt: &str, history: &[Message]) -> Vec<Message> {
    let mut messages = history.to_vec();
    if !prompt.is_empty() {
        messages.push(Message::user(prompt));
    }
    messages
}
