//! 脚本化决策源（用于测试，无需 API）
//!
//! 按顺序返回预设回复；脚本用完后重复最后一条。记录每次调用收到的 prompt 与历史长度。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::DecisionSource;
use crate::memory::Message;

/// 一次 decide 调用的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionCall {
    pub prompt: String,
    pub history_len: usize,
}

#[derive(Debug, Default)]
pub struct ScriptedDecisionSource {
    script: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Option<Result<String, String>>>,
    calls: Mutex<Vec<DecisionCall>>,
}

impl ScriptedDecisionSource {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    /// 允许脚本中混入 Err，用于模拟决策源故障
    pub fn with_results(results: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(results.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 永远返回同一段文本
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self::new([reply.into()])
    }

    pub fn calls(&self) -> Vec<DecisionCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl DecisionSource for ScriptedDecisionSource {
    async fn decide(&self, prompt: &str, history: &[Message]) -> Result<String, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(DecisionCall {
                prompt: prompt.to_string(),
                history_len: history.len(),
            });
        }
        let next = self
            .script
            .lock()
            .map_err(|_| "script poisoned".to_string())?
            .pop_front();
        let mut last = self.last.lock().map_err(|_| "script poisoned".to_string())?;
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err("decision script is empty".to_string())),
        }
    }
}
