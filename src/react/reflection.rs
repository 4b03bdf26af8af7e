//! 反思：把动作执行结果映射为成功/失败结论 + 评语
//!
//! 默认的 OutcomeReflector 是确定性映射，不调用外部服务；
//! LlmReflector 让模型对照需求评估结果，无法解析时退回确定性映射。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::DecisionSource;
use crate::react::{Action, ActionParser};
use crate::runtime::ActionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflection {
    pub verdict: Verdict,
    pub comments: String,
}

impl Reflection {
    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Success
    }
}

#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(
        &self,
        requirement: &str,
        result: &ActionResult,
    ) -> Result<Reflection, AgentError>;
}

/// 按结果状态直接映射：成功评语为 content（缺省为空串），失败评语为错误文本
#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeReflector;

impl OutcomeReflector {
    pub fn evaluate(result: &ActionResult) -> Reflection {
        if result.is_success() {
            Reflection {
                verdict: Verdict::Success,
                comments: result.content().unwrap_or_default(),
            }
        } else {
            Reflection {
                verdict: Verdict::Failure,
                comments: result.error.clone().unwrap_or_default(),
            }
        }
    }
}

#[async_trait]
impl Reflector for OutcomeReflector {
    async fn reflect(
        &self,
        _requirement: &str,
        result: &ActionResult,
    ) -> Result<Reflection, AgentError> {
        Ok(Self::evaluate(result))
    }
}

const DEFAULT_REFLECTION_TEMPLATE: &str = "\
You are reviewing the result of one step of an automated task.

Requirement:
{requirement}

Step status: {status}
Step output:
{output}

Decide whether the output satisfies the requirement. Answer with exactly one block:
<evaluation>
<status>success|failure|partial</status>
<comments>what is right or what must change</comments>
</evaluation>";

/// 基于模型的评估；partial 视为失败
pub struct LlmReflector {
    source: Arc<dyn DecisionSource>,
    /// 送入 prompt 的输出最大字符数
    max_output_chars: usize,
}

impl LlmReflector {
    pub fn new(source: Arc<dyn DecisionSource>) -> Self {
        Self {
            source,
            max_output_chars: 4000,
        }
    }

    fn prompt(&self, requirement: &str, result: &ActionResult) -> String {
        let (status, output) = if result.is_success() {
            ("success", result.content().unwrap_or_default())
        } else {
            ("failure", result.error.clone().unwrap_or_default())
        };
        let output: String = output.chars().take(self.max_output_chars).collect();
        DEFAULT_REFLECTION_TEMPLATE
            .replace("{requirement}", requirement)
            .replace("{status}", status)
            .replace("{output}", &output)
    }
}

/// 解析 `<evaluation>` 块；不是该块或状态未知时返回 None
fn parse_evaluation(text: &str) -> Option<Reflection> {
    let Some(Action::Tool(block)) = ActionParser::permissive().parse(text) else {
        return None;
    };
    if block.name != "evaluation" {
        return None;
    }
    let verdict = match block.params.get("status")?.to_lowercase().as_str() {
        "success" => Verdict::Success,
        "failure" | "partial" => Verdict::Failure,
        _ => return None,
    };
    Some(Reflection {
        verdict,
        comments: block.params.get("comments").cloned().unwrap_or_default(),
    })
}

#[async_trait]
impl Reflector for LlmReflector {
    async fn reflect(
        &self,
        requirement: &str,
        result: &ActionResult,
    ) -> Result<Reflection, AgentError> {
        let prompt = self.prompt(requirement, result);
        let reply = self
            .source
            .decide(&prompt, &[])
            .await
            .map_err(AgentError::Decision)?;
        match parse_evaluation(&reply) {
            Some(reflection) => Ok(reflection),
            None => {
                tracing::warn!("reflection reply is not an evaluation block, using result status");
                Ok(OutcomeReflector::evaluate(result))
            }
        }
    }
}
