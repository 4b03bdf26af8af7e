//! 执行循环（单任务状态机）
//!
//! THINKING -> ACTING -> REFLECTING -> THINKING ... 直到 DONE。
//! 解析失败与反思失败按重试预算处理（先查预算，再计数，再退避）；
//! 决策源/运行时的故障不在循环内重试，直接以 Err 返回给调用方。
//! 每次状态转移都向 NotificationSink 发一条进度记录；停止信号在每次 THINKING 与派发前检查。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::DecisionSource;
use crate::memory::{MemoryLog, MemoryStore, Role};
use crate::react::budget::{BudgetDecision, ExhaustionKind, RetryPolicy, RetryState};
use crate::react::events::{NotificationSink, ProgressRecord, ProgressStatus};
use crate::react::parser::{Action, ActionParser, ToolInvocation, FINISH};
use crate::react::prompt::think_prompt;
use crate::react::reflection::{OutcomeReflector, Reflector};
use crate::runtime::{ActionContext, ActionResult, RuntimeAdapter};
use crate::task::Task;

/// 自动完成或 finish 动作的评语
pub const FINISH_COMMENTS: &str = "Task Success !";

const PARSE_FAILURE: &str = "no valid action parsed from decision";

static OUTCOME_REFLECTOR: OutcomeReflector = OutcomeReflector;

/// 成功结束：finish 消息（或主工具输出）与记忆摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishResult {
    pub content: String,
    pub memorized: String,
    pub comments: String,
}

/// 预算耗尽
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureResult {
    pub reason: String,
    pub kind: ExhaustionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Finished(FinishResult),
    Failed(FailureResult),
    Stopped,
}

/// 一次 run 的终态与本次产生的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopRun {
    pub outcome: TaskOutcome,
    pub generated_files: Vec<String>,
}

enum LoopState {
    Thinking,
    Acting(String),
    Reflecting(ToolInvocation, ActionResult),
    Done(TaskOutcome),
}

/// 记忆日志的存储 key：会话 id + 任务 id
pub fn memory_key(conversation_id: &str, task_id: &str) -> String {
    if conversation_id.is_empty() {
        format!("task-{}", task_id)
    } else {
        format!("{}-task-{}", conversation_id, task_id)
    }
}

/// 单任务执行循环的依赖与配置（构建器风格，按引用持有协作者）
pub struct ExecutionLoop<'a> {
    decision: &'a dyn DecisionSource,
    runtime: &'a dyn RuntimeAdapter,
    reflector: &'a dyn Reflector,
    sink: Option<&'a dyn NotificationSink>,
    cancel_token: CancellationToken,
    policy: RetryPolicy,
    conversation_id: String,
    /// 上一次失败留下的反馈，只进入首轮 prompt
    feedback: Option<String>,
    /// 之前任务已生成的文件，只进入首轮 prompt
    prior_files: Vec<String>,
    /// 加载后记忆日志只保留最近的条数
    memory_window: Option<usize>,
}

impl<'a> ExecutionLoop<'a> {
    pub fn new(
        decision: &'a dyn DecisionSource,
        runtime: &'a dyn RuntimeAdapter,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            decision,
            runtime,
            reflector: &OUTCOME_REFLECTOR,
            sink: None,
            cancel_token,
            policy: RetryPolicy::default(),
            conversation_id: String::new(),
            feedback: None,
            prior_files: Vec::new(),
            memory_window: None,
        }
    }

    pub fn with_reflector(mut self, reflector: &'a dyn Reflector) -> Self {
        self.reflector = reflector;
        self
    }

    pub fn with_sink(mut self, sink: &'a dyn NotificationSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn with_prior_files(mut self, files: Vec<String>) -> Self {
        self.prior_files = files;
        self
    }

    pub fn with_memory_window(mut self, window: Option<usize>) -> Self {
        self.memory_window = window;
        self
    }

    /// 按任务 id 加载（或新建）记忆日志后执行；设置了近期上限时先截断
    pub async fn run(
        &self,
        task: &Task,
        store: Arc<dyn MemoryStore>,
    ) -> Result<LoopRun, AgentError> {
        let mut memory = MemoryLog::load(store, memory_key(&self.conversation_id, &task.id))?;
        if let Some(window) = self.memory_window {
            memory.truncate_to(window)?;
        }
        self.run_with_memory(task, &mut memory).await
    }

    pub async fn run_with_memory(
        &self,
        task: &Task,
        memory: &mut MemoryLog,
    ) -> Result<LoopRun, AgentError> {
        let parser = ActionParser::new(self.runtime.supported_tools());
        let primary = task.primary_tool();
        let ctx = ActionContext::new(self.conversation_id.clone());
        let mut retry = RetryState::new();
        let mut generated_files: Vec<String> = Vec::new();
        let mut first_think = true;
        let mut state = LoopState::Thinking;

        tracing::info!(task_id = %task.id, primary = ?primary, "execution loop started");

        let outcome = loop {
            state = match state {
                LoopState::Thinking => {
                    if self.cancel_token.is_cancelled() {
                        LoopState::Done(TaskOutcome::Stopped)
                    } else {
                        let decision = self
                            .think(task, memory, first_think, &generated_files)
                            .await?;
                        first_think = false;
                        LoopState::Acting(decision)
                    }
                }
                LoopState::Acting(decision) => match parser.parse(&decision) {
                    None => {
                        tracing::warn!(
                            task_id = %task.id,
                            consecutive = retry.consecutive(),
                            total = retry.total(),
                            "decision has no parsable action"
                        );
                        self.emit(ProgressRecord::new(
                            ProgressStatus::Running,
                            &task.id,
                            "parse_failure",
                            PARSE_FAILURE,
                        ));
                        match retry.record_failure(&self.policy, Some(PARSE_FAILURE)) {
                            BudgetDecision::Exhausted(ex) => {
                                LoopState::Done(TaskOutcome::Failed(FailureResult {
                                    reason: ex.reason(),
                                    kind: ex.kind,
                                }))
                            }
                            BudgetDecision::Continue => self.backoff().await,
                        }
                    }
                    Some(Action::Finish { message }) => {
                        LoopState::Done(TaskOutcome::Finished(FinishResult {
                            content: message,
                            memorized: memory.memorized_digest(),
                            comments: FINISH_COMMENTS.to_string(),
                        }))
                    }
                    Some(Action::Tool(invocation)) => {
                        if self.cancel_token.is_cancelled() {
                            LoopState::Done(TaskOutcome::Stopped)
                        } else {
                            self.emit(ProgressRecord::new(
                                ProgressStatus::Running,
                                &task.id,
                                &invocation.name,
                                invocation.params_json().to_string(),
                            ));
                            let result = self
                                .runtime
                                .execute_action(&invocation, &ctx, &task.id)
                                .await?;
                            if let Some(path) = result.filepath() {
                                generated_files.push(path.to_string());
                            }
                            LoopState::Reflecting(invocation, result)
                        }
                    }
                },
                LoopState::Reflecting(invocation, result) => {
                    let reflection = self.reflector.reflect(&task.description, &result).await?;
                    let verdict = if reflection.is_success() { "success" } else { "failure" };
                    self.emit(
                        ProgressRecord::new(
                            ProgressStatus::Running,
                            &task.id,
                            "reflection",
                            &reflection.comments,
                        )
                        .with_comments(verdict),
                    );
                    if reflection.is_success() {
                        retry.record_success();
                        if primary == Some(invocation.name.as_str()) {
                            tracing::info!(
                                task_id = %task.id,
                                tool = %invocation.name,
                                "primary tool succeeded, finishing task"
                            );
                            LoopState::Done(TaskOutcome::Finished(FinishResult {
                                content: result.content().unwrap_or(reflection.comments),
                                memorized: memory.memorized_digest(),
                                comments: FINISH_COMMENTS.to_string(),
                            }))
                        } else {
                            memory.append(Role::User, &reflection.comments, "observation", true)?;
                            LoopState::Thinking
                        }
                    } else {
                        match retry.record_failure(&self.policy, Some(&reflection.comments)) {
                            BudgetDecision::Exhausted(ex) => {
                                LoopState::Done(TaskOutcome::Failed(FailureResult {
                                    reason: ex.reason(),
                                    kind: ex.kind,
                                }))
                            }
                            BudgetDecision::Continue => {
                                memory.append(
                                    Role::User,
                                    &reflection.comments,
                                    "reflection",
                                    true,
                                )?;
                                self.backoff().await
                            }
                        }
                    }
                }
                LoopState::Done(outcome) => break outcome,
            };
        };

        self.emit_terminal(&task.id, &outcome);
        tracing::info!(
            task_id = %task.id,
            outcome = outcome_label(&outcome),
            consecutive = retry.consecutive(),
            total = retry.total(),
            "execution loop finished"
        );
        Ok(LoopRun {
            outcome,
            generated_files,
        })
    }

    /// 首轮且日志末尾是 assistant 时复用该决策；否则空日志发初始 prompt，非空日志发空 prompt 续写
    async fn think(
        &self,
        task: &Task,
        memory: &mut MemoryLog,
        first_think: bool,
        generated_files: &[String],
    ) -> Result<String, AgentError> {
        if first_think {
            if let Some(last) = memory.last().filter(|e| e.role == Role::Assistant) {
                tracing::info!(task_id = %task.id, "resuming from the last assistant entry");
                let decision = last.content.clone();
                self.emit(
                    ProgressRecord::new(ProgressStatus::Running, &task.id, "thinking", &decision)
                        .memorized(true),
                );
                return Ok(decision);
            }
        }

        let prompt = if memory.is_empty() {
            let mut files = self.prior_files.clone();
            files.extend(generated_files.iter().cloned());
            think_prompt(
                &task.description,
                &self.runtime.tool_catalogue(),
                task.primary_tool(),
                self.feedback.as_deref(),
                &files,
            )
        } else {
            String::new()
        };

        let history = memory.history();
        let decision = self
            .decision
            .decide(&prompt, &history)
            .await
            .map_err(AgentError::Decision)?;
        tracing::debug!(task_id = %task.id, decision = %decision, "decision received");

        if !prompt.is_empty() {
            memory.append(Role::User, &prompt, "thinking", true)?;
        }
        memory.append(Role::Assistant, &decision, "thinking", true)?;
        self.emit(
            ProgressRecord::new(ProgressStatus::Running, &task.id, "thinking", &decision)
                .memorized(true),
        );
        Ok(decision)
    }

    /// 固定退避；期间收到停止信号立即结束
    async fn backoff(&self) -> LoopState {
        if self.policy.backoff.is_zero() {
            return LoopState::Thinking;
        }
        tokio::select! {
            _ = self.cancel_token.cancelled() => LoopState::Done(TaskOutcome::Stopped),
            _ = tokio::time::sleep(self.policy.backoff) => LoopState::Thinking,
        }
    }

    fn emit(&self, record: ProgressRecord) {
        if let Some(sink) = self.sink {
            sink.emit(&record);
        }
    }

    fn emit_terminal(&self, task_id: &str, outcome: &TaskOutcome) {
        let record = match outcome {
            TaskOutcome::Finished(done) => {
                ProgressRecord::new(ProgressStatus::Success, task_id, FINISH, &done.content)
                    .with_comments(&done.comments)
                    .memorized(true)
            }
            TaskOutcome::Failed(failed) => {
                ProgressRecord::new(ProgressStatus::Failure, task_id, "failure", &failed.reason)
            }
            TaskOutcome::Stopped => {
                ProgressRecord::new(ProgressStatus::Stopped, task_id, "stop", "stopped by user")
            }
        };
        self.emit(record);
    }
}

fn outcome_label(outcome: &TaskOutcome) -> &'static str {
    match outcome {
        TaskOutcome::Finished(_) => "finished",
        TaskOutcome::Failed(_) => "failed",
        TaskOutcome::Stopped => "stopped",
    }
}
