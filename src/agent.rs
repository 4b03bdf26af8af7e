//! 任务执行器
//!
//! 按规划顺序逐个执行未结束的任务（同一时刻只有一个任务在跑）：
//! - 每个任务开始前检查停止信号，标记 running 后交给执行循环；
//!   任务上次留下的 error 作为反馈进入首轮 prompt；
//! - 完成写 completed（内容 + 记忆摘要），预算耗尽写 failed 并继续下一个；
//! - 循环中途停止时任务退回 pending，整次运行返回 Stopped；
//! - 决策源/运行时故障写 failed（原始错误文本）并停止后续任务。

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::DecisionSource;
use crate::memory::{JsonFileStore, MemoryStore};
use crate::react::{
    ExecutionLoop, LlmReflector, NotificationSink, OutcomeReflector, ProgressRecord,
    ProgressStatus, Reflector, RetryPolicy, TaskOutcome, TracingSink,
};
use crate::runtime::local::conversation_dir;
use crate::runtime::RuntimeAdapter;
use crate::task::{TaskManager, TaskResult, TaskStatus, TaskUpdate};

/// 整次运行的结束方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunStatus {
    /// 所有任务都走到了终态（completed 或 failed）
    Completed,
    /// 收到停止信号
    Stopped,
    /// 基础设施故障，后续任务未执行
    Aborted { task_id: String, error: String },
}

/// 单个任务在本次运行中的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub results: Vec<TaskReport>,
    pub generated_files: Vec<String>,
}

pub struct TaskRunner {
    conversation_id: String,
    workspace_root: PathBuf,
    write_todo: bool,
    memory_window: Option<usize>,
    decision: Arc<dyn DecisionSource>,
    runtime: Arc<dyn RuntimeAdapter>,
    reflector: Arc<dyn Reflector>,
    memory_store: Arc<dyn MemoryStore>,
    tasks: Arc<TaskManager>,
    sink: Arc<dyn NotificationSink>,
    cancel_token: CancellationToken,
    policy: RetryPolicy,
}

impl TaskRunner {
    /// 按配置组装：记忆存于 data/memory，反思方式由 agent.llm_reflection 决定
    pub fn new(
        config: &AppConfig,
        conversation_id: impl Into<String>,
        decision: Arc<dyn DecisionSource>,
        runtime: Arc<dyn RuntimeAdapter>,
        tasks: Arc<TaskManager>,
    ) -> Self {
        let reflector: Arc<dyn Reflector> = if config.agent.llm_reflection {
            Arc::new(LlmReflector::new(decision.clone()))
        } else {
            Arc::new(OutcomeReflector)
        };
        Self {
            conversation_id: conversation_id.into(),
            workspace_root: config.app.workspace_root.clone(),
            write_todo: config.agent.write_todo,
            memory_window: config.agent.memory_window(),
            decision,
            runtime,
            reflector,
            memory_store: Arc::new(JsonFileStore::new(config.app.memory_dir())),
            tasks,
            sink: Arc::new(TracingSink),
            cancel_token: CancellationToken::new(),
            policy: RetryPolicy::from_config(&config.agent),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory_store = store;
        self
    }

    pub fn with_reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.reflector = reflector;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub async fn run(&self) -> Result<RunSummary, AgentError> {
        let mut results = Vec::new();
        let mut generated_files = Vec::new();
        self.write_todo(&mut generated_files).await;

        for task in self.tasks.tasks().await {
            if task.status.is_terminal() {
                continue;
            }
            if self.cancel_token.is_cancelled() {
                tracing::info!(task_id = %task.id, "stop requested before task start");
                self.sink.emit(&ProgressRecord::new(
                    ProgressStatus::Stopped,
                    &task.id,
                    "stop",
                    "stopped by user",
                ));
                return Ok(RunSummary {
                    status: RunStatus::Stopped,
                    results,
                    generated_files,
                });
            }

            self.tasks
                .update_task_status(&task.id, TaskStatus::Running, TaskUpdate::None)
                .await?;
            tracing::info!(task_id = %task.id, requirement = %task.description, "executing task");
            self.sink.emit(&ProgressRecord::new(
                ProgressStatus::Running,
                &task.id,
                "task",
                &task.description,
            ));

            let mut execution = ExecutionLoop::new(
                self.decision.as_ref(),
                self.runtime.as_ref(),
                self.cancel_token.clone(),
            )
            .with_reflector(self.reflector.as_ref())
            .with_sink(self.sink.as_ref())
            .with_policy(self.policy.clone())
            .with_conversation(&self.conversation_id)
            .with_memory_window(self.memory_window)
            .with_prior_files(generated_files.clone());
            if let Some(feedback) = task.error.as_deref() {
                execution = execution.with_feedback(feedback);
            }

            let run = match execution.run(&task, self.memory_store.clone()).await {
                Ok(run) => run,
                Err(e) => {
                    let error = e.raw_message();
                    tracing::error!(task_id = %task.id, error = %e, "task aborted by fault");
                    self.tasks
                        .update_task_status(
                            &task.id,
                            TaskStatus::Failed,
                            TaskUpdate::Error(error.clone()),
                        )
                        .await?;
                    self.sink.emit(&ProgressRecord::new(
                        ProgressStatus::Failure,
                        &task.id,
                        "error",
                        &error,
                    ));
                    results.push(TaskReport {
                        task_id: task.id.clone(),
                        status: TaskStatus::Failed,
                        content: None,
                        error: Some(error.clone()),
                    });
                    return Ok(RunSummary {
                        status: RunStatus::Aborted {
                            task_id: task.id,
                            error,
                        },
                        results,
                        generated_files,
                    });
                }
            };
            push_unique(&mut generated_files, run.generated_files);

            match run.outcome {
                TaskOutcome::Finished(done) => {
                    self.tasks
                        .update_task_status(
                            &task.id,
                            TaskStatus::Completed,
                            TaskUpdate::Result(TaskResult {
                                content: done.content.clone(),
                                memorized: done.memorized,
                            }),
                        )
                        .await?;
                    results.push(TaskReport {
                        task_id: task.id.clone(),
                        status: TaskStatus::Completed,
                        content: Some(done.content),
                        error: None,
                    });
                    self.write_todo(&mut generated_files).await;
                }
                TaskOutcome::Failed(failed) => {
                    tracing::warn!(task_id = %task.id, reason = %failed.reason, "task exhausted its retry budget");
                    self.tasks
                        .update_task_status(
                            &task.id,
                            TaskStatus::Failed,
                            TaskUpdate::Error(failed.reason.clone()),
                        )
                        .await?;
                    results.push(TaskReport {
                        task_id: task.id.clone(),
                        status: TaskStatus::Failed,
                        content: None,
                        error: Some(failed.reason),
                    });
                }
                TaskOutcome::Stopped => {
                    self.tasks
                        .update_task_status(&task.id, TaskStatus::Pending, TaskUpdate::None)
                        .await?;
                    return Ok(RunSummary {
                        status: RunStatus::Stopped,
                        results,
                        generated_files,
                    });
                }
            }
        }

        Ok(RunSummary {
            status: RunStatus::Completed,
            results,
            generated_files,
        })
    }

    /// 写 Conversation_<id>/todo.md；失败只记 warn
    async fn write_todo(&self, generated_files: &mut Vec<String>) {
        if !self.write_todo {
            return;
        }
        let dir = conversation_dir(&self.workspace_root, &self.conversation_id);
        let path = dir.join("todo.md");
        let markdown = self.tasks.todo_markdown().await;
        let written = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, markdown).await
        }
        .await;
        match written {
            Ok(()) => push_unique(generated_files, [path.display().to_string()]),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to write todo list")
            }
        }
    }
}

fn push_unique(files: &mut Vec<String>, new: impl IntoIterator<Item = String>) {
    for f in new {
        if !files.contains(&f) {
            files.push(f);
        }
    }
}
