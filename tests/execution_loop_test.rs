//! 执行循环与任务执行器集成测试（脚本化决策源 + 假运行时）

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use codeact::config::AppConfig;
use codeact::core::{AgentError, RuntimeError};
use codeact::llm::{DecisionSource, ScriptedDecisionSource};
use codeact::memory::{InMemoryStore, MemoryLog, MemoryStore, Message, Role};
use codeact::react::{
    memory_key, ChannelSink, ExecutionLoop, ExhaustionKind, ProgressStatus, RetryPolicy,
    TaskOutcome, ToolInvocation,
};
use codeact::runtime::{ActionContext, ActionResult, RuntimeAdapter};
use codeact::task::{Task, TaskManager, TaskStatus};
use codeact::tools::ToolSpec;
use codeact::{RunStatus, TaskRunner};
use serde_json::{json, Map};
use tokio_util::sync::CancellationToken;

struct FakeRuntime {
    script: Mutex<VecDeque<Result<ActionResult, RuntimeError>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRuntime {
    fn new(script: Vec<Result<ActionResult, RuntimeError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RuntimeAdapter for FakeRuntime {
    fn tool_catalogue(&self) -> Vec<ToolSpec> {
        ["write_code", "terminal_run"]
            .iter()
            .map(|name| ToolSpec {
                name: name.to_string(),
                description: format!("{} tool", name),
                parameters: json!({"type": "object", "properties": {}}),
            })
            .collect()
    }

    async fn execute_action(
        &self,
        action: &ToolInvocation,
        _ctx: &ActionContext,
        _task_id: &str,
    ) -> Result<ActionResult, RuntimeError> {
        self.calls.lock().unwrap().push(action.name.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ActionResult::failure("no scripted result")))
    }
}

/// 被调用时触发停止信号，随后返回一个工具动作
struct StoppingSource {
    token: CancellationToken,
}

#[async_trait]
impl DecisionSource for StoppingSource {
    async fn decide(&self, _prompt: &str, _history: &[Message]) -> Result<String, String> {
        self.token.cancel();
        Ok("<terminal_run><command>ls</command></terminal_run>".to_string())
    }
}

fn ok(content: &str) -> Result<ActionResult, RuntimeError> {
    let mut meta = Map::new();
    meta.insert("content".into(), json!(content));
    Ok(ActionResult::success(meta))
}

fn failed(error: &str) -> Result<ActionResult, RuntimeError> {
    Ok(ActionResult::failure(error))
}

fn policy(max_consecutive: u32, max_total: u32) -> RetryPolicy {
    RetryPolicy {
        max_consecutive,
        max_total,
        backoff: Duration::ZERO,
    }
}

fn task(id: &str, tools: &[&str]) -> Task {
    Task::new(id, "produce report.md", tools.iter().map(|t| t.to_string()).collect())
}

fn memory() -> MemoryLog {
    MemoryLog::load(Arc::new(InMemoryStore::new()), "test").unwrap()
}

#[tokio::test]
async fn unparsable_output_exhausts_consecutive_budget() {
    let decision = ScriptedDecisionSource::repeating("I think I should run ls");
    let runtime = FakeRuntime::new(vec![]);
    let mut log = memory();

    let run = ExecutionLoop::new(&decision, &runtime, CancellationToken::new())
        .with_policy(policy(3, 10))
        .run_with_memory(&task("1", &["write_code"]), &mut log)
        .await
        .unwrap();

    let TaskOutcome::Failed(failure) = run.outcome else {
        panic!("expected failure");
    };
    assert_eq!(failure.kind, ExhaustionKind::Consecutive);
    assert!(failure.reason.contains("consecutive"));
    // 首次决策 + 3 次重试
    assert_eq!(decision.call_count(), 4);
    assert_eq!(runtime.call_count(), 0);
}

#[tokio::test]
async fn finish_on_first_decision_skips_runtime() {
    let decision = ScriptedDecisionSource::new(["<finish><message>done</message></finish>"]);
    let runtime = FakeRuntime::new(vec![]);
    let mut log = memory();

    let run = ExecutionLoop::new(&decision, &runtime, CancellationToken::new())
        .with_policy(policy(3, 10))
        .run_with_memory(&task("1", &["write_code"]), &mut log)
        .await
        .unwrap();

    let TaskOutcome::Finished(done) = run.outcome else {
        panic!("expected finish");
    };
    assert_eq!(done.content, "done");
    assert!(done.memorized.starts_with("THINKING: ## Task"));
    assert_eq!(decision.call_count(), 1);
    assert_eq!(runtime.call_count(), 0);

    let first = &decision.calls()[0];
    assert!(first.prompt.contains("produce report.md"));
    assert_eq!(first.history_len, 0);
}

#[tokio::test]
async fn primary_tool_success_auto_finishes() {
    let decision = ScriptedDecisionSource::new([
        "<write_code><path>report.md</path><content># report</content></write_code>",
    ]);
    let runtime = FakeRuntime::new(vec![ok("# report")]);
    let mut log = memory();

    let run = ExecutionLoop::new(&decision, &runtime, CancellationToken::new())
        .with_policy(policy(3, 10))
        .run_with_memory(&task("1", &["write_code", "terminal_run"]), &mut log)
        .await
        .unwrap();

    assert!(matches!(run.outcome, TaskOutcome::Finished(ref f) if f.content == "# report"));
    assert_eq!(decision.call_count(), 1);
    assert_eq!(runtime.call_count(), 1);
}

#[tokio::test]
async fn task_without_tools_never_auto_finishes() {
    let decision = ScriptedDecisionSource::new([
        "<terminal_run><command>ls</command></terminal_run>",
        "<finish><message>listed</message></finish>",
    ]);
    let runtime = FakeRuntime::new(vec![ok("a.txt")]);
    let mut log = memory();

    let run = ExecutionLoop::new(&decision, &runtime, CancellationToken::new())
        .with_policy(policy(3, 10))
        .run_with_memory(&task("1", &[]), &mut log)
        .await
        .unwrap();

    assert!(matches!(run.outcome, TaskOutcome::Finished(ref f) if f.content == "listed"));
    assert_eq!(decision.call_count(), 2);
}

#[tokio::test]
async fn runtime_fault_propagates_out_of_the_loop() {
    let decision =
        ScriptedDecisionSource::new(["<terminal_run><command>ls</command></terminal_run>"]);
    let runtime = FakeRuntime::new(vec![Err(RuntimeError::InvalidAction(
        "disk on fire".to_string(),
    ))]);
    let mut log = memory();

    let err = ExecutionLoop::new(&decision, &runtime, CancellationToken::new())
        .with_policy(policy(3, 10))
        .run_with_memory(&task("1", &["write_code"]), &mut log)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AgentError::Runtime(RuntimeError::InvalidAction(ref m)) if m == "disk on fire"
    ));
    assert_eq!(decision.call_count(), 1);
}

#[tokio::test]
async fn decision_fault_propagates_out_of_the_loop() {
    let decision = ScriptedDecisionSource::with_results([Err("rate limited".to_string())]);
    let runtime = FakeRuntime::new(vec![]);
    let mut log = memory();

    let err = ExecutionLoop::new(&decision, &runtime, CancellationToken::new())
        .run_with_memory(&task("1", &["write_code"]), &mut log)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Decision(ref m) if m == "rate limited"));
}

#[tokio::test]
async fn resume_reuses_trailing_assistant_entry() {
    let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let t = task("7", &["write_code"]);
    {
        let mut seeded = MemoryLog::load(store.clone(), memory_key("conv", &t.id)).unwrap();
        seeded.append(Role::User, "initial prompt", "thinking", true).unwrap();
        seeded
            .append(
                Role::Assistant,
                "<finish><message>resumed</message></finish>",
                "thinking",
                true,
            )
            .unwrap();
    }

    let decision = ScriptedDecisionSource::new(["<finish><message>fresh</message></finish>"]);
    let runtime = FakeRuntime::new(vec![]);
    let run = ExecutionLoop::new(&decision, &runtime, CancellationToken::new())
        .with_conversation("conv")
        .run(&t, store)
        .await
        .unwrap();

    assert!(matches!(run.outcome, TaskOutcome::Finished(ref f) if f.content == "resumed"));
    assert_eq!(decision.call_count(), 0);
}

#[tokio::test]
async fn resume_guard_only_applies_to_first_thinking() {
    // 首轮复用的决策无法解析时，第二轮必须重新询问决策源
    let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
    let t = task("8", &["write_code"]);
    {
        let mut seeded = MemoryLog::load(store.clone(), memory_key("", &t.id)).unwrap();
        seeded.append(Role::Assistant, "not an action", "thinking", true).unwrap();
    }

    let decision = ScriptedDecisionSource::new(["<finish><message>ok</message></finish>"]);
    let runtime = FakeRuntime::new(vec![]);
    let run = ExecutionLoop::new(&decision, &runtime, CancellationToken::new())
        .with_policy(policy(3, 10))
        .run(&t, store)
        .await
        .unwrap();

    assert!(matches!(run.outcome, TaskOutcome::Finished(ref f) if f.content == "ok"));
    assert_eq!(decision.call_count(), 1);
    assert!(decision.calls()[0].prompt.is_empty());
}

#[tokio::test]
async fn success_resets_consecutive_but_total_still_binds() {
    let decision =
        ScriptedDecisionSource::repeating("<terminal_run><command>make</command></terminal_run>");
    let runtime = FakeRuntime::new(vec![
        failed("e1"),
        ok("s1"),
        failed("e2"),
        ok("s2"),
        failed("e3"),
        ok("s3"),
        failed("e4"),
        ok("s4"),
        failed("e5"),
    ]);
    let (sink, mut rx) = ChannelSink::channel();
    let mut log = memory();

    let run = ExecutionLoop::new(&decision, &runtime, CancellationToken::new())
        .with_policy(policy(2, 4))
        .with_sink(&sink)
        .run_with_memory(&task("1", &["write_code"]), &mut log)
        .await
        .unwrap();

    let TaskOutcome::Failed(failure) = run.outcome else {
        panic!("expected failure");
    };
    assert_eq!(failure.kind, ExhaustionKind::Total);
    assert_eq!(failure.reason, "total limit reached (4): e5");
    assert_eq!(runtime.call_count(), 9);

    let mut records = Vec::new();
    while let Ok(r) = rx.try_recv() {
        records.push(r);
    }
    assert!(records.iter().all(|r| r.status != ProgressStatus::Success));
    assert_eq!(records.last().unwrap().status, ProgressStatus::Failure);
}

#[tokio::test]
async fn cancelled_token_stops_before_any_decision() {
    let decision = ScriptedDecisionSource::repeating("<finish><message>x</message></finish>");
    let runtime = FakeRuntime::new(vec![]);
    let token = CancellationToken::new();
    token.cancel();
    let mut log = memory();

    let run = ExecutionLoop::new(&decision, &runtime, token)
        .run_with_memory(&task("1", &["write_code"]), &mut log)
        .await
        .unwrap();
    assert_eq!(run.outcome, TaskOutcome::Stopped);
    assert_eq!(decision.call_count(), 0);
}

#[tokio::test]
async fn stop_during_decision_prevents_dispatch() {
    let token = CancellationToken::new();
    let decision = StoppingSource {
        token: token.clone(),
    };
    let runtime = FakeRuntime::new(vec![ok("never")]);
    let mut log = memory();

    let run = ExecutionLoop::new(&decision, &runtime, token)
        .run_with_memory(&task("1", &["terminal_run"]), &mut log)
        .await
        .unwrap();
    assert_eq!(run.outcome, TaskOutcome::Stopped);
    assert_eq!(runtime.call_count(), 0);
}

fn runner_config(dir: &std::path::Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.app.workspace_root = dir.join("workspace");
    cfg.app.data_dir = dir.join("data");
    cfg.agent.retry_backoff_ms = 0;
    cfg
}

#[tokio::test]
async fn runner_continues_after_budget_failure() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = runner_config(dir.path());
    let manager = Arc::new(TaskManager::open(dir.path().join("tasks.json")).await);
    manager
        .set_tasks(vec![task("1", &["write_code"]), task("2", &["write_code"])])
        .await
        .unwrap();

    let decision = Arc::new(ScriptedDecisionSource::new([
        "garbage",
        "garbage",
        "garbage",
        "garbage",
        "<finish><message>second done</message></finish>",
    ]));
    let runtime = Arc::new(FakeRuntime::new(vec![]));
    let (sink, mut rx) = ChannelSink::channel();

    let summary = TaskRunner::new(&cfg, "abcdef-1234", decision, runtime, manager.clone())
        .with_memory_store(Arc::new(InMemoryStore::new()))
        .with_sink(Arc::new(sink))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    let t1 = manager.task_by_id("1").await.unwrap();
    assert_eq!(t1.status, TaskStatus::Failed);
    assert!(t1.error.unwrap().contains("consecutive limit reached"));
    assert!(t1.result.is_none());
    let t2 = manager.task_by_id("2").await.unwrap();
    assert_eq!(t2.status, TaskStatus::Completed);
    assert_eq!(t2.result.unwrap().content, "second done");

    let todo = dir
        .path()
        .join("workspace")
        .join("Conversation_abcdef")
        .join("todo.md");
    assert_eq!(
        std::fs::read_to_string(&todo).unwrap(),
        "## TODO List\n- [x] produce report.md\n- [x] produce report.md\n"
    );
    assert_eq!(summary.generated_files, vec![todo.display().to_string()]);

    let mut terminal = Vec::new();
    while let Ok(r) = rx.try_recv() {
        if r.status != ProgressStatus::Running {
            terminal.push((r.task_id, r.status));
        }
    }
    assert_eq!(
        terminal,
        vec![
            ("1".to_string(), ProgressStatus::Failure),
            ("2".to_string(), ProgressStatus::Success)
        ]
    );
}

#[tokio::test]
async fn runner_halts_on_runtime_fault() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = runner_config(dir.path());
    let manager = Arc::new(TaskManager::open(dir.path().join("tasks.json")).await);
    manager
        .set_tasks(vec![task("1", &["terminal_run"]), task("2", &["write_code"])])
        .await
        .unwrap();

    let decision = Arc::new(ScriptedDecisionSource::repeating(
        "<terminal_run><command>ls</command></terminal_run>",
    ));
    let runtime = Arc::new(FakeRuntime::new(vec![Err(RuntimeError::InvalidAction(
        "disk on fire".to_string(),
    ))]));

    let summary = TaskRunner::new(&cfg, "conv", decision, runtime, manager.clone())
        .with_memory_store(Arc::new(InMemoryStore::new()))
        .run()
        .await
        .unwrap();

    let RunStatus::Aborted { task_id, error } = summary.status else {
        panic!("expected abort");
    };
    assert_eq!(task_id, "1");
    assert_eq!(error, "disk on fire");

    let t1 = manager.task_by_id("1").await.unwrap();
    assert_eq!(t1.status, TaskStatus::Failed);
    assert_eq!(t1.error.as_deref(), Some("disk on fire"));
    assert_eq!(manager.task_by_id("2").await.unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn runner_stop_leaves_task_pending() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = runner_config(dir.path());
    cfg.agent.write_todo = false;
    let manager = Arc::new(TaskManager::open(dir.path().join("tasks.json")).await);
    manager.set_tasks(vec![task("1", &["terminal_run"])]).await.unwrap();

    let token = CancellationToken::new();
    let decision = Arc::new(StoppingSource {
        token: token.clone(),
    });
    let runtime = Arc::new(FakeRuntime::new(vec![]));

    let summary = TaskRunner::new(&cfg, "conv", decision, runtime, manager.clone())
        .with_memory_store(Arc::new(InMemoryStore::new()))
        .with_cancel_token(token)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Stopped);
    assert!(summary.generated_files.is_empty());
    assert_eq!(manager.task_by_id("1").await.unwrap().status, TaskStatus::Pending);
}

#[tokio::test]
async fn runner_announces_task_and_replays_previous_error_as_feedback() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = runner_config(dir.path());
    cfg.agent.write_todo = false;
    let manager = Arc::new(TaskManager::open(dir.path().join("tasks.json")).await);
    let mut retried = task("1", &["write_code"]);
    retried.error = Some("report.md is missing a summary".to_string());
    manager.set_tasks(vec![retried]).await.unwrap();

    let decision = Arc::new(ScriptedDecisionSource::new([
        "<finish><message>summary added</message></finish>",
    ]));
    let runtime = Arc::new(FakeRuntime::new(vec![]));
    let (sink, mut rx) = ChannelSink::channel();

    let summary = TaskRunner::new(&cfg, "conv", decision.clone(), runtime, manager.clone())
        .with_memory_store(Arc::new(InMemoryStore::new()))
        .with_sink(Arc::new(sink))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    let prompt = &decision.calls()[0].prompt;
    assert!(prompt.contains("report.md is missing a summary"));
    let t1 = manager.task_by_id("1").await.unwrap();
    assert_eq!(t1.status, TaskStatus::Completed);
    assert!(t1.error.is_none());

    let first = rx.try_recv().unwrap();
    assert_eq!(first.status, ProgressStatus::Running);
    assert_eq!(first.action_type, "task");
    assert_eq!(first.task_id, "1");
    assert_eq!(first.content, "produce report.md");
}

#[tokio::test]
async fn runner_records_raw_decision_fault_text() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = runner_config(dir.path());
    cfg.agent.write_todo = false;
    let manager = Arc::new(TaskManager::open(dir.path().join("tasks.json")).await);
    manager.set_tasks(vec![task("1", &["write_code"])]).await.unwrap();

    let decision = Arc::new(ScriptedDecisionSource::with_results([Err(
        "upstream timed out".to_string(),
    )]));
    let runtime = Arc::new(FakeRuntime::new(vec![]));

    let summary = TaskRunner::new(&cfg, "conv", decision, runtime, manager.clone())
        .with_memory_store(Arc::new(InMemoryStore::new()))
        .run()
        .await
        .unwrap();

    assert_eq!(
        summary.status,
        RunStatus::Aborted {
            task_id: "1".to_string(),
            error: "upstream timed out".to_string()
        }
    );
    let t1 = manager.task_by_id("1").await.unwrap();
    assert_eq!(t1.error.as_deref(), Some("upstream timed out"));
}
