//! CodeAct 命令行入口
//!
//! 初始化日志、加载配置与任务列表，按顺序执行任务并打印运行摘要；Ctrl+C 触发停止。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use codeact::config::load_config;
use codeact::core::ShutdownManager;
use codeact::llm::OpenAiClient;
use codeact::memory::sanitize_key;
use codeact::react::{FanoutSink, JsonlFileSink, TracingSink};
use codeact::runtime::LocalRuntime;
use codeact::task::{Task, TaskManager};
use codeact::{observability, RunStatus, TaskRunner};

#[derive(Parser, Debug)]
#[command(name = "codeact")]
#[command(about = "Drive planned tasks through a think / act / reflect loop", long_about = None)]
struct Args {
    /// JSON 任务列表（[{id, requirement, tools}]），会覆盖该会话已有任务
    #[arg(long, value_name = "FILE")]
    tasks: Option<PathBuf>,

    /// 会话 id；省略时新建
    #[arg(long)]
    conversation: Option<String>,

    /// 额外的 TOML 配置文件
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let args = Args::parse();

    let cfg = load_config(args.config).context("Failed to load config")?;
    let conversation_id = args
        .conversation
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let task_file = cfg
        .app
        .tasks_dir()
        .join(format!("{}.json", sanitize_key(&conversation_id)));
    let manager = Arc::new(TaskManager::open(&task_file).await);
    if let Some(path) = args.tasks {
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read task list {}", path.display()))?;
        let tasks: Vec<Task> =
            serde_json::from_str(&text).context("Task list must be a JSON array of tasks")?;
        manager.set_tasks(tasks).await.context("Failed to save task list")?;
    }
    if manager.tasks().await.is_empty() {
        bail!("No tasks for conversation {}; pass --tasks <file>", conversation_id);
    }

    let decision = Arc::new(OpenAiClient::from_config(&cfg.llm));
    let runtime = Arc::new(LocalRuntime::from_config(&cfg));
    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let sink = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(JsonlFileSink::new(cfg.app.messages_dir(), &conversation_id)));

    tracing::info!(conversation = %conversation_id, tasks = %task_file.display(), "run started");
    let runner = TaskRunner::new(&cfg, &conversation_id, decision, runtime, manager.clone())
        .with_sink(Arc::new(sink))
        .with_cancel_token(shutdown.token());
    let summary = runner.run().await.context("Task run failed")?;

    let progress = manager.progress().await;
    println!("Conversation: {}", conversation_id);
    for report in &summary.results {
        match (&report.content, &report.error) {
            (_, Some(err)) => println!("  [{:?}] task {}: {}", report.status, report.task_id, err),
            (Some(content), None) => {
                println!("  [{:?}] task {}: {}", report.status, report.task_id, content)
            }
            (None, None) => println!("  [{:?}] task {}", report.status, report.task_id),
        }
    }
    println!(
        "Progress: {}/{} completed, {} failed, {} pending ({:.0}%)",
        progress.completed, progress.total, progress.failed, progress.pending, progress.percent
    );
    for file in &summary.generated_files {
        println!("  file: {}", file);
    }

    match summary.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Stopped => {
            println!("Stopped; rerun with --conversation {} to resume.", conversation_id);
            Ok(())
        }
        RunStatus::Aborted { task_id, error } => bail!("Task {} aborted: {}", task_id, error),
    }
}
