//! 本地运行时
//!
//! 持有 ToolRegistry 与工具超时；每个会话在 workspace_root 下有独立目录 `Conversation_<id 前 6 位>`。
//! 超时与工具报错都转为 ActionResult::failure；每次调用输出结构化审计日志（JSON）。

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;

use crate::config::AppConfig;
use crate::core::RuntimeError;
use crate::memory::sanitize_key;
use crate::react::ToolInvocation;
use crate::runtime::{ActionContext, ActionResult, RuntimeAdapter};
use crate::tools::{
    ReadFileTool, TerminalRunTool, ToolContext, ToolRegistry, ToolSpec, WriteCodeTool,
};

pub struct LocalRuntime {
    registry: ToolRegistry,
    workspace_root: PathBuf,
    timeout: Duration,
}

impl LocalRuntime {
    pub fn new(
        registry: ToolRegistry,
        workspace_root: impl AsRef<Path>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            registry,
            workspace_root: workspace_root.as_ref().to_path_buf(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 按配置注册默认工具：write_code / read_file / terminal_run
    pub fn from_config(cfg: &AppConfig) -> Self {
        let mut registry = ToolRegistry::new();
        registry.register(WriteCodeTool::new());
        registry.register(ReadFileTool);
        registry.register(TerminalRunTool::new(cfg.tools.shell.forbidden_patterns.clone()));
        Self::new(registry, &cfg.app.workspace_root, cfg.tools.tool_timeout_secs)
    }

    /// 会话工作目录
    pub fn conversation_dir(&self, conversation_id: &str) -> PathBuf {
        conversation_dir(&self.workspace_root, conversation_id)
    }
}

/// `<root>/Conversation_<id 前 6 个字符>`（前缀按文件名规则转义）
pub fn conversation_dir(root: &Path, conversation_id: &str) -> PathBuf {
    let short: String = conversation_id.chars().take(6).collect();
    root.join(format!("Conversation_{}", sanitize_key(&short)))
}

#[async_trait]
impl RuntimeAdapter for LocalRuntime {
    fn tool_catalogue(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    fn supported_tools(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    async fn execute_action(
        &self,
        action: &ToolInvocation,
        ctx: &ActionContext,
        task_id: &str,
    ) -> Result<ActionResult, RuntimeError> {
        let tool = self
            .registry
            .get(&action.name)
            .ok_or_else(|| RuntimeError::UnsupportedTool(action.name.clone()))?;

        let args = action.params_json();
        if !args.is_object() {
            return Err(RuntimeError::InvalidAction(format!(
                "params of {} must be a mapping",
                action.name
            )));
        }
        let tool_ctx = ToolContext {
            work_dir: self.conversation_dir(&ctx.conversation_id),
        };

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args, &tool_ctx)).await;

        let (ok, outcome) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "task_id": task_id,
            "tool": action.name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        Ok(match result {
            Ok(Ok(meta)) => ActionResult::success(meta),
            Ok(Err(e)) => ActionResult::failure(e),
            Err(_) => ActionResult::failure(format!(
                "Tool {} timed out after {}s",
                action.name,
                self.timeout.as_secs()
            )),
        })
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
