//! 终端执行工具
//!
//! 通过 sh -c / cmd /C 在会话目录（或其子目录 cwd）中执行命令；命中禁止子串直接拒绝。
//! 退出码非 0 视为失败，错误文本带上 stderr。

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::tools::registry::required_str;
use crate::tools::write_code::resolve_in;
use crate::tools::{Tool, ToolContext, ToolMeta};

pub struct TerminalRunTool {
    forbidden: Vec<String>,
}

impl TerminalRunTool {
    pub fn new(forbidden: Vec<String>) -> Self {
        Self {
            forbidden: forbidden.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    fn check(&self, command: &str) -> Result<(), String> {
        let lower = command.to_lowercase();
        match self.forbidden.iter().find(|p| lower.contains(p.as_str())) {
            Some(pattern) => Err(format!("Forbidden pattern: {}", pattern)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Tool for TerminalRunTool {
    fn name(&self) -> &str {
        "terminal_run"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. Use cwd '.' for the conversation directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute" },
                "cwd": { "type": "string", "description": "Working directory relative to the conversation directory" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolMeta, String> {
        let command = required_str(&args, "command")?.trim();
        self.check(command)?;
        let cwd = match args.get("cwd").and_then(|v| v.as_str()) {
            Some(dir) if !dir.trim().is_empty() && dir.trim() != "." => {
                resolve_in(&ctx.work_dir, dir.trim())?
            }
            _ => ctx.work_dir.clone(),
        };
        tokio::fs::create_dir_all(&cwd)
            .await
            .map_err(|e| format!("Failed to prepare cwd: {}", e))?;

        tracing::info!(command = %command, cwd = %cwd.display(), "terminal_run tool execute");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        let output = cmd
            .current_dir(&cwd)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("Execution failed: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            return Err(format!(
                "Command failed with return code {}: {}",
                code,
                stderr.trim()
            ));
        }

        let mut meta = ToolMeta::new();
        meta.insert("content".into(), json!(stdout));
        meta.insert("stdout".into(), json!(stdout));
        meta.insert("stderr".into(), json!(stderr));
        meta.insert("returncode".into(), json!(code));
        Ok(meta)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn ctx(dir: &tempfile::TempDir) -> ToolContext {
        ToolContext {
            work_dir: dir.path().to_path_buf(),
        }
    }

    #[tokio::test]
    async fn captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TerminalRunTool::new(vec![]);
        let meta = tool
            .execute(json!({"command": "echo hello", "cwd": "."}), &ctx(&dir))
            .await
            .unwrap();
        assert_eq!(meta["content"].as_str().unwrap().trim(), "hello");
        assert_eq!(meta["returncode"], 0);
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TerminalRunTool::new(vec![]);
        let err = tool
            .execute(json!({"command": "echo oops >&2; exit 3"}), &ctx(&dir))
            .await
            .unwrap_err();
        assert!(err.contains("return code 3"));
        assert!(err.contains("oops"));
    }

    #[tokio::test]
    async fn forbidden_pattern_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tool = TerminalRunTool::new(vec!["mkfs".to_string()]);
        let err = tool
            .execute(json!({"command": "MKFS /dev/null"}), &ctx(&dir))
            .await
            .unwrap_err();
        assert!(err.contains("Forbidden"));
    }
}
