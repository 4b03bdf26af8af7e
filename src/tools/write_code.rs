//! 代码写入工具
//!
//! 把内容写入会话工作目录下的相对路径，自动创建父目录；返回 path / filepath / content，
//! 其中 filepath 会被执行循环记入生成文件列表。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::required_str;
use crate::tools::{Tool, ToolContext, ToolMeta};

pub struct WriteCodeTool {
    max_file_size: usize,
}

impl WriteCodeTool {
    pub fn new() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl Default for WriteCodeTool {
    fn default() -> Self {
        Self::new()
    }
}

/// 把相对路径拼到 root 下；绝对路径或含 `..` 的路径拒绝
pub(crate) fn resolve_in(root: &Path, relative: &str) -> Result<PathBuf, String> {
    let rel = Path::new(relative.trim_start_matches("./"));
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(format!(
            "Access denied: path '{}' is outside the conversation directory",
            relative
        ));
    }
    Ok(root.join(rel))
}

#[async_trait]
impl Tool for WriteCodeTool {
    fn name(&self) -> &str {
        "write_code"
    }

    fn description(&self) -> &str {
        "Write the full content to a file (relative to the conversation directory). Parent directories are created."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Relative path of the file to write" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolMeta, String> {
        let path = required_str(&args, "path")?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or("Missing required parameter: content")?;

        if content.len() > self.max_file_size {
            return Err(format!(
                "Content too large: {} bytes (max: {})",
                content.len(),
                self.max_file_size
            ));
        }

        let target = resolve_in(&ctx.work_dir, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create parent directory: {}", e))?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| format!("Failed to write file: {}", e))?;

        tracing::info!(path = %target.display(), bytes = content.len(), "write_code tool execute");

        let mut meta = ToolMeta::new();
        meta.insert("path".into(), json!(path));
        meta.insert("filepath".into(), json!(target.display().to_string()));
        meta.insert("content".into(), json!(content));
        Ok(meta)
    }
}
