//! 文件读取工具：读取会话工作目录下的文本文件（.txt / .md / 源码等）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::required_str;
use crate::tools::write_code::resolve_in;
use crate::tools::{Tool, ToolContext, ToolMeta};

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file relative to the conversation directory and return its content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Relative path of the file to read" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolMeta, String> {
        let path = required_str(&args, "path")?;
        let target = resolve_in(&ctx.work_dir, path)?;
        tracing::info!(path = %target.display(), "read_file tool execute");
        let content = tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| format!("Read failed for {}: {}", path, e))?;

        let mut meta = ToolMeta::new();
        meta.insert("path".into(), json!(path));
        meta.insert("content".into(), json!(content));
        Ok(meta)
    }
}
