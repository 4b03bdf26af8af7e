//! 初始 prompt 拼装：任务描述 + 工具目录 + 上一轮反馈 + 已生成文件 + 输出格式说明

use crate::tools::ToolSpec;

/// 工具参数示例：按 schema properties 生成 `<tool><param>...</param></tool>`
fn tool_example(spec: &ToolSpec) -> String {
    let params: Vec<String> = spec
        .parameters
        .get("properties")
        .and_then(|p| p.as_object())
        .map(|props| {
            props
                .iter()
                .map(|(name, schema)| {
                    let hint = schema
                        .get("description")
                        .and_then(|d| d.as_str())
                        .unwrap_or("value");
                    format!("<{name}>{hint}</{name}>")
                })
                .collect()
        })
        .unwrap_or_default();
    format!("<{0}>\n{1}\n</{0}>", spec.name, params.join("\n"))
}

/// 渲染工具目录；primary 为任务指定的主工具（成功一次即视为任务完成）
pub fn render_catalogue(tools: &[ToolSpec], primary: Option<&str>) -> String {
    let mut out = String::new();
    for spec in tools {
        let mark = if Some(spec.name.as_str()) == primary {
            " (completes the task on success)"
        } else {
            ""
        };
        out.push_str(&format!(
            "### {}{}\n{}\n{}\n\n",
            spec.name,
            mark,
            spec.description,
            tool_example(spec)
        ));
    }
    out
}

/// 首轮 THINKING 使用的 prompt
pub fn think_prompt(
    requirement: &str,
    tools: &[ToolSpec],
    primary: Option<&str>,
    feedback: Option<&str>,
    generated_files: &[String],
) -> String {
    let mut prompt = format!(
        "## Task\n{}\n\n## Tools\nReply with exactly one XML block. The outer tag is the tool name, \
         each child tag is one parameter.\n\n{}",
        requirement.trim(),
        render_catalogue(tools, primary)
    );
    prompt.push_str(
        "### finish\nUse when the task is complete.\n<finish>\n<message>final answer for the task</message>\n</finish>\n\n",
    );
    if !generated_files.is_empty() {
        prompt.push_str("## Files produced so far\n");
        for f in generated_files {
            prompt.push_str(&format!("- {}\n", f));
        }
        prompt.push('\n');
    }
    if let Some(fb) = feedback.filter(|f| !f.trim().is_empty()) {
        prompt.push_str(&format!("## Feedback on the previous attempt\n{}\n\n", fb.trim()));
    }
    prompt.push_str("Output only the XML block, no explanation.");
    prompt
}
