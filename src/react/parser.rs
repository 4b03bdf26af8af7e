//! 动作解析
//!
//! 决策文本应当恰好是一个 XML 标签块：外层标签名即动作类型，子元素为参数名/值。
//! 参数值是子元素内的全部文本（含更深层元素的文本，原样拼接），整体只去一次首尾空白。
//! 多个顶层元素、缺失元素、非法标记都返回「未解析到动作」，从不 panic。
//! `finish` 是唯一保留类型，必须带 message 参数；其它类型必须在工具目录中。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 保留的完成动作类型
pub const FINISH: &str = "finish";

/// 一次工具调用：类型 + 参数映射
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub params: BTreeMap<String, String>,
}

impl ToolInvocation {
    /// 参数转为 JSON 对象，交给工具执行
    pub fn params_json(&self) -> Value {
        Value::Object(
            self.params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

/// 解析出的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Finish { message: String },
    Tool(ToolInvocation),
}

/// 动作解析器；catalogue 为 None 时不校验工具名
#[derive(Debug, Clone, Default)]
pub struct ActionParser {
    catalogue: Option<BTreeSet<String>>,
}

impl ActionParser {
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            catalogue: Some(tools.into_iter().map(Into::into).collect()),
        }
    }

    /// 接受任意标签名（用于解析评估结果等非工具块）
    pub fn permissive() -> Self {
        Self { catalogue: None }
    }

    /// 返回 0 或 1 个动作
    pub fn parse_actions(&self, content: &str) -> Vec<Action> {
        self.parse(content).into_iter().collect()
    }

    pub fn parse(&self, content: &str) -> Option<Action> {
        let block = parse_block(content)?;
        if block.name == FINISH {
            let message = block.params.get("message")?.clone();
            return Some(Action::Finish { message });
        }
        if let Some(catalogue) = &self.catalogue {
            if !catalogue.contains(&block.name) {
                tracing::debug!(tool = %block.name, "parsed action is not in the tool catalogue");
                return None;
            }
        }
        Some(Action::Tool(block))
    }
}

fn code_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"^```[A-Za-z0-9_-]*[ \t]*\r?\n(?s)(.*?)\r?\n?```$").expect("code fence pattern")
    })
}

/// 把文本解析为单个顶层元素；任何不合规都返回 None
pub fn parse_block(content: &str) -> Option<ToolInvocation> {
    let trimmed = content.trim();
    let body = code_fence()
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(trimmed);
    if body.is_empty() {
        return None;
    }

    let mut reader = Reader::from_str(body);

    let mut root: Option<String> = None;
    let mut root_closed = false;
    let mut params = BTreeMap::new();
    // 当前打开的参数名及其累积文本
    let mut current: Option<(String, String)> = None;
    let mut depth = 0usize;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "action markup is malformed");
                return None;
            }
        };
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    0 if root.is_none() => root = Some(name),
                    0 => return None, // 第二个顶层元素
                    1 => current = Some((name, String::new())),
                    _ => {}
                }
                depth += 1;
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    0 if root.is_none() => {
                        root = Some(name);
                        root_closed = true;
                    }
                    0 => return None,
                    1 => {
                        params.insert(name, String::new());
                    }
                    _ => {}
                }
            }
            Event::End(_) => {
                if depth == 0 {
                    return None;
                }
                depth -= 1;
                match depth {
                    0 => root_closed = true,
                    1 => {
                        if let Some((name, text)) = current.take() {
                            params.insert(name, text.trim().to_string());
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                let text = t.unescape().ok()?;
                if depth == 0 && !text.trim().is_empty() {
                    return None; // 顶层元素之外的文字
                }
                // 根与子元素之间的缩进不属于任何参数
                if depth >= 2 {
                    if let Some((_, buf)) = current.as_mut() {
                        buf.push_str(&text);
                    }
                }
            }
            Event::CData(c) => {
                if depth == 0 {
                    return None;
                }
                if depth >= 2 {
                    if let Some((_, buf)) = current.as_mut() {
                        buf.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        if root_closed && depth == 0 && root.is_some() {
            // 根已闭合，后面只能是空白/注释
            return finish_block(&mut reader, root, params);
        }
    }
    None
}

fn finish_block(
    reader: &mut Reader<&[u8]>,
    root: Option<String>,
    params: BTreeMap<String, String>,
) -> Option<ToolInvocation> {
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Comment(_)) => {}
            Ok(Event::Text(t)) if t.unescape().map(|s| s.trim().is_empty()).unwrap_or(false) => {}
            _ => return None,
        }
    }
    Some(ToolInvocation {
        name: root?,
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ActionParser {
        ActionParser::new(["write_code", "terminal_run"])
    }

    #[test]
    fn parses_single_block_with_trimmed_params() {
        let input = r#"
            <write_code>
              <path> test.py </path>
              <content>
              print("hello world")
              </content>
            </write_code>
        "#;
        let Some(Action::Tool(tc)) = parser().parse(input) else {
            panic!("expected a tool action");
        };
        assert_eq!(tc.name, "write_code");
        assert_eq!(tc.params.len(), 2);
        assert_eq!(tc.params["path"], "test.py");
        assert_eq!(tc.params["content"], r#"print("hello world")"#);
    }

    #[test]
    fn finish_is_a_tagged_variant() {
        let action = parser().parse("<finish><message>done</message></finish>");
        assert_eq!(
            action,
            Some(Action::Finish {
                message: "done".to_string()
            })
        );
    }

    #[test]
    fn finish_without_message_is_not_an_action() {
        assert!(parser().parse("<finish><note>x</note></finish>").is_none());
        assert!(parser().parse("<finish/>").is_none());
    }

    #[test]
    fn multi_root_and_garbage_yield_nothing() {
        let p = parser();
        let inputs = [
            "<terminal_run><command>ls</command></terminal_run><finish><message>x</message></finish>",
            "I think I should run ls",
            "<terminal_run><command>ls</terminal_run>",
            "<terminal_run><command>ls</command>",
            "Sure! <terminal_run><command>ls</command></terminal_run>",
            "",
        ];
        for input in inputs {
            assert!(p.parse_actions(input).is_empty(), "{input:?}");
        }
    }

    #[test]
    fn unknown_tool_is_rejected_by_catalogue() {
        assert!(parser().parse("<web_search><query>rust</query></web_search>").is_none());
        assert!(ActionParser::permissive()
            .parse("<web_search><query>rust</query></web_search>")
            .is_some());
    }

    #[test]
    fn code_fence_is_stripped() {
        let input = "```xml\n<terminal_run>\n<command>ls -la</command>\n</terminal_run>\n```";
        let Some(Action::Tool(tc)) = parser().parse(input) else {
            panic!("expected a tool action");
        };
        assert_eq!(tc.params["command"], "ls -la");
    }

    #[test]
    fn entities_and_cdata_are_decoded() {
        let input = concat!(
            "<terminal_run>",
            "<command>echo a &amp;&amp; echo b</command>",
            "<cwd><![CDATA[ sub<dir> ]]></cwd>",
            "</terminal_run>",
        );
        let Some(Action::Tool(tc)) = parser().parse(input) else {
            panic!("expected a tool action");
        };
        assert_eq!(tc.params["command"], "echo a && echo b");
        assert_eq!(tc.params["cwd"], "sub<dir>");
    }

    #[test]
    fn mixed_content_keeps_inner_whitespace() {
        let input = "<terminal_run>\n<command>\n  a <b>x</b> c \n</command></terminal_run>";
        let Some(Action::Tool(tc)) = parser().parse(input) else {
            panic!("expected a tool action");
        };
        assert_eq!(tc.params["command"], "a x c");

        let input = "<write_code><path>index.html</path>\
                     <content><p>Hello <b>World</b> again</p></content></write_code>";
        let Some(Action::Tool(tc)) = parser().parse(input) else {
            panic!("expected a tool action");
        };
        assert_eq!(tc.params["content"], "Hello World again");
    }

    #[test]
    fn empty_child_and_duplicate_keys() {
        let input = "<terminal_run><command>a</command><command>b</command><cwd/></terminal_run>";
        let Some(Action::Tool(tc)) = parser().parse(input) else {
            panic!("expected a tool action");
        };
        assert_eq!(tc.params["command"], "b");
        assert_eq!(tc.params["cwd"], "");
    }

    #[test]
    fn n_children_give_n_keys() {
        for n in 0..6 {
            let children: String = (0..n).map(|i| format!("<p{i}>  v{i}  </p{i}>")).collect();
            let input = format!("<tool>{children}</tool>");
            let block = parse_block(&input).unwrap();
            assert_eq!(block.params.len(), n);
            for i in 0..n {
                assert_eq!(block.params[&format!("p{i}")], format!("v{i}"));
            }
        }
    }
}
