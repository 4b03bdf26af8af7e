//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CODEACT__*` 覆盖（双下划线表示嵌套，如 `CODEACT__AGENT__MAX_TOTAL_ATTEMPTS=20`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、工作目录、数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 工具写文件、执行命令的根目录，每个会话在其下有独立子目录
    pub workspace_root: PathBuf,
    /// 记忆日志、任务列表、进度消息的存放目录
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "codeact".to_string(),
            workspace_root: PathBuf::from("workspace"),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl AppSection {
    pub fn memory_dir(&self) -> PathBuf {
        self.data_dir.join("memory")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.data_dir.join("tasks")
    }

    pub fn messages_dir(&self) -> PathBuf {
        self.data_dir.join("messages")
    }
}

/// [llm] 段：OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: None,
            api_key: None,
            timeout_secs: 120,
        }
    }
}

/// [agent] 段：重试预算与循环行为
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 连续失败上限（成功后清零）
    pub max_consecutive_failures: u32,
    /// 单任务总失败上限（不清零）
    pub max_total_attempts: u32,
    /// 两次重试之间的固定等待
    pub retry_backoff_ms: u64,
    /// 规划后与每个任务完成后重写 todo.md
    pub write_todo: bool,
    /// 用 LLM 评估动作结果，而非按状态直接映射
    pub llm_reflection: bool,
    /// 记忆日志近期上限（条）；0 表示不截断
    pub memory_window: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            max_total_attempts: 10,
            retry_backoff_ms: 500,
            write_todo: true,
            llm_reflection: false,
            memory_window: 0,
        }
    }
}

impl AgentSection {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn memory_window(&self) -> Option<usize> {
        (self.memory_window > 0).then_some(self.memory_window)
    }
}

/// [tools] 段：工具超时与 Shell 限制
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            shell: ShellSection::default(),
        }
    }
}

/// [tools.shell] 段：禁止出现在命令中的子串
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub forbidden_patterns: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            forbidden_patterns: vec![
                "rm -rf /".into(),
                "rm -fr /".into(),
                "mkfs".into(),
                "dd if=".into(),
                "> /dev/sd".into(),
                "chmod 777 /".into(),
                ":(){ :|:& };:".into(),
            ],
        }
    }
}

/// 从 config 目录加载配置，环境变量 CODEACT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CODEACT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CODEACT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
