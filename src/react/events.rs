//! 执行过程通知：每次状态转移产生一条 ProgressRecord，按转移顺序交给 NotificationSink
//!
//! Sink 负责展示或落盘；写入失败只记 warn，不影响循环决策。

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Running,
    Success,
    Failure,
    Stopped,
}

/// 单条进度记录（可序列化为 JSON 行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub status: ProgressStatus,
    pub task_id: String,
    pub action_type: String,
    pub content: String,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub memorized: bool,
    pub timestamp: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(
        status: ProgressStatus,
        task_id: impl Into<String>,
        action_type: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            status,
            task_id: task_id.into(),
            action_type: action_type.into(),
            content: content.into(),
            comments: String::new(),
            memorized: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = comments.into();
        self
    }

    pub fn memorized(mut self, memorized: bool) -> Self {
        self.memorized = memorized;
        self
    }
}

pub trait NotificationSink: Send + Sync {
    fn emit(&self, record: &ProgressRecord);
}

/// 推送到 tokio 通道，供前端/调用方实时消费；接收端关闭后静默丢弃
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressRecord>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn emit(&self, record: &ProgressRecord) {
        let _ = self.tx.send(record.clone());
    }
}

/// 追加写入 `<dir>/<conversation>.jsonl`，每条记录一行
pub struct JsonlFileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlFileSink {
    pub fn new(dir: impl AsRef<Path>, conversation_id: &str) -> Self {
        Self {
            path: dir
                .as_ref()
                .join(format!("{}.jsonl", crate::memory::sanitize_key(conversation_id))),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &ProgressRecord) -> anyhow::Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("notification log lock poisoned"))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl NotificationSink for JsonlFileSink {
    fn emit(&self, record: &ProgressRecord) {
        if let Err(e) = self.append(record) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist progress record");
        }
    }
}

/// 以结构化日志输出进度
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, record: &ProgressRecord) {
        let preview: String = record.content.chars().take(120).collect();
        tracing::info!(
            task_id = %record.task_id,
            status = ?record.status,
            action = %record.action_type,
            content = %preview,
            "progress"
        );
    }
}

/// 依次转发给多个 sink
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl NotificationSink for FanoutSink {
    fn emit(&self, record: &ProgressRecord) {
        for sink in &self.sinks {
            sink.emit(record);
        }
    }
}
