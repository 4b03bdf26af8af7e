//! 记忆日志持久化
//!
//! 按 key（由任务 ID 派生）整份读写：每次追加后全量重写，日志规模受重试预算约束，足够小。
//! 不存在的 key 读出空日志。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::anyhow;

use crate::memory::MemoryEntry;

/// 记忆存储后端
pub trait MemoryStore: Send + Sync {
    /// 读取 key 对应的全部条目；key 不存在时返回空 Vec
    fn load(&self, key: &str) -> anyhow::Result<Vec<MemoryEntry>>;

    /// 用 entries 整体覆盖 key 对应的日志
    fn save(&self, key: &str, entries: &[MemoryEntry]) -> anyhow::Result<()>;

    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// 文件存储：`<dir>/<key>.json`，内容为条目数组
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

impl MemoryStore for JsonFileStore {
    fn load(&self, key: &str) -> anyhow::Result<Vec<MemoryEntry>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&data) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                // 损坏的日志按空日志处理，下一次追加会覆盖它
                tracing::warn!(path = %path.display(), error = %e, "memory log unreadable, starting empty");
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, key: &str, entries: &[MemoryEntry]) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        std::fs::write(&path, serde_json::to_string_pretty(entries)?)
            .map_err(|e| anyhow!("failed to save memory for {}: {}", key, e))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// 进程内存储（测试、一次性运行）
#[derive(Debug, Default)]
pub struct InMemoryStore {
    logs: Mutex<HashMap<String, Vec<MemoryEntry>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStore for InMemoryStore {
    fn load(&self, key: &str) -> anyhow::Result<Vec<MemoryEntry>> {
        let logs = self.logs.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(logs.get(key).cloned().unwrap_or_default())
    }

    fn save(&self, key: &str, entries: &[MemoryEntry]) -> anyhow::Result<()> {
        let mut logs = self.logs.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        logs.insert(key.to_string(), entries.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let mut logs = self.logs.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        logs.remove(key);
        Ok(())
    }
}

/// key -> 文件名：ASCII 字母数字与 `-` 原样保留，其余字节（含 `_`）写成 `_xx` 十六进制
///
/// 编码是单射的，不同 key 不会共用一个文件；空 key 映射为 `_`。
pub fn sanitize_key(key: &str) -> String {
    if key.is_empty() {
        return "_".to_string();
    }
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("_{:02x}", b));
        }
    }
    out
}
