//! 任务管理器
//!
//! 持有一个会话的有序任务列表；每次修改立即整体写回 JSON（write-through，无批量）。
//! 内部用 tokio Mutex 串行化所有状态更新，可安全地暴露给多个调用方。

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::core::AgentError;
use crate::task::{Task, TaskProgress, TaskStatus, TaskUpdate};

pub struct TaskManager {
    path: PathBuf,
    tasks: Mutex<Vec<Task>>,
}

impl TaskManager {
    /// 从 path 读取任务列表；文件不存在或损坏时为空列表
    pub async fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let tasks = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str::<Vec<Task>>(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "task list is corrupt, starting empty");
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read task list, starting empty");
                Vec::new()
            }
        };
        tracing::debug!(path = %path.display(), tasks = tasks.len(), "task list loaded");
        Self {
            path,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn set_tasks(&self, tasks: Vec<Task>) -> Result<(), AgentError> {
        let mut guard = self.tasks.lock().await;
        *guard = tasks;
        self.save(&guard).await
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().await.clone()
    }

    /// 更新任务状态；id 不存在时什么也不做，返回 false
    pub async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        update: TaskUpdate,
    ) -> Result<bool, AgentError> {
        let mut guard = self.tasks.lock().await;
        let Some(task) = guard.iter_mut().find(|t| t.id == id) else {
            tracing::warn!(task_id = %id, "status update for unknown task ignored");
            return Ok(false);
        };
        task.status = status;
        match update {
            TaskUpdate::None => {}
            TaskUpdate::Result(result) => {
                task.result = Some(result);
                task.error = None;
            }
            TaskUpdate::Error(error) => task.error = Some(error),
        }
        tracing::info!(task_id = %id, status = ?status, "task status updated");
        self.save(&guard).await?;
        Ok(true)
    }

    pub async fn task_by_id(&self, id: &str) -> Option<Task> {
        self.tasks.lock().await.iter().find(|t| t.id == id).cloned()
    }

    pub async fn next_pending(&self) -> Option<Task> {
        self.tasks
            .lock()
            .await
            .iter()
            .find(|t| t.status == TaskStatus::Pending)
            .cloned()
    }

    /// 所有任务都 completed（空列表视为完成）
    pub async fn all_completed(&self) -> bool {
        self.tasks
            .lock()
            .await
            .iter()
            .all(|t| t.status == TaskStatus::Completed)
    }

    pub async fn progress(&self) -> TaskProgress {
        let guard = self.tasks.lock().await;
        let total = guard.len();
        let completed = guard.iter().filter(|t| t.status == TaskStatus::Completed).count();
        let failed = guard.iter().filter(|t| t.status == TaskStatus::Failed).count();
        let percent = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        TaskProgress {
            total,
            completed,
            failed,
            pending: total - completed - failed,
            percent,
        }
    }

    /// `## TODO List`：pending 为 `- [ ]`，其余为 `- [x]`
    pub async fn todo_markdown(&self) -> String {
        let guard = self.tasks.lock().await;
        let mut md = String::from("## TODO List\n");
        for task in guard.iter() {
            let checkbox = if task.status == TaskStatus::Pending { "[ ]" } else { "[x]" };
            md.push_str(&format!("- {} {}\n", checkbox, task.description));
        }
        md
    }

    async fn save(&self, tasks: &[Task]) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgentError::Persistence(e.into()))?;
        }
        let json = serde_json::to_string_pretty(tasks)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| AgentError::Persistence(e.into()))?;
        Ok(())
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager").field("path", &self.path).finish()
    }
}
