//! 任务层：任务模型与任务管理器（状态持久化、进度、TODO 清单）

pub mod manager;
pub mod types;

pub use manager::TaskManager;
pub use types::{Task, TaskProgress, TaskResult, TaskStatus, TaskUpdate};
