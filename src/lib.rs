//! CodeAct - 单任务「思考 → 执行 → 反思」循环智能体
//!
//! 模块划分：
//! - **agent**: 任务执行器（按顺序驱动任务、停止处理、故障即停）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与停止信号
//! - **llm**: 决策源抽象与实现（OpenAI 兼容 / 脚本化 Mock）
//! - **memory**: 任务记忆日志与按 key 持久化
//! - **react**: 动作解析、重试预算、反思、进度通知、执行循环
//! - **runtime**: 运行时适配器与本地运行时
//! - **task**: 任务模型与任务管理器
//! - **tools**: 工具注册表与本地工具

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod runtime;
pub mod task;
pub mod tools;

pub use agent::{RunStatus, RunSummary, TaskReport, TaskRunner};
