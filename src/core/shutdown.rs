//! 停止信号
//!
//! 外部停止请求（用户 stop、Ctrl+C、SIGTERM）统一落到一个 CancellationToken 上；
//! TaskRunner 在任务之间检查，ExecutionLoop 在每轮迭代与派发前检查。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// 停止原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// 用户主动停止（stop 命令或 Ctrl+C）
    UserInitiated,
    /// SIGTERM
    Signal,
}

/// 停止信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// 交给执行循环 / 任务调度方的取消令牌
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 重复调用只记录日志，令牌保持已取消
    pub fn stop(&self, reason: StopReason) {
        tracing::info!(reason = ?reason, "stop requested, finishing the in-flight step");
        self.token.cancel();
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                manager.stop(StopReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.stop(StopReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
