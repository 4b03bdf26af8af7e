//! 重试预算
//!
//! 两个独立计数器：连续失败数（自上次成功以来）与总尝试数（整个任务）。
//! 判定顺序固定：先查连续上限，再查总上限。计数器只属于一次执行循环，不跨任务共享。

use std::fmt;
use std::time::Duration;

use crate::config::AgentSection;

/// 预算配置；两个上限都是正整数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_consecutive: u32,
    pub max_total: u32,
    /// 两次重试之间的固定等待
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive: 3,
            max_total: 10,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(agent: &AgentSection) -> Self {
        Self {
            max_consecutive: agent.max_consecutive_failures.max(1),
            max_total: agent.max_total_attempts.max(1),
            backoff: agent.retry_backoff(),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionKind {
    Consecutive,
    Total,
}

/// 预算耗尽：哪个上限、上限值、最后一次错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhaustion {
    pub kind: ExhaustionKind,
    pub limit: u32,
    pub last_error: Option<String>,
}

impl Exhaustion {
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Exhaustion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let which = match self.kind {
            ExhaustionKind::Consecutive => "consecutive",
            ExhaustionKind::Total => "total",
        };
        write!(f, "{} limit reached ({})", which, self.limit)?;
        if let Some(err) = self.last_error.as_deref().filter(|e| !e.is_empty()) {
            write!(f, ": {}", err)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetDecision {
    Continue,
    Exhausted(Exhaustion),
}

/// 纯策略函数：连续数 >= 连续上限优先，其次总数 >= 总上限
pub fn should_continue(
    consecutive: u32,
    total: u32,
    max_consecutive: u32,
    max_total: u32,
    last_error: Option<&str>,
) -> BudgetDecision {
    let kind = if consecutive >= max_consecutive {
        Some((ExhaustionKind::Consecutive, max_consecutive))
    } else if total >= max_total {
        Some((ExhaustionKind::Total, max_total))
    } else {
        None
    };
    match kind {
        Some((kind, limit)) => BudgetDecision::Exhausted(Exhaustion {
            kind,
            limit,
            last_error: last_error.map(str::to_string),
        }),
        None => BudgetDecision::Continue,
    }
}

/// 单次执行循环内的计数器；不变式 consecutive <= total
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    consecutive: u32,
    total: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// 先查预算，未耗尽时两个计数器各加一
    pub fn record_failure(
        &mut self,
        policy: &RetryPolicy,
        last_error: Option<&str>,
    ) -> BudgetDecision {
        let decision = self.check(policy, last_error);
        if decision == BudgetDecision::Continue {
            self.consecutive += 1;
            self.total += 1;
        }
        decision
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn check(&self, policy: &RetryPolicy, last_error: Option<&str>) -> BudgetDecision {
        should_continue(
            self.consecutive,
            self.total,
            policy.max_consecutive,
            policy.max_total,
            last_error,
        )
    }
}
