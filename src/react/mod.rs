//! 执行层：动作解析、重试预算、反思、进度通知、prompt 拼装与单任务执行循环

pub mod budget;
pub mod events;
pub mod loop_;
pub mod parser;
pub mod prompt;
pub mod reflection;

pub use budget::{
    should_continue, BudgetDecision, Exhaustion, ExhaustionKind, RetryPolicy, RetryState,
};
pub use events::{
    ChannelSink, FanoutSink, JsonlFileSink, NotificationSink, ProgressRecord, ProgressStatus,
    TracingSink,
};
pub use loop_::{
    memory_key, ExecutionLoop, FailureResult, FinishResult, LoopRun, TaskOutcome, FINISH_COMMENTS,
};
pub use parser::{parse_block, Action, ActionParser, ToolInvocation, FINISH};
pub use prompt::think_prompt;
pub use reflection::{LlmReflector, OutcomeReflector, Reflection, Reflector, Verdict};
