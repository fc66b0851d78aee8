//! 错误类型
//!
//! AgentError 是运行级错误（结构性失败、配置、Reasoner）；单个工具的失败不走 Err，
//! 而是以 ToolFailure（FailureKind + message）的形式留在结果集里，供 Planner 推理部分失败。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reasoner::ReasonerError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 工具输入不合法
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 工具执行返回错误
    #[error("Tool execution failed: {0}")]
    Execution(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// 步骤参数引用无法解析
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// 剩余步骤结构上不可达
    #[error("Deadlock: {0}")]
    Deadlock(String),

    #[error("Replan limit reached after {replans} replans")]
    ReplanExhausted { replans: u32 },

    #[error("Reasoner error: {0}")]
    Reasoner(#[from] ReasonerError),

    /// PlannerFactory 构造时未注入 Reasoner
    #[error("Planner requires a reasoner, none was provided")]
    MissingReasoner,

    /// 计划结构非法（重复 id、悬空依赖、环）
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// 仅 fail_fast 模式下出现：批次中第一个失败
    #[error("Batch aborted by {tool}: {message}")]
    BatchFailed { tool: String, message: String },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Cancelled")]
    Cancelled,
}

/// 工具级失败的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    UnknownTool,
    Execution,
    Timeout,
    Dependency,
}

impl FailureKind {
    /// 仅执行错误与超时可以重试；其余是确定性失败，重试结果不会变
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Execution | FailureKind::Timeout)
    }
}

impl From<&AgentError> for FailureKind {
    fn from(err: &AgentError) -> Self {
        match err {
            AgentError::Validation(_) | AgentError::InvalidPlan(_) | AgentError::ConfigError(_) => {
                FailureKind::Validation
            }
            AgentError::UnknownTool(_) => FailureKind::UnknownTool,
            AgentError::Timeout(_) => FailureKind::Timeout,
            AgentError::Dependency(_) => FailureKind::Dependency,
            _ => FailureKind::Execution,
        }
    }
}
