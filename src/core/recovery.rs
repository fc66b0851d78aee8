//! 错误恢复引擎
//!
//! 两个层面的决策：
//! - 步骤级：工具失败后是重试该步骤，还是标记为终态失败
//! - 运行级：AgentError 出现时是重新规划、降级为 final_answer，还是终止

use crate::core::{AgentError, FailureKind};

/// 恢复引擎给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 在同一波次内重试该步骤
    RetryStep,
    /// 步骤进入终态失败
    MarkFailed,
    /// 带着保留的成功结果重新规划
    Replan,
    /// 以说明性的 final_answer 结束（不抛出）
    Degrade(String),
    /// 终止当前运行
    Abort,
}

/// 将失败映射为可执行动作
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// attempts 为已执行次数（含首次）；重试次数上限为 max_retries
    pub fn for_step(&self, kind: FailureKind, attempts: u32, max_retries: u32) -> RecoveryAction {
        if kind.is_retryable() && attempts <= max_retries {
            RecoveryAction::RetryStep
        } else {
            RecoveryAction::MarkFailed
        }
    }

    pub fn for_run(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Reasoner(e) => RecoveryAction::Degrade(format!("Reasoner unavailable: {e}")),
            AgentError::InvalidPlan(msg) => RecoveryAction::Degrade(format!("Plan rejected: {msg}")),
            AgentError::BatchFailed { .. }
            | AgentError::Execution(_)
            | AgentError::Timeout(_)
            | AgentError::Dependency(_) => RecoveryAction::Replan,
            AgentError::Deadlock(_)
            | AgentError::ReplanExhausted { .. }
            | AgentError::Cancelled
            | AgentError::MissingReasoner => RecoveryAction::Abort,
            _ => RecoveryAction::Abort,
        }
    }
}
