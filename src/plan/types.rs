//! 计划类型定义
//!
//! ExecutionPlan（步骤 DAG）、PlanStep、执行结果 ExecutionResult 与 ReplanContext。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::FailureKind;

pub type PlanId = String;
pub type StepId = String;

/// 计划状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// 已创建，等待执行
    Created,
    Running,
    /// 所有步骤成功
    Completed,
    /// 部分成功、部分失败，需要重新规划
    NeedsReplan,
    /// 无成功步骤，剩余步骤不可达
    Deadlocked,
}

/// 步骤状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    /// 依赖失败，永远不会就绪
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// 单步执行指标（总会记录，便于观测与测试）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub attempts: u32,
}

/// 计划中的一个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// 计划内唯一
    pub id: StepId,
    pub description: String,
    /// 工具名
    pub tool: String,
    /// 参数模板，可包含 {{stepId.field.path}} 引用
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub dependencies: Vec<StepId>,
    /// 就绪后与其它 parallel 步骤一起并行派发
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StepMetrics>,
    /// 从哪个旧计划沿用了结果（重新规划时）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reused_from: Option<PlanId>,
}

impl PlanStep {
    pub fn new(id: impl Into<StepId>, tool: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            tool: tool.into(),
            args,
            dependencies: Vec::new(),
            parallel: false,
            status: StepStatus::Pending,
            result: None,
            error: None,
            failure_kind: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
            metrics: None,
            reused_from: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<StepId>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// 只有带 reused_from 和结果的成功步骤可以跳过执行
    pub fn is_carried_forward(&self) -> bool {
        self.status == StepStatus::Succeeded && self.reused_from.is_some() && self.result.is_some()
    }

    /// 清除运行痕迹，回到 Pending
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.result = None;
        self.error = None;
        self.failure_kind = None;
        self.attempts = 0;
        self.started_at = None;
        self.completed_at = None;
        self.metrics = None;
        self.reused_from = None;
    }
}

/// 执行计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: PlanId,
    pub goal: String,
    /// 声明顺序即同一波次内顺序执行的顺序
    pub steps: Vec<PlanStep>,
    pub status: PlanStatus,
    /// 生成该计划的策略标签
    pub strategy: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionPlan {
    /// 新计划，id 形如 plan_<uuid>
    pub fn new(goal: impl Into<String>, strategy: impl Into<String>) -> Self {
        Self {
            id: format!("plan_{}", uuid::Uuid::new_v4()),
            goal: goal.into(),
            steps: Vec::new(),
            status: PlanStatus::Created,
            strategy: strategy.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn get_step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn get_step_mut(&mut self, id: &str) -> Option<&mut PlanStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// 执行前整理步骤状态：沿用步骤保持 Succeeded，其余一律重置为 Pending。
    /// 返回被重置的非 Pending 步骤。
    pub fn reset_for_execution(&mut self) -> Vec<StepId> {
        let mut reset = Vec::new();
        for step in &mut self.steps {
            if step.is_carried_forward() || (step.status == StepStatus::Pending && step.attempts == 0) {
                continue;
            }
            if step.status != StepStatus::Pending {
                reset.push(step.id.clone());
            }
            step.reset();
        }
        reset
    }

    pub fn step_ids_with(&self, status: StepStatus) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.id.clone())
            .collect()
    }
}

/// 执行轨迹中的一条（按结算顺序）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTrace {
    pub step_id: StepId,
    pub tool: String,
    pub wave: usize,
    pub attempt: u32,
    pub success: bool,
    pub duration_ms: u64,
    pub executed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 三种结果共有的报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub plan_id: PlanId,
    pub successful_steps: Vec<StepId>,
    pub failed_steps: Vec<StepId>,
    pub skipped_steps: Vec<StepId>,
    pub executed_steps: Vec<StepTrace>,
}

/// 重新规划时沿用的成功步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreservedStep {
    pub id: StepId,
    pub description: String,
    pub tool: String,
    pub result: Value,
}

/// 给下一次规划的策略建议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplanHint {
    /// 工具不存在或输入不合法
    UseAlternativeTools,
    /// 步骤引用无法解析
    FixStepReferences,
    /// 超时
    SplitOrSerializeSteps,
    /// 执行错误
    RetryWithAlternatives,
}

impl ReplanHint {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplanHint::UseAlternativeTools => "use_alternative_tools",
            ReplanHint::FixStepReferences => "fix_step_references",
            ReplanHint::SplitOrSerializeSteps => "split_or_serialize_steps",
            ReplanHint::RetryWithAlternatives => "retry_with_alternatives",
        }
    }
}

/// 成功/失败 id 列表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplanSummary {
    pub successful: Vec<StepId>,
    pub failed: Vec<StepId>,
}

/// needs_replan 携带的上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplanContext {
    pub preserved_steps: Vec<PreservedStep>,
    /// 归一化（小写、压缩空白）且去重的错误串
    pub failure_patterns: Vec<String>,
    pub primary_cause: String,
    pub suggested_strategy: ReplanHint,
    pub context_for_replan: ReplanSummary,
}

/// 计划执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    ExecutionComplete {
        #[serde(flatten)]
        report: ExecutionReport,
    },
    NeedsReplan {
        #[serde(flatten)]
        report: ExecutionReport,
        #[serde(rename = "replanContext")]
        replan_context: ReplanContext,
    },
    Deadlock {
        #[serde(flatten)]
        report: ExecutionReport,
    },
}

impl ExecutionResult {
    pub fn report(&self) -> &ExecutionReport {
        match self {
            ExecutionResult::ExecutionComplete { report }
            | ExecutionResult::NeedsReplan { report, .. }
            | ExecutionResult::Deadlock { report } => report,
        }
    }

    pub fn replan_context(&self) -> Option<&ReplanContext> {
        match self {
            ExecutionResult::NeedsReplan { replan_context, .. } => Some(replan_context),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ExecutionResult::ExecutionComplete { .. })
    }

    pub fn is_deadlock(&self) -> bool {
        matches!(self, ExecutionResult::Deadlock { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionResult::ExecutionComplete { .. } => "execution_complete",
            ExecutionResult::NeedsReplan { .. } => "needs_replan",
            ExecutionResult::Deadlock { .. } => "deadlock",
        }
    }
}
