//! Reasoner 交互数据：提示上下文、回复、计划草稿

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::plan::{ExecutionPlan, PlanStep, StepId};
use crate::react::PreviousExecution;

/// Reasoner 调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReasonerError {
    #[error("reasoner unavailable: {0}")]
    Unavailable(String),

    /// 输出无法解析为动作或计划
    #[error("malformed reasoner output: {0}")]
    Malformed(String),

    #[error("reasoner timed out")]
    Timeout,
}

/// 本次调用的用途
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PromptMode {
    /// 给出下一步动作
    Act,
    /// 对失败结果做自我批评，reasoning 即批评内容
    Reflect { failure: String },
    /// 多候选搜索中的第 index 个分支（从 0 开始）
    Branch { index: usize, total: usize },
}

/// 交给 Reasoner 的完整上下文；宿主自行决定如何渲染为提示词
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    pub goal: String,
    pub mode: PromptMode,
    pub iteration: usize,
    pub max_iterations: usize,
    pub available_tools: Vec<String>,
    /// 已注册工具的名称、描述与参数 schema（JSON 数组）
    pub tool_schemas: String,
    /// 每条历史的摘要（思考、动作、结果、观察）
    pub history: Vec<String>,
    /// 最近的自我批评（reflexion）
    pub reflections: Vec<String>,
    /// 动作格式的 JSON Schema
    pub action_schema: String,
}

/// Reasoner 对 think 的回复。action 可以是 JSON 对象，也可以是含 JSON 的文本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonerReply {
    pub reasoning: String,
    pub action: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ReasonerReply {
    pub fn new(reasoning: impl Into<String>, action: Value) -> Self {
        Self {
            reasoning: reasoning.into(),
            action,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// create_plan 的上下文
#[derive(Debug, Clone, Serialize)]
pub struct PlanningContext {
    pub available_tools: Vec<String>,
    pub tool_schemas: String,
    pub history: Vec<String>,
    /// 仅在重新规划时存在
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_execution: Option<PreviousExecution>,
}

/// 计划草稿中的一个步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepDraft {
    pub id: StepId,
    #[serde(default)]
    pub description: String,
    /// 工具名
    #[serde(alias = "toolName")]
    pub tool: String,
    /// 参数模板，可使用 {{stepId.field}} 引用
    #[serde(default, alias = "input")]
    pub args: Value,
    #[serde(default, alias = "dependsOn")]
    pub dependencies: Vec<StepId>,
    #[serde(default)]
    pub parallel: bool,
}

impl From<StepDraft> for PlanStep {
    fn from(draft: StepDraft) -> Self {
        let mut step = PlanStep::new(draft.id, draft.tool, draft.args).with_description(draft.description);
        step.dependencies = draft.dependencies;
        step.parallel = draft.parallel;
        step
    }
}

/// 计划附带的信号
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSignals {
    /// 完成目标还缺少的信息或能力
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_next_step: Option<String>,
}

/// create_plan 的返回
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDraft {
    #[serde(default)]
    pub steps: Vec<StepDraft>,
    #[serde(default)]
    pub signals: PlanSignals,
    #[serde(default)]
    pub audit: Value,
    #[serde(default)]
    pub reasoning: String,
}

impl PlanDraft {
    pub fn new(steps: Vec<StepDraft>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    /// 生成新的 ExecutionPlan（新 id）
    pub fn into_plan(self, goal: impl Into<String>, strategy: impl Into<String>) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new(goal, strategy);
        plan.steps = self.steps.into_iter().map(PlanStep::from).collect();
        plan
    }
}
