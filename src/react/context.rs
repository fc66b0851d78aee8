//! 单次运行的执行上下文
//!
//! 由 AgentLoop 持有，每轮更新，运行结束即丢弃。重新规划所需的状态
//! （previous_execution、replan_count）显式放在这里。

use serde::Serialize;

use crate::plan::{ExecutionPlan, ExecutionResult, PreservedStep};
use crate::react::thought::{truncate, ActionResult, AgentThought, Observation};

/// 历史摘要中思考部分的最大字符数
const REASONING_PREVIEW_CHARS: usize = 200;

/// 一轮 think→act→observe 的记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub iteration: usize,
    pub thought: AgentThought,
    pub result: ActionResult,
    pub observation: Observation,
}

impl HistoryEntry {
    /// 给 Reasoner 的一行摘要
    pub fn digest(&self) -> String {
        format!(
            "#{} thought: {} | action: {} | result: {} | observation: {}",
            self.iteration,
            truncate(&self.thought.reasoning, REASONING_PREVIEW_CHARS),
            self.thought.action.kind(),
            self.result.summary(),
            self.observation.feedback
        )
    }
}

/// 上一次（需要重新规划的）计划执行
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousExecution {
    pub plan: ExecutionPlan,
    pub result: ExecutionResult,
    pub preserved_steps: Vec<PreservedStep>,
    /// 首要原因 + 失败模式 + 策略建议
    pub failure_analysis: String,
}

impl PreviousExecution {
    pub fn from_outcome(plan: ExecutionPlan, result: ExecutionResult) -> Self {
        let (preserved_steps, failure_analysis) = match result.replan_context() {
            Some(ctx) => (
                ctx.preserved_steps.clone(),
                format!(
                    "primary cause: {}; patterns: [{}]; suggestion: {}",
                    ctx.primary_cause,
                    ctx.failure_patterns.join(", "),
                    ctx.suggested_strategy.as_str()
                ),
            ),
            None => (
                Vec::new(),
                format!("failed steps: {}", result.report().failed_steps.join(", ")),
            ),
        };
        Self {
            plan,
            result,
            preserved_steps,
            failure_analysis,
        }
    }
}

/// 执行上下文
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub goal: String,
    pub iteration: usize,
    pub max_iterations: usize,
    pub history: Vec<HistoryEntry>,
    pub available_tools: Vec<String>,
    /// ToolRegistry::to_schema_json 的输出，原样转交 Reasoner
    pub tool_schemas: String,
    /// 仅在 needs_replan 之后存在
    pub previous_execution: Option<PreviousExecution>,
    pub replan_count: u32,
}

impl ExecutionContext {
    pub fn new(goal: impl Into<String>, max_iterations: usize, available_tools: Vec<String>) -> Self {
        Self {
            goal: goal.into(),
            iteration: 0,
            max_iterations,
            history: Vec::new(),
            available_tools,
            tool_schemas: "[]".to_string(),
            previous_execution: None,
            replan_count: 0,
        }
    }

    pub fn history_digests(&self) -> Vec<String> {
        self.history.iter().map(|h| h.digest()).collect()
    }

    pub fn with_tool_schemas(mut self, schemas: impl Into<String>) -> Self {
        self.tool_schemas = schemas.into();
        self
    }

    pub fn remaining_iterations(&self) -> usize {
        self.max_iterations.saturating_sub(self.iteration)
    }
}
