//! 思考、动作、动作结果与观察

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::plan::{ExecutionPlan, ExecutionResult};
use crate::tools::{BatchAggregate, ConditionalEntry, ToolCall, ToolResult};

/// 结果摘要展示最大字符数
const SUMMARY_PREVIEW_CHARS: usize = 300;

fn default_true() -> bool {
    true
}

/// Planner 选择的动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    ToolCall {
        call: ToolCall,
    },
    ParallelTools {
        calls: Vec<ToolCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        concurrency: Option<usize>,
        /// 整批超时（毫秒）
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        #[serde(default)]
        fail_fast: bool,
    },
    SequentialTools {
        calls: Vec<ToolCall>,
        #[serde(default = "default_true")]
        stop_on_error: bool,
        #[serde(default)]
        pass_results: bool,
    },
    ConditionalTools {
        entries: Vec<ConditionalEntry>,
    },
    ExecutePlan {
        plan: Box<ExecutionPlan>,
    },
    FinalAnswer {
        answer: String,
    },
}

impl AgentAction {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentAction::ToolCall { .. } => "tool_call",
            AgentAction::ParallelTools { .. } => "parallel_tools",
            AgentAction::SequentialTools { .. } => "sequential_tools",
            AgentAction::ConditionalTools { .. } => "conditional_tools",
            AgentAction::ExecutePlan { .. } => "execute_plan",
            AgentAction::FinalAnswer { .. } => "final_answer",
        }
    }

    pub fn final_answer(answer: impl Into<String>) -> Self {
        AgentAction::FinalAnswer {
            answer: answer.into(),
        }
    }

    /// 用于识别重复动作的签名（计划按工具序列比较，忽略 id 与时间戳）
    pub fn signature(&self) -> String {
        match self {
            AgentAction::ExecutePlan { plan } => {
                let steps: Vec<Value> = plan
                    .steps
                    .iter()
                    .map(|s| serde_json::json!([s.tool, s.args]))
                    .collect();
                format!("execute_plan:{}", Value::Array(steps))
            }
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

/// 一次 think 的产出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentThought {
    pub reasoning: String,
    pub action: AgentAction,
    /// 0..=1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentThought {
    pub fn new(reasoning: impl Into<String>, action: AgentAction) -> Self {
        Self {
            reasoning: reasoning.into(),
            action,
            confidence: None,
            metadata: Map::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence.filter(|c| !c.is_nan()).map(|c| c.clamp(0.0, 1.0));
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Reasoner 失败或输出不可用时的安全终止：final_answer + degraded 标记
    pub fn degraded(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(message.clone(), AgentAction::final_answer(message))
            .with_metadata("degraded", Value::Bool(true))
    }

    pub fn is_degraded(&self) -> bool {
        self.metadata.get("degraded") == Some(&Value::Bool(true))
    }
}

/// 动作执行后的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionResult {
    Tool {
        result: ToolResult,
    },
    Batch {
        results: Vec<ToolResult>,
        #[serde(skip_serializing_if = "Option::is_none")]
        aggregate: Option<BatchAggregate>,
    },
    Plan {
        plan: Box<ExecutionPlan>,
        outcome: ExecutionResult,
    },
    FinalAnswer {
        answer: String,
        degraded: bool,
    },
    /// 运行级错误（fail_fast 批次、计划结构非法等）
    Failed {
        error: String,
    },
}

impl ActionResult {
    pub fn is_success(&self) -> bool {
        match self {
            ActionResult::Tool { result } => result.is_success(),
            ActionResult::Batch { results, .. } => results.iter().all(|r| r.is_success()),
            ActionResult::Plan { outcome, .. } => outcome.is_complete(),
            ActionResult::FinalAnswer { degraded, .. } => !degraded,
            ActionResult::Failed { .. } => false,
        }
    }

    /// 所有失败信息，按出现顺序
    pub fn errors(&self) -> Vec<String> {
        match self {
            ActionResult::Tool { result } => result
                .error
                .iter()
                .map(|e| format!("{}: {}", result.tool_name, e.message))
                .collect(),
            ActionResult::Batch { results, .. } => results
                .iter()
                .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {}", r.tool_name, e.message)))
                .collect(),
            ActionResult::Plan { plan, outcome } => outcome
                .report()
                .failed_steps
                .iter()
                .filter_map(|id| plan.get_step(id))
                .map(|s| format!("{}: {}", s.id, s.error.as_deref().unwrap_or("failed")))
                .collect(),
            ActionResult::FinalAnswer { degraded: true, answer } => vec![answer.clone()],
            ActionResult::FinalAnswer { .. } => Vec::new(),
            ActionResult::Failed { error } => vec![error.clone()],
        }
    }

    /// 成功产出的值（工具结果、成功步骤结果）
    pub fn outputs(&self) -> Vec<Value> {
        match self {
            ActionResult::Tool { result } => result.result.iter().cloned().collect(),
            ActionResult::Batch { results, .. } => {
                results.iter().filter_map(|r| r.result.clone()).collect()
            }
            ActionResult::Plan { plan, outcome } => outcome
                .report()
                .successful_steps
                .iter()
                .filter_map(|id| plan.get_step(id))
                .filter_map(|s| s.result.clone())
                .collect(),
            ActionResult::FinalAnswer { .. } | ActionResult::Failed { .. } => Vec::new(),
        }
    }

    /// 给 Reasoner 看的简短摘要
    pub fn summary(&self) -> String {
        let text = match self {
            ActionResult::Tool { result } => match (&result.result, &result.error) {
                (Some(v), _) => format!("{} -> {}", result.tool_name, v),
                (None, Some(e)) => format!("{} failed: {}", result.tool_name, e.message),
                (None, None) => format!("{} -> null", result.tool_name),
            },
            ActionResult::Batch { results, .. } => {
                let ok = results.iter().filter(|r| r.is_success()).count();
                format!(
                    "{ok}/{} tools succeeded; outputs: {}; errors: {}",
                    results.len(),
                    Value::Array(self.outputs()),
                    self.errors().join("; ")
                )
            }
            ActionResult::Plan { outcome, .. } => {
                let r = outcome.report();
                format!(
                    "plan {}: {} succeeded, {} failed, {} skipped; outputs: {}",
                    outcome.kind(),
                    r.successful_steps.len(),
                    r.failed_steps.len(),
                    r.skipped_steps.len(),
                    Value::Array(self.outputs())
                )
            }
            ActionResult::FinalAnswer { answer, .. } => answer.clone(),
            ActionResult::Failed { error } => format!("error: {error}"),
        };
        truncate(&text, SUMMARY_PREVIEW_CHARS)
    }
}

/// Planner 对结果的判断
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub is_complete: bool,
    pub is_successful: bool,
    pub should_continue: bool,
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_next_action: Option<String>,
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FailureKind;
    use crate::tools::ToolFailure;
    use serde_json::json;

    #[test]
    fn test_action_deserialize_defaults() {
        let action: AgentAction = serde_json::from_value(json!({
            "type": "sequential_tools",
            "calls": [{"toolName": "echo", "input": {"text": "a"}}]
        }))
        .unwrap();
        match action {
            AgentAction::SequentialTools {
                stop_on_error,
                pass_results,
                ..
            } => {
                assert!(stop_on_error);
                assert!(!pass_results);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_degraded_thought() {
        let t = AgentThought::degraded("Reasoner unavailable");
        assert!(t.is_degraded());
        assert_eq!(t.action.kind(), "final_answer");
        assert!(!AgentThought::new("r", AgentAction::final_answer("x")).is_degraded());
    }

    #[test]
    fn test_confidence_clamped() {
        let t = AgentThought::new("r", AgentAction::final_answer("x")).with_confidence(Some(1.7));
        assert_eq!(t.confidence, Some(1.0));
    }

    #[test]
    fn test_batch_result_summary() {
        let result = ActionResult::Batch {
            results: vec![
                ToolResult::success("echo", json!({"text": "a"}), 1),
                ToolResult::failure("fail", ToolFailure::new(FailureKind::Execution, "boom"), 1),
            ],
            aggregate: None,
        };
        assert!(!result.is_success());
        assert_eq!(result.errors(), vec!["fail: boom".to_string()]);
        assert!(result.summary().starts_with("1/2 tools succeeded"));
    }
}
