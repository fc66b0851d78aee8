//! 工具调用相关的数据类型
//!
//! ToolCall / ToolResult 以及三种批量模式（parallel / sequential / conditional）的选项。

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::FailureKind;

/// passResults 模式下，上一个工具结果写入下一个工具输入时使用的保留键
pub const PREVIOUS_RESULT_KEY: &str = "previous_result";

/// 一次工具调用：{"toolName": "echo", "input": {...}}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// 已注册的工具名
    pub tool_name: String,
    /// 工具输入（JSON 对象）
    #[serde(default)]
    pub input: Value,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
        }
    }
}

/// 工具失败：分类 + 说明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ToolFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// 单次工具执行结果；result 与 error 恰有一个为 Some
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(tool_name: impl Into<String>, result: Value, duration_ms: u64) -> Self {
        Self {
            tool_name: tool_name.into(),
            result: Some(result),
            error: None,
            duration_ms,
        }
    }

    pub fn failure(tool_name: impl Into<String>, error: ToolFailure, duration_ms: u64) -> Self {
        Self {
            tool_name: tool_name.into(),
            result: None,
            error: Some(error),
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

/// executeParallelTools 选项
#[derive(Debug, Clone)]
pub struct ParallelOptions {
    pub tools: Vec<ToolCall>,
    /// 同时在途的最大执行数
    pub concurrency: usize,
    /// 整个批次的截止时间
    pub timeout: Option<Duration>,
    /// 第一个失败即让整个批次返回 Err
    pub fail_fast: bool,
    /// 附带 BatchAggregate 汇总
    pub aggregate_results: bool,
}

impl ParallelOptions {
    pub fn new(tools: Vec<ToolCall>) -> Self {
        Self {
            tools,
            concurrency: 3,
            timeout: None,
            fail_fast: false,
            aggregate_results: false,
        }
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn aggregate(mut self, aggregate: bool) -> Self {
        self.aggregate_results = aggregate;
        self
    }
}

/// 并行批次的汇总（aggregate_results=true 时生成）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchAggregate {
    pub succeeded: usize,
    pub failed: usize,
    /// 成功结果，按输入顺序
    pub outputs: Vec<Value>,
    /// "tool: message" 形式的错误，按输入顺序
    pub errors: Vec<String>,
}

impl BatchAggregate {
    pub fn from_results(results: &[ToolResult]) -> Self {
        let mut agg = Self::default();
        for r in results {
            match (&r.result, &r.error) {
                (Some(v), None) => {
                    agg.succeeded += 1;
                    agg.outputs.push(v.clone());
                }
                (_, Some(e)) => {
                    agg.failed += 1;
                    agg.errors.push(format!("{}: {}", r.tool_name, e.message));
                }
                (None, None) => {}
            }
        }
        agg
    }
}

/// 并行批次结果：results 与输入一一对应且保持输入顺序
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelOutcome {
    pub results: Vec<ToolResult>,
    pub aggregate: Option<BatchAggregate>,
}

/// executeSequentialTools 选项
#[derive(Debug, Clone)]
pub struct SequentialOptions {
    pub tools: Vec<ToolCall>,
    pub stop_on_error: bool,
    pub pass_results: bool,
    pub timeout: Option<Duration>,
}

impl SequentialOptions {
    pub fn new(tools: Vec<ToolCall>) -> Self {
        Self {
            tools,
            stop_on_error: false,
            pass_results: false,
            timeout: None,
        }
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn pass_results(mut self, pass: bool) -> Self {
        self.pass_results = pass;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// 条件执行时对前序结果的要求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteIf {
    Success,
    Failure,
}

/// 条件：`{"always": true}` 或 `{"dependsOn": [...], "executeIf": "success"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Condition {
    Always {
        always: bool,
    },
    DependsOn {
        #[serde(rename = "dependsOn")]
        depends_on: Vec<String>,
        #[serde(rename = "executeIf")]
        execute_if: ExecuteIf,
    },
}

impl Condition {
    pub fn always() -> Self {
        Condition::Always { always: true }
    }

    pub fn on_success(tools: &[&str]) -> Self {
        Condition::DependsOn {
            depends_on: tools.iter().map(|s| s.to_string()).collect(),
            execute_if: ExecuteIf::Success,
        }
    }

    pub fn on_failure(tools: &[&str]) -> Self {
        Condition::DependsOn {
            depends_on: tools.iter().map(|s| s.to_string()).collect(),
            execute_if: ExecuteIf::Failure,
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::always()
    }
}

/// 条件批次中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConditionalEntry {
    #[serde(flatten)]
    pub call: ToolCall,
    #[serde(default)]
    pub conditions: Condition,
}

impl ConditionalEntry {
    pub fn new(call: ToolCall, conditions: Condition) -> Self {
        Self { call, conditions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_deserialize_always() {
        let c: Condition = serde_json::from_value(json!({"always": true})).unwrap();
        assert_eq!(c, Condition::always());
    }

    #[test]
    fn test_condition_deserialize_depends_on() {
        let c: Condition =
            serde_json::from_value(json!({"dependsOn": ["fetch"], "executeIf": "failure"})).unwrap();
        assert_eq!(c, Condition::on_failure(&["fetch"]));
    }

    #[test]
    fn test_conditional_entry_flattened() {
        let entry: ConditionalEntry = serde_json::from_value(json!({
            "toolName": "notify",
            "input": {"text": "x"},
            "conditions": {"dependsOn": ["fetch"], "executeIf": "success"}
        }))
        .unwrap();
        assert_eq!(entry.call.tool_name, "notify");
        assert_eq!(entry.conditions, Condition::on_success(&["fetch"]));
    }

    #[test]
    fn test_aggregate_counts() {
        let results = vec![
            ToolResult::success("a", json!(1), 1),
            ToolResult::failure("b", ToolFailure::new(FailureKind::Execution, "boom"), 1),
        ];
        let agg = BatchAggregate::from_results(&results);
        assert_eq!(agg.succeeded, 1);
        assert_eq!(agg.failed, 1);
        assert_eq!(agg.outputs, vec![json!(1)]);
        assert_eq!(agg.errors, vec!["b: boom".to_string()]);
    }
}
