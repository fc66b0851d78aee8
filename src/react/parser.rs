//! 解析 Reasoner 的动作输出
//!
//! 接受 JSON 对象，或包含 JSON 的文本（```json 代码块，或第一个 `{` 到最后一个 `}`）。
//! 不含 JSON 的文本视为 final_answer。兼容简写：
//! - `{"tool": "x", "args": {...}}` / `{"toolName": "x", "input": {...}}` → tool_call
//! - `{"answer": "..."}` → final_answer
//! - `{"type": "execute_plan", "steps": [...]}` → 由草稿生成新计划

use serde_json::Value;

use crate::core::AgentError;
use crate::reasoner::{PlanDraft, ReasonerError};
use crate::react::thought::AgentAction;
use crate::tools::ToolCall;

fn malformed(msg: String) -> AgentError {
    AgentError::Reasoner(ReasonerError::Malformed(msg))
}

/// 解析动作；goal / strategy 用于由 steps 生成计划
pub fn parse_action(action: &Value, goal: &str, strategy: &str) -> Result<AgentAction, AgentError> {
    match action {
        Value::String(text) => parse_text(text, goal, strategy),
        Value::Object(_) => from_object(action.clone(), goal, strategy),
        Value::Null => Err(malformed("empty action".to_string())),
        other => Err(malformed(format!("unsupported action value: {other}"))),
    }
}

/// 解析文本输出
pub fn parse_text(output: &str, goal: &str, strategy: &str) -> Result<AgentAction, AgentError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let Some(start) = trimmed.find('{') {
        match trimmed.rfind('}') {
            Some(end) if end > start => &trimmed[start..=end],
            // `}` 全在 `{` 之前，或没有 `}`：不存在可截取的对象
            _ => trimmed,
        }
    } else {
        if trimmed.is_empty() {
            return Err(malformed("empty action".to_string()));
        }
        return Ok(AgentAction::final_answer(trimmed));
    };

    let value: Value =
        serde_json::from_str(json_str).map_err(|e| malformed(format!("{}: {}", e, json_str)))?;
    from_object(value, goal, strategy)
}

fn from_object(value: Value, goal: &str, strategy: &str) -> Result<AgentAction, AgentError> {
    let Some(obj) = value.as_object() else {
        return Err(malformed(format!("expected a JSON object, got {value}")));
    };

    match obj.get("type").and_then(|t| t.as_str()) {
        Some("execute_plan") if obj.get("plan").is_none() => {
            let draft: PlanDraft = serde_json::from_value(value.clone())
                .map_err(|e| malformed(format!("invalid plan: {e}")))?;
            if draft.steps.is_empty() {
                return Err(malformed("execute_plan without steps".to_string()));
            }
            return Ok(AgentAction::ExecutePlan {
                plan: Box::new(draft.into_plan(goal, strategy)),
            });
        }
        Some(_) => {
            let action: AgentAction = serde_json::from_value(value.clone())
                .map_err(|e| malformed(format!("{e}: {value}")))?;
            return check_tool_names(action);
        }
        None => {}
    }

    let tool = obj
        .get("tool")
        .or_else(|| obj.get("toolName"))
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    if !tool.is_empty() {
        let input = obj
            .get("args")
            .or_else(|| obj.get("input"))
            .cloned()
            .unwrap_or(Value::Null);
        return Ok(AgentAction::ToolCall {
            call: ToolCall::new(tool, input),
        });
    }

    if let Some(answer) = obj.get("answer").and_then(|a| a.as_str()) {
        return Ok(AgentAction::final_answer(answer));
    }

    Err(malformed(format!("no action in {value}")))
}

fn check_tool_names(action: AgentAction) -> Result<AgentAction, AgentError> {
    let blank = match &action {
        AgentAction::ToolCall { call } => call.tool_name.trim().is_empty(),
        AgentAction::ParallelTools { calls, .. } | AgentAction::SequentialTools { calls, .. } => {
            calls.is_empty() || calls.iter().any(|c| c.tool_name.trim().is_empty())
        }
        AgentAction::ConditionalTools { entries } => {
            entries.is_empty() || entries.iter().any(|e| e.call.tool_name.trim().is_empty())
        }
        _ => false,
    };
    if blank {
        Err(malformed(format!("{} without tool names", action.kind())))
    } else {
        Ok(action)
    }
}
