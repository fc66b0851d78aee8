//! 工具输入契约校验 + 动作格式 JSON Schema
//!
//! validate_input 交给 jsonschema（Draft 7），编译结果按 schema 缓存；唯一的本地规则是
//! object 类型的 schema 把 null 输入视为空对象。action_schema_json 由 schemars 生成，
//! 随 PromptContext 交给 Reasoner，减少输出格式错误。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use jsonschema::{Draft, JSONSchema};
use schemars::{schema_for, JsonSchema};
use serde_json::Value;

use crate::reasoner::StepDraft;
use crate::tools::types::{ConditionalEntry, ToolCall};

/// Reasoner 动作的 JSON 结构（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionFormat {
    /// tool_call / parallel_tools / sequential_tools / conditional_tools / execute_plan / final_answer
    #[serde(rename = "type")]
    kind: String,
    /// tool_call 时使用
    call: Option<ToolCall>,
    /// parallel_tools / sequential_tools 时使用
    calls: Option<Vec<ToolCall>>,
    /// sequential_tools：是否遇错停止（默认 true）
    stop_on_error: Option<bool>,
    /// sequential_tools：是否把上一结果并入下一输入
    pass_results: Option<bool>,
    /// conditional_tools 时使用
    entries: Option<Vec<ConditionalEntry>>,
    /// execute_plan 时使用；args 中可用 {{stepId.field}} 引用前序步骤结果
    steps: Option<Vec<StepDraft>>,
    /// final_answer 时使用
    answer: Option<String>,
}

/// 返回动作格式的 JSON Schema 字符串
pub fn action_schema_json() -> String {
    let schema = schema_for!(ActionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 已编译的参数 schema，按 schema 文本缓存，同一工具只编译一次
fn compiled_schemas() -> &'static RwLock<HashMap<String, Arc<JSONSchema>>> {
    static CACHE: OnceLock<RwLock<HashMap<String, Arc<JSONSchema>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

fn compile(schema: &Value) -> Result<Arc<JSONSchema>, String> {
    let key = schema.to_string();
    if let Some(found) = compiled_schemas().read().ok().and_then(|c| c.get(&key).cloned()) {
        return Ok(found);
    }
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map(Arc::new)
        .map_err(|e| format!("invalid parameters schema: {e}"))?;
    if let Ok(mut cache) = compiled_schemas().write() {
        cache.insert(key, Arc::clone(&compiled));
    }
    Ok(compiled)
}

/// 按 schema 校验工具输入；返回第一条不满足的约束（"input/<路径>: <原因>"）
pub fn validate_input(schema: &Value, input: &Value) -> Result<(), String> {
    // 无参数工具允许 null 输入，按空对象校验
    let empty = Value::Object(serde_json::Map::new());
    let instance = if input.is_null() && schema.get("type").and_then(|t| t.as_str()) == Some("object") {
        &empty
    } else {
        input
    };

    let compiled = compile(schema)?;
    let first_error = compiled
        .validate(instance)
        .err()
        .and_then(|mut errors| errors.next())
        .map(|e| format!("input{}: {e}", e.instance_path));
    match first_error {
        Some(message) => Err(message),
        None => Ok(()),
    }
}
