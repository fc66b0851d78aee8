//! Echo 工具（诊断用）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::Tool;

/// Echo 工具：回显 text，并原样带回 previous_result（便于观察顺序批次的结果传递）
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text (for testing). Input: {\"text\": \"message\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        let text = input
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        let mut out = json!({ "text": text });
        if let Some(prev) = input.get(crate::tools::PREVIOUS_RESULT_KEY) {
            out["previous_result"] = prev.clone();
        }
        Ok(out)
    }
}
