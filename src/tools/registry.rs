//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / validate / execute），
//! 由 ToolRegistry 按名注册与查找。注册发生在启动阶段，执行期间只读，用 RwLock 支持并发读取。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::schema::validate_input;

/// 工具 trait：名称、描述（供 Reasoner 理解）、参数 schema、异步执行（输入输出均为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（ToolCall.toolName）
    fn name(&self) -> &str;

    /// 工具描述
    fn description(&self) -> &str;

    /// 参数 JSON Schema，默认不限制参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 输入校验，默认按 parameters_schema 检查
    fn validate(&self, input: &Value) -> Result<(), String> {
        validate_input(&self.parameters_schema(), input)
    }

    /// 执行工具；Err 即工具失败
    async fn execute(&self, input: Value) -> Result<Value, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，同名注册后者覆盖前者
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    /// 注册已共享的工具；名称为空的定义无法被调用，直接拒绝
    pub fn register_arc(&self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().trim().to_string();
        if name.is_empty() {
            return Err(AgentError::Validation(
                "tool name must not be empty".to_string(),
            ));
        }
        let mut tools = self
            .tools
            .write()
            .map_err(|_| AgentError::ConfigError("tool registry lock poisoned".to_string()))?;
        if tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "tool re-registered, previous definition replaced");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().ok()?.get(name).cloned()
    }

    /// 已注册工具名（排序，便于 prompt 与测试稳定）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// 动态生成工具 schema JSON（名称、描述、参数），按名称排序；随提示上下文交给 Reasoner
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tools
            .read()
            .map(|t| {
                let mut entries: Vec<_> = t.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                entries
                    .into_iter()
                    .map(|(name, tool)| {
                        serde_json::json!({
                            "name": name,
                            "description": tool.description(),
                            "parameters": tool.parameters_schema()
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
