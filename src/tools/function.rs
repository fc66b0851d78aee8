//! 闭包工具：宿主在启动时用一个 async 闭包 + 可选 schema 定义工具
//!
//! 与 PluginTool 的「配置即工具」思路一致，只是执行体换成进程内闭包。

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::tools::Tool;

type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// 由闭包实现的工具
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    schema: Option<Value>,
    func: ToolFn,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema: None,
            func: Arc::new(move |input| Box::pin(func(input))),
        }
    }

    /// 设置参数 schema（用于输入校验）
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone().unwrap_or_else(|| {
            serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            })
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, String> {
        (self.func)(input).await
    }
}
