//! 工具执行引擎
//!
//! 持有 ToolRegistry 与单次调用超时，是调用工具的唯一入口：
//! - execute_tool：查找 → 输入校验 → 超时内执行，失败以 ToolResult.error 返回，不抛出
//! - execute_parallel_tools：Semaphore 限制同时在途数量，结果保持输入顺序
//! - execute_sequential_tools：严格按顺序执行，可传递上一结果、遇错停止
//! - execute_conditional_tools：按同批次前序结果决定是否执行
//!
//! 每次调用输出一条结构化审计日志（JSON）。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::ToolsSection;
use crate::core::events::send_event;
use crate::core::{AgentError, AgentEvent, FailureKind};
use crate::tools::types::{
    BatchAggregate, Condition, ConditionalEntry, ExecuteIf, ParallelOptions, ParallelOutcome,
    SequentialOptions, ToolCall, ToolFailure, ToolResult, PREVIOUS_RESULT_KEY,
};
use crate::tools::{Tool, ToolRegistry};

/// 工具执行引擎：注册表 + 超时 + 并发控制
pub struct ToolEngine {
    registry: ToolRegistry,
    timeout: Duration,
    default_concurrency: usize,
    event_tx: Option<UnboundedSender<AgentEvent>>,
}

impl ToolEngine {
    pub fn new(timeout: Duration) -> Self {
        Self::with_registry(ToolRegistry::new(), timeout)
    }

    pub fn with_registry(registry: ToolRegistry, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            default_concurrency: 3,
            event_tx: None,
        }
    }

    /// 从 [tools] 配置段创建
    pub fn from_config(section: &ToolsSection) -> Self {
        Self::new(Duration::from_millis(section.tool_timeout_ms))
            .with_default_concurrency(section.concurrency)
    }

    pub fn with_default_concurrency(mut self, n: usize) -> Self {
        self.default_concurrency = n.max(1);
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: UnboundedSender<AgentEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn default_concurrency(&self) -> usize {
        self.default_concurrency
    }

    /// 注册工具，同名覆盖
    pub fn register_tool(&self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.registry.register(tool)
    }

    pub fn register_arc(&self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        self.registry.register_arc(tool)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行单个工具调用；任何工具侧失败都转为 error 结果
    pub async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        self.run_call(call, self.timeout).await
    }

    /// 在 concurrency 个许可内并发执行；结果与输入一一对应、保持输入顺序。
    /// fail_fast=true 时第一个失败（含批次超时）使整个批次返回 Err。
    pub async fn execute_parallel_tools(
        &self,
        opts: ParallelOptions,
    ) -> Result<ParallelOutcome, AgentError> {
        let ParallelOptions {
            tools,
            concurrency,
            timeout: batch_timeout,
            fail_fast,
            aggregate_results,
        } = opts;
        let started = Instant::now();
        let deadline = batch_timeout.map(|t| started + t);
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut slots: Vec<Option<ToolResult>> = vec![None; tools.len()];

        tracing::debug!(
            batch = tools.len(),
            concurrency = concurrency.max(1),
            "parallel tool batch start"
        );

        {
            let mut pending: FuturesUnordered<_> = tools
                .iter()
                .enumerate()
                .map(|(idx, call)| {
                    let semaphore = Arc::clone(&semaphore);
                    async move {
                        let result = match semaphore.acquire().await {
                            Ok(_permit) => self.execute_tool(call).await,
                            Err(_) => ToolResult::failure(
                                call.tool_name.clone(),
                                ToolFailure::new(FailureKind::Execution, "tool semaphore closed"),
                                0,
                            ),
                        };
                        (idx, result)
                    }
                })
                .collect();

            while !pending.is_empty() {
                let next = match deadline {
                    Some(d) => match timeout_at(d, pending.next()).await {
                        Ok(next) => next,
                        Err(_) => break,
                    },
                    None => pending.next().await,
                };
                let Some((idx, result)) = next else {
                    break;
                };
                if fail_fast && !result.is_success() {
                    let message = result.error_message().unwrap_or_default().to_string();
                    tracing::warn!(tool = %result.tool_name, error = %message, "parallel batch aborted (fail_fast)");
                    return Err(AgentError::BatchFailed {
                        tool: result.tool_name,
                        message,
                    });
                }
                slots[idx] = Some(result);
            }
            // 未完成的 future 在此处随 pending 一起被丢弃（取消）
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if fail_fast {
            if let Some(idx) = slots.iter().position(|s| s.is_none()) {
                return Err(AgentError::BatchFailed {
                    tool: tools[idx].tool_name.clone(),
                    message: format!("batch timeout after {elapsed_ms}ms"),
                });
            }
        }

        let results: Vec<ToolResult> = slots
            .into_iter()
            .zip(tools.iter())
            .map(|(slot, call)| {
                slot.unwrap_or_else(|| {
                    ToolResult::failure(
                        call.tool_name.clone(),
                        ToolFailure::new(
                            FailureKind::Timeout,
                            format!("batch timeout after {elapsed_ms}ms"),
                        ),
                        elapsed_ms,
                    )
                })
            })
            .collect();

        let aggregate = aggregate_results.then(|| BatchAggregate::from_results(&results));
        Ok(ParallelOutcome { results, aggregate })
    }

    /// 严格按输入顺序执行。stop_on_error=true 时在第一个失败处停止（结果包含该失败项）。
    pub async fn execute_sequential_tools(&self, opts: SequentialOptions) -> Vec<ToolResult> {
        let SequentialOptions {
            tools,
            stop_on_error,
            pass_results,
            timeout: batch_timeout,
        } = opts;
        let started = Instant::now();
        let deadline = batch_timeout.map(|t| started + t);
        let mut results = Vec::with_capacity(tools.len());
        let mut previous: Option<Value> = None;

        for mut call in tools {
            if pass_results {
                if let Some(prev) = previous.take() {
                    call.input = merge_previous(call.input, prev);
                }
            }

            let result = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        ToolResult::failure(
                            call.tool_name.clone(),
                            ToolFailure::new(
                                FailureKind::Timeout,
                                format!("batch timeout after {elapsed_ms}ms"),
                            ),
                            0,
                        )
                    } else {
                        self.run_call(&call, self.timeout.min(d - now)).await
                    }
                }
                None => self.execute_tool(&call).await,
            };

            let failed = !result.is_success();
            previous = result.result.clone();
            results.push(result);
            if failed && stop_on_error {
                tracing::debug!(tool = %call.tool_name, "sequential batch stopped on error");
                break;
            }
        }
        results
    }

    /// 条件执行：条件不满足的项不出现在结果中（不视为错误）
    pub async fn execute_conditional_tools(&self, entries: Vec<ConditionalEntry>) -> Vec<ToolResult> {
        // 工具名 -> 本批次最近一次执行是否成功
        let mut outcomes: HashMap<String, bool> = HashMap::new();
        let mut results = Vec::new();
        for entry in entries {
            if !condition_met(&entry.conditions, &outcomes) {
                tracing::debug!(tool = %entry.call.tool_name, "condition unmet, skipped");
                continue;
            }
            let result = self.execute_tool(&entry.call).await;
            outcomes.insert(result.tool_name.clone(), result.is_success());
            results.push(result);
        }
        results
    }

    async fn run_call(&self, call: &ToolCall, limit: Duration) -> ToolResult {
        let start = std::time::Instant::now();
        let tool_name = call.tool_name.as_str();
        send_event(&self.event_tx, AgentEvent::ToolStarted { tool: tool_name.to_string() });

        let outcome: Result<Value, ToolFailure> = match self.registry.get(tool_name) {
            None => Err(ToolFailure::new(
                FailureKind::UnknownTool,
                format!("Unknown tool: {tool_name}"),
            )),
            Some(tool) => match tool.validate(&call.input) {
                Err(msg) => Err(ToolFailure::new(
                    FailureKind::Validation,
                    format!("Invalid input for {tool_name}: {msg}"),
                )),
                Ok(()) => match timeout(limit, tool.execute(call.input.clone())).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(ToolFailure::new(FailureKind::Execution, e)),
                    Err(_) => Err(ToolFailure::new(
                        FailureKind::Timeout,
                        format!("Tool timeout: {tool_name} after {}ms", limit.as_millis()),
                    )),
                },
            },
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let outcome_label = match &outcome {
            Ok(_) => "ok",
            Err(f) if f.kind == FailureKind::Timeout => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": outcome.is_ok(),
            "outcome": outcome_label,
            "duration_ms": duration_ms,
            "args_preview": args_preview(&call.input),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        send_event(
            &self.event_tx,
            AgentEvent::ToolFinished {
                tool: tool_name.to_string(),
                success: outcome.is_ok(),
                duration_ms,
            },
        );

        match outcome {
            Ok(value) => ToolResult::success(tool_name, value, duration_ms),
            Err(failure) => ToolResult::failure(tool_name, failure, duration_ms),
        }
    }
}

/// 将上一个工具的结果写入输入的保留键；非对象输入包装为 {"input": v, "previous_result": r}
fn merge_previous(input: Value, previous: Value) -> Value {
    match input {
        Value::Object(mut map) => {
            map.insert(PREVIOUS_RESULT_KEY.to_string(), previous);
            Value::Object(map)
        }
        Value::Null => serde_json::json!({ PREVIOUS_RESULT_KEY: previous }),
        other => serde_json::json!({ "input": other, PREVIOUS_RESULT_KEY: previous }),
    }
}

fn condition_met(condition: &Condition, outcomes: &HashMap<String, bool>) -> bool {
    match condition {
        Condition::Always { always } => *always,
        Condition::DependsOn {
            depends_on,
            execute_if,
        } => depends_on.iter().all(|name| match outcomes.get(name) {
            Some(ok) => match execute_if {
                ExecuteIf::Success => *ok,
                ExecuteIf::Failure => !*ok,
            },
            None => false,
        }),
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
