//! 计划执行器
//!
//! 按同步波次调度 ExecutionPlan：
//! 1. 计算就绪集合（Pending 且依赖全部成功）
//! 2. parallel 步骤经 ToolEngine 并行派发，其余步骤按声明顺序逐个执行
//! 3. 可重试的失败在同一波次内重新派发，直到 max_retries
//! 4. 本波次全部结算后才重新计算就绪集合
//!
//! 没有就绪步骤时，剩余 Pending 步骤全部标记为 Skipped，然后对结果分类。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::ExecutorSection;
use crate::core::events::send_event;
use crate::core::{AgentError, AgentEvent, FailureKind, RecoveryAction, RecoveryEngine};
use crate::plan::graph::PlanGraph;
use crate::plan::replan::build_replan_context;
use crate::plan::resolver::ArgumentResolver;
use crate::plan::types::*;
use crate::tools::{ParallelOptions, ToolCall, ToolEngine, ToolFailure, ToolResult};

/// 单次结算后的去向
#[derive(Debug, PartialEq, Eq)]
enum Settled {
    Done,
    Retry,
}

/// 计划执行器
pub struct PlanExecutor {
    engine: Arc<ToolEngine>,
    max_retries: u32,
    retry_backoff: Duration,
    concurrency: usize,
    recovery: RecoveryEngine,
    event_tx: Option<UnboundedSender<AgentEvent>>,
}

impl PlanExecutor {
    pub fn new(engine: Arc<ToolEngine>) -> Self {
        let concurrency = engine.default_concurrency();
        Self {
            engine,
            max_retries: 2,
            retry_backoff: Duration::ZERO,
            concurrency,
            recovery: RecoveryEngine::new(),
            event_tx: None,
        }
    }

    /// 从 [executor] 配置段创建；并发数沿用 ToolEngine 的默认值
    pub fn from_config(engine: Arc<ToolEngine>, section: &ExecutorSection) -> Self {
        Self::new(engine)
            .with_max_retries(section.max_retries)
            .with_retry_backoff(Duration::from_millis(section.retry_backoff_ms))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: UnboundedSender<AgentEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn engine(&self) -> &Arc<ToolEngine> {
        &self.engine
    }

    /// 执行计划，原地更新步骤状态。结构不合法时返回 InvalidPlan 且不修改计划。
    /// 除沿用自旧计划的成功步骤外，传入的步骤状态都不被信任，执行前重置为 Pending。
    pub async fn execute(&self, plan: &mut ExecutionPlan) -> Result<ExecutionResult, AgentError> {
        let graph = PlanGraph::build(plan)?;

        let reset = plan.reset_for_execution();
        if !reset.is_empty() {
            tracing::debug!(plan_id = %plan.id, steps = ?reset, "stale step states reset to pending");
        }
        plan.status = PlanStatus::Running;
        plan.started_at = Some(Utc::now());
        let mut report = ExecutionReport {
            plan_id: plan.id.clone(),
            // 沿用自旧计划的成功步骤视为已满足
            successful_steps: plan.step_ids_with(StepStatus::Succeeded),
            ..Default::default()
        };

        tracing::info!(
            plan_id = %plan.id,
            steps = plan.steps.len(),
            reused = report.successful_steps.len(),
            "plan execution start"
        );

        let mut wave = 0usize;
        loop {
            let ready = graph.ready_steps(plan);
            if ready.is_empty() {
                break;
            }
            wave += 1;
            tracing::debug!(plan_id = %plan.id, wave, steps = ?ready, "wave start");
            send_event(
                &self.event_tx,
                AgentEvent::WaveStarted {
                    plan_id: plan.id.clone(),
                    wave,
                    steps: ready.clone(),
                },
            );

            let (parallel, sequential): (Vec<StepId>, Vec<StepId>) = ready
                .into_iter()
                .partition(|id| plan.get_step(id).map(|s| s.parallel).unwrap_or(false));

            if !parallel.is_empty() {
                self.run_parallel_group(plan, parallel, wave, &mut report).await;
            }
            for id in sequential {
                self.run_step(plan, &id, wave, &mut report).await;
            }
        }

        for id in graph.blocked_steps(plan) {
            if let Some(step) = plan.get_step_mut(&id) {
                step.status = StepStatus::Skipped;
            }
        }
        // 无环图中剩余的 Pending 步骤只可能是阻塞的
        for step in plan.steps.iter_mut().filter(|s| s.status == StepStatus::Pending) {
            step.status = StepStatus::Skipped;
        }
        report.skipped_steps = plan.step_ids_with(StepStatus::Skipped);

        plan.completed_at = Some(Utc::now());
        let result = if report.failed_steps.is_empty() {
            plan.status = PlanStatus::Completed;
            ExecutionResult::ExecutionComplete { report }
        } else if !report.successful_steps.is_empty() {
            plan.status = PlanStatus::NeedsReplan;
            let replan_context = build_replan_context(plan, &report);
            ExecutionResult::NeedsReplan {
                report,
                replan_context,
            }
        } else {
            plan.status = PlanStatus::Deadlocked;
            ExecutionResult::Deadlock { report }
        };

        let r = result.report();
        tracing::info!(
            plan_id = %plan.id,
            outcome = result.kind(),
            waves = wave,
            succeeded = r.successful_steps.len(),
            failed = r.failed_steps.len(),
            skipped = r.skipped_steps.len(),
            "plan execution finished"
        );
        send_event(
            &self.event_tx,
            AgentEvent::PlanFinished {
                plan_id: plan.id.clone(),
                outcome: result.kind().to_string(),
            },
        );
        Ok(result)
    }

    /// 并行组：每一轮把仍需执行的步骤一次性交给 execute_parallel_tools
    async fn run_parallel_group(
        &self,
        plan: &mut ExecutionPlan,
        ids: Vec<StepId>,
        wave: usize,
        report: &mut ExecutionReport,
    ) {
        let mut pending = ids;
        while !pending.is_empty() {
            let mut dispatched: Vec<StepId> = Vec::with_capacity(pending.len());
            let mut calls: Vec<ToolCall> = Vec::with_capacity(pending.len());
            for id in &pending {
                match self.begin_attempt(plan, id) {
                    Ok(call) => {
                        dispatched.push(id.clone());
                        calls.push(call);
                    }
                    Err((tool, err)) => {
                        let failure = ToolFailure::new(FailureKind::from(&err), err.to_string());
                        self.settle(plan, id, ToolResult::failure(tool, failure, 0), wave, report);
                    }
                }
            }
            if calls.is_empty() {
                break;
            }

            let opts = ParallelOptions::new(calls.clone()).concurrency(self.concurrency);
            let results = match self.engine.execute_parallel_tools(opts).await {
                Ok(outcome) => outcome.results,
                // fail_fast 关闭时不会出现；保险起见把整组记为执行失败
                Err(e) => calls
                    .iter()
                    .map(|c| {
                        ToolResult::failure(
                            c.tool_name.clone(),
                            ToolFailure::new(FailureKind::Execution, e.to_string()),
                            0,
                        )
                    })
                    .collect(),
            };

            let mut retry = Vec::new();
            for (id, result) in dispatched.into_iter().zip(results) {
                if self.settle(plan, &id, result, wave, report) == Settled::Retry {
                    retry.push(id);
                }
            }
            if !retry.is_empty() && !self.retry_backoff.is_zero() {
                tokio::time::sleep(self.retry_backoff).await;
            }
            pending = retry;
        }
    }

    async fn run_step(
        &self,
        plan: &mut ExecutionPlan,
        id: &str,
        wave: usize,
        report: &mut ExecutionReport,
    ) {
        loop {
            let result = match self.begin_attempt(plan, id) {
                Ok(call) => self.engine.execute_tool(&call).await,
                Err((tool, err)) => ToolResult::failure(
                    tool,
                    ToolFailure::new(FailureKind::from(&err), err.to_string()),
                    0,
                ),
            };
            if self.settle(plan, id, result, wave, report) == Settled::Done {
                break;
            }
            if !self.retry_backoff.is_zero() {
                tokio::time::sleep(self.retry_backoff).await;
            }
        }
    }

    /// 标记 Running、计数并解析参数。解析失败时返回 (工具名, Dependency 错误)。
    fn begin_attempt(
        &self,
        plan: &mut ExecutionPlan,
        id: &str,
    ) -> Result<ToolCall, (String, AgentError)> {
        let resolved = {
            let step = plan
                .get_step(id)
                .ok_or_else(|| (String::new(), AgentError::InvalidPlan(format!("unknown step '{id}'"))))?;
            let resolver = ArgumentResolver::from_plan(plan);
            resolver
                .resolve(&step.args)
                .map(|input| ToolCall::new(step.tool.clone(), input))
                .map_err(|e| (step.tool.clone(), e))
        };

        let plan_id = plan.id.clone();
        if let Some(step) = plan.get_step_mut(id) {
            step.status = StepStatus::Running;
            step.attempts += 1;
            step.started_at.get_or_insert_with(Utc::now);
            send_event(
                &self.event_tx,
                AgentEvent::StepStarted {
                    plan_id,
                    step_id: id.to_string(),
                    attempt: step.attempts,
                },
            );
        }
        resolved
    }

    /// 记录轨迹与指标；可重试时把步骤留在 Running 并返回 Retry
    fn settle(
        &self,
        plan: &mut ExecutionPlan,
        id: &str,
        result: ToolResult,
        wave: usize,
        report: &mut ExecutionReport,
    ) -> Settled {
        let plan_id = plan.id.clone();
        let Some(step) = plan.get_step_mut(id) else {
            return Settled::Done;
        };
        let now = Utc::now();
        let success = result.is_success();

        report.executed_steps.push(StepTrace {
            step_id: step.id.clone(),
            tool: step.tool.clone(),
            wave,
            attempt: step.attempts,
            success,
            duration_ms: result.duration_ms,
            executed_at: now,
            error: result.error_message().map(|s| s.to_string()),
        });

        let total_ms = step.metrics.as_ref().map(|m| m.duration_ms).unwrap_or(0) + result.duration_ms;
        step.metrics = Some(StepMetrics {
            executed_at: now,
            duration_ms: total_ms,
            success,
            attempts: step.attempts,
        });

        match result.error {
            None => {
                step.status = StepStatus::Succeeded;
                step.result = Some(result.result.unwrap_or_default());
                step.error = None;
                step.failure_kind = None;
                step.completed_at = Some(now);
                report.successful_steps.push(step.id.clone());
                tracing::debug!(plan_id = %plan_id, step = %step.id, duration_ms = total_ms, "step succeeded");
            }
            Some(failure) => {
                let action = self
                    .recovery
                    .for_step(failure.kind, step.attempts, self.max_retries);
                if action == RecoveryAction::RetryStep {
                    tracing::warn!(
                        plan_id = %plan_id,
                        step = %step.id,
                        attempt = step.attempts,
                        error = %failure.message,
                        "step failed, retrying"
                    );
                    send_event(
                        &self.event_tx,
                        AgentEvent::StepRetry {
                            plan_id,
                            step_id: step.id.clone(),
                            attempt: step.attempts,
                            reason: failure.message,
                        },
                    );
                    return Settled::Retry;
                }
                tracing::warn!(
                    plan_id = %plan_id,
                    step = %step.id,
                    kind = ?failure.kind,
                    error = %failure.message,
                    "step failed"
                );
                step.status = StepStatus::Failed;
                step.error = Some(failure.message);
                step.failure_kind = Some(failure.kind);
                step.completed_at = Some(now);
                report.failed_steps.push(step.id.clone());
            }
        }

        send_event(
            &self.event_tx,
            AgentEvent::StepFinished {
                plan_id,
                step_id: step.id.clone(),
                success,
                duration_ms: total_ms,
            },
        );
        Settled::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanBuilder;
    use crate::tools::{EchoTool, FnTool};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn engine() -> Arc<ToolEngine> {
        let engine = ToolEngine::new(Duration::from_secs(5));
        engine.register_tool(EchoTool).unwrap();
        engine
            .register_tool(FnTool::new("fail", "always fails", |_| async {
                Err::<Value, String>("boom".to_string())
            }))
            .unwrap();
        engine
            .register_tool(FnTool::new("double", "doubles n", |input| async move {
                let n = input["n"].as_i64().ok_or_else(|| "n must be a number".to_string())?;
                Ok::<Value, String>(json!({"n": n * 2}))
            }))
            .unwrap();
        Arc::new(engine)
    }

    #[tokio::test]
    async fn test_chain_resolves_references() {
        let mut plan = PlanBuilder::new("double twice")
            .step("a", "double", json!({"n": 2}))
            .step("b", "double", json!({"n": "{{a.n}}"}))
            .sequential("a", "b")
            .build()
            .unwrap();
        let result = PlanExecutor::new(engine()).execute(&mut plan).await.unwrap();
        assert!(result.is_complete());
        assert_eq!(plan.get_step("b").unwrap().result, Some(json!({"n": 8})));
        assert_eq!(plan.status, PlanStatus::Completed);
        let trace: Vec<&str> = result.report().executed_steps.iter().map(|t| t.step_id.as_str()).collect();
        assert_eq!(trace, vec!["a", "b"]);
        assert_eq!(result.report().executed_steps[1].wave, 2);
    }

    #[tokio::test]
    async fn test_partial_failure_needs_replan() {
        let mut plan = PlanBuilder::new("g")
            .step("ok", "echo", json!({"text": "hi"}))
            .step("bad", "fail", json!({}))
            .step("after", "echo", json!({"text": "{{bad.text}}"}))
            .sequential("bad", "after")
            .build()
            .unwrap();
        let result = PlanExecutor::new(engine())
            .with_max_retries(0)
            .execute(&mut plan)
            .await
            .unwrap();
        assert_eq!(result.kind(), "needs_replan");
        let report = result.report();
        assert_eq!(report.successful_steps, vec!["ok"]);
        assert_eq!(report.failed_steps, vec!["bad"]);
        assert_eq!(report.skipped_steps, vec!["after"]);
        let ctx = result.replan_context().unwrap();
        assert_eq!(ctx.preserved_steps[0].result, json!({"text": "hi"}));
        assert_eq!(plan.get_step("after").unwrap().status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_all_failed_is_deadlock() {
        let mut plan = PlanBuilder::new("g")
            .step("a", "fail", json!({}))
            .step("b", "echo", json!({"text": "x"}))
            .sequential("a", "b")
            .build()
            .unwrap();
        let result = PlanExecutor::new(engine())
            .with_max_retries(0)
            .execute(&mut plan)
            .await
            .unwrap();
        assert!(result.is_deadlock());
        assert_eq!(result.report().failed_steps, vec!["a"]);
        assert_eq!(result.report().skipped_steps, vec!["b"]);
        assert_eq!(plan.status, PlanStatus::Deadlocked);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = engine();
        let counter = Arc::clone(&calls);
        engine
            .register_tool(FnTool::new("flaky", "fails twice", move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err::<Value, String>("transient".to_string())
                    } else {
                        Ok(json!("ok"))
                    }
                }
            }))
            .unwrap();
        let mut plan = PlanBuilder::new("g").step("f", "flaky", json!({})).build().unwrap();
        let result = PlanExecutor::new(engine)
            .with_max_retries(2)
            .execute(&mut plan)
            .await
            .unwrap();
        assert!(result.is_complete());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(plan.steps[0].attempts, 3);
        assert_eq!(result.report().executed_steps.len(), 3);
        assert_eq!(plan.steps[0].metrics.as_ref().unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_not_retried() {
        let mut plan = PlanBuilder::new("g").step("x", "ghost", json!({})).build().unwrap();
        let result = PlanExecutor::new(engine())
            .with_max_retries(5)
            .execute(&mut plan)
            .await
            .unwrap();
        assert!(result.is_deadlock());
        assert_eq!(plan.steps[0].attempts, 1);
        assert_eq!(plan.steps[0].failure_kind, Some(FailureKind::UnknownTool));
    }

    #[tokio::test]
    async fn test_unresolved_reference_fails_only_that_step() {
        let mut plan = PlanBuilder::new("g")
            .step("a", "echo", json!({"text": "one"}))
            .step("b", "echo", json!({"text": "{{nowhere.text}}"}))
            .parallel(&["a", "b"])
            .build()
            .unwrap();
        let result = PlanExecutor::new(engine()).execute(&mut plan).await.unwrap();
        assert_eq!(result.report().successful_steps, vec!["a"]);
        assert_eq!(result.report().failed_steps, vec!["b"]);
        assert_eq!(plan.get_step("b").unwrap().failure_kind, Some(FailureKind::Dependency));
    }

    #[tokio::test]
    async fn test_invalid_plan_not_mutated() {
        let mut plan = ExecutionPlan::new("g", "manual");
        plan.steps = vec![PlanStep::new("a", "echo", json!({})).depends_on("missing")];
        let before = plan.clone();
        let err = PlanExecutor::new(engine()).execute(&mut plan).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidPlan(_)));
        assert_eq!(plan, before);
    }

    #[tokio::test]
    async fn test_carried_forward_steps_not_rerun() {
        let mut plan = PlanBuilder::new("g")
            .step("a", "fail", json!({}))
            .step("b", "echo", json!({"text": "{{a.text}}"}))
            .sequential("a", "b")
            .build()
            .unwrap();
        plan.steps[0].status = StepStatus::Succeeded;
        plan.steps[0].result = Some(json!({"text": "reused"}));
        plan.steps[0].reused_from = Some("plan_old".to_string());
        let result = PlanExecutor::new(engine()).execute(&mut plan).await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.report().executed_steps.len(), 1);
        assert_eq!(plan.get_step("b").unwrap().result, Some(json!({"text": "reused"})));
    }

    #[tokio::test]
    async fn test_prefailed_step_is_executed_again() {
        let mut plan = PlanBuilder::new("g")
            .step("a", "echo", json!({"text": "fresh"}))
            .step("b", "echo", json!({"text": "{{a.text}}"}))
            .sequential("a", "b")
            .build()
            .unwrap();
        plan.steps[0].status = StepStatus::Failed;
        plan.steps[0].error = Some("stale".to_string());
        plan.steps[0].attempts = 3;
        plan.steps[1].status = StepStatus::Skipped;
        let result = PlanExecutor::new(engine()).execute(&mut plan).await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.report().successful_steps, vec!["a", "b"]);
        assert!(result.report().failed_steps.is_empty());
        let a = plan.get_step("a").unwrap();
        assert_eq!(a.attempts, 1);
        assert!(a.error.is_none());
        assert_eq!(plan.get_step("b").unwrap().result, Some(json!({"text": "fresh"})));
    }

    #[tokio::test]
    async fn test_prefailed_failing_step_is_not_complete() {
        let mut plan = PlanBuilder::new("g").step("a", "fail", json!({})).build().unwrap();
        plan.steps[0].status = StepStatus::Failed;
        let result = PlanExecutor::new(engine())
            .with_max_retries(0)
            .execute(&mut plan)
            .await
            .unwrap();
        assert!(result.is_deadlock());
        assert_eq!(result.report().failed_steps, vec!["a"]);
    }

    #[tokio::test]
    async fn test_unvouched_success_is_rerun() {
        let mut plan = PlanBuilder::new("g")
            .step("a", "fail", json!({}))
            .step("b", "echo", json!({"text": "{{a.text}}"}))
            .sequential("a", "b")
            .build()
            .unwrap();
        plan.steps[0].status = StepStatus::Succeeded;
        plan.steps[0].result = Some(json!({"text": "injected"}));
        let result = PlanExecutor::new(engine())
            .with_max_retries(0)
            .execute(&mut plan)
            .await
            .unwrap();
        assert!(result.is_deadlock());
        assert_eq!(result.report().failed_steps, vec!["a"]);
        assert_eq!(plan.get_step("b").unwrap().status, StepStatus::Skipped);
        assert!(plan.get_step("a").unwrap().result.is_none());
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut plan = PlanBuilder::new("g").step("a", "echo", json!({"text": "x"})).build().unwrap();
        PlanExecutor::new(engine())
            .with_event_tx(tx)
            .execute(&mut plan)
            .await
            .unwrap();
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(serde_json::to_value(&ev).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(
            kinds,
            vec!["wave_started", "step_started", "step_finished", "plan_finished"]
        );
    }
}
