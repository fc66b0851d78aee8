//! Agent 主循环
//!
//! think → act（ToolEngine / PlanExecutor）→ observe → 下一轮 think；支持取消、最大轮数、重新规划上限。
//! 终止条件：Observation.is_complete、should_continue=false、轮数耗尽、取消、运行级错误。
//! 最后一次 AgentThought / Observation 总会随 RunOutcome 返回。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::events::send_event;
use crate::core::{AgentError, AgentEvent, RecoveryAction, RecoveryEngine};
use crate::plan::{ExecutionPlan, ExecutionResult, PlanExecutor};
use crate::react::context::{ExecutionContext, HistoryEntry, PreviousExecution};
use crate::react::planner::Planner;
use crate::react::thought::{ActionResult, AgentAction, AgentThought, Observation};
use crate::tools::{ParallelOptions, SequentialOptions, ToolEngine};

/// 未配置时的最大轮数，防止死循环
const MAX_ITERATIONS: usize = 20;
const MAX_REPLANS: u32 = 3;

/// 一次运行的结果
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub answer: Option<String>,
    pub error: Option<String>,
    pub iterations: usize,
    pub last_thought: Option<AgentThought>,
    pub last_observation: Option<Observation>,
    pub history: Vec<HistoryEntry>,
    /// 所有成功产出（工具结果、成功步骤结果），按产生顺序
    pub partial_results: Vec<Value>,
}

/// 驱动 Planner 的循环
pub struct AgentLoop {
    planner: Arc<dyn Planner>,
    engine: Arc<ToolEngine>,
    executor: PlanExecutor,
    recovery: RecoveryEngine,
    max_iterations: usize,
    max_replans: u32,
    cancel_token: CancellationToken,
    event_tx: Option<UnboundedSender<AgentEvent>>,
}

impl AgentLoop {
    pub fn new(planner: Arc<dyn Planner>, engine: Arc<ToolEngine>) -> Self {
        Self {
            planner,
            executor: PlanExecutor::new(Arc::clone(&engine)),
            engine,
            recovery: RecoveryEngine::new(),
            max_iterations: MAX_ITERATIONS,
            max_replans: MAX_REPLANS,
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }

    /// 按 [executor] 与 [planner] 配置段创建
    pub fn from_config(planner: Arc<dyn Planner>, engine: Arc<ToolEngine>, config: &AppConfig) -> Self {
        let executor = PlanExecutor::from_config(Arc::clone(&engine), &config.executor);
        Self::new(planner, engine)
            .with_executor(executor)
            .with_max_iterations(config.planner.max_iterations)
            .with_max_replans(config.planner.max_replans)
    }

    pub fn with_executor(mut self, executor: PlanExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_max_replans(mut self, n: u32) -> Self {
        self.max_replans = n;
        self
    }

    /// 设置取消令牌；每轮开始前检查
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: UnboundedSender<AgentEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 运行到终止；任何失败都体现为 success=false + error，不会 panic 或返回 Err
    pub async fn run(&self, input: &str) -> RunOutcome {
        let mut ctx = ExecutionContext::new(input, self.max_iterations, self.engine.tool_names())
            .with_tool_schemas(self.engine.registry().to_schema_json());
        let mut partial_results: Vec<Value> = Vec::new();
        let mut last_thought: Option<AgentThought> = None;
        let mut last_observation: Option<Observation> = None;
        let mut answer: Option<String> = None;
        let mut error: Option<String> = None;
        let mut success = false;

        tracing::info!(
            strategy = %self.planner.strategy(),
            max_iterations = self.max_iterations,
            "agent run start"
        );

        loop {
            if self.cancel_token.is_cancelled() {
                error = Some(AgentError::Cancelled.to_string());
                break;
            }
            if ctx.iteration >= ctx.max_iterations {
                error = Some(format!("Max iterations ({}) reached", ctx.max_iterations));
                tracing::warn!(iterations = ctx.iteration, "iteration budget exhausted");
                break;
            }
            ctx.iteration += 1;
            send_event(
                &self.event_tx,
                AgentEvent::IterationStarted {
                    iteration: ctx.iteration,
                    max_iterations: ctx.max_iterations,
                },
            );

            let thought = self.planner.think(input, &ctx).await;
            tracing::debug!(iteration = ctx.iteration, action = thought.action.kind(), "thought");
            send_event(
                &self.event_tx,
                AgentEvent::Thought {
                    reasoning: thought.reasoning.clone(),
                    action: thought.action.kind().to_string(),
                },
            );

            let (result, fatal) = match self.dispatch(&thought, &mut ctx).await {
                Ok(result) => (result, None),
                Err(e) => (ActionResult::Failed { error: e.to_string() }, Some(e)),
            };
            partial_results.extend(result.outputs());

            let observation = self.planner.analyze_result(&result, &ctx).await;
            send_event(
                &self.event_tx,
                AgentEvent::Observation {
                    is_complete: observation.is_complete,
                    is_successful: observation.is_successful,
                    feedback: observation.feedback.clone(),
                },
            );

            ctx.history.push(HistoryEntry {
                iteration: ctx.iteration,
                thought: thought.clone(),
                result: result.clone(),
                observation: observation.clone(),
            });
            last_thought = Some(thought);
            last_observation = Some(observation.clone());

            if let Some(e) = fatal {
                tracing::warn!(error = %e, "run terminated");
                send_event(&self.event_tx, AgentEvent::Error { text: e.to_string() });
                if let AgentError::ReplanExhausted { .. } = e {
                    if let Some(prev) = &ctx.previous_execution {
                        partial_results = prev.preserved_steps.iter().map(|s| s.result.clone()).collect();
                    }
                }
                error = Some(e.to_string());
                break;
            }

            if observation.is_complete {
                success = observation.is_successful;
                if success {
                    answer = Some(final_text(&result, &observation));
                } else {
                    error = Some(observation.feedback.clone());
                    answer = Some(observation.feedback.clone());
                }
                break;
            }
            if !observation.should_continue {
                error = Some(observation.feedback.clone());
                break;
            }
        }

        tracing::info!(success, iterations = ctx.iteration, "agent run finished");
        send_event(
            &self.event_tx,
            AgentEvent::RunFinished {
                success,
                iterations: ctx.iteration,
            },
        );

        RunOutcome {
            success,
            answer,
            error,
            iterations: ctx.iteration,
            last_thought,
            last_observation,
            history: ctx.history,
            partial_results,
        }
    }

    /// 执行动作。Err 表示运行必须终止。
    async fn dispatch(
        &self,
        thought: &AgentThought,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionResult, AgentError> {
        let outcome = match &thought.action {
            AgentAction::FinalAnswer { answer } => {
                return Ok(ActionResult::FinalAnswer {
                    answer: answer.clone(),
                    degraded: thought.is_degraded(),
                })
            }
            AgentAction::ToolCall { call } => {
                return Ok(ActionResult::Tool {
                    result: self.engine.execute_tool(call).await,
                })
            }
            AgentAction::ParallelTools {
                calls,
                concurrency,
                timeout_ms,
                fail_fast,
            } => {
                let mut opts = ParallelOptions::new(calls.clone())
                    .concurrency(concurrency.unwrap_or(self.engine.default_concurrency()))
                    .fail_fast(*fail_fast)
                    .aggregate(true);
                if let Some(ms) = timeout_ms {
                    opts = opts.timeout(Duration::from_millis(*ms));
                }
                self.engine
                    .execute_parallel_tools(opts)
                    .await
                    .map(|o| ActionResult::Batch {
                        results: o.results,
                        aggregate: o.aggregate,
                    })
            }
            AgentAction::SequentialTools {
                calls,
                stop_on_error,
                pass_results,
            } => {
                let opts = SequentialOptions::new(calls.clone())
                    .stop_on_error(*stop_on_error)
                    .pass_results(*pass_results);
                return Ok(ActionResult::Batch {
                    results: self.engine.execute_sequential_tools(opts).await,
                    aggregate: None,
                });
            }
            AgentAction::ConditionalTools { entries } => {
                return Ok(ActionResult::Batch {
                    results: self.engine.execute_conditional_tools(entries.clone()).await,
                    aggregate: None,
                });
            }
            AgentAction::ExecutePlan { plan } => self.run_plan(plan.as_ref().clone(), ctx).await,
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(e) => match self.recovery.for_run(&e) {
                RecoveryAction::Replan | RecoveryAction::RetryStep | RecoveryAction::MarkFailed => {
                    Ok(ActionResult::Failed { error: e.to_string() })
                }
                RecoveryAction::Degrade(message) => Ok(ActionResult::FinalAnswer {
                    answer: message,
                    degraded: true,
                }),
                RecoveryAction::Abort => Err(e),
            },
        }
    }

    /// 执行计划并维护重新规划状态
    async fn run_plan(
        &self,
        mut plan: ExecutionPlan,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionResult, AgentError> {
        if let Some(prev) = &ctx.previous_execution {
            if let Some(replan_context) = prev.result.replan_context() {
                plan.carry_forward(replan_context, &prev.plan.id);
            }
        }

        let outcome = self.executor.execute(&mut plan).await?;
        match &outcome {
            ExecutionResult::NeedsReplan { replan_context, .. } => {
                ctx.replan_count += 1;
                ctx.previous_execution =
                    Some(PreviousExecution::from_outcome(plan.clone(), outcome.clone()));
                if ctx.replan_count > self.max_replans {
                    tracing::warn!(replans = self.max_replans, "replan limit reached");
                    return Err(AgentError::ReplanExhausted {
                        replans: self.max_replans,
                    });
                }
                tracing::info!(
                    replan = ctx.replan_count,
                    cause = %replan_context.primary_cause,
                    "replan triggered"
                );
                send_event(
                    &self.event_tx,
                    AgentEvent::ReplanTriggered {
                        replan: ctx.replan_count,
                        cause: replan_context.primary_cause.clone(),
                    },
                );
            }
            ExecutionResult::ExecutionComplete { .. } => ctx.previous_execution = None,
            ExecutionResult::Deadlock { .. } => {
                ctx.previous_execution =
                    Some(PreviousExecution::from_outcome(plan.clone(), outcome.clone()));
            }
        }

        Ok(ActionResult::Plan {
            plan: Box::new(plan),
            outcome,
        })
    }
}

/// 成功结束时的回答：final_answer 原文；计划完成时取最后一个成功步骤的结果
fn final_text(result: &ActionResult, observation: &Observation) -> String {
    match result {
        ActionResult::FinalAnswer { answer, .. } => answer.clone(),
        ActionResult::Plan { plan, outcome } => outcome
            .report()
            .successful_steps
            .last()
            .and_then(|id| plan.get_step(id))
            .and_then(|s| s.result.as_ref())
            .map(render_value)
            .unwrap_or_else(|| observation.feedback.clone()),
        _ => observation.feedback.clone(),
    }
}

fn render_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlannerSection;
    use crate::reasoner::{Reasoner, ScriptedReasoner};
    use crate::react::planner::{PlannerFactory, PlannerStrategy};
    use crate::tools::EchoTool;
    use serde_json::json;

    fn engine() -> Arc<ToolEngine> {
        let engine = ToolEngine::new(Duration::from_secs(5));
        engine.register_tool(EchoTool).unwrap();
        Arc::new(engine)
    }

    fn iterative(reasoner: Arc<ScriptedReasoner>) -> Arc<dyn Planner> {
        let reasoner: Arc<dyn Reasoner> = reasoner;
        PlannerFactory::create(PlannerStrategy::Iterative, Some(reasoner), &PlannerSection::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_tool_then_answer() {
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .reply("echo first", json!({"tool": "echo", "args": {"text": "hi"}}))
                .reply("done", json!({"type": "final_answer", "answer": "said hi"})),
        );
        let outcome = AgentLoop::new(iterative(reasoner.clone()), engine()).run("say hi").await;
        assert!(outcome.success);
        assert_eq!(outcome.answer.as_deref(), Some("said hi"));
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.partial_results, vec![json!({"text": "hi"})]);
        let prompts = reasoner.prompts().await;
        assert_eq!(prompts[1].history.len(), 1);
        let tools: Value = serde_json::from_str(&prompts[0].tool_schemas).unwrap();
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(tools[0]["parameters"]["required"], json!(["text"]));
    }

    #[tokio::test]
    async fn test_budget_exhausted_surfaces_last_thought() {
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .reply("1", json!({"tool": "echo", "args": {"text": "1"}}))
                .reply("2", json!({"tool": "echo", "args": {"text": "2"}})),
        );
        let outcome = AgentLoop::new(iterative(reasoner), engine())
            .with_max_iterations(2)
            .run("loop")
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.error.unwrap().contains("Max iterations"));
        assert_eq!(outcome.last_thought.unwrap().reasoning, "2");
        assert!(outcome.last_observation.is_some());
    }

    #[tokio::test]
    async fn test_reasoner_failure_degrades_gracefully() {
        let reasoner = Arc::new(ScriptedReasoner::new());
        let outcome = AgentLoop::new(iterative(reasoner), engine()).run("g").await;
        assert!(!outcome.success);
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.last_thought.unwrap().is_degraded());
        assert!(outcome.error.unwrap().contains("Reasoner unavailable"));
    }

    #[tokio::test]
    async fn test_reversed_braces_in_reply_degrades() {
        let reasoner = Arc::new(
            ScriptedReasoner::new().reply("odd output", json!("close } before { open")),
        );
        let outcome = AgentLoop::new(iterative(reasoner), engine()).run("g").await;
        assert!(!outcome.success);
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.last_thought.unwrap().is_degraded());
        assert!(outcome.error.unwrap().contains("Could not act on reasoner output"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let reasoner = Arc::new(ScriptedReasoner::new());
        let outcome = AgentLoop::new(iterative(reasoner.clone()), engine())
            .with_cancel_token(token)
            .run("g")
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(reasoner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_plan_degrades() {
        let reasoner = Arc::new(ScriptedReasoner::new().reply(
            "cyclic",
            json!({"type": "execute_plan", "steps": [
                {"id": "a", "tool": "echo", "args": {"text": "a"}, "dependencies": ["b"]},
                {"id": "b", "tool": "echo", "args": {"text": "b"}, "dependencies": ["a"]}
            ]}),
        ));
        let outcome = AgentLoop::new(iterative(reasoner), engine()).run("g").await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("Plan rejected"));
    }
}
