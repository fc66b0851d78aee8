//! 先规划后执行：think 让 Reasoner 生成整份计划，由循环交给 PlanExecutor。
//! needs_replan 之后的 think 会带上 previous_execution（旧计划、结果、保留步骤、失败分析）。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::reasoner::{PlanningContext, Reasoner};
use crate::react::context::ExecutionContext;
use crate::react::planner::{default_observation, Planner, PlannerStrategy};
use crate::react::thought::{ActionResult, AgentAction, AgentThought, Observation};

pub struct PlanExecutePlanner {
    reasoner: Arc<dyn Reasoner>,
}

impl PlanExecutePlanner {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }
}

#[async_trait]
impl Planner for PlanExecutePlanner {
    fn strategy(&self) -> PlannerStrategy {
        PlannerStrategy::PlanExecute
    }

    async fn think(&self, input: &str, context: &ExecutionContext) -> AgentThought {
        let planning = PlanningContext {
            available_tools: context.available_tools.clone(),
            tool_schemas: context.tool_schemas.clone(),
            history: context.history_digests(),
            previous_execution: context.previous_execution.clone(),
        };
        let hint = context
            .previous_execution
            .as_ref()
            .and_then(|p| p.result.replan_context())
            .map(|c| c.suggested_strategy.as_str());

        let draft = match self.reasoner.create_plan(input, hint, &planning).await {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!(error = %e, "reasoner failed to create a plan");
                return AgentThought::degraded(format!("Reasoner unavailable: {e}"));
            }
        };

        let signals = serde_json::to_value(&draft.signals).unwrap_or(Value::Null);
        if draft.steps.is_empty() {
            if !draft.signals.errors.is_empty() {
                return AgentThought::degraded(format!(
                    "Planner could not build a plan: {}",
                    draft.signals.errors.join("; ")
                ))
                .with_metadata("signals", signals);
            }
            if draft.reasoning.trim().is_empty() {
                return AgentThought::degraded("Planner returned an empty plan");
            }
            // 无需工具即可回答
            let answer = draft.reasoning.clone();
            return AgentThought::new(draft.reasoning, AgentAction::final_answer(answer))
                .with_metadata("signals", signals);
        }

        let reasoning = draft.reasoning.clone();
        let audit = draft.audit.clone();
        let plan = draft.into_plan(input, self.strategy().as_str());
        tracing::info!(plan_id = %plan.id, steps = plan.steps.len(), replan = hint.is_some(), "plan created");
        AgentThought::new(
            reasoning,
            AgentAction::ExecutePlan {
                plan: Box::new(plan),
            },
        )
        .with_metadata("signals", signals)
        .with_metadata("audit", audit)
    }

    async fn analyze_result(&self, result: &ActionResult, _context: &ExecutionContext) -> Observation {
        default_observation(result)
    }
}
