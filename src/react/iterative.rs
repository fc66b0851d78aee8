//! 逐步策略：每次 think 一个动作，完整历史折叠进每次推理调用

use std::sync::Arc;

use async_trait::async_trait;

use crate::reasoner::{PromptMode, Reasoner};
use crate::react::context::ExecutionContext;
use crate::react::planner::{
    default_observation, prompt_for, thought_from_reply, Planner, PlannerStrategy,
};
use crate::react::thought::{ActionResult, AgentThought, Observation};

pub struct IterativePlanner {
    reasoner: Arc<dyn Reasoner>,
}

impl IterativePlanner {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }
}

#[async_trait]
impl Planner for IterativePlanner {
    fn strategy(&self) -> PlannerStrategy {
        PlannerStrategy::Iterative
    }

    async fn think(&self, input: &str, context: &ExecutionContext) -> AgentThought {
        let prompt = prompt_for(input, context, PromptMode::Act);
        match self.reasoner.think(&prompt).await {
            Ok(reply) => thought_from_reply(reply, input, self.strategy()),
            Err(e) => {
                tracing::warn!(error = %e, "reasoner failed during think");
                AgentThought::degraded(format!("Reasoner unavailable: {e}"))
            }
        }
    }

    async fn analyze_result(&self, result: &ActionResult, _context: &ExecutionContext) -> Observation {
        default_observation(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoner::{ReasonerError, ScriptedReasoner};
    use crate::react::thought::AgentAction;
    use serde_json::json;

    #[tokio::test]
    async fn test_history_passed_to_reasoner() {
        let reasoner = Arc::new(
            ScriptedReasoner::new().reply("call echo", json!({"tool": "echo", "args": {"text": "a"}})),
        );
        let planner = IterativePlanner::new(reasoner.clone());
        let mut ctx = ExecutionContext::new("say a", 5, vec!["echo".to_string()]);
        ctx.iteration = 1;
        let thought = planner.think("say a", &ctx).await;
        assert_eq!(thought.action.kind(), "tool_call");
        let prompts = reasoner.prompts().await;
        assert_eq!(prompts[0].available_tools, vec!["echo"]);
        assert_eq!(prompts[0].mode, PromptMode::Act);
        assert!(prompts[0].action_schema.contains("final_answer"));
    }

    #[tokio::test]
    async fn test_reasoner_error_degrades() {
        let reasoner = Arc::new(ScriptedReasoner::new().fail(ReasonerError::Timeout));
        let planner = IterativePlanner::new(reasoner);
        let ctx = ExecutionContext::new("g", 5, vec![]);
        let thought = planner.think("g", &ctx).await;
        assert!(thought.is_degraded());
        match thought.action {
            AgentAction::FinalAnswer { answer } => assert!(answer.contains("timed out")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
