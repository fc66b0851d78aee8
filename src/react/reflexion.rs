//! Reflexion：结果失败时让 Reasoner 做一次自我批评
//!
//! 批评写入 Observation.feedback，随历史保存；下一次 think 把最近 max_reflections 条批评
//! 放进 PromptContext.reflections，减少重复犯错。批评以 "OK" 开头视为认可，保留原反馈；
//! 批评调用失败时退回原始错误文本。

use std::sync::Arc;

use async_trait::async_trait;

use crate::reasoner::{PromptMode, Reasoner};
use crate::react::context::ExecutionContext;
use crate::react::planner::{
    default_observation, prompt_for, thought_from_reply, Planner, PlannerStrategy,
};
use crate::react::thought::{ActionResult, AgentThought, Observation};

pub struct ReflexionPlanner {
    reasoner: Arc<dyn Reasoner>,
    max_reflections: usize,
}

impl ReflexionPlanner {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            reasoner,
            max_reflections: 3,
        }
    }

    pub fn with_max_reflections(mut self, n: usize) -> Self {
        self.max_reflections = n;
        self
    }

    /// 最近的失败反馈（按时间顺序）
    fn reflections(&self, context: &ExecutionContext) -> Vec<String> {
        let mut out: Vec<String> = context
            .history
            .iter()
            .rev()
            .filter(|h| !h.observation.is_successful && !h.observation.is_complete)
            .take(self.max_reflections)
            .map(|h| h.observation.feedback.clone())
            .collect();
        out.reverse();
        out
    }
}

#[async_trait]
impl Planner for ReflexionPlanner {
    fn strategy(&self) -> PlannerStrategy {
        PlannerStrategy::Reflexion
    }

    async fn think(&self, input: &str, context: &ExecutionContext) -> AgentThought {
        let mut prompt = prompt_for(input, context, PromptMode::Act);
        prompt.reflections = self.reflections(context);
        match self.reasoner.think(&prompt).await {
            Ok(reply) => thought_from_reply(reply, input, self.strategy()),
            Err(e) => {
                tracing::warn!(error = %e, "reasoner failed during think");
                AgentThought::degraded(format!("Reasoner unavailable: {e}"))
            }
        }
    }

    async fn analyze_result(&self, result: &ActionResult, context: &ExecutionContext) -> Observation {
        let mut observation = default_observation(result);
        if observation.is_successful || observation.is_complete || !observation.should_continue {
            return observation;
        }

        let prompt = prompt_for(
            &context.goal,
            context,
            PromptMode::Reflect {
                failure: observation.feedback.clone(),
            },
        );
        match self.reasoner.think(&prompt).await {
            Ok(reply) => {
                let critique = reply.reasoning.trim();
                if !critique.is_empty() && !critique.to_uppercase().starts_with("OK") {
                    tracing::debug!(critique = %critique, "reflection recorded");
                    observation.suggested_next_action = Some(critique.to_string());
                    observation.feedback = critique.to_string();
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "reflection failed, keeping raw error");
            }
        }
        observation
    }
}
