//! Tree-of-thought：每次 think 并发生成 branching 个候选（Branch 模式），
//! 丢弃无法解析的候选与重复此前失败动作的候选，选置信度最高者（缺省 0.5，同分取序号最小）。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::json;

use crate::reasoner::{PromptMode, Reasoner};
use crate::react::context::ExecutionContext;
use crate::react::parser::parse_action;
use crate::react::planner::{default_observation, prompt_for, Planner, PlannerStrategy};
use crate::react::thought::{ActionResult, AgentThought, Observation};

/// 未给出置信度的候选按此计分
const DEFAULT_CONFIDENCE: f64 = 0.5;

pub struct TreeOfThoughtPlanner {
    reasoner: Arc<dyn Reasoner>,
    branching: usize,
}

impl TreeOfThoughtPlanner {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            reasoner,
            branching: 3,
        }
    }

    pub fn with_branching(mut self, n: usize) -> Self {
        self.branching = n.max(1);
        self
    }

    fn failed_signatures(context: &ExecutionContext) -> HashSet<String> {
        context
            .history
            .iter()
            .filter(|h| !h.observation.is_successful)
            .map(|h| h.thought.action.signature())
            .collect()
    }
}

#[async_trait]
impl Planner for TreeOfThoughtPlanner {
    fn strategy(&self) -> PlannerStrategy {
        PlannerStrategy::TreeOfThought
    }

    async fn think(&self, input: &str, context: &ExecutionContext) -> AgentThought {
        let total = self.branching;
        let prompts: Vec<_> = (0..total)
            .map(|index| prompt_for(input, context, PromptMode::Branch { index, total }))
            .collect();
        let replies = join_all(prompts.iter().map(|p| self.reasoner.think(p))).await;

        let failed = Self::failed_signatures(context);
        let mut last_error: Option<String> = None;
        let mut best: Option<(usize, f64, AgentThought)> = None;

        for (index, reply) in replies.into_iter().enumerate() {
            let reply = match reply {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(format!("Reasoner unavailable: {e}"));
                    continue;
                }
            };
            let action = match parse_action(&reply.action, input, self.strategy().as_str()) {
                Ok(a) => a,
                Err(e) => {
                    tracing::debug!(branch = index, error = %e, "candidate dropped: unparsable");
                    last_error = Some(format!("Could not act on reasoner output: {e}"));
                    continue;
                }
            };
            if failed.contains(&action.signature()) {
                tracing::debug!(branch = index, "candidate dropped: repeats a failed action");
                continue;
            }
            // 排序用的分数与记录的置信度一致：NaN 视为未给出，其余截断到 [0, 1]
            let confidence = reply
                .confidence
                .filter(|c| !c.is_nan())
                .map(|c| c.clamp(0.0, 1.0));
            let score = confidence.unwrap_or(DEFAULT_CONFIDENCE);
            if best.as_ref().map(|(_, s, _)| score > *s).unwrap_or(true) {
                let thought = AgentThought::new(reply.reasoning, action)
                    .with_confidence(confidence)
                    .with_metadata("branch", json!(index))
                    .with_metadata("candidates", json!(total));
                best = Some((index, score, thought));
            }
        }

        match best {
            Some((index, score, thought)) => {
                tracing::debug!(branch = index, score, "candidate selected");
                thought
            }
            None => AgentThought::degraded(
                last_error.unwrap_or_else(|| "No viable candidate: every branch repeats a failed action".to_string()),
            ),
        }
    }

    async fn analyze_result(&self, result: &ActionResult, _context: &ExecutionContext) -> Observation {
        default_observation(result)
    }
}
