//! Planner：策略抽象与工厂
//!
//! 四种策略实现同一个 trait，由标签选择。think / analyze_result 不返回 Err：
//! Reasoner 失败一律降级为带 degraded 标记的 final_answer，保证循环总能结束。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PlannerSection;
use crate::core::AgentError;
use crate::plan::ExecutionResult;
use crate::reasoner::{PromptContext, PromptMode, Reasoner, ReasonerReply};
use crate::react::batch::PlanExecutePlanner;
use crate::react::context::ExecutionContext;
use crate::react::iterative::IterativePlanner;
use crate::react::parser::parse_action;
use crate::react::reflexion::ReflexionPlanner;
use crate::react::thought::{ActionResult, AgentThought, Observation};
use crate::react::tree::TreeOfThoughtPlanner;
use crate::tools::action_schema_json;

/// 策略接口
#[async_trait]
pub trait Planner: Send + Sync {
    fn strategy(&self) -> PlannerStrategy;

    /// 给出下一步思考与动作
    async fn think(&self, input: &str, context: &ExecutionContext) -> AgentThought;

    /// 判断动作结果，决定是否继续
    async fn analyze_result(&self, result: &ActionResult, context: &ExecutionContext) -> Observation;
}

/// 策略标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerStrategy {
    /// 每次 think 一个动作
    Iterative,
    /// 先生成整份计划再执行，部分失败时重新规划
    PlanExecute,
    /// 失败后自我批评，把批评喂回下一次 think
    Reflexion,
    /// 每次 think 生成多个候选，选置信度最高者
    TreeOfThought,
}

impl PlannerStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            PlannerStrategy::Iterative => "iterative",
            PlannerStrategy::PlanExecute => "plan_execute",
            PlannerStrategy::Reflexion => "reflexion",
            PlannerStrategy::TreeOfThought => "tree_of_thought",
        }
    }
}

impl fmt::Display for PlannerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlannerStrategy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "iterative" | "react" => Ok(PlannerStrategy::Iterative),
            "plan_execute" | "plan-and-execute" | "plan_and_execute" | "batch" => {
                Ok(PlannerStrategy::PlanExecute)
            }
            "reflexion" => Ok(PlannerStrategy::Reflexion),
            "tree_of_thought" | "tree-of-thought" | "tot" | "tree" => {
                Ok(PlannerStrategy::TreeOfThought)
            }
            other => Err(AgentError::ConfigError(format!(
                "unknown planner strategy '{other}'"
            ))),
        }
    }
}

/// 按标签构造策略
pub struct PlannerFactory;

impl PlannerFactory {
    /// 缺少 Reasoner 时立即失败，不会发起任何推理调用
    pub fn create(
        strategy: PlannerStrategy,
        reasoner: Option<Arc<dyn Reasoner>>,
        section: &PlannerSection,
    ) -> Result<Arc<dyn Planner>, AgentError> {
        let reasoner = reasoner.ok_or(AgentError::MissingReasoner)?;
        tracing::debug!(strategy = %strategy, "planner created");
        let planner: Arc<dyn Planner> = match strategy {
            PlannerStrategy::Iterative => Arc::new(IterativePlanner::new(reasoner)),
            PlannerStrategy::PlanExecute => Arc::new(PlanExecutePlanner::new(reasoner)),
            PlannerStrategy::Reflexion => {
                Arc::new(ReflexionPlanner::new(reasoner).with_max_reflections(section.max_reflections))
            }
            PlannerStrategy::TreeOfThought => {
                Arc::new(TreeOfThoughtPlanner::new(reasoner).with_branching(section.branching))
            }
        };
        Ok(planner)
    }

    /// 使用 [planner].strategy 标签
    pub fn from_config(
        reasoner: Option<Arc<dyn Reasoner>>,
        section: &PlannerSection,
    ) -> Result<Arc<dyn Planner>, AgentError> {
        let strategy: PlannerStrategy = section.strategy.parse()?;
        Self::create(strategy, reasoner, section)
    }
}

/// 组装 think 的 PromptContext
pub(crate) fn prompt_for(input: &str, context: &ExecutionContext, mode: PromptMode) -> PromptContext {
    PromptContext {
        goal: input.to_string(),
        mode,
        iteration: context.iteration,
        max_iterations: context.max_iterations,
        available_tools: context.available_tools.clone(),
        tool_schemas: context.tool_schemas.clone(),
        history: context.history_digests(),
        reflections: Vec::new(),
        action_schema: action_schema_json(),
    }
}

/// 把 Reasoner 回复解析为 AgentThought；解析失败降级
pub(crate) fn thought_from_reply(
    reply: ReasonerReply,
    goal: &str,
    strategy: PlannerStrategy,
) -> AgentThought {
    match parse_action(&reply.action, goal, strategy.as_str()) {
        Ok(action) => AgentThought::new(reply.reasoning, action).with_confidence(reply.confidence),
        Err(e) => {
            tracing::warn!(error = %e, "unparsable reasoner action, degrading to final answer");
            AgentThought::degraded(format!("Could not act on reasoner output: {e}"))
        }
    }
}

/// 各策略共用的结果判断
pub(crate) fn default_observation(result: &ActionResult) -> Observation {
    match result {
        ActionResult::FinalAnswer { answer, degraded } => Observation {
            is_complete: true,
            is_successful: !degraded,
            should_continue: false,
            feedback: answer.clone(),
            suggested_next_action: None,
        },
        ActionResult::Plan { outcome, .. } => match outcome {
            ExecutionResult::ExecutionComplete { .. } => Observation {
                is_complete: true,
                is_successful: true,
                should_continue: false,
                feedback: result.summary(),
                suggested_next_action: None,
            },
            ExecutionResult::NeedsReplan { replan_context, .. } => Observation {
                is_complete: false,
                is_successful: false,
                should_continue: true,
                feedback: format!(
                    "{}; primary cause: {}",
                    result.summary(),
                    replan_context.primary_cause
                ),
                suggested_next_action: Some(format!(
                    "replan: {}",
                    replan_context.suggested_strategy.as_str()
                )),
            },
            ExecutionResult::Deadlock { report } => Observation {
                is_complete: false,
                is_successful: false,
                should_continue: false,
                feedback: format!(
                    "plan deadlocked: failed [{}], unreachable [{}]; {}",
                    report.failed_steps.join(", "),
                    report.skipped_steps.join(", "),
                    result.errors().join("; ")
                ),
                suggested_next_action: None,
            },
        },
        _ => {
            let ok = result.is_success();
            Observation {
                is_complete: false,
                is_successful: ok,
                should_continue: true,
                feedback: if ok {
                    result.summary()
                } else {
                    result.errors().join("; ")
                },
                suggested_next_action: (!ok).then(|| "try a different tool or input".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoner::ScriptedReasoner;
    use crate::react::thought::AgentAction;
    use serde_json::json;

    #[test]
    fn test_strategy_aliases() {
        assert_eq!("batch".parse::<PlannerStrategy>().unwrap(), PlannerStrategy::PlanExecute);
        assert_eq!(
            "Plan-And-Execute".parse::<PlannerStrategy>().unwrap(),
            PlannerStrategy::PlanExecute
        );
        assert_eq!("tot".parse::<PlannerStrategy>().unwrap(), PlannerStrategy::TreeOfThought);
        assert!(matches!(
            "genetic".parse::<PlannerStrategy>(),
            Err(AgentError::ConfigError(_))
        ));
    }

    #[test]
    fn test_factory_requires_reasoner() {
        let section = PlannerSection::default();
        for strategy in [
            PlannerStrategy::Iterative,
            PlannerStrategy::PlanExecute,
            PlannerStrategy::Reflexion,
            PlannerStrategy::TreeOfThought,
        ] {
            let result = PlannerFactory::create(strategy, None, &section);
            assert!(matches!(result, Err(AgentError::MissingReasoner)));
        }
    }

    #[test]
    fn test_factory_builds_each_strategy() {
        let section = PlannerSection::default();
        let reasoner: Arc<dyn Reasoner> = Arc::new(ScriptedReasoner::new());
        let planner =
            PlannerFactory::create(PlannerStrategy::Reflexion, Some(reasoner.clone()), &section).unwrap();
        assert_eq!(planner.strategy(), PlannerStrategy::Reflexion);
        let planner = PlannerFactory::from_config(Some(reasoner), &section).unwrap();
        assert_eq!(planner.strategy(), PlannerStrategy::Iterative);
    }

    #[test]
    fn test_unparsable_reply_degrades() {
        let reply = ReasonerReply::new("r", json!("{\"tool\": "));
        let thought = thought_from_reply(reply, "g", PlannerStrategy::Iterative);
        assert!(thought.is_degraded());
        assert!(matches!(thought.action, AgentAction::FinalAnswer { .. }));
    }

    #[test]
    fn test_degraded_final_answer_is_unsuccessful() {
        let obs = default_observation(&ActionResult::FinalAnswer {
            answer: "Reasoner unavailable".to_string(),
            degraded: true,
        });
        assert!(obs.is_complete);
        assert!(!obs.is_successful);
        assert!(!obs.should_continue);
    }
}
