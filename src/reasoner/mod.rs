//! Reasoner 层：外部推理能力的抽象
//!
//! 由宿主注入（通常包装一个 LLM 客户端），引擎内部从不自行构造。
//! think 产出下一步动作，create_plan 产出整份计划草稿。

pub mod scripted;
pub mod types;

use async_trait::async_trait;

pub use scripted::ScriptedReasoner;
pub use types::{
    PlanDraft, PlanSignals, PlanningContext, PromptContext, PromptMode, ReasonerError,
    ReasonerReply, StepDraft,
};

/// 推理能力 trait
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// 给出思考与下一步动作
    async fn think(&self, prompt: &PromptContext) -> Result<ReasonerReply, ReasonerError>;

    /// 为目标生成完整计划；只支持逐步推理的实现可保留默认
    async fn create_plan(
        &self,
        goal: &str,
        strategy_hint: Option<&str>,
        context: &PlanningContext,
    ) -> Result<PlanDraft, ReasonerError> {
        let _ = (goal, strategy_hint, context);
        Err(ReasonerError::Unavailable(
            "this reasoner does not support plan generation".to_string(),
        ))
    }
}
