//! 脚本化 Reasoner（用于测试，无需模型）
//!
//! 按入队顺序依次返回预置的回复与计划；脚本耗尽后返回 Unavailable。
//! 同时记录收到的每个 PromptContext / PlanningContext，便于断言。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::reasoner::{
    PlanDraft, PlanningContext, PromptContext, PromptMode, Reasoner, ReasonerError, ReasonerReply,
};

/// 脚本化 Reasoner
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<Result<ReasonerReply, ReasonerError>>>,
    /// reflect 模式优先从这里取
    critiques: Mutex<VecDeque<Result<ReasonerReply, ReasonerError>>>,
    plans: Mutex<VecDeque<Result<PlanDraft, ReasonerError>>>,
    prompts: Mutex<Vec<PromptContext>>,
    planning: Mutex<Vec<PlanningContext>>,
    calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个 think 回复
    pub fn reply(self, reasoning: impl Into<String>, action: Value) -> Self {
        self.push_reply(Ok(ReasonerReply::new(reasoning, action)))
    }

    /// 追加一个带置信度的 think 回复
    pub fn reply_with_confidence(self, reasoning: impl Into<String>, action: Value, confidence: f64) -> Self {
        self.push_reply(Ok(ReasonerReply::new(reasoning, action).with_confidence(confidence)))
    }

    /// 追加一次 think 失败
    pub fn fail(self, err: ReasonerError) -> Self {
        self.push_reply(Err(err))
    }

    /// 追加一条 reflect 模式的批评
    pub fn critique(mut self, text: impl Into<String>) -> Self {
        self.critiques
            .get_mut()
            .push_back(Ok(ReasonerReply::new(text, Value::Null)));
        self
    }

    /// 追加一份计划
    pub fn plan(mut self, draft: PlanDraft) -> Self {
        self.plans.get_mut().push_back(Ok(draft));
        self
    }

    /// 追加一次 create_plan 失败
    pub fn plan_failure(mut self, err: ReasonerError) -> Self {
        self.plans.get_mut().push_back(Err(err));
        self
    }

    fn push_reply(mut self, reply: Result<ReasonerReply, ReasonerError>) -> Self {
        self.replies.get_mut().push_back(reply);
        self
    }

    /// think + create_plan 的总调用次数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 收到的 think 上下文（按调用顺序）
    pub async fn prompts(&self) -> Vec<PromptContext> {
        self.prompts.lock().await.clone()
    }

    /// 收到的 create_plan 上下文（按调用顺序）
    pub async fn planning_contexts(&self) -> Vec<PlanningContext> {
        self.planning.lock().await.clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn think(&self, prompt: &PromptContext) -> Result<ReasonerReply, ReasonerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().await.push(prompt.clone());

        if matches!(prompt.mode, PromptMode::Reflect { .. }) {
            if let Some(critique) = self.critiques.lock().await.pop_front() {
                return critique;
            }
        }
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ReasonerError::Unavailable("script exhausted".to_string())))
    }

    async fn create_plan(
        &self,
        _goal: &str,
        _strategy_hint: Option<&str>,
        context: &PlanningContext,
    ) -> Result<PlanDraft, ReasonerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.planning.lock().await.push(context.clone());
        self.plans
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ReasonerError::Unavailable("plan script exhausted".to_string())))
    }
}
