//! 计划构建器
//!
//! 提供流畅的 API 来构建 ExecutionPlan，build 时做结构校验

use serde_json::Value;

use crate::core::AgentError;
use crate::plan::graph::PlanGraph;
use crate::plan::types::*;

/// 计划构建器
pub struct PlanBuilder {
    goal: String,
    strategy: String,
    steps: Vec<PlanStep>,
}

impl PlanBuilder {
    /// 创建新的计划构建器
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            strategy: "manual".to_string(),
            steps: Vec::new(),
        }
    }

    /// 设置策略标签
    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    /// 添加步骤
    pub fn step(mut self, id: impl Into<StepId>, tool: impl Into<String>, args: Value) -> Self {
        self.steps.push(PlanStep::new(id, tool, args));
        self
    }

    /// 添加已构造好的步骤
    pub fn push(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    /// 设置描述
    pub fn describe(mut self, id: &str, description: impl Into<String>) -> Self {
        if let Some(step) = self.steps.iter_mut().find(|s| s.id == id) {
            step.description = description.into();
        }
        self
    }

    /// 设置依赖（to 依赖 from）
    pub fn sequential(mut self, from: impl Into<StepId>, to: &str) -> Self {
        if let Some(step) = self.steps.iter_mut().find(|s| s.id == to) {
            step.dependencies.push(from.into());
        }
        self
    }

    /// 设置 AND 依赖（所有前置步骤）
    pub fn depends_on_all(mut self, id: &str, deps: &[&str]) -> Self {
        if let Some(step) = self.steps.iter_mut().find(|s| s.id == id) {
            step.dependencies.extend(deps.iter().map(|d| d.to_string()));
        }
        self
    }

    /// 标记为并行派发
    pub fn parallel(mut self, ids: &[&str]) -> Self {
        for step in self.steps.iter_mut().filter(|s| ids.contains(&s.id.as_str())) {
            step.parallel = true;
        }
        self
    }

    /// 构建计划（重复 id、悬空依赖、环都会失败）
    pub fn build(self) -> Result<ExecutionPlan, AgentError> {
        if self.goal.trim().is_empty() {
            return Err(AgentError::InvalidPlan("goal is required".to_string()));
        }
        let mut plan = ExecutionPlan::new(self.goal, self.strategy);
        plan.steps = self.steps;
        PlanGraph::build(&plan)?;
        Ok(plan)
    }
}
