//! 重新规划上下文
//!
//! 部分失败后，把成功步骤（id + 描述 + 结果）、归一化的失败模式、首要原因与策略建议
//! 打包为 ReplanContext；新计划生成后再通过 carry_forward 把成功结果复制进去。

use crate::core::FailureKind;
use crate::plan::types::*;

/// 错误串归一化：小写、压缩空白
pub fn normalize_failure(message: &str) -> String {
    message
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 根据首要原因的失败类型给出下一次规划的建议
pub fn suggest_strategy(kind: Option<FailureKind>) -> ReplanHint {
    match kind {
        Some(FailureKind::UnknownTool) | Some(FailureKind::Validation) => {
            ReplanHint::UseAlternativeTools
        }
        Some(FailureKind::Dependency) => ReplanHint::FixStepReferences,
        Some(FailureKind::Timeout) => ReplanHint::SplitOrSerializeSteps,
        Some(FailureKind::Execution) | None => ReplanHint::RetryWithAlternatives,
    }
}

/// 从执行后的计划与报告构建 ReplanContext；failed_steps 的顺序即失败出现的顺序
pub fn build_replan_context(plan: &ExecutionPlan, report: &ExecutionReport) -> ReplanContext {
    let preserved_steps = plan
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Succeeded)
        .map(|s| PreservedStep {
            id: s.id.clone(),
            description: s.description.clone(),
            tool: s.tool.clone(),
            result: s.result.clone().unwrap_or_default(),
        })
        .collect();

    let failed: Vec<&PlanStep> = report
        .failed_steps
        .iter()
        .filter_map(|id| plan.get_step(id))
        .collect();

    let mut failure_patterns: Vec<String> = Vec::new();
    for step in &failed {
        let pattern = normalize_failure(step.error.as_deref().unwrap_or("unknown error"));
        if !failure_patterns.contains(&pattern) {
            failure_patterns.push(pattern);
        }
    }

    let primary = failed.first();
    let primary_cause = primary
        .map(|s| {
            format!(
                "{} ({}): {}",
                s.id,
                s.tool,
                s.error.as_deref().unwrap_or("unknown error")
            )
        })
        .unwrap_or_default();
    let suggested_strategy = suggest_strategy(primary.and_then(|s| s.failure_kind));

    ReplanContext {
        preserved_steps,
        failure_patterns,
        primary_cause,
        suggested_strategy,
        context_for_replan: ReplanSummary {
            successful: report.successful_steps.clone(),
            failed: report.failed_steps.clone(),
        },
    }
}

impl ExecutionPlan {
    /// 把旧计划的成功结果复制进新计划：
    /// 同 id 的步骤直接标记为成功并带上结果；新计划中没有的保留步骤插到最前面，
    /// 这样新步骤对它们的依赖与 {{id.path}} 引用都能解析。
    pub fn carry_forward(&mut self, context: &ReplanContext, prior_plan_id: &str) {
        let mut prepended = Vec::new();
        for preserved in &context.preserved_steps {
            match self.get_step_mut(&preserved.id) {
                Some(step) => {
                    step.status = StepStatus::Succeeded;
                    step.result = Some(preserved.result.clone());
                    step.error = None;
                    step.failure_kind = None;
                    step.reused_from = Some(prior_plan_id.to_string());
                }
                None => {
                    let mut step = PlanStep::new(
                        preserved.id.clone(),
                        preserved.tool.clone(),
                        serde_json::Value::Null,
                    )
                    .with_description(preserved.description.clone());
                    step.status = StepStatus::Succeeded;
                    step.result = Some(preserved.result.clone());
                    step.reused_from = Some(prior_plan_id.to_string());
                    prepended.push(step);
                }
            }
        }
        if !prepended.is_empty() {
            prepended.append(&mut self.steps);
            self.steps = prepended;
        }
    }
}
