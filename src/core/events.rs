//! 执行过程事件：工具调用、计划波次、步骤、思考与观察
//!
//! ToolEngine / PlanExecutor / AgentLoop 都可挂一个可选的 event_tx，作为外部观测的挂载点；
//! 不规定存储格式，事件可直接序列化为 JSON。

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// 单个过程事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 第几轮 think→act→observe
    IterationStarted { iteration: usize, max_iterations: usize },
    /// Planner 给出的思考与动作类型
    Thought { reasoning: String, action: String },
    ToolStarted { tool: String },
    ToolFinished {
        tool: String,
        success: bool,
        duration_ms: u64,
    },
    /// 计划的一个同步波次开始
    WaveStarted {
        plan_id: String,
        wave: usize,
        steps: Vec<String>,
    },
    StepStarted {
        plan_id: String,
        step_id: String,
        attempt: u32,
    },
    StepRetry {
        plan_id: String,
        step_id: String,
        attempt: u32,
        reason: String,
    },
    StepFinished {
        plan_id: String,
        step_id: String,
        success: bool,
        duration_ms: u64,
    },
    /// 计划执行结束（execution_complete / needs_replan / deadlock）
    PlanFinished { plan_id: String, outcome: String },
    ReplanTriggered { replan: u32, cause: String },
    Observation {
        is_complete: bool,
        is_successful: bool,
        feedback: String,
    },
    RunFinished { success: bool, iterations: usize },
    Error { text: String },
}

pub(crate) fn send_event(tx: &Option<UnboundedSender<AgentEvent>>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}
