//! 认知层：Planner 策略、动作解析、执行上下文与 think→act→observe 主循环

pub mod batch;
pub mod context;
pub mod iterative;
pub mod loop_;
pub mod parser;
pub mod planner;
pub mod reflexion;
pub mod thought;
pub mod tree;

pub use batch::PlanExecutePlanner;
pub use context::{ExecutionContext, HistoryEntry, PreviousExecution};
pub use iterative::IterativePlanner;
pub use loop_::{AgentLoop, RunOutcome};
pub use parser::{parse_action, parse_text};
pub use planner::{Planner, PlannerFactory, PlannerStrategy};
pub use reflexion::ReflexionPlanner;
pub use thought::{ActionResult, AgentAction, AgentThought, Observation};
pub use tree::TreeOfThoughtPlanner;
