//! 计划层：步骤 DAG、依赖图、参数模板、波次执行与重新规划上下文

pub mod builder;
pub mod executor;
pub mod graph;
pub mod replan;
pub mod resolver;
pub mod types;

pub use builder::PlanBuilder;
pub use executor::PlanExecutor;
pub use graph::PlanGraph;
pub use replan::{build_replan_context, normalize_failure, suggest_strategy};
pub use resolver::{references, ArgumentResolver, StepReference};
pub use types::*;
