//! Bee Planner - 规划与执行引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、恢复决策、过程事件
//! - **tools**: 工具注册表与 ToolEngine（单个 / 并行 / 顺序 / 条件执行）
//! - **plan**: 步骤 DAG、参数模板、波次执行器、重新规划上下文
//! - **reasoner**: 外部推理能力抽象与脚本化测试实现
//! - **react**: Planner 策略与工厂、think→act→observe 主循环
//! - **observability**: tracing 初始化

pub mod config;
pub mod core;
pub mod observability;
pub mod plan;
pub mod reasoner;
pub mod react;
pub mod tools;

pub use crate::core::{AgentError, AgentEvent, FailureKind};
pub use plan::{ExecutionPlan, ExecutionResult, PlanBuilder, PlanExecutor};
pub use reasoner::{Reasoner, ScriptedReasoner};
pub use react::{AgentLoop, Planner, PlannerFactory, PlannerStrategy, RunOutcome};
pub use tools::{Tool, ToolEngine};
