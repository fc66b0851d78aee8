pub mod echo;
pub mod engine;
pub mod function;
pub mod registry;
pub mod schema;
pub mod types;

pub use echo::EchoTool;
pub use engine::ToolEngine;
pub use function::FnTool;
pub use registry::{Tool, ToolRegistry};
pub use schema::{action_schema_json, validate_input};
pub use types::{
    BatchAggregate, Condition, ConditionalEntry, ExecuteIf, ParallelOptions, ParallelOutcome,
    SequentialOptions, ToolCall, ToolFailure, ToolResult, PREVIOUS_RESULT_KEY,
};
