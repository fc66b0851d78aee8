//! 核心层：错误分类、恢复决策、过程事件

pub mod error;
pub mod events;
pub mod recovery;

pub use error::{AgentError, FailureKind};
pub use events::AgentEvent;
pub use recovery::{RecoveryAction, RecoveryEngine};
