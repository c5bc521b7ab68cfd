//! 核心编排层：错误与恢复、运行状态、状态存储、编排器与构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod state;
pub mod store;

pub use builder::{create_llm_from_config, OrchestratorBuilder};
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use recovery::RecoveryEngine;
pub use state::{
    AppInterrupt, ExecutionState, GraphNode, InterruptSignal, PastStep, RunRoute, TaskStatus,
    TaskStatusKind,
};
#[cfg(feature = "async-sqlite")]
pub use store::SqliteTaskStore;
pub use store::{InMemoryTaskStore, TaskStore};
