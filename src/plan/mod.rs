//! 规划-执行-重规划的各个角色
//!
//! Judge 判定任务类型，Planner 生成步骤，StepExecutor 执行单步，Replanner 决定后续，
//! Responder 汇总结果；由 core::Orchestrator 串起来。

pub mod events;
pub mod executor;
pub mod judge;
pub mod parser;
pub mod planner;
pub mod prompts;
pub mod replanner;
pub mod responder;

pub use events::{EventSink, PlanEvent};
pub use executor::{StepExecutor, StepMode, StepOutcome};
pub use judge::{Judge, Judgement};
pub use planner::Planner;
pub use replanner::{ReplanDecision, Replanner};
pub use responder::Responder;
