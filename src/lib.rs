//! ad-agent：广告内容生成助手的规划-执行-重规划核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 运行状态、错误与恢复、状态存储、编排器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志订阅器
//! - **plan**: 判定、规划、单步执行、重规划、总结
//! - **tools**: 工具（search_by_product、mixclip、video_analysis、user_input）与执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod plan;
pub mod tools;

pub use crate::core::{Orchestrator, OrchestratorBuilder, RunOutcome, TaskStatus};
