//! Agent 错误类型
//!
//! 与 RecoveryEngine 配合：单次模型 / 工具调用失败会被降级成结果文本，运行不因此中止；
//! 只有宿主层面的错误（运行不存在、运行未在等待输入、存储不可用）才返回给调用方。

use thiserror::Error;

use crate::core::{GraphNode, TaskStatusKind};

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run {plan_id} is not waiting for input (status {status:?} at {node:?})")]
    NotWaitingForInput {
        plan_id: String,
        status: TaskStatusKind,
        node: GraphNode,
    },

    #[error("Run {0} is already being driven")]
    RunBusy(String),

    #[error("Store error: {0}")]
    StoreError(String),
}

impl AgentError {
    /// 宿主层面的错误：需要返回给调用方，而不是折叠进步骤结果
    pub fn is_host_error(&self) -> bool {
        matches!(
            self,
            AgentError::RunNotFound(_)
                | AgentError::NotWaitingForInput { .. }
                | AgentError::RunBusy(_)
                | AgentError::StoreError(_)
                | AgentError::ConfigError(_)
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让模型重试（格式错误、调用了不存在的工具）
    RetryWithPrompt(String),
    /// 记录失败描述并继续推进（工具失败、模型调用失败、超时）
    FoldIntoResult(String),
    /// 交还给宿主处理
    Surface,
}
