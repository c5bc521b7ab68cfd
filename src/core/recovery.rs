//! 错误恢复引擎
//!
//! 把 AgentError 映射为 RecoveryAction：格式错误让模型重试，调用失败折叠成结果文本继续推进，
//! 宿主错误原样交还调用方。"单次失败不终止运行" 的策略集中在这里。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "上一轮输出的 JSON 格式错误: {raw}。\
                调用工具时你必须只输出一个合法的 JSON 对象，不能输出其它文字。\
                格式必须为: {{\"tool\": \"工具名\", \"args\": {{...}}}}。\
                若不需要调用工具，请直接输出结果文本。"
            )),
            AgentError::HallucinatedTool(name) => RecoveryAction::RetryWithPrompt(format!(
                "工具 '{name}' 不存在，请只使用系统提示中列出的工具，或直接输出结果文本。"
            )),
            AgentError::ToolExecutionFailed(_)
            | AgentError::ToolTimeout(_)
            | AgentError::LlmError(_) => RecoveryAction::FoldIntoResult(self.failure_text(err)),
            _ => RecoveryAction::Surface,
        }
    }

    /// 失败描述文本（写入步骤结果 / 工具观察）
    pub fn failure_text(&self, err: &AgentError) -> String {
        match err {
            AgentError::ToolExecutionFailed(msg) => format!("工具执行失败: {msg}"),
            AgentError::ToolTimeout(tool) => format!("工具 {tool} 执行超时"),
            AgentError::LlmError(msg) => format!("模型调用失败: {msg}"),
            other => other.to_string(),
        }
    }
}
