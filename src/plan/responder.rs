//! 最终结果总结

use std::sync::Arc;

use crate::core::ExecutionState;
use crate::llm::{LlmClient, Message};
use crate::plan::prompts;

pub struct Responder {
    llm: Arc<dyn LlmClient>,
}

impl Responder {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 根据目标与已完成步骤总结；模型不可用时返回确定性的步骤摘要
    pub async fn respond(&self, state: &ExecutionState) -> String {
        let messages = [
            Message::system(prompts::response_system(
                &state.objective,
                &state.past_steps_text(),
            )),
            Message::user("请给出总结。"),
        ];
        match self.llm.complete(&messages).await {
            Ok(text) => {
                let text = strip_reasoning(&text);
                if text.is_empty() {
                    tracing::warn!("empty summary, using digest");
                    digest(state)
                } else {
                    text
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "summary call failed, using digest");
                digest(state)
            }
        }
    }
}

fn strip_reasoning(text: &str) -> String {
    match text.find("</think>") {
        Some(end) => text[end + "</think>".len()..].trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// 目标 + 各步骤结果的纯文本摘要
pub fn digest(state: &ExecutionState) -> String {
    let mut out = format!("目标: {}", state.objective);
    for (i, p) in state.past_steps().iter().enumerate() {
        out.push_str(&format!("\n{}. {} -> {}", i + 1, p.step, p.result));
    }
    out
}
