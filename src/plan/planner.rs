//! 规划：把目标拆成有序步骤

use std::sync::Arc;

use serde::Deserialize;

use crate::llm::{LlmClient, Message};
use crate::plan::parser::{decode, normalize_steps, parse_numbered_steps};
use crate::plan::prompts;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanReply {
    Object { steps: Vec<String> },
    List(Vec<String>),
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    min_steps: usize,
    max_steps: usize,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, min_steps: usize, max_steps: usize) -> Self {
        Self {
            llm,
            min_steps,
            max_steps,
        }
    }

    /// 生成计划；调用失败或无法解析时返回只含目标本身的一步
    pub async fn plan(&self, objective: &str) -> Vec<String> {
        let messages = [
            Message::system(prompts::planner_system(self.min_steps, self.max_steps)),
            Message::user(prompts::planner_user(objective)),
        ];
        let raw = match self.llm.complete(&messages).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error = %e, "planner call failed");
                return vec![objective.trim().to_string()];
            }
        };

        let steps = match decode::<PlanReply>(&raw) {
            Ok(PlanReply::Object { steps }) | Ok(PlanReply::List(steps)) => steps,
            Err(e) => {
                tracing::warn!(error = %e, "planner reply is not JSON, trying numbered list");
                parse_numbered_steps(&raw)
            }
        };
        let mut steps = normalize_steps(steps);
        if steps.is_empty() {
            tracing::warn!("planner produced no steps, using objective as the only step");
            return vec![objective.trim().to_string()];
        }
        if steps.len() < self.min_steps {
            tracing::debug!(count = steps.len(), min = self.min_steps, "plan shorter than requested");
        }
        steps.truncate(self.max_steps);
        tracing::info!(count = steps.len(), "plan created");
        steps
    }
}
