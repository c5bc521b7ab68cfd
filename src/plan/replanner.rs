//! 重规划：每步完成后决定继续执行剩余步骤还是结束
//!
//! 模型返回的步骤一律按 past_steps 过滤，已完成的步骤不会再次出现在计划中。

use std::sync::Arc;

use serde::Deserialize;

use crate::core::ExecutionState;
use crate::llm::{LlmClient, Message};
use crate::plan::parser::{decode, normalize_steps};
use crate::plan::prompts;

/// 重规划结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplanDecision {
    /// 仍需执行的步骤（非空，且不含已完成步骤）
    Plan(Vec<String>),
    /// 模型直接给出最终结果
    Respond(String),
    /// 没有剩余步骤，需要根据已完成步骤总结结果
    Exhausted,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum ReplanReply {
    Plan {
        #[serde(default)]
        steps: Vec<String>,
    },
    Respond {
        #[serde(default)]
        response: String,
    },
}

pub struct Replanner {
    llm: Arc<dyn LlmClient>,
    max_steps: usize,
}

impl Replanner {
    pub fn new(llm: Arc<dyn LlmClient>, max_steps: usize) -> Self {
        Self { llm, max_steps }
    }

    pub async fn replan(&self, state: &ExecutionState) -> ReplanDecision {
        let messages = [
            Message::system(prompts::replan_system(
                &state.objective,
                &state.plan_text(),
                &state.past_steps_text(),
            )),
            Message::user(prompts::planner_user(&state.objective)),
        ];

        let reply = match self.llm.complete(&messages).await {
            Ok(raw) => decode::<ReplanReply>(&raw).map_err(|e| e.to_string()),
            Err(e) => {
                tracing::error!(error = %e, "replanner call failed");
                Err(e)
            }
        };

        match reply {
            Ok(ReplanReply::Respond { response }) if !response.trim().is_empty() => {
                ReplanDecision::Respond(response.trim().to_string())
            }
            Ok(ReplanReply::Respond { .. }) => ReplanDecision::Exhausted,
            Ok(ReplanReply::Plan { steps }) => self.remaining(state, steps),
            Err(e) => {
                tracing::warn!(error = %e, "replan degraded to the remaining steps of the current plan");
                self.remaining(state, state.plan.clone())
            }
        }
    }

    fn remaining(&self, state: &ExecutionState, steps: Vec<String>) -> ReplanDecision {
        let proposed = normalize_steps(steps);
        let before = proposed.len();
        let mut steps: Vec<String> = proposed
            .into_iter()
            .filter(|s| !state.is_completed(s))
            .collect();
        if steps.len() < before {
            tracing::debug!(dropped = before - steps.len(), "filtered completed steps from replan");
        }
        steps.truncate(self.max_steps);
        if steps.is_empty() {
            ReplanDecision::Exhausted
        } else {
            ReplanDecision::Plan(steps)
        }
    }
}
