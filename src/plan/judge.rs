//! 判定：目标是单一任务还是多步计划
//!
//! 不重试。模型调用失败或输出无法识别时降级为只含一步（复述目标）的计划。

use std::sync::Arc;

use serde::Deserialize;

use crate::llm::{LlmClient, Message};
use crate::plan::parser::{decode, normalize_steps, parse_numbered_steps};
use crate::plan::prompts;

/// 判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Judgement {
    /// 单一任务；content 为模型直接给出的结果，需要调用工具时为空
    Task { content: String },
    /// 多步计划；steps 为空表示需要交给 Planner 生成
    Plan { steps: Vec<String> },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum JudgeReply {
    Task {
        #[serde(default)]
        content: String,
    },
    Plan {
        #[serde(default)]
        steps: Vec<String>,
    },
}

pub struct Judge {
    llm: Arc<dyn LlmClient>,
    min_steps: usize,
    max_steps: usize,
}

impl Judge {
    pub fn new(llm: Arc<dyn LlmClient>, min_steps: usize, max_steps: usize) -> Self {
        Self {
            llm,
            min_steps,
            max_steps,
        }
    }

    pub async fn judge(&self, objective: &str) -> Judgement {
        let messages = [
            Message::system(prompts::judge_system(objective, self.min_steps, self.max_steps)),
            Message::user(prompts::planner_user(objective)),
        ];
        let raw = match self.llm.complete(&messages).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error = %e, "judge call failed, falling back to single-step plan");
                return fallback(objective);
            }
        };

        match decode::<JudgeReply>(&raw) {
            Ok(JudgeReply::Task { content }) => Judgement::Task {
                content: content.trim().to_string(),
            },
            Ok(JudgeReply::Plan { steps }) => {
                let mut steps = normalize_steps(steps);
                steps.truncate(self.max_steps);
                Judgement::Plan { steps }
            }
            Err(e) => {
                let mut steps = normalize_steps(parse_numbered_steps(&raw));
                if steps.is_empty() {
                    tracing::warn!(error = %e, "judge reply unrecognized, falling back to single-step plan");
                    return fallback(objective);
                }
                tracing::warn!(error = %e, "judge reply was a plain list, using it as the plan");
                steps.truncate(self.max_steps);
                Judgement::Plan { steps }
            }
        }
    }
}

/// 降级计划：只有一步，即目标本身
pub fn fallback(objective: &str) -> Judgement {
    Judgement::Plan {
        steps: vec![objective.trim().to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    fn judge(replies: Vec<&str>) -> (Arc<ScriptedLlmClient>, Judge) {
        let llm = Arc::new(ScriptedLlmClient::new(replies));
        (llm.clone(), Judge::new(llm, 3, 5))
    }

    #[tokio::test]
    async fn test_task_and_plan_replies() {
        let (_, j) = judge(vec![
            r#"{"kind": "task", "content": " 一句广告语 "}"#,
            r#"```json
{"kind": "plan", "steps": ["a", "b", "a", "c", "d", "e", "f"]}
```"#,
        ]);
        assert_eq!(
            j.judge("写一句广告语").await,
            Judgement::Task {
                content: "一句广告语".into()
            }
        );
        match j.judge("做个广告").await {
            Judgement::Plan { steps } => assert_eq!(steps, vec!["a", "b", "c", "d", "e"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unrecognized_reply_degrades() {
        let (llm, j) = judge(vec!["我觉得这是个复杂任务", "1. 搜索素材\n2. 分析素材"]);
        assert_eq!(j.judge("目标A").await, fallback("目标A"));
        assert_eq!(
            j.judge("目标B").await,
            Judgement::Plan {
                steps: vec!["搜索素材".into(), "分析素材".into()]
            }
        );
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_call_degrades_without_retry() {
        let (llm, j) = judge(vec![]);
        llm.push_error("timeout");
        assert_eq!(j.judge("目标").await, fallback("目标"));
        assert_eq!(llm.calls(), 1);
    }
}
