//! 单步执行器
//!
//! 一步之内是一个小的 ReAct 循环：模型输出工具调用 JSON 则执行并把观察结果追加到对话，
//! 输出普通文本则视为本步结果。user_input 不执行，直接以中断返回；恢复时把用户回答
//! 当作该工具的返回值追加到同一份对话中继续。
//!
//! 工具失败、模型调用失败都折叠进结果文本，执行器本身不返回错误。

use std::sync::Arc;

use crate::core::{AgentError, AppInterrupt, ExecutionState, GraphNode, InterruptSignal, RecoveryAction, RecoveryEngine};
use crate::llm::{LlmClient, Message, Role};
use crate::plan::events::{preview, EventSink, PlanEvent};
use crate::plan::parser::extract_json_block;
use crate::plan::prompts;
use crate::tools::user_input::interrupt_value;
use crate::tools::{tool_call_schema_json, Capability, ToolCall, ToolExecutor};

/// 执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// 计划中的一步：prompt 含目标、已完成步骤、完整计划
    InPlan,
    /// 独立的单一任务：结果即最终结果
    Standalone,
}

/// 单步执行结果
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// 本步完成，运行继续
    Continue(String),
    /// 等待用户输入
    Suspend(InterruptSignal),
    /// 运行结束，文本即最终结果
    Terminal(String),
}

/// 模型一轮输出的含义
enum Action {
    Answer(String),
    Call(ToolCall),
    Malformed(AgentError),
}

const OBSERVATION_PREFIX: &str = "Observation from ";
const FAILED_MARK: &str = " (failed): ";

fn observation(tool: &str, text: &str) -> String {
    format!("{OBSERVATION_PREFIX}{tool}: {text}")
}

fn failed_observation(tool: &str, text: &str) -> String {
    format!("{OBSERVATION_PREFIX}{tool}{FAILED_MARK}{text}")
}

pub struct StepExecutor {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolExecutor>,
    max_rounds: usize,
    recovery: RecoveryEngine,
    events: EventSink,
}

impl StepExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolExecutor>, max_rounds: usize) -> Self {
        Self {
            llm,
            tools,
            max_rounds: max_rounds.max(1),
            recovery: RecoveryEngine::new(),
            events: EventSink::default(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// 单步的初始对话：system（工具与格式）+ user（目标、进度、当前任务）
    pub fn initial_transcript(&self, state: &ExecutionState, step: &str, mode: StepMode) -> Vec<Message> {
        let task = match mode {
            StepMode::InPlan => prompts::step_in_plan(
                &state.objective,
                &state.past_steps_text(),
                &state.plan_text(),
                step,
            ),
            StepMode::Standalone => prompts::standalone_task(step),
        };
        vec![
            Message::system(prompts::executor_system(
                &self.tools.tool_descriptions(),
                &tool_call_schema_json(),
            )),
            Message::user(task),
        ]
    }

    pub async fn execute(
        &self,
        plan_id: &str,
        state: &ExecutionState,
        step: &str,
        mode: StepMode,
    ) -> StepOutcome {
        let transcript = self.initial_transcript(state, step, mode);
        self.run(plan_id, state, mode, transcript).await
    }

    /// 以用户回答作为 user_input 的返回值继续同一步
    pub async fn resume(
        &self,
        plan_id: &str,
        state: &ExecutionState,
        mode: StepMode,
        mut transcript: Vec<Message>,
        answer: &str,
    ) -> StepOutcome {
        self.events.emit(PlanEvent::Observation {
            plan_id: plan_id.to_string(),
            tool: Capability::USER_INPUT.to_string(),
            preview: preview(answer, 200),
        });
        transcript.push(Message::user(observation(Capability::USER_INPUT, answer)));
        self.run(plan_id, state, mode, transcript).await
    }

    async fn run(
        &self,
        plan_id: &str,
        state: &ExecutionState,
        mode: StepMode,
        mut transcript: Vec<Message>,
    ) -> StepOutcome {
        for round in 0..self.max_rounds {
            let output = match self.llm.complete(&transcript).await {
                Ok(output) => output,
                Err(e) => {
                    let err = AgentError::LlmError(e);
                    tracing::error!(round, error = %err, "executor call failed");
                    let text = self.recovery.failure_text(&err);
                    return self.finish(mode, &transcript, text);
                }
            };

            let call = match parse_action(&output) {
                Action::Answer(text) => return self.finish(mode, &transcript, text),
                Action::Call(call) => Capability::from_call(&call),
                Action::Malformed(err) => Err(err),
            };

            let capability = match call {
                Ok(cap) => cap,
                Err(err) => {
                    tracing::warn!(round, error = %err, "invalid tool call from model");
                    transcript.push(Message::assistant(output));
                    match self.recovery.handle(&err) {
                        RecoveryAction::RetryWithPrompt(prompt) => {
                            transcript.push(Message::user(prompt));
                            continue;
                        }
                        RecoveryAction::FoldIntoResult(text) => {
                            return self.finish(mode, &transcript, text)
                        }
                        RecoveryAction::Surface => {
                            return self.finish(mode, &transcript, err.to_string())
                        }
                    }
                }
            };

            transcript.push(Message::assistant(output));
            self.events.emit(PlanEvent::ToolCall {
                plan_id: plan_id.to_string(),
                tool: capability.name().to_string(),
                args: capability.args(),
            });

            if let Capability::UserInput(ref args) = capability {
                let value = interrupt_value(&args.ref_content);
                tracing::info!(plan_id, "step suspended for user input");
                return StepOutcome::Suspend(InterruptSignal {
                    payload: AppInterrupt {
                        interrupt_point: GraphNode::UserInput,
                        interrupt_value: value,
                        state: state.clone(),
                    },
                    transcript,
                });
            }

            let tool = capability.name();
            match self.tools.invoke(&capability).await {
                Ok(text) => {
                    self.events.emit(PlanEvent::Observation {
                        plan_id: plan_id.to_string(),
                        tool: tool.to_string(),
                        preview: preview(&text, 200),
                    });
                    transcript.push(Message::user(observation(tool, &text)));
                }
                Err(err) => {
                    let text = self.recovery.failure_text(&err);
                    tracing::warn!(tool, error = %err, "tool failed, folding into step result");
                    self.events.emit(PlanEvent::ToolFailure {
                        plan_id: plan_id.to_string(),
                        tool: tool.to_string(),
                        reason: text.clone(),
                    });
                    transcript.push(Message::user(failed_observation(tool, &text)));
                }
            }
        }

        tracing::warn!(max_rounds = self.max_rounds, "step hit the tool round limit");
        let text = match last_observation(&transcript) {
            Some(obs) => format!("步骤在 {} 轮内未完成，最后的工具结果: {}", self.max_rounds, obs),
            None => format!("步骤在 {} 轮内未完成", self.max_rounds),
        };
        self.finish(mode, &transcript, text)
    }

    /// 本步结果 = 模型输出 + 对话中出现过、但结果里未提到的工具失败
    fn finish(&self, mode: StepMode, transcript: &[Message], text: String) -> StepOutcome {
        let mut result = text.trim().to_string();
        for (tool, failure) in tool_failures(transcript) {
            if !result.contains(&failure) {
                if !result.is_empty() {
                    result.push('\n');
                }
                result.push_str(&format!("[{tool} 失败] {failure}"));
            }
        }
        match mode {
            StepMode::InPlan => StepOutcome::Continue(result),
            StepMode::Standalone => StepOutcome::Terminal(result),
        }
    }
}

/// 区分工具调用与普通回答：只有顶层含 "tool" 字段的 JSON 对象才算工具调用
fn parse_action(output: &str) -> Action {
    let answer = || {
        let text = match output.find("</think>") {
            Some(end) => &output[end + "</think>".len()..],
            None => output,
        };
        Action::Answer(text.trim().to_string())
    };

    let Some(block) = extract_json_block(output) else {
        return answer();
    };
    let value: serde_json::Value = match serde_json::from_str(&block) {
        Ok(v) => v,
        Err(e) => {
            if block.contains("\"tool\"") {
                return Action::Malformed(AgentError::JsonParseError(e.to_string()));
            }
            return answer();
        }
    };
    if value.get("tool").is_none() {
        return answer();
    }
    match serde_json::from_value::<ToolCall>(value) {
        Ok(call) if !call.tool.trim().is_empty() => Action::Call(call),
        Ok(_) => answer(),
        Err(e) => Action::Malformed(AgentError::JsonParseError(e.to_string())),
    }
}

fn tool_failures(transcript: &[Message]) -> Vec<(String, String)> {
    transcript
        .iter()
        .filter(|m| m.role == Role::User)
        .filter_map(|m| m.content.strip_prefix(OBSERVATION_PREFIX))
        .filter_map(|rest| rest.split_once(FAILED_MARK))
        .map(|(tool, text)| (tool.to_string(), text.to_string()))
        .collect()
}

fn last_observation(transcript: &[Message]) -> Option<String> {
    transcript
        .iter()
        .rev()
        .filter(|m| m.role == Role::User)
        .find_map(|m| m.content.strip_prefix(OBSERVATION_PREFIX))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::Value;

    struct FixedSearch(Result<String, String>);

    #[async_trait]
    impl Tool for FixedSearch {
        fn name(&self) -> &str {
            "search_by_product"
        }
        fn description(&self) -> &str {
            "search"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            self.0.clone()
        }
    }

    fn executor(llm: Arc<ScriptedLlmClient>, search: Result<String, String>) -> StepExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(FixedSearch(search));
        StepExecutor::new(llm, Arc::new(ToolExecutor::new(registry, 5)), 4)
    }

    fn state() -> ExecutionState {
        let mut s = ExecutionState::new("获取产品A的视频素材");
        s.plan = vec!["搜索产品A的视频".into()];
        s
    }

    const SEARCH_CALL: &str = r#"{"tool": "search_by_product", "args": {"product": "产品A"}}"#;

    #[tokio::test]
    async fn test_tool_then_answer() {
        let llm = Arc::new(ScriptedLlmClient::new([SEARCH_CALL, "找到 3 个视频"]));
        let exec = executor(llm.clone(), Ok("[\"u1\",\"u2\",\"u3\"]".into()));
        let out = exec.execute("p", &state(), "搜索产品A的视频", StepMode::InPlan).await;
        assert!(matches!(out, StepOutcome::Continue(ref r) if r == "找到 3 个视频"));

        let second = &llm.received()[1];
        assert_eq!(
            second.last().unwrap().content,
            "Observation from search_by_product: [\"u1\",\"u2\",\"u3\"]"
        );
    }

    #[tokio::test]
    async fn test_tool_failure_is_folded() {
        let llm = Arc::new(ScriptedLlmClient::new([SEARCH_CALL, "没找到素材"]));
        let exec = executor(llm, Err("服务不可用".into()));
        match exec.execute("p", &state(), "搜索", StepMode::InPlan).await {
            StepOutcome::Continue(r) => {
                assert!(r.starts_with("没找到素材"));
                assert!(r.contains("工具执行失败: 服务不可用"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_gets_retry_prompt() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool": "shell", "args": {}}"#,
            "直接回答",
        ]));
        let exec = executor(llm.clone(), Ok("x".into()));
        let out = exec.execute("p", &state(), "步骤", StepMode::Standalone).await;
        assert!(matches!(out, StepOutcome::Terminal(ref r) if r == "直接回答"));
        assert!(llm.received()[1].last().unwrap().content.contains("shell"));
    }

    #[tokio::test]
    async fn test_llm_failure_is_folded() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        llm.push_error("timeout");
        let exec = executor(llm, Ok("x".into()));
        let out = exec.execute("p", &state(), "步骤", StepMode::InPlan).await;
        assert!(matches!(out, StepOutcome::Continue(ref r) if r.contains("模型调用失败")));
    }

    #[tokio::test]
    async fn test_round_limit() {
        let llm = Arc::new(ScriptedLlmClient::new([SEARCH_CALL; 4]));
        let exec = executor(llm.clone(), Ok("[]".into()));
        let out = exec.execute("p", &state(), "步骤", StepMode::InPlan).await;
        assert!(matches!(out, StepOutcome::Continue(ref r) if r.contains("4 轮内未完成")));
        assert_eq!(llm.calls(), 4);
    }

    #[tokio::test]
    async fn test_user_input_suspends_and_resume_is_transparent() {
        let ask = r#"{"tool": "user_input", "args": {"ref_content": "产品名称"}}"#;
        let llm = Arc::new(ScriptedLlmClient::new([ask, "产品是产品A"]));
        let exec = executor(llm.clone(), Ok("x".into()));
        let s = state();

        let signal = match exec.execute("p", &s, "确认产品", StepMode::InPlan).await {
            StepOutcome::Suspend(signal) => signal,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(signal.payload.interrupt_point, GraphNode::UserInput);
        assert_eq!(signal.payload.interrupt_value, "Please enter your input,ref:产品名称 \n");
        assert_eq!(signal.payload.state, s);
        assert_eq!(llm.calls(), 1);

        let out = exec
            .resume("p", &s, StepMode::InPlan, signal.transcript, "产品A")
            .await;
        assert!(matches!(out, StepOutcome::Continue(ref r) if r == "产品是产品A"));
        assert_eq!(
            llm.received()[1].last().unwrap().content,
            "Observation from user_input: 产品A"
        );
    }

    #[tokio::test]
    async fn test_failed_search_is_described_in_step_result() {
        use crate::config::SearchSection;
        use crate::tools::SearchByProductTool;

        let llm = Arc::new(ScriptedLlmClient::new([SEARCH_CALL, "已完成素材搜索"]));
        let mut registry = ToolRegistry::new();
        registry.register(SearchByProductTool::new(&SearchSection::default()));
        let exec = StepExecutor::new(llm.clone(), Arc::new(ToolExecutor::new(registry, 5)), 4);

        match exec.execute("p", &state(), "搜索产品A的视频", StepMode::InPlan).await {
            StepOutcome::Continue(r) => {
                assert!(r.starts_with("已完成素材搜索"));
                assert!(r.contains("[search_by_product 失败] 工具执行失败: 检索失败"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(llm.received()[1]
            .last()
            .unwrap()
            .content
            .starts_with("Observation from search_by_product (failed): "));
    }

    #[tokio::test]
    async fn test_call_after_bracketed_prose_still_runs_the_tool() {
        let reply = r#"调用 [search_by_product]：{"tool": "search_by_product", "args": {"product": "A"}}"#;
        let llm = Arc::new(ScriptedLlmClient::new([reply, "找到 1 个视频"]));
        let exec = executor(llm.clone(), Ok("[\"u1\"]".into()));
        let out = exec.execute("p", &state(), "搜索", StepMode::InPlan).await;
        assert!(matches!(out, StepOutcome::Continue(ref r) if r == "找到 1 个视频"));
        assert_eq!(llm.calls(), 2);
    }

    #[test]
    fn test_parse_action() {
        assert!(matches!(parse_action("普通回答"), Action::Answer(ref t) if t == "普通回答"));
        assert!(matches!(parse_action(r#"{"核心卖点": "续航"}"#), Action::Answer(_)));
        assert!(matches!(parse_action(SEARCH_CALL), Action::Call(ref c) if c.tool == "search_by_product"));
        assert!(matches!(parse_action(r#"{"tool": 3}"#), Action::Malformed(_)));
    }
}
