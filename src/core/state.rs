//! 运行状态：图节点、执行状态、中断载荷、对外的 TaskStatus 记录
//!
//! ExecutionState 只由 Orchestrator 修改；判定 / 规划 / 执行 / 重规划拿到的都是只读引用。
//! TaskStatus 是宿主轮询或持久化的形状，中断时连同单步对话记录一起保存，以便之后恢复。

use serde::{Deserialize, Serialize};

use crate::llm::Message;

/// 状态机节点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphNode {
    #[serde(rename = "judge_plan_node")]
    JudgePlan,
    #[serde(rename = "user_input_node")]
    UserInput,
    #[serde(rename = "single_task_node")]
    SingleTask,
    #[serde(rename = "judge_replan_node")]
    JudgeReplan,
    #[serde(rename = "end_node")]
    End,
}

impl GraphNode {
    /// 固定后继；JudgeReplan 的去向取决于重规划结果，因此没有固定后继
    pub fn next_node(self) -> Option<GraphNode> {
        match self {
            GraphNode::JudgePlan => Some(GraphNode::SingleTask),
            GraphNode::UserInput => Some(GraphNode::SingleTask),
            GraphNode::SingleTask => Some(GraphNode::SingleTask),
            GraphNode::JudgeReplan | GraphNode::End => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GraphNode::JudgePlan => "judge_plan_node",
            GraphNode::UserInput => "user_input_node",
            GraphNode::SingleTask => "single_task_node",
            GraphNode::JudgeReplan => "judge_replan_node",
            GraphNode::End => "end_node",
        }
    }
}

/// 已完成的一步：(步骤描述, 结果文本)，只追加不修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PastStep {
    pub step: String,
    pub result: String,
}

/// 贯穿整个循环的执行状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub objective: String,
    /// 当前计划（含正在执行的一步），重规划时整体替换
    #[serde(default)]
    pub plan: Vec<String>,
    #[serde(default)]
    pub current_task: String,
    #[serde(default)]
    past_steps: Vec<PastStep>,
    /// 非空当且仅当运行已到达终态
    #[serde(default)]
    response: String,
}

/// response 为空时的兜底文本，保证终态 response 非空
const EMPTY_RESPONSE_FALLBACK: &str = "(未生成结果)";

impl ExecutionState {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            ..Self::default()
        }
    }

    pub fn past_steps(&self) -> &[PastStep] {
        &self.past_steps
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn is_terminal(&self) -> bool {
        !self.response.is_empty()
    }

    /// 追加一步结果；同一步描述不会被记录两次
    pub fn record_step(&mut self, step: impl Into<String>, result: impl Into<String>) -> bool {
        let step = step.into();
        if self.is_completed(&step) {
            return false;
        }
        self.past_steps.push(PastStep {
            step,
            result: result.into(),
        });
        self.current_task.clear();
        true
    }

    /// 进入终态
    pub fn finish(&mut self, response: impl Into<String>) {
        let response = response.into();
        self.response = if response.trim().is_empty() {
            EMPTY_RESPONSE_FALLBACK.to_string()
        } else {
            response
        };
        self.current_task.clear();
    }

    pub fn is_completed(&self, step: &str) -> bool {
        let step = step.trim();
        self.past_steps.iter().any(|p| p.step.trim() == step)
    }

    /// 当前计划中尚未完成的步骤（保持原顺序）
    pub fn remaining_steps(&self) -> Vec<String> {
        self.plan
            .iter()
            .filter(|s| !self.is_completed(s))
            .cloned()
            .collect()
    }

    /// 供 prompt 使用的计划文本（编号列表）
    pub fn plan_text(&self) -> String {
        numbered(self.plan.iter().map(String::as_str))
    }

    /// 供 prompt 使用的已完成步骤文本
    pub fn past_steps_text(&self) -> String {
        if self.past_steps.is_empty() {
            return "（无）".to_string();
        }
        self.past_steps
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. {}\n结果: {}", i + 1, p.step, p.result))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn numbered<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let lines: Vec<String> = items
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect();
    if lines.is_empty() {
        "（无）".to_string()
    } else {
        lines.join("\n")
    }
}

/// 中断载荷：宿主据此提示用户，并回传一段纯文本以恢复
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInterrupt {
    pub interrupt_point: GraphNode,
    pub interrupt_value: String,
    pub state: ExecutionState,
}

/// 执行器发出的中断信号：载荷 + 恢复同一步所需的对话记录
#[derive(Debug, Clone)]
pub struct InterruptSignal {
    pub payload: AppInterrupt,
    pub transcript: Vec<Message>,
}

/// 对外的运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatusKind {
    WaitingStart,
    Running,
    Success,
    Failed,
    /// 通用等待（宿主排队等场景）
    Waiting,
    WaitingInput,
    WaitingPlanJudge,
    WaitingReplanJudge,
}

impl TaskStatusKind {
    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatusKind::Success | TaskStatusKind::Failed)
    }
}

/// 判定结果决定的执行路线
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunRoute {
    /// 单任务：judge 已给出结果时直接结束，否则把目标当作一步独立执行
    Task { direct: Option<String> },
    /// 多步计划
    Plan,
}

/// 一次运行的可持久化记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub plan_id: String,
    pub status: TaskStatusKind,
    /// 当前（或等待中的）节点
    pub waiting_point: GraphNode,
    /// 等待用户输入时的提示
    #[serde(default)]
    pub waiting_input_ref: String,
    #[serde(default)]
    pub result: String,
    pub state: ExecutionState,
    #[serde(default)]
    pub route: Option<RunRoute>,
    /// 中断时保存的单步对话记录，恢复后清空
    #[serde(default)]
    pub transcript: Vec<Message>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TaskStatus {
    pub fn new(objective: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            plan_id: format!("plan_{}", uuid::Uuid::new_v4()),
            status: TaskStatusKind::WaitingStart,
            waiting_point: GraphNode::JudgePlan,
            waiting_input_ref: String::new(),
            result: String::new(),
            state: ExecutionState::new(objective),
            route: None,
            transcript: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 更新状态与节点，并刷新时间戳
    pub fn transition(&mut self, status: TaskStatusKind, node: GraphNode) {
        self.status = status;
        self.waiting_point = node;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    pub fn is_waiting_for_input(&self) -> bool {
        self.status == TaskStatusKind::WaitingInput && self.waiting_point == GraphNode::UserInput
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_node_map() {
        assert_eq!(GraphNode::JudgePlan.next_node(), Some(GraphNode::SingleTask));
        assert_eq!(GraphNode::UserInput.next_node(), Some(GraphNode::SingleTask));
        assert_eq!(GraphNode::SingleTask.next_node(), Some(GraphNode::SingleTask));
        assert_eq!(GraphNode::End.next_node(), None);
    }

    #[test]
    fn test_response_marks_terminal() {
        let mut state = ExecutionState::new("目标");
        assert!(!state.is_terminal());
        state.finish("   ");
        assert!(state.is_terminal());
        assert_eq!(state.response(), EMPTY_RESPONSE_FALLBACK);
    }

    #[test]
    fn test_record_step_is_append_only_and_unique() {
        let mut state = ExecutionState::new("目标");
        state.plan = vec!["a".into(), "b".into(), "c".into()];
        assert!(state.record_step("a", "ok"));
        assert!(!state.record_step(" a ", "again"));
        assert_eq!(state.past_steps().len(), 1);
        assert_eq!(state.past_steps()[0].result, "ok");
        assert_eq!(state.remaining_steps(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&TaskStatusKind::WaitingReplanJudge).unwrap();
        assert_eq!(json, "\"WAITING_REPLAN_JUDGE\"");
        let json = serde_json::to_string(&GraphNode::UserInput).unwrap();
        assert_eq!(json, "\"user_input_node\"");
        assert_eq!(GraphNode::JudgeReplan.as_str(), "judge_replan_node");
    }

    #[test]
    fn test_task_status_survives_serialization() {
        let mut status = TaskStatus::new("获取产品A的视频素材");
        status.state.plan = vec!["搜索视频".into()];
        status.state.record_step("搜索视频", "found 3 URLs");
        status.transcript.push(Message::user("搜索视频"));
        status.transition(TaskStatusKind::WaitingInput, GraphNode::UserInput);

        let json = serde_json::to_string(&status).unwrap();
        let back: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, status.state);
        assert_eq!(back.transcript, status.transcript);
        assert!(back.is_waiting_for_input());
        assert!(back.plan_id.starts_with("plan_"));
    }
}
