//! 运行过程事件：宿主可订阅，用于展示节点切换、步骤、工具调用与最终结果

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::GraphNode;

/// 单个过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanEvent {
    /// 进入状态机节点
    NodeEntered { plan_id: String, node: GraphNode },
    /// 得到（或替换为）新的计划
    PlanCreated { plan_id: String, steps: Vec<String> },
    /// 开始执行一步
    StepStarted { plan_id: String, step: String },
    /// 调用工具
    ToolCall {
        plan_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览）
    Observation {
        plan_id: String,
        tool: String,
        preview: String,
    },
    /// 工具执行失败（已折叠进步骤结果）
    ToolFailure {
        plan_id: String,
        tool: String,
        reason: String,
    },
    /// 一步完成
    StepFinished {
        plan_id: String,
        step: String,
        result: String,
    },
    /// 等待用户输入
    Interrupt { plan_id: String, value: String },
    /// 最终结果
    Response { plan_id: String, text: String },
}

/// 可选的事件发送端；未订阅或接收端已关闭时静默丢弃
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<PlanEvent>>,
}

impl EventSink {
    pub fn new(tx: Option<UnboundedSender<PlanEvent>>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: PlanEvent) {
        if let Some(ref tx) = self.tx {
            let _ = tx.send(event);
        }
    }
}

pub(crate) fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let ev = PlanEvent::NodeEntered {
            plan_id: "plan_1".into(),
            node: GraphNode::JudgeReplan,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "node_entered");
        assert_eq!(v["node"], "judge_replan_node");
    }

    #[tokio::test]
    async fn test_sink_delivers_and_tolerates_closed_receiver() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = EventSink::new(Some(tx));
        sink.emit(PlanEvent::Response {
            plan_id: "p".into(),
            text: "done".into(),
        });
        assert!(matches!(rx.recv().await, Some(PlanEvent::Response { .. })));
        drop(rx);
        sink.emit(PlanEvent::Interrupt {
            plan_id: "p".into(),
            value: "x".into(),
        });
        EventSink::default().emit(PlanEvent::Interrupt {
            plan_id: "p".into(),
            value: "x".into(),
        });
    }
}
