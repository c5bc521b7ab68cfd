//! Mock / 脚本化 LLM 客户端（用于本地演示与测试，无需 API）
//!
//! - MockLlmClient：把最后一条 User 消息当作单任务直接回答，便于无 Key 时跑通整个流程。
//! - ScriptedLlmClient：按顺序返回预置回复，并记录每次收到的消息，测试里用来断言 prompt 内容与调用次数。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{Attachment, LlmClient, Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let content = serde_json::to_string(&format!("Echo from Mock: {}", last_user))
            .map_err(|e| e.to_string())?;
        Ok(format!(r#"{{"kind": "task", "content": {}}}"#, content))
    }
}

/// 脚本化客户端：每次 complete 弹出一条预置回复；脚本耗尽时返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    received: Mutex<Vec<Vec<Message>>>,
    attachments: Mutex<Vec<Vec<Attachment>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            received: Mutex::new(Vec::new()),
            attachments: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条成功回复
    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Ok(reply.into()));
        }
    }

    /// 追加一次调用失败（模拟超时 / 网络错误）
    pub fn push_error(&self, error: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(error.into()));
        }
    }

    /// 已发生的调用次数
    pub fn calls(&self) -> usize {
        self.received.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// 每次调用收到的完整消息列表
    pub fn received(&self) -> Vec<Vec<Message>> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// 每次带附件调用收到的附件
    pub fn received_attachments(&self) -> Vec<Vec<Attachment>> {
        self.attachments.lock().map(|a| a.clone()).unwrap_or_default()
    }

    fn next_reply(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut r) = self.received.lock() {
            r.push(messages.to_vec());
        }
        self.replies
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()))
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.next_reply(messages)
    }

    async fn complete_with_attachments(
        &self,
        messages: &[Message],
        attachments: &[Attachment],
    ) -> Result<String, String> {
        if let Ok(mut a) = self.attachments.lock() {
            a.push(attachments.to_vec());
        }
        self.next_reply(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let llm = ScriptedLlmClient::new(["first", "second"]);
        llm.push_error("timeout");

        assert_eq!(llm.complete(&[Message::user("a")]).await.unwrap(), "first");
        assert_eq!(llm.complete(&[Message::user("b")]).await.unwrap(), "second");
        assert_eq!(llm.complete(&[]).await.unwrap_err(), "timeout");
        assert!(llm.complete(&[]).await.is_err());
        assert_eq!(llm.calls(), 4);
        assert_eq!(llm.received()[1][0].content, "b");
    }

    #[tokio::test]
    async fn test_mock_answers_as_task() {
        let reply = MockLlmClient
            .complete(&[Message::system("sys"), Message::user("介绍产品A")])
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(v["kind"], "task");
        assert!(v["content"].as_str().unwrap().contains("介绍产品A"));
    }
}
