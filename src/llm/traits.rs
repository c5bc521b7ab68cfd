//! LLM 客户端抽象
//!
//! 判定、规划、执行、重规划、总结只依赖 LlmClient::complete，视频分析走 complete_with_attachments；
//! 每个角色可以注入不同的实现（不同模型或测试脚本）。

use async_trait::async_trait;

use crate::llm::{Attachment, Message};

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；错误以文本描述返回，由调用方决定如何降级
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 带附件的完成（多模态）；附件挂在最后一条 user 消息上。默认不支持
    async fn complete_with_attachments(
        &self,
        messages: &[Message],
        attachments: &[Attachment],
    ) -> Result<String, String> {
        let _ = (messages, attachments);
        Err("当前模型不支持附件输入".to_string())
    }
}
