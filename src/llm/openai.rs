//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；每次请求受超时约束，
//! 超时视为一次可恢复的失败，由上层折叠进结果文本。
//! 带附件的请求（视频 / 图片以 data URL 内联）直接按 chat/completions 的 JSON 格式发送，
//! 视频使用 `video_url` 内容段（DashScope、Gemini 等兼容端点支持）。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{Attachment, LlmClient, Message, Role};

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiClient {
    /// api_key 为空时读取 OPENAI_API_KEY
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let key = match api_key {
            Some(key) => key.to_string(),
            None => std::env::var("OPENAI_API_KEY").unwrap_or_default(),
        };
        let api_base = base_url.unwrap_or(DEFAULT_API_BASE).trim_end_matches('/').to_string();
        let config = OpenAIConfig::new()
            .with_api_key(key.clone())
            .with_api_base(api_base.clone());

        Self {
            client: Client::with_config(config),
            http: reqwest::Client::new(),
            api_base,
            api_key: key,
            model: model.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// 单次请求超时（秒）
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs.max(1));
        self
    }
}

fn request_message(m: &Message) -> Result<ChatCompletionRequestMessage, String> {
    let content = m.content.clone();
    let msg = match m.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::System),
        Role::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::User),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()
            .map(ChatCompletionRequestMessage::Assistant),
    };
    msg.map_err(|e| e.to_string())
}

fn role_name(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn attachment_part(a: &Attachment) -> Value {
    if a.is_video() {
        json!({ "type": "video_url", "video_url": { "url": a.data_url() } })
    } else {
        json!({ "type": "image_url", "image_url": { "url": a.data_url() } })
    }
}

/// 多模态请求体：附件挂在最后一条 user 消息上（文本段在前）
pub(crate) fn attachment_request(model: &str, messages: &[Message], attachments: &[Attachment]) -> Value {
    let last_user = messages.iter().rposition(|m| m.role == Role::User);
    let mut body: Vec<Value> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            if Some(i) == last_user {
                let mut parts = vec![json!({ "type": "text", "text": m.content })];
                parts.extend(attachments.iter().map(attachment_part));
                json!({ "role": "user", "content": parts })
            } else {
                json!({ "role": role_name(&m.role), "content": m.content })
            }
        })
        .collect();
    if last_user.is_none() {
        let parts: Vec<Value> = attachments.iter().map(attachment_part).collect();
        body.push(json!({ "role": "user", "content": parts }));
    }
    json!({ "model": model, "messages": body })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let messages = messages
            .iter()
            .map(request_message)
            .collect::<Result<Vec<_>, _>>()?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e| e.to_string())?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| format!("LLM request timed out after {}s", self.timeout.as_secs()))?
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "llm call finished"
            );
        }

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn complete_with_attachments(
        &self,
        messages: &[Message],
        attachments: &[Attachment],
    ) -> Result<String, String> {
        let body = attachment_request(&self.model, messages, attachments);
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("HTTP {status}: {}", text.chars().take(300).collect::<String>()));
        }
        let value: Value = resp.json().await.map_err(|e| format!("Read body: {e}"))?;
        tracing::debug!(model = %self.model, attachments = attachments.len(), usage = %value["usage"], "llm call finished");

        value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "响应中没有 message.content".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachments_ride_on_last_user_message() {
        let messages = [
            Message::system("你是分析师"),
            Message::user("以JSON格式输出视频的核心卖点"),
        ];
        let attachments = [Attachment::new("video/mp4", b"abc".to_vec())];
        let body = attachment_request("qwen-vl-max", &messages, &attachments);

        assert_eq!(body["model"], "qwen-vl-max");
        assert_eq!(body["messages"][0]["content"], "你是分析师");
        let parts = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "video_url");
        assert_eq!(parts[1]["video_url"]["url"], "data:video/mp4;base64,YWJj");
    }

    #[test]
    fn test_image_attachment_without_user_message() {
        let attachments = [Attachment::new("image/png", vec![0u8])];
        let body = attachment_request("m", &[Message::system("s")], &attachments);
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"][0]["type"], "image_url");
    }
}
