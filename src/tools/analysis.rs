//! video_analysis：按分析维度逐个分析视频
//!
//! 每个视频单独请求分析模型：视频字节（远程走下载器，本地读文件）以附件形式随请求发送；
//! system prompt 由维度生成，并附带响应 schema（每个维度都是必填字符串）。
//! 单个视频失败（加载失败、超过大小上限、模型错误、JSON 不合规）只记日志并跳过。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::{AnalysisSection, DownloadSection};
use crate::llm::{Attachment, LlmClient, Message};
use crate::plan::parser::decode;
use crate::tools::capability::{Capability, VideoAnalysisArgs};
use crate::tools::download::Downloader;
use crate::tools::registry::parse_args;
use crate::tools::schema::args_schema;
use crate::tools::Tool;

pub struct VideoAnalysisTool {
    llm: Arc<dyn LlmClient>,
    downloader: Downloader,
    max_bytes: u64,
}

impl VideoAnalysisTool {
    pub fn new(llm: Arc<dyn LlmClient>, cfg: &AnalysisSection, download: &DownloadSection) -> Self {
        Self {
            llm,
            downloader: Downloader::new(download),
            max_bytes: cfg.max_video_bytes(),
        }
    }

    /// 远程视频下载到内存，本地视频直接读取
    async fn load_video(&self, url: &str) -> Result<Attachment, String> {
        let data = if is_remote(url) {
            self.downloader.fetch_bytes(url, self.max_bytes).await?
        } else {
            let meta = tokio::fs::metadata(url)
                .await
                .map_err(|e| format!("读取本地视频失败 {url}: {e}"))?;
            if meta.len() > self.max_bytes {
                return Err(format!(
                    "视频超过大小上限 {} 字节 ({}): {url}",
                    self.max_bytes,
                    meta.len()
                ));
            }
            tokio::fs::read(url)
                .await
                .map_err(|e| format!("读取本地视频失败 {url}: {e}"))?
        };
        Ok(Attachment::new(mime_for(url), data))
    }

    async fn analyze_one(&self, url: &str, dimensions: &[String]) -> Result<Value, String> {
        let video = self.load_video(url).await?;
        tracing::debug!(video_url = %url, attachment = ?video, "analyzing video");

        let messages = vec![
            Message::system(analysis_system_prompt(dimensions)),
            Message::user(format!(
                "以JSON格式输出视频的{}\n只输出符合以下 JSON Schema 的 JSON:\n{}",
                dimensions.join(","),
                response_schema(dimensions)
            )),
        ];
        let raw = self
            .llm
            .complete_with_attachments(&messages, std::slice::from_ref(&video))
            .await?;
        let obj: Map<String, Value> = decode(&raw).map_err(|e| e.to_string())?;
        check_dimensions(&obj, dimensions)?;
        Ok(Value::Object(obj))
    }
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// 按扩展名推断 MIME，未知时按 mp4 处理
fn mime_for(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    match path.rsplit('.').next() {
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ => "video/mp4",
    }
}

/// 由分析维度生成 system prompt
pub fn analysis_system_prompt(dimensions: &[String]) -> String {
    let mut prompt = format!(
        "您是一位专业的电商广告分析师，擅长从视频中提取关键信息。您的任务是分析输入的电商广告视频，并以JSON格式输出视频的{}。",
        dimensions.join(",")
    );
    for dim in dimensions {
        prompt.push_str(&format!(
            "\n<{dim}分析>\n分析步骤：\n观看视频：完整观看广告视频至少一次，以获取整体印象。\n分析视频的{dim}\n"
        ));
    }
    prompt
}

/// 响应 schema：每个维度一个必填字符串字段
pub fn response_schema(dimensions: &[String]) -> Value {
    let properties: Map<String, Value> = dimensions
        .iter()
        .map(|d| (d.clone(), serde_json::json!({ "type": "string" })))
        .collect();
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": dimensions,
    })
}

fn check_dimensions(obj: &Map<String, Value>, dimensions: &[String]) -> Result<(), String> {
    for dim in dimensions {
        match obj.get(dim) {
            Some(Value::String(_)) => {}
            Some(_) => return Err(format!("维度 {dim} 不是字符串")),
            None => return Err(format!("缺少维度 {dim}")),
        }
    }
    Ok(())
}

#[async_trait]
impl Tool for VideoAnalysisTool {
    fn name(&self) -> &str {
        Capability::VIDEO_ANALYSIS
    }

    fn description(&self) -> &str {
        "分析视频内容。输入: {\"video_urls\": [视频链接或本地路径], \"analysis_dimensions\": [分析维度，如 口播文案、核心卖点、运镜类别]}。输出: 每个视频一行分析结果（JSON）。"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<VideoAnalysisArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: VideoAnalysisArgs = parse_args(self.name(), args)?;
        if args.video_urls.is_empty() {
            return Err("Missing video_urls".to_string());
        }
        let dimensions = args.dimensions();

        let mut lines = Vec::new();
        for url in args.video_urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
            match self.analyze_one(url, &dimensions).await {
                Ok(result) => lines.push(format!("对于video_url:{url}, 分析结果如下{result}")),
                Err(e) => tracing::warn!(video_url = %url, error = %e, "video analysis skipped"),
            }
        }

        if lines.is_empty() {
            return Err("所有视频分析均失败".to_string());
        }
        Ok(lines.join("\n"))
    }
}
