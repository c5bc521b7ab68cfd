//! search_by_product：按产品检索视频素材
//!
//! POST `{product, limit}` 到配置的检索服务，返回视频链接的 JSON 数组。
//! 服务不可用、超时、响应无法识别或没有任何链接时返回失败描述，由执行器折叠进步骤结果。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::SearchSection;
use crate::tools::capability::{Capability, SearchByProductArgs};
use crate::tools::registry::parse_args;
use crate::tools::schema::args_schema;
use crate::tools::Tool;

pub struct SearchByProductTool {
    client: Client,
    endpoint: Option<String>,
    limit: usize,
}

impl SearchByProductTool {
    pub fn new(cfg: &SearchSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: cfg.endpoint.clone(),
            limit: cfg.limit,
        }
    }

    async fn search(&self, product: &str) -> Result<Vec<String>, String> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| "tools.search.endpoint 未配置".to_string())?;
        let resp = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "product": product, "limit": self.limit }))
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("Read body: {}", e))?;
        let mut urls = extract_urls(&body);
        urls.truncate(self.limit);
        Ok(urls)
    }
}

/// 从检索服务响应中提取链接：支持字符串数组、对象数组（url / video_url 字段）
/// 以及包在 urls / videos / data / result 字段里的上述两种形式
pub fn extract_urls(body: &Value) -> Vec<String> {
    let list = match body {
        Value::Array(items) => items,
        Value::Object(map) => {
            match ["urls", "videos", "data", "result"]
                .iter()
                .find_map(|k| map.get(*k).and_then(|v| v.as_array()))
            {
                Some(items) => items,
                None => return Vec::new(),
            }
        }
        _ => return Vec::new(),
    };

    list.iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(obj) => obj
                .get("url")
                .or_else(|| obj.get("video_url"))
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

#[async_trait]
impl Tool for SearchByProductTool {
    fn name(&self) -> &str {
        Capability::SEARCH_BY_PRODUCT
    }

    fn description(&self) -> &str {
        "根据产品名称或产品类型检索相关视频素材。输入: {\"product\": \"产品名称\"}。输出: 视频链接的 JSON 数组；检索失败或未找到素材时返回失败说明。"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<SearchByProductArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: SearchByProductArgs = parse_args(self.name(), args)?;
        let product = args.product.trim();
        if product.is_empty() {
            return Err("Missing product".to_string());
        }
        tracing::info!(product = %product, "search_by_product");
        let urls = self.search(product).await.map_err(|e| {
            tracing::warn!(product = %product, error = %e, "search_by_product failed");
            format!("检索失败: {e}")
        })?;
        if urls.is_empty() {
            tracing::warn!(product = %product, "search_by_product returned no videos");
            return Err(format!("未找到产品{product}的视频素材"));
        }
        serde_json::to_string(&urls).map_err(|e| format!("检索失败: {e}"))
    }
}
