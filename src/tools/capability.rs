//! 能力集合：模型可调用的工具是一个封闭集合
//!
//! 模型输出 `{"tool": "...", "args": {...}}`，先宽松解析为 ToolCall，再严格解码为 Capability；
//! 执行器对 Capability 做模式匹配：user_input 转为中断，其余交给 ToolExecutor。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;

/// 模型给出的原始工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// 视频分析的默认维度
pub const DEFAULT_ANALYSIS_DIMENSIONS: [&str; 7] = [
    "口播文案",
    "产品名称",
    "核心卖点",
    "场景",
    "爆款因素总结",
    "运镜类别",
    "音效",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchByProductArgs {
    /// 产品名称或产品类型
    pub product: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MixclipArgs {
    /// 待混剪的视频素材链接，最多 3 个，必须是对话中出现过的有效链接
    pub video_urls: Vec<String>,
    /// 产品名称，如 Apple iPhone 15 Pro Max
    pub product_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VideoAnalysisArgs {
    /// 视频链接列表，可以是本地路径或网络链接
    pub video_urls: Vec<String>,
    /// 分析维度，如 核心卖点、运镜类别；为空时使用默认维度
    #[serde(default)]
    pub analysis_dimensions: Vec<String>,
}

impl VideoAnalysisArgs {
    pub fn dimensions(&self) -> Vec<String> {
        let dims: Vec<String> = self
            .analysis_dimensions
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if dims.is_empty() {
            DEFAULT_ANALYSIS_DIMENSIONS.iter().map(|d| d.to_string()).collect()
        } else {
            dims
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserInputArgs {
    /// 参考内容，用于提示用户需要补充什么
    #[serde(default)]
    pub ref_content: String,
}

/// 封闭的能力集合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum Capability {
    SearchByProduct(SearchByProductArgs),
    Mixclip(MixclipArgs),
    VideoAnalysis(VideoAnalysisArgs),
    UserInput(UserInputArgs),
}

impl Capability {
    pub const SEARCH_BY_PRODUCT: &'static str = "search_by_product";
    pub const MIXCLIP: &'static str = "mixclip";
    pub const VIDEO_ANALYSIS: &'static str = "video_analysis";
    pub const USER_INPUT: &'static str = "user_input";

    pub const NAMES: [&'static str; 4] = [
        Self::SEARCH_BY_PRODUCT,
        Self::MIXCLIP,
        Self::VIDEO_ANALYSIS,
        Self::USER_INPUT,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::SearchByProduct(_) => Self::SEARCH_BY_PRODUCT,
            Capability::Mixclip(_) => Self::MIXCLIP,
            Capability::VideoAnalysis(_) => Self::VIDEO_ANALYSIS,
            Capability::UserInput(_) => Self::USER_INPUT,
        }
    }

    /// 参数的 JSON 形式（交给注册表中的工具实现）
    pub fn args(&self) -> Value {
        let v = match self {
            Capability::SearchByProduct(a) => serde_json::to_value(a),
            Capability::Mixclip(a) => serde_json::to_value(a),
            Capability::VideoAnalysis(a) => serde_json::to_value(a),
            Capability::UserInput(a) => serde_json::to_value(a),
        };
        v.unwrap_or(Value::Null)
    }

    /// 严格解码：未知工具名为 HallucinatedTool，参数不符为 JsonParseError
    pub fn from_call(call: &ToolCall) -> Result<Self, AgentError> {
        let name = call.tool.trim();
        if !Self::NAMES.contains(&name) {
            return Err(AgentError::HallucinatedTool(name.to_string()));
        }
        let args = if call.args.is_null() {
            Value::Object(Default::default())
        } else {
            call.args.clone()
        };
        let tagged = serde_json::json!({ "tool": name, "args": args });
        serde_json::from_value(tagged)
            .map_err(|e| AgentError::JsonParseError(format!("{name}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(tool: &str, args: Value) -> ToolCall {
        ToolCall {
            tool: tool.to_string(),
            args,
        }
    }

    #[test]
    fn test_decode_known_capabilities() {
        let cap = Capability::from_call(&call(
            "search_by_product",
            serde_json::json!({"product": "可乐"}),
        ))
        .unwrap();
        assert_eq!(
            cap,
            Capability::SearchByProduct(SearchByProductArgs {
                product: "可乐".into()
            })
        );
        assert_eq!(cap.name(), "search_by_product");
        assert_eq!(cap.args()["product"], "可乐");

        let cap = Capability::from_call(&call("user_input", Value::Null)).unwrap();
        assert!(matches!(cap, Capability::UserInput(ref a) if a.ref_content.is_empty()));
    }

    #[test]
    fn test_unknown_tool_is_hallucinated() {
        let err = Capability::from_call(&call("shell", serde_json::json!({}))).unwrap_err();
        assert!(matches!(err, AgentError::HallucinatedTool(ref n) if n == "shell"));
    }

    #[test]
    fn test_bad_args_are_parse_errors() {
        let err = Capability::from_call(&call("mixclip", serde_json::json!({"video_urls": "x"})))
            .unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
    }

    #[test]
    fn test_analysis_dimensions_default() {
        let args = VideoAnalysisArgs {
            video_urls: vec!["a.mp4".into()],
            analysis_dimensions: vec![" ".into()],
        };
        assert_eq!(args.dimensions().len(), DEFAULT_ANALYSIS_DIMENSIONS.len());

        let args = VideoAnalysisArgs {
            video_urls: vec![],
            analysis_dimensions: vec!["核心卖点".into()],
        };
        assert_eq!(args.dimensions(), vec!["核心卖点".to_string()]);
    }
}
