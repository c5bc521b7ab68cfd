//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AD_AGENT__*` 覆盖（双下划线表示嵌套，如 `AD_AGENT__LLM__PROVIDER=openai`）。
//! 所有字段都有默认值，找不到配置文件时也能得到可用配置。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub store: StoreSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [agent] 段：循环上限与计划约束
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 一次运行最多执行的计划步骤数，超过后直接总结
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// 单步内模型 ↔ 工具的最大往返次数
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_min_plan_steps")]
    pub min_plan_steps: usize,
    #[serde(default = "default_max_plan_steps")]
    pub max_plan_steps: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tool_rounds: default_max_tool_rounds(),
            min_plan_steps: default_min_plan_steps(),
            max_plan_steps: default_max_plan_steps(),
        }
    }
}

fn default_max_steps() -> usize {
    12
}

fn default_max_tool_rounds() -> usize {
    6
}

fn default_min_plan_steps() -> usize {
    3
}

fn default_max_plan_steps() -> usize {
    5
}

/// [tools] 段：工具超时与各工具参数
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）；混剪单独配置
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub mixclip: MixclipSection,
    #[serde(default)]
    pub download: DownloadSection,
    #[serde(default)]
    pub analysis: AnalysisSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            search: SearchSection::default(),
            mixclip: MixclipSection::default(),
            download: DownloadSection::default(),
            analysis: AnalysisSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    120
}

/// [tools.search] 段：视频素材检索服务
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    /// 检索服务地址（POST JSON）；未配置时工具返回失败描述
    pub endpoint: Option<String>,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            limit: default_search_limit(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_search_limit() -> usize {
    3
}

fn default_search_timeout_secs() -> u64 {
    30
}

/// [tools.mixclip] 段：外部混剪程序与输出参数
#[derive(Debug, Clone, Deserialize)]
pub struct MixclipSection {
    #[serde(default = "default_mixclip_command")]
    pub command: String,
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// 成片时长（秒）
    #[serde(default = "default_output_time")]
    pub output_time: u32,
    #[serde(default = "default_num_output")]
    pub num_output: u32,
    #[serde(default)]
    pub keep_original_audio: bool,
    pub background_music_path: Option<PathBuf>,
    #[serde(default = "default_background_volume")]
    pub background_volume: f32,
    /// 单次最多混剪的素材数
    #[serde(default = "default_max_videos")]
    pub max_videos: usize,
    #[serde(default = "default_mixclip_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MixclipSection {
    fn default() -> Self {
        Self {
            command: default_mixclip_command(),
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            output_time: default_output_time(),
            num_output: default_num_output(),
            keep_original_audio: false,
            background_music_path: None,
            background_volume: default_background_volume(),
            max_videos: default_max_videos(),
            timeout_secs: default_mixclip_timeout_secs(),
        }
    }
}

fn default_mixclip_command() -> String {
    "mixclip".to_string()
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("workspace/temp/input")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("workspace/temp/output")
}

fn default_output_time() -> u32 {
    30
}

fn default_num_output() -> u32 {
    1
}

fn default_background_volume() -> f32 {
    0.26
}

fn default_max_videos() -> usize {
    3
}

fn default_mixclip_timeout_secs() -> u64 {
    900
}

/// [tools.download] 段：素材下载重试
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,
    /// 退避基数（毫秒），第 n 次重试前等待 base * 2^n
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_secs: default_download_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_download_timeout_secs() -> u64 {
    30
}

fn default_backoff_base_ms() -> u64 {
    1000
}

/// [tools.analysis] 段：视频分析模型（OpenAI 兼容的多模态端点）
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisSection {
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 单个视频内联发送的大小上限（MB）
    #[serde(default = "default_max_video_mb")]
    pub max_video_mb: u64,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            model: None,
            base_url: None,
            max_video_mb: default_max_video_mb(),
        }
    }
}

impl AnalysisSection {
    pub fn max_video_bytes(&self) -> u64 {
        self.max_video_mb.saturating_mul(1024 * 1024)
    }
}

fn default_max_video_mb() -> u64 {
    50
}

/// [store] 段：运行状态存储
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// memory / sqlite
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// 内存存储最多保留的已结束运行数，超出时淘汰最早更新的
    #[serde(default = "default_max_finished_runs")]
    pub max_finished_runs: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
            max_finished_runs: default_max_finished_runs(),
        }
    }
}

fn default_max_finished_runs() -> usize {
    1000
}

fn default_store_backend() -> String {
    "memory".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("workspace/runs.db")
}

const MAX_DOWNLOAD_RETRIES: u32 = 10;

impl AppConfig {
    /// 校验配置，返回问题列表（为空表示可用）
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let provider = self.llm.provider.to_lowercase();
        if !["openai", "deepseek", "mock"].contains(&provider.as_str()) {
            errors.push(format!("不支持的 LLM 后端: {}", self.llm.provider));
        }
        if self.llm.timeouts.request == 0 {
            errors.push("llm.timeouts.request 必须大于 0".to_string());
        }
        if self.agent.max_steps == 0 {
            errors.push("agent.max_steps 必须大于 0".to_string());
        }
        if self.agent.max_tool_rounds == 0 {
            errors.push("agent.max_tool_rounds 必须大于 0".to_string());
        }
        if self.agent.min_plan_steps > self.agent.max_plan_steps {
            errors.push(format!(
                "agent.min_plan_steps ({}) 不能大于 agent.max_plan_steps ({})",
                self.agent.min_plan_steps, self.agent.max_plan_steps
            ));
        }
        if !(0.0..=1.0).contains(&self.tools.mixclip.background_volume) {
            errors.push("tools.mixclip.background_volume 必须在 0-1 之间".to_string());
        }
        if self.tools.mixclip.max_videos == 0 {
            errors.push("tools.mixclip.max_videos 必须大于 0".to_string());
        }
        if self.tools.download.max_retries > MAX_DOWNLOAD_RETRIES {
            errors.push(format!(
                "tools.download.max_retries 不能大于 {MAX_DOWNLOAD_RETRIES}"
            ));
        }
        if self.tools.analysis.max_video_mb == 0 {
            errors.push("tools.analysis.max_video_mb 必须大于 0".to_string());
        }
        let backend = self.store.backend.to_lowercase();
        if !["memory", "sqlite"].contains(&backend.as_str()) {
            errors.push(format!("不支持的存储后端: {}", self.store.backend));
        }

        errors
    }
}

/// 从 config 目录加载配置，环境变量 AD_AGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（可覆盖前面的键）；文件不存在时报错
/// 3. 最后叠加环境变量 AD_AGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if !path.exists() {
            return Err(config::ConfigError::Message(format!(
                "配置文件不存在: {}",
                path.display()
            )));
        }
        builder = builder.add_source(config::File::from(path.clone()));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AD_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
        assert_eq!(cfg.agent.max_plan_steps, 5);
        assert_eq!(cfg.tools.search.limit, 3);
        assert_eq!(cfg.tools.mixclip.output_time, 30);
        assert_eq!(cfg.tools.download.max_retries, 3);
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "gemini".to_string();
        cfg.agent.min_plan_steps = 6;
        cfg.tools.mixclip.background_volume = 1.5;
        let errors = cfg.validate();
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(errors[0].contains("gemini"));
    }

    #[test]
    fn test_validate_bounds_download_retries() {
        let mut cfg = AppConfig::default();
        cfg.tools.download.max_retries = 40;
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("tools.download.max_retries"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.toml");
        let err = load_config(Some(path)).unwrap_err();
        assert!(err.to_string().contains("配置文件不存在"), "{err}");
        assert!(err.to_string().contains("typo.toml"));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            r#"
[llm]
provider = "deepseek"
model = "deepseek-chat"

[agent]
max_steps = 4

[tools.search]
endpoint = "http://localhost:9000/search"
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.llm.provider, "deepseek");
        assert_eq!(cfg.agent.max_steps, 4);
        assert_eq!(cfg.agent.max_tool_rounds, 6);
        assert_eq!(
            cfg.tools.search.endpoint.as_deref(),
            Some("http://localhost:9000/search")
        );
    }
}
