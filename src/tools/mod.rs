pub mod analysis;
pub mod capability;
pub mod download;
pub mod executor;
pub mod mixclip;
pub mod registry;
pub mod schema;
pub mod search;
pub mod user_input;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::LlmClient;

pub use analysis::VideoAnalysisTool;
pub use capability::{Capability, ToolCall};
pub use executor::ToolExecutor;
pub use mixclip::MixclipTool;
pub use registry::{Tool, ToolRegistry};
pub use schema::tool_call_schema_json;
pub use search::SearchByProductTool;
pub use user_input::UserInputTool;

/// 按配置注册全部四个工具；analysis_llm 为视频分析所用的模型
pub fn default_registry(cfg: &AppConfig, analysis_llm: Arc<dyn LlmClient>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(SearchByProductTool::new(&cfg.tools.search));
    registry.register(MixclipTool::new(&cfg.tools.mixclip, &cfg.tools.download));
    registry.register(VideoAnalysisTool::new(
        analysis_llm,
        &cfg.tools.analysis,
        &cfg.tools.download,
    ));
    registry.register(UserInputTool);
    registry
}

/// 包装注册表：全局超时 + 混剪单独超时
pub fn executor_for(cfg: &AppConfig, registry: ToolRegistry) -> ToolExecutor {
    ToolExecutor::new(registry, cfg.tools.tool_timeout_secs)
        .with_tool_timeout(Capability::MIXCLIP, cfg.tools.mixclip.timeout_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_default_registry_has_all_capabilities() {
        let registry = default_registry(&AppConfig::default(), Arc::new(MockLlmClient));
        let names = registry.tool_names();
        for name in Capability::NAMES {
            assert!(names.iter().any(|n| n == name), "missing {name}");
        }
        assert_eq!(names.len(), Capability::NAMES.len());
    }
}
