//! 工具执行器
//!
//! 持有 ToolRegistry 与超时设置，invoke(capability) 在超时内调用对应工具，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed）；每次调用输出结构化审计日志（JSON）。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{Capability, ToolRegistry};

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    /// 个别工具（如混剪）耗时远超其他工具，单独设置超时
    overrides: HashMap<String, Duration>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            overrides: HashMap::new(),
        }
    }

    pub fn with_tool_timeout(mut self, tool_name: &str, timeout_secs: u64) -> Self {
        self.overrides
            .insert(tool_name.to_string(), Duration::from_secs(timeout_secs));
        self
    }

    fn timeout_for(&self, tool_name: &str) -> Duration {
        self.overrides
            .get(tool_name)
            .copied()
            .unwrap_or(self.timeout)
    }

    /// 执行一个已解码的能力
    pub async fn invoke(&self, capability: &Capability) -> Result<String, AgentError> {
        self.execute(capability.name(), capability.args()).await
    }

    /// 执行指定工具；超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecutionFailed；输出 JSON 审计日志
    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(
            self.timeout_for(tool_name),
            self.registry.execute(tool_name, args),
        )
        .await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn tool_descriptions(&self) -> String {
        self.registry.tool_descriptions()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::capability::SearchByProductArgs;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "search_by_product"
        }
        fn description(&self) -> &str {
            "slow"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "video_analysis"
        }
        fn description(&self) -> &str {
            "broken"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("模型不可用".into())
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_tool_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        let executor = ToolExecutor::new(registry, 60).with_tool_timeout("search_by_product", 0);
        let cap = Capability::SearchByProduct(SearchByProductArgs {
            product: "A".into(),
        });
        let err = executor.invoke(&cap).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(ref t) if t == "search_by_product"));
    }

    #[tokio::test]
    async fn test_failure_maps_to_execution_failed() {
        let mut registry = ToolRegistry::new();
        registry.register(Broken);
        let executor = ToolExecutor::new(registry, 5);
        let err = executor
            .execute("video_analysis", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(ref m) if m == "模型不可用"));
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = Value::String("x".repeat(500));
        assert!(args_preview(&long).ends_with("..."));
    }
}
