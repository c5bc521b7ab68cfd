//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找，
//! ToolExecutor 在调用时加超时并统一转 AgentError。
//! 注册表按名称有序保存，生成的 prompt 段落在多次运行间保持一致。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（输入与输出的自然语言约定）
    fn description(&self) -> &str;

    /// 参数 JSON Schema
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；失败时返回失败描述
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 将 JSON 参数解析为工具的强类型输入
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("Invalid args for {tool}: {e}"))
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具会被替换
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 可用工具段落：每个工具一行 "- name: description"，有参数时附上参数 schema
    pub fn tool_descriptions(&self) -> String {
        self.tools
            .iter()
            .map(|(name, tool)| {
                let line = format!("- {}: {}", name, tool.description());
                let schema = tool.parameters_schema();
                match schema.get("properties") {
                    Some(Value::Object(props)) if !props.is_empty() => {
                        format!("{}\n  参数: {}", line, Value::Object(props.clone()))
                    }
                    _ => line,
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Uppercase text"
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            #[derive(serde::Deserialize)]
            struct Args {
                text: String,
            }
            let args: Args = parse_args(self.name(), args)?;
            Ok(args.text.to_uppercase())
        }
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);

        let out = registry
            .execute("upper", serde_json::json!({"text": "abc"}))
            .await
            .unwrap();
        assert_eq!(out, "ABC");

        let err = registry.execute("upper", serde_json::json!({})).await.unwrap_err();
        assert!(err.contains("Invalid args for upper"));

        let err = registry.execute("missing", Value::Null).await.unwrap_err();
        assert!(err.contains("Unknown tool"));
    }

    struct Shout;

    #[async_trait]
    impl Tool for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn description(&self) -> &str {
            "Repeat text loudly"
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok(String::new())
        }
    }

    #[test]
    fn test_descriptions_include_parameters() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);
        registry.register(Shout);
        let text = registry.tool_descriptions();
        assert!(text.starts_with("- shout: Repeat text loudly\n  参数: {\"text\""));
        assert!(text.ends_with("- upper: Uppercase text"));
    }

    #[test]
    fn test_descriptions_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Upper);
        assert_eq!(registry.tool_names(), vec!["upper".to_string()]);
        assert_eq!(registry.tool_descriptions(), "- upper: Uppercase text");
    }
}
