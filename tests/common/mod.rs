//! 集成测试公共部分：按角色脚本化的 LLM 与桩工具

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use ad_agent::config::AppConfig;
use ad_agent::core::{InMemoryTaskStore, Orchestrator, OrchestratorBuilder, TaskStore};
use ad_agent::llm::ScriptedLlmClient;
use ad_agent::plan::PlanEvent;
use ad_agent::tools::{Tool, ToolRegistry, UserInputTool};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

/// 各角色独立的脚本
pub struct Scripts {
    pub judge: Arc<ScriptedLlmClient>,
    pub planner: Arc<ScriptedLlmClient>,
    pub executor: Arc<ScriptedLlmClient>,
    pub replanner: Arc<ScriptedLlmClient>,
    pub responder: Arc<ScriptedLlmClient>,
}

fn scripted(replies: &[&str]) -> Arc<ScriptedLlmClient> {
    Arc::new(ScriptedLlmClient::new(replies.iter().copied()))
}

impl Scripts {
    pub fn new(judge: &[&str], executor: &[&str], replanner: &[&str]) -> Self {
        Self {
            judge: scripted(judge),
            planner: scripted(&[]),
            executor: scripted(executor),
            replanner: scripted(replanner),
            responder: scripted(&[]),
        }
    }
}

/// 桩工具：返回固定结果并记录收到的参数
pub struct StubTool {
    name: &'static str,
    reply: Result<String, String>,
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl StubTool {
    pub fn ok(name: &'static str, reply: &str) -> Self {
        Self {
            name,
            reply: Ok(reply.to_string()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(name: &'static str, reason: &str) -> Self {
        Self {
            name,
            reply: Err(reason.to_string()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "stub"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        self.calls.lock().unwrap().push(args);
        self.reply.clone()
    }
}

pub fn registry(tools: Vec<StubTool>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    registry.register(UserInputTool);
    registry
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<InMemoryTaskStore>,
    pub events: UnboundedReceiver<PlanEvent>,
}

pub async fn harness(scripts: &Scripts, tools: ToolRegistry) -> Harness {
    let store = Arc::new(InMemoryTaskStore::new());
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let orchestrator = builder(scripts, tools, AppConfig::default())
        .with_store(store.clone() as Arc<dyn TaskStore>)
        .with_events(tx)
        .build()
        .await
        .unwrap();
    Harness {
        orchestrator,
        store,
        events: rx,
    }
}

pub fn builder(scripts: &Scripts, tools: ToolRegistry, config: AppConfig) -> OrchestratorBuilder {
    OrchestratorBuilder::new(config)
        .with_judge_llm(scripts.judge.clone())
        .with_planner_llm(scripts.planner.clone())
        .with_executor_llm(scripts.executor.clone())
        .with_replanner_llm(scripts.replanner.clone())
        .with_responder_llm(scripts.responder.clone())
        .with_tools(tools)
}

pub fn drain(rx: &mut UnboundedReceiver<PlanEvent>) -> Vec<PlanEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}
