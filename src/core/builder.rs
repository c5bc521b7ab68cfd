//! 编排器构建器：按配置组装 LLM、工具、存储与各角色
//!
//! 每个角色可以单独指定 LLM（测试中常用脚本化客户端），未指定时共用按配置创建的客户端。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;

use crate::config::AppConfig;
use crate::core::{AgentError, InMemoryTaskStore, Orchestrator, TaskStore};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient, DEEPSEEK_CHAT};
use crate::plan::{EventSink, Judge, PlanEvent, Planner, Replanner, Responder, StepExecutor};
use crate::tools::{default_registry, executor_for, ToolRegistry};

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）；缺少 Key 时退回 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.timeouts.request;
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();

    match provider.as_str() {
        "deepseek" if has_deepseek_key || has_openai_key => {
            let model = if cfg.llm.model.starts_with("deepseek") {
                cfg.llm.model.as_str()
            } else {
                DEEPSEEK_CHAT
            };
            tracing::info!("Using DeepSeek LLM ({})", model);
            Arc::new(create_deepseek_client(Some(model), timeout))
        }
        "openai" if has_openai_key => {
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, None)
                    .with_timeout(timeout),
            )
        }
        "mock" => Arc::new(MockLlmClient),
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 视频分析模型：配置了 [tools.analysis] 时单独创建，否则与主模型共用
fn create_analysis_llm(cfg: &AppConfig, fallback: Arc<dyn LlmClient>) -> Arc<dyn LlmClient> {
    match cfg.tools.analysis.model {
        Some(ref model) => {
            tracing::info!("Using dedicated video analysis model ({})", model);
            Arc::new(
                OpenAiClient::new(cfg.tools.analysis.base_url.as_deref(), model, None)
                    .with_timeout(cfg.tools.tool_timeout_secs),
            )
        }
        None => fallback,
    }
}

async fn create_store(cfg: &AppConfig) -> Result<Arc<dyn TaskStore>, AgentError> {
    match cfg.store.backend.to_lowercase().as_str() {
        #[cfg(feature = "async-sqlite")]
        "sqlite" => {
            if let Some(parent) = cfg.store.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| AgentError::StoreError(e.to_string()))?;
                }
            }
            let store = crate::core::SqliteTaskStore::open(&cfg.store.path).await?;
            tracing::info!(path = %cfg.store.path.display(), "Using SQLite run store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "async-sqlite"))]
        "sqlite" => Err(AgentError::ConfigError(
            "store.backend = sqlite requires the async-sqlite feature".to_string(),
        )),
        _ => Ok(Arc::new(InMemoryTaskStore::with_finished_limit(
            cfg.store.max_finished_runs,
        ))),
    }
}

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    judge_llm: Option<Arc<dyn LlmClient>>,
    planner_llm: Option<Arc<dyn LlmClient>>,
    executor_llm: Option<Arc<dyn LlmClient>>,
    replanner_llm: Option<Arc<dyn LlmClient>>,
    responder_llm: Option<Arc<dyn LlmClient>>,
    analysis_llm: Option<Arc<dyn LlmClient>>,
    tools: Option<ToolRegistry>,
    store: Option<Arc<dyn TaskStore>>,
    events: Option<UnboundedSender<PlanEvent>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            judge_llm: None,
            planner_llm: None,
            executor_llm: None,
            replanner_llm: None,
            responder_llm: None,
            analysis_llm: None,
            tools: None,
            store: None,
            events: None,
        }
    }

    /// 所有角色共用的 LLM
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_judge_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.judge_llm = Some(llm);
        self
    }

    pub fn with_planner_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.planner_llm = Some(llm);
        self
    }

    pub fn with_executor_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.executor_llm = Some(llm);
        self
    }

    pub fn with_replanner_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.replanner_llm = Some(llm);
        self
    }

    pub fn with_responder_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.responder_llm = Some(llm);
        self
    }

    pub fn with_analysis_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.analysis_llm = Some(llm);
        self
    }

    /// 替换默认的工具注册表
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 订阅运行过程事件
    pub fn with_events(mut self, tx: UnboundedSender<PlanEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn build(self) -> Result<Orchestrator, AgentError> {
        let problems = self.config.validate();
        if !problems.is_empty() {
            return Err(AgentError::ConfigError(problems.join("; ")));
        }
        let cfg = &self.config;

        let base = match self.llm {
            Some(llm) => llm,
            None => create_llm_from_config(cfg),
        };
        let pick = |role: Option<Arc<dyn LlmClient>>| role.unwrap_or_else(|| base.clone());

        let tools = match self.tools {
            Some(tools) => tools,
            None => {
                let analysis = match self.analysis_llm {
                    Some(llm) => llm,
                    None => create_analysis_llm(cfg, base.clone()),
                };
                default_registry(cfg, analysis)
            }
        };
        let store = match self.store {
            Some(store) => store,
            None => create_store(cfg).await?,
        };
        let events = EventSink::new(self.events);

        let agent = &cfg.agent;
        let executor = StepExecutor::new(
            pick(self.executor_llm),
            Arc::new(executor_for(cfg, tools)),
            agent.max_tool_rounds,
        )
        .with_events(events.clone());

        Ok(Orchestrator {
            judge: Judge::new(pick(self.judge_llm), agent.min_plan_steps, agent.max_plan_steps),
            planner: Planner::new(pick(self.planner_llm), agent.min_plan_steps, agent.max_plan_steps),
            executor,
            replanner: Replanner::new(pick(self.replanner_llm), agent.max_plan_steps),
            responder: Responder::new(pick(self.responder_llm)),
            store,
            events,
            max_steps: agent.max_steps,
            active: Mutex::new(HashSet::new()),
        })
    }
}
