//! 编排器：驱动 判定 → 规划 → 执行 → 重规划 → 总结 的状态机
//!
//! 每次进入节点都会更新 TaskStatus 并写入存储；执行器请求用户输入时保存完整状态后返回，
//! 不阻塞任何任务，宿主之后按 plan_id 调用 resume 继续。
//! 同一个 plan_id 同一时间只允许一个调用在驱动；不同运行之间没有共享的可变状态。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::core::{
    AgentError, AppInterrupt, GraphNode, RunRoute, TaskStatus, TaskStatusKind, TaskStore,
};
use crate::plan::{
    EventSink, Judge, Judgement, PlanEvent, Planner, ReplanDecision, Replanner, Responder,
    StepExecutor, StepMode, StepOutcome,
};

/// start / resume 的返回
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// 到达终态，status.result 即最终结果
    Completed(TaskStatus),
    /// 等待用户输入
    Suspended {
        status: TaskStatus,
        interrupt: AppInterrupt,
    },
}

impl RunOutcome {
    pub fn status(&self) -> &TaskStatus {
        match self {
            RunOutcome::Completed(status) => status,
            RunOutcome::Suspended { status, .. } => status,
        }
    }
}

const ABANDONED: &str = "运行已被放弃";

pub struct Orchestrator {
    pub(crate) judge: Judge,
    pub(crate) planner: Planner,
    pub(crate) executor: StepExecutor,
    pub(crate) replanner: Replanner,
    pub(crate) responder: Responder,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) events: EventSink,
    /// 单次运行最多执行的计划步骤数
    pub(crate) max_steps: usize,
    pub(crate) active: Mutex<HashSet<String>>,
}

/// 占用一个 plan_id，离开作用域时释放
struct ActiveRun<'a> {
    active: &'a Mutex<HashSet<String>>,
    plan_id: String,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let mut set = self.active.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.plan_id);
    }
}

impl Orchestrator {
    fn claim(&self, plan_id: &str) -> Result<ActiveRun<'_>, AgentError> {
        let mut set = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(plan_id.to_string()) {
            return Err(AgentError::RunBusy(plan_id.to_string()));
        }
        Ok(ActiveRun {
            active: &self.active,
            plan_id: plan_id.to_string(),
        })
    }

    async fn load(&self, plan_id: &str) -> Result<TaskStatus, AgentError> {
        self.store
            .load(plan_id)
            .await?
            .ok_or_else(|| AgentError::RunNotFound(plan_id.to_string()))
    }

    /// 开始一次运行
    pub async fn start(&self, objective: &str) -> Result<RunOutcome, AgentError> {
        let mut status = TaskStatus::new(objective.trim());
        let _run = self.claim(&status.plan_id)?;
        self.store.save(&status).await?;
        tracing::info!(plan_id = %status.plan_id, objective = %status.state.objective, "run started");
        self.drive(&mut status, GraphNode::JudgePlan).await
    }

    /// 用用户的回答恢复一个等待输入的运行
    pub async fn resume(&self, plan_id: &str, answer: &str) -> Result<RunOutcome, AgentError> {
        let _run = self.claim(plan_id)?;
        let mut status = self.load(plan_id).await?;
        if !status.is_waiting_for_input() {
            return Err(AgentError::NotWaitingForInput {
                plan_id: plan_id.to_string(),
                status: status.status,
                node: status.waiting_point,
            });
        }

        let transcript = std::mem::take(&mut status.transcript);
        status.waiting_input_ref.clear();
        let node = GraphNode::UserInput
            .next_node()
            .unwrap_or(GraphNode::SingleTask);
        self.enter(&mut status, TaskStatusKind::Running, node).await?;
        tracing::info!(plan_id, step = %status.state.current_task, "run resumed with user input");

        let mode = step_mode(&status);
        let outcome = self
            .executor
            .resume(plan_id, &status.state, mode, transcript, answer)
            .await;
        match self.apply(&mut status, outcome).await? {
            Applied::Suspended(outcome) => Ok(outcome),
            Applied::Next(node) => self.drive(&mut status, node).await,
        }
    }

    /// 当前记录
    pub async fn status(&self, plan_id: &str) -> Result<TaskStatus, AgentError> {
        self.load(plan_id).await
    }

    /// 所有等待用户输入的运行
    pub async fn list_waiting(&self) -> Result<Vec<TaskStatus>, AgentError> {
        self.store.list_waiting().await
    }

    /// 放弃一个未结束的运行（标记为 FAILED）；已结束的运行原样返回
    pub async fn abandon(&self, plan_id: &str) -> Result<TaskStatus, AgentError> {
        let _run = self.claim(plan_id)?;
        let mut status = self.load(plan_id).await?;
        if status.status.is_finished() {
            return Ok(status);
        }
        status.transcript.clear();
        status.waiting_input_ref.clear();
        status.state.finish(ABANDONED);
        status.result = ABANDONED.to_string();
        status.transition(TaskStatusKind::Failed, GraphNode::End);
        self.store.save(&status).await?;
        tracing::info!(plan_id, "run abandoned");
        Ok(status)
    }

    async fn enter(
        &self,
        status: &mut TaskStatus,
        kind: TaskStatusKind,
        node: GraphNode,
    ) -> Result<(), AgentError> {
        status.transition(kind, node);
        self.store.save(status).await?;
        tracing::info!(plan_id = %status.plan_id, node = node.as_str(), status = ?kind, "node entered");
        self.events.emit(PlanEvent::NodeEntered {
            plan_id: status.plan_id.clone(),
            node,
        });
        Ok(())
    }

    async fn drive(&self, status: &mut TaskStatus, mut node: GraphNode) -> Result<RunOutcome, AgentError> {
        loop {
            node = match node {
                GraphNode::JudgePlan => self.judge_plan(status).await?,
                GraphNode::SingleTask => match self.single_task(status).await? {
                    Applied::Next(next) => next,
                    Applied::Suspended(outcome) => return Ok(outcome),
                },
                GraphNode::JudgeReplan => self.judge_replan(status).await?,
                GraphNode::UserInput => {
                    // 恢复只走 resume；这里说明记录已经在等待输入
                    return Ok(RunOutcome::Suspended {
                        interrupt: AppInterrupt {
                            interrupt_point: GraphNode::UserInput,
                            interrupt_value: status.waiting_input_ref.clone(),
                            state: status.state.clone(),
                        },
                        status: status.clone(),
                    });
                }
                GraphNode::End => {
                    status.result = status.state.response().to_string();
                    self.enter(status, TaskStatusKind::Success, GraphNode::End).await?;
                    self.events.emit(PlanEvent::Response {
                        plan_id: status.plan_id.clone(),
                        text: status.result.clone(),
                    });
                    tracing::info!(plan_id = %status.plan_id, steps = status.state.past_steps().len(), "run completed");
                    return Ok(RunOutcome::Completed(status.clone()));
                }
            };
        }
    }

    async fn judge_plan(&self, status: &mut TaskStatus) -> Result<GraphNode, AgentError> {
        self.enter(status, TaskStatusKind::WaitingPlanJudge, GraphNode::JudgePlan)
            .await?;
        let objective = status.state.objective.clone();

        match self.judge.judge(&objective).await {
            Judgement::Task { content } => {
                let direct = (!content.is_empty()).then_some(content);
                tracing::info!(plan_id = %status.plan_id, direct = direct.is_some(), "judged as single task");
                status.route = Some(RunRoute::Task { direct });
                status.state.plan = vec![objective.clone()];
                status.state.current_task = objective;
            }
            Judgement::Plan { steps } => {
                let steps = if steps.is_empty() {
                    self.planner.plan(&objective).await
                } else {
                    steps
                };
                tracing::info!(plan_id = %status.plan_id, count = steps.len(), "judged as plan");
                self.events.emit(PlanEvent::PlanCreated {
                    plan_id: status.plan_id.clone(),
                    steps: steps.clone(),
                });
                status.route = Some(RunRoute::Plan);
                status.state.plan = steps;
            }
        }
        Ok(GraphNode::JudgePlan
            .next_node()
            .unwrap_or(GraphNode::SingleTask))
    }

    async fn single_task(&self, status: &mut TaskStatus) -> Result<Applied, AgentError> {
        self.enter(status, TaskStatusKind::Running, GraphNode::SingleTask)
            .await?;
        let plan_id = status.plan_id.clone();

        let outcome = match status.route.clone() {
            Some(RunRoute::Task {
                direct: Some(content),
            }) => {
                status.state.finish(content);
                return Ok(Applied::Next(GraphNode::End));
            }
            Some(RunRoute::Task { direct: None }) => {
                let task = status.state.objective.clone();
                self.events.emit(PlanEvent::StepStarted {
                    plan_id: plan_id.clone(),
                    step: task.clone(),
                });
                self.executor
                    .execute(&plan_id, &status.state, &task, StepMode::Standalone)
                    .await
            }
            Some(RunRoute::Plan) | None => {
                if status.state.past_steps().len() >= self.max_steps {
                    tracing::warn!(plan_id = %plan_id, max_steps = self.max_steps, "step limit reached, summarizing");
                    let response = self.responder.respond(&status.state).await;
                    status.state.finish(response);
                    return Ok(Applied::Next(GraphNode::End));
                }
                let Some(step) = status.state.remaining_steps().into_iter().next() else {
                    return Ok(Applied::Next(GraphNode::JudgeReplan));
                };
                status.state.current_task = step.clone();
                self.events.emit(PlanEvent::StepStarted {
                    plan_id: plan_id.clone(),
                    step: step.clone(),
                });
                self.executor
                    .execute(&plan_id, &status.state, &step, StepMode::InPlan)
                    .await
            }
        };
        self.apply(status, outcome).await
    }

    /// 处理单步结果：记录步骤、进入终态或保存中断
    async fn apply(&self, status: &mut TaskStatus, outcome: StepOutcome) -> Result<Applied, AgentError> {
        match outcome {
            StepOutcome::Continue(result) => {
                let step = status.state.current_task.clone();
                self.record(status, &step, &result);
                Ok(Applied::Next(GraphNode::JudgeReplan))
            }
            StepOutcome::Terminal(result) => {
                let step = status.state.current_task.clone();
                self.record(status, &step, &result);
                status.state.finish(result);
                Ok(Applied::Next(GraphNode::End))
            }
            StepOutcome::Suspend(signal) => {
                status.transcript = signal.transcript;
                status.waiting_input_ref = signal.payload.interrupt_value.clone();
                self.enter(status, TaskStatusKind::WaitingInput, GraphNode::UserInput)
                    .await?;
                self.events.emit(PlanEvent::Interrupt {
                    plan_id: status.plan_id.clone(),
                    value: signal.payload.interrupt_value.clone(),
                });
                Ok(Applied::Suspended(RunOutcome::Suspended {
                    status: status.clone(),
                    interrupt: signal.payload,
                }))
            }
        }
    }

    fn record(&self, status: &mut TaskStatus, step: &str, result: &str) {
        if status.state.record_step(step, result) {
            self.events.emit(PlanEvent::StepFinished {
                plan_id: status.plan_id.clone(),
                step: step.to_string(),
                result: result.to_string(),
            });
        } else {
            tracing::warn!(plan_id = %status.plan_id, step, "step already recorded, result dropped");
        }
    }

    async fn judge_replan(&self, status: &mut TaskStatus) -> Result<GraphNode, AgentError> {
        self.enter(status, TaskStatusKind::WaitingReplanJudge, GraphNode::JudgeReplan)
            .await?;

        match self.replanner.replan(&status.state).await {
            ReplanDecision::Plan(steps) => {
                self.events.emit(PlanEvent::PlanCreated {
                    plan_id: status.plan_id.clone(),
                    steps: steps.clone(),
                });
                status.state.plan = steps;
                Ok(GraphNode::SingleTask)
            }
            ReplanDecision::Respond(response) => {
                status.state.finish(response);
                Ok(GraphNode::End)
            }
            ReplanDecision::Exhausted => {
                let response = self.responder.respond(&status.state).await;
                status.state.finish(response);
                Ok(GraphNode::End)
            }
        }
    }
}

enum Applied {
    Next(GraphNode),
    Suspended(RunOutcome),
}

fn step_mode(status: &TaskStatus) -> StepMode {
    match status.route {
        Some(RunRoute::Task { .. }) => StepMode::Standalone,
        Some(RunRoute::Plan) | None => StepMode::InPlan,
    }
}
