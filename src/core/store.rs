//! 运行状态存储
//!
//! Orchestrator 在每次节点切换后保存 TaskStatus；等待人工输入的运行可以在任意时间后按 plan_id 取回并恢复。
//! - InMemoryTaskStore：进程内（默认）
//! - SqliteTaskStore：异步 SQLite（feature = "async-sqlite"），进程重启后仍可恢复

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::{AgentError, TaskStatus};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 插入或覆盖
    async fn save(&self, status: &TaskStatus) -> Result<(), AgentError>;

    async fn load(&self, plan_id: &str) -> Result<Option<TaskStatus>, AgentError>;

    /// 所有等待人工输入的运行（按创建时间升序）
    async fn list_waiting(&self) -> Result<Vec<TaskStatus>, AgentError>;
}

const DEFAULT_MAX_FINISHED_RUNS: usize = 1000;

/// 内存版存储：已结束的运行超过上限时淘汰最早更新的，未结束的运行始终保留
pub struct InMemoryTaskStore {
    runs: RwLock<HashMap<String, TaskStatus>>,
    max_finished: usize,
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::with_finished_limit(DEFAULT_MAX_FINISHED_RUNS)
    }
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_finished_limit(max_finished: usize) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            max_finished,
        }
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save(&self, status: &TaskStatus) -> Result<(), AgentError> {
        let mut runs = self.runs.write().await;
        runs.insert(status.plan_id.clone(), status.clone());
        if status.status.is_finished() {
            prune_finished(&mut runs, self.max_finished);
        }
        Ok(())
    }

    async fn load(&self, plan_id: &str) -> Result<Option<TaskStatus>, AgentError> {
        Ok(self.runs.read().await.get(plan_id).cloned())
    }

    async fn list_waiting(&self) -> Result<Vec<TaskStatus>, AgentError> {
        let mut waiting: Vec<TaskStatus> = self
            .runs
            .read()
            .await
            .values()
            .filter(|s| s.is_waiting_for_input())
            .cloned()
            .collect();
        waiting.sort_by_key(|s| s.created_at);
        Ok(waiting)
    }
}

fn prune_finished(runs: &mut HashMap<String, TaskStatus>, max_finished: usize) {
    let mut finished: Vec<(i64, String)> = runs
        .values()
        .filter(|s| s.status.is_finished())
        .map(|s| (s.updated_at, s.plan_id.clone()))
        .collect();
    if finished.len() <= max_finished {
        return;
    }
    finished.sort();
    let excess = finished.len() - max_finished;
    for (_, plan_id) in finished.into_iter().take(excess) {
        runs.remove(&plan_id);
    }
    tracing::debug!(evicted = excess, "pruned finished runs");
}

/// SQLite 存储：每个运行一行，完整记录以 JSON 保存在 payload 列
#[cfg(feature = "async-sqlite")]
pub struct SqliteTaskStore {
    pool: sqlx::sqlite::SqlitePool,
}

#[cfg(feature = "async-sqlite")]
impl SqliteTaskStore {
    pub async fn open(db_path: impl AsRef<std::path::Path>) -> Result<Self, AgentError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(3)
            .connect(&db_url)
            .await
            .map_err(store_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS run_status (
                plan_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                waiting_point TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(store_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_status_status ON run_status(status)")
            .execute(&pool)
            .await
            .map_err(store_err)?;

        Ok(Self { pool })
    }
}

#[cfg(feature = "async-sqlite")]
fn store_err(e: impl std::fmt::Display) -> AgentError {
    AgentError::StoreError(e.to_string())
}

#[cfg(feature = "async-sqlite")]
fn wire_name<T: serde::Serialize>(value: &T) -> Result<String, AgentError> {
    let v = serde_json::to_value(value).map_err(store_err)?;
    Ok(v.as_str().unwrap_or_default().to_string())
}

#[cfg(feature = "async-sqlite")]
#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn save(&self, status: &TaskStatus) -> Result<(), AgentError> {
        let payload = serde_json::to_string(status).map_err(store_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO run_status
             (plan_id, status, waiting_point, payload, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&status.plan_id)
        .bind(wire_name(&status.status)?)
        .bind(status.waiting_point.as_str())
        .bind(&payload)
        .bind(status.created_at)
        .bind(status.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn load(&self, plan_id: &str) -> Result<Option<TaskStatus>, AgentError> {
        use sqlx::Row;

        let row = sqlx::query("SELECT payload FROM run_status WHERE plan_id = ?")
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        match row {
            Some(row) => {
                let payload: String = row.get("payload");
                Ok(Some(serde_json::from_str(&payload).map_err(store_err)?))
            }
            None => Ok(None),
        }
    }

    async fn list_waiting(&self) -> Result<Vec<TaskStatus>, AgentError> {
        use sqlx::Row;

        let rows = sqlx::query(
            "SELECT payload FROM run_status
             WHERE status = 'WAITING_INPUT'
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut waiting = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.get("payload");
            match serde_json::from_str::<TaskStatus>(&payload) {
                Ok(status) => waiting.push(status),
                Err(e) => tracing::warn!("Skipping unreadable run record: {}", e),
            }
        }
        Ok(waiting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{GraphNode, TaskStatusKind};

    #[tokio::test]
    async fn test_in_memory_store_roundtrip() {
        let store = InMemoryTaskStore::new();
        let mut status = TaskStatus::new("目标");
        store.save(&status).await.unwrap();

        status.transition(TaskStatusKind::Running, GraphNode::SingleTask);
        store.save(&status).await.unwrap();

        let loaded = store.load(&status.plan_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatusKind::Running);
        assert_eq!(store.len().await, 1);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_waiting_only_returns_interrupted_runs() {
        let store = InMemoryTaskStore::new();
        let mut waiting = TaskStatus::new("需要输入");
        waiting.transition(TaskStatusKind::WaitingInput, GraphNode::UserInput);
        let mut done = TaskStatus::new("已完成");
        done.transition(TaskStatusKind::Success, GraphNode::End);
        store.save(&waiting).await.unwrap();
        store.save(&done).await.unwrap();

        let list = store.list_waiting().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].plan_id, waiting.plan_id);
    }

    #[tokio::test]
    async fn test_finished_runs_are_evicted_oldest_first() {
        let store = InMemoryTaskStore::with_finished_limit(2);
        let mut waiting = TaskStatus::new("等待输入");
        waiting.transition(TaskStatusKind::WaitingInput, GraphNode::UserInput);
        waiting.updated_at = 0;
        store.save(&waiting).await.unwrap();

        let mut finished = Vec::new();
        for (i, kind) in [TaskStatusKind::Success, TaskStatusKind::Failed, TaskStatusKind::Success]
            .into_iter()
            .enumerate()
        {
            let mut run = TaskStatus::new(format!("目标{i}"));
            run.transition(kind, GraphNode::End);
            run.updated_at = 100 + i as i64;
            store.save(&run).await.unwrap();
            finished.push(run);
        }

        assert_eq!(store.len().await, 3);
        assert!(store.load(&finished[0].plan_id).await.unwrap().is_none());
        assert!(store.load(&finished[1].plan_id).await.unwrap().is_some());
        assert!(store.load(&finished[2].plan_id).await.unwrap().is_some());
        assert_eq!(store.list_waiting().await.unwrap().len(), 1);
    }

    #[cfg(feature = "async-sqlite")]
    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");

        let mut status = TaskStatus::new("目标");
        status.transition(TaskStatusKind::WaitingInput, GraphNode::UserInput);
        {
            let store = SqliteTaskStore::open(&path).await.unwrap();
            store.save(&status).await.unwrap();
        }

        let store = SqliteTaskStore::open(&path).await.unwrap();
        let loaded = store.load(&status.plan_id).await.unwrap().unwrap();
        assert!(loaded.is_waiting_for_input());
        assert_eq!(store.list_waiting().await.unwrap().len(), 1);
    }
}
