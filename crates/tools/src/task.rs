//! Personal task list tools.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use dashmap::DashMap;
use proto::{ParamSpec, ParamType, SessionKey, ToolError, ToolSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{SessionContext, Tool, ToolHandler, ToolOutput, parse_args, temporal};

const DEFAULT_LIST_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Open,
    Done,
    Cancelled,
}

impl TaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    pub due_at: Option<DateTime<FixedOffset>>,
    pub status: TaskStatus,
    pub created_at: DateTime<FixedOffset>,
}

/// Storage collaborator for tasks.
#[async_trait]
pub trait TaskBoard: Send + Sync {
    async fn create(
        &self,
        session: &SessionKey,
        title: String,
        due_at: Option<DateTime<FixedOffset>>,
        created_at: DateTime<FixedOffset>,
    ) -> Result<Task, ToolError>;

    /// Newest first.
    async fn list(&self, session: &SessionKey, limit: usize) -> Result<Vec<Task>, ToolError>;

    /// Returns `None` when the task does not belong to the session.
    async fn set_status(
        &self,
        session: &SessionKey,
        id: u64,
        status: TaskStatus,
    ) -> Result<Option<Task>, ToolError>;

    /// Returns whether the session owned a task with this id.
    async fn delete(&self, session: &SessionKey, id: u64) -> Result<bool, ToolError>;
}

#[derive(Default)]
pub struct InMemoryTaskBoard {
    next_id: AtomicU64,
    tasks: DashMap<SessionKey, Vec<Task>>,
}

impl InMemoryTaskBoard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskBoard for InMemoryTaskBoard {
    async fn create(
        &self,
        session: &SessionKey,
        title: String,
        due_at: Option<DateTime<FixedOffset>>,
        created_at: DateTime<FixedOffset>,
    ) -> Result<Task, ToolError> {
        let task = Task {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            title,
            due_at,
            status: TaskStatus::Open,
            created_at,
        };
        self.tasks
            .entry(session.clone())
            .or_default()
            .push(task.clone());
        Ok(task)
    }

    async fn list(&self, session: &SessionKey, limit: usize) -> Result<Vec<Task>, ToolError> {
        Ok(self
            .tasks
            .get(session)
            .map(|tasks| tasks.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn set_status(
        &self,
        session: &SessionKey,
        id: u64,
        status: TaskStatus,
    ) -> Result<Option<Task>, ToolError> {
        let Some(mut tasks) = self.tasks.get_mut(session) else {
            return Ok(None);
        };
        Ok(tasks.iter_mut().find(|t| t.id == id).map(|task| {
            task.status = status;
            task.clone()
        }))
    }

    async fn delete(&self, session: &SessionKey, id: u64) -> Result<bool, ToolError> {
        let Some(mut tasks) = self.tasks.get_mut(session) else {
            return Ok(false);
        };
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        Ok(tasks.len() < before)
    }
}

fn task_json(task: &Task) -> Value {
    json!({
        "id": task.id,
        "title": task.title,
        "due_at": task.due_at.map(temporal::format_timestamp),
        "status": task.status.as_str(),
    })
}

#[derive(Debug, Deserialize)]
struct CreateArgs {
    title: String,
    due_at: Option<String>,
}

/// `create_task`
pub struct CreateTaskTool {
    board: Arc<dyn TaskBoard>,
}

impl CreateTaskTool {
    pub fn new(board: Arc<dyn TaskBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl ToolHandler for CreateTaskTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: CreateArgs = parse_args(args)?;
        let title = parsed.title.trim().to_string();
        if title.is_empty() {
            return Err(ToolError::InvalidArgs("title must not be empty".to_string()));
        }
        let due_at = match parsed.due_at.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Some(
                temporal::resolve(text, ctx.now)
                    .ok_or_else(|| ToolError::InvalidArgs(format!("cannot understand due_at '{text}'")))?,
            ),
            _ => None,
        };
        let task = self
            .board
            .create(&ctx.session_key, title, due_at, ctx.now)
            .await?;
        Ok(ToolOutput::new(format!("已创建任务 #{}：{}", task.id, task.title), task_json(&task)))
    }
}

impl Tool for CreateTaskTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("create_task", "Add a to-do item.")
            .param(ParamSpec::required("title", ParamType::String, "What needs to be done"))
            .param(ParamSpec::optional("due_at", ParamType::Timestamp, "Deadline"))
    }
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    limit: Option<usize>,
}

/// `list_tasks`
pub struct ListTasksTool {
    board: Arc<dyn TaskBoard>,
}

impl ListTasksTool {
    pub fn new(board: Arc<dyn TaskBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl ToolHandler for ListTasksTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: ListArgs = parse_args(args)?;
        let limit = parsed.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 100);
        let tasks = self.board.list(&ctx.session_key, limit).await?;
        Ok(ToolOutput::new(
            format!("共 {} 个任务", tasks.len()),
            json!({
                "count": tasks.len(),
                "items": tasks.iter().map(task_json).collect::<Vec<_>>(),
            }),
        ))
    }
}

impl Tool for ListTasksTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("list_tasks", "Show the most recent to-do items.")
            .param(ParamSpec::optional("limit", ParamType::Integer, "Maximum items (default 10)"))
    }
}

#[derive(Debug, Deserialize)]
struct UpdateArgs {
    task_id: u64,
    status: TaskStatus,
}

/// `update_task`
pub struct UpdateTaskTool {
    board: Arc<dyn TaskBoard>,
}

impl UpdateTaskTool {
    pub fn new(board: Arc<dyn TaskBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl ToolHandler for UpdateTaskTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: UpdateArgs = parse_args(args)?;
        let task = self
            .board
            .set_status(&ctx.session_key, parsed.task_id, parsed.status)
            .await?
            .ok_or_else(|| {
                ToolError::ExecutionFailed(format!("task #{} not found", parsed.task_id))
            })?;
        Ok(ToolOutput::new(
            format!("任务 #{} 已更新为 {}", task.id, task.status.as_str()),
            task_json(&task),
        ))
    }
}

impl Tool for UpdateTaskTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("update_task", "Change the status of a to-do item.")
            .param(ParamSpec::required("task_id", ParamType::Integer, "Task number"))
            .param(
                ParamSpec::required("status", ParamType::String, "New status")
                    .one_of(&["open", "done", "cancelled"]),
            )
    }
}

#[derive(Debug, Deserialize)]
struct DeleteArgs {
    task_id: u64,
}

/// `delete_task`
pub struct DeleteTaskTool {
    board: Arc<dyn TaskBoard>,
}

impl DeleteTaskTool {
    pub fn new(board: Arc<dyn TaskBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl ToolHandler for DeleteTaskTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: DeleteArgs = parse_args(args)?;
        if !self.board.delete(&ctx.session_key, parsed.task_id).await? {
            return Err(ToolError::ExecutionFailed(format!(
                "task #{} not found",
                parsed.task_id
            )));
        }
        Ok(ToolOutput::new(
            format!("已删除任务 #{}", parsed.task_id),
            json!({"task_id": parsed.task_id}),
        ))
    }
}

impl Tool for DeleteTaskTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("delete_task", "Remove a to-do item.")
            .param(ParamSpec::required("task_id", ParamType::Integer, "Task number"))
    }
}
