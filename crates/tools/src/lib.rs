//! Tool handler contract and the built-in capabilities registered at startup.
//!
//! Every capability implements [`ToolHandler`] and declares its argument
//! contract through [`Tool::schema`]. Handlers never see unvalidated
//! arguments: the registry checks them against the schema first.

pub mod context;
pub mod expense;
pub mod preferences;
pub mod screenshot;
pub mod search;
pub mod task;
pub mod temporal;
pub mod weather;

#[cfg(test)]
pub(crate) mod test_support;

use std::future::Future;

use async_trait::async_trait;
use proto::{ToolError, ToolSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use context::{SessionContext, SessionSettings};
pub use expense::{
    AnalyzeExpensesTool, DeleteExpenseTool, ExpenseBook, ExpensePatch, GetExpenseTool,
    InMemoryExpenseBook, QueryExpensesTool, RecordExpenseTool, RecordExpensesBatchTool,
    SummarizeExpensesTool, UpdateExpenseTool,
};
pub use preferences::{
    DeleteUserConfigTool, GetUserConfigTool, ListUserConfigsTool, SetUserConfigTool,
};
pub use screenshot::{
    CaptureScreenshotTool, InMemoryScreenshotArchive, ScreenshotArchive, ScreenshotRecord,
};
pub use search::GoogleSearchTool;
pub use task::{
    CreateTaskTool, DeleteTaskTool, InMemoryTaskBoard, ListTasksTool, TaskBoard, UpdateTaskTool,
};
pub use weather::WeatherTool;

/// Successful handler outcome
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Short human-readable summary.
    pub message: String,
    /// Structured result data.
    pub payload: Value,
}

impl ToolOutput {
    pub fn new(message: impl Into<String>, payload: Value) -> Self {
        Self {
            message: message.into(),
            payload,
        }
    }
}

/// Uniform capability contract: `execute(arguments, session_context)`.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the capability with validated arguments.
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// A handler that also carries its own schema
pub trait Tool: ToolHandler {
    /// Declared name, description, and parameters.
    fn schema(&self) -> ToolSchema;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wraps `f` so it can be registered like any other handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Map<String, Value>, SessionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Map<String, Value>, SessionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send,
{
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        (self.f)(args, ctx).await
    }
}

/// Deserializes validated arguments into a typed struct.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Map<String, Value>) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args)).map_err(|e| ToolError::InvalidArgs(e.to_string()))
}

/// Rounds a currency amount to cents.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
