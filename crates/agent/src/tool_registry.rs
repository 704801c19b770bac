//! Tool registry used by the router for schemas and by the runtime for dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use proto::{ParamSpec, RegistryError, ToolCall, ToolResult, ToolSchema};
use serde_json::{Map, Value};
use tools::{SessionContext, Tool, ToolHandler};
use tracing::{debug, warn};

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

struct Entry {
    schema: ToolSchema,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of available tools, read-only once startup completes.
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    timeout: Duration,
}

impl ToolRegistry {
    /// Creates an empty registry with the default per-call timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TOOL_TIMEOUT)
    }

    /// Creates an empty registry whose dispatches are bounded by `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            timeout,
        }
    }

    /// Registers a handler under `schema.name`. The first registration wins.
    pub fn register(
        &mut self,
        schema: ToolSchema,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(&schema.name) {
            return Err(RegistryError::DuplicateTool(schema.name));
        }
        debug!("Registering tool: {}", schema.name);
        self.index.insert(schema.name.clone(), self.entries.len());
        self.entries.push(Entry { schema, handler });
        Ok(())
    }

    /// Registers a tool that carries its own schema.
    pub fn register_tool(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let schema = tool.schema();
        self.register(schema, Arc::new(tool))
    }

    pub fn get_schema(&self, name: &str) -> Option<&ToolSchema> {
        self.index.get(name).map(|&i| &self.entries[i].schema)
    }

    /// Schemas in registration order.
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        self.entries.iter().map(|e| e.schema.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates and executes a call.
    ///
    /// Registry-level problems (unknown tool, invalid arguments) are returned
    /// as errors before the handler runs. Anything the handler does, including
    /// failing, panicking, or exceeding the timeout, becomes a failed
    /// [`ToolResult`].
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        ctx: SessionContext,
    ) -> Result<ToolResult, RegistryError> {
        let Some(&i) = self.index.get(&call.name) else {
            return Err(RegistryError::UnknownTool(call.name.clone()));
        };
        let entry = &self.entries[i];
        let args = validate_arguments(&entry.schema, &call.arguments)?;

        debug!(tool = %call.name, call_id = %call.id, session = %ctx.session_key, "Executing tool");
        let handler = Arc::clone(&entry.handler);
        let task = tokio::spawn(async move { handler.execute(args, ctx).await });
        let abort = task.abort_handle();

        let result = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(output))) => {
                ToolResult::success(&call.id, &call.name, output.message, output.payload)
            }
            Ok(Ok(Err(e))) => {
                warn!(tool = %call.name, "Tool failed: {e}");
                ToolResult::failure(&call.id, &call.name, e.to_string())
            }
            Ok(Err(join)) => {
                warn!(tool = %call.name, "Tool task aborted: {join}");
                ToolResult::failure(&call.id, &call.name, "Tool crashed unexpectedly")
            }
            Err(_) => {
                abort.abort();
                warn!(tool = %call.name, timeout = ?self.timeout, "Tool timed out");
                ToolResult::failure(
                    &call.id,
                    &call.name,
                    format!("Timed out after {}s", self.timeout.as_secs()),
                )
            }
        };
        Ok(result)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks `args` against the declared parameters and drops explicit nulls.
fn validate_arguments(
    schema: &ToolSchema,
    args: &Map<String, Value>,
) -> Result<Map<String, Value>, RegistryError> {
    let invalid = |parameter: &str, reason: String| RegistryError::InvalidArguments {
        tool: schema.name.clone(),
        parameter: parameter.to_string(),
        reason,
    };

    for name in args.keys() {
        if schema.parameter(name).is_none() {
            return Err(invalid(name, "unknown parameter".to_string()));
        }
    }

    let mut validated = Map::new();
    for spec in &schema.parameters {
        match args.get(&spec.name) {
            None | Some(Value::Null) => {
                if spec.required {
                    return Err(invalid(&spec.name, "missing required parameter".to_string()));
                }
            }
            Some(value) => {
                check_value(spec, value).map_err(|reason| invalid(&spec.name, reason))?;
                validated.insert(spec.name.clone(), value.clone());
            }
        }
    }
    Ok(validated)
}

fn check_value(spec: &ParamSpec, value: &Value) -> Result<(), String> {
    if !spec.param_type.matches(value) {
        return Err(format!("expected {}", spec.param_type));
    }
    if !spec.allowed.is_empty() {
        let ok = value
            .as_str()
            .is_some_and(|s| spec.allowed.iter().any(|a| a == s));
        if !ok {
            return Err(format!("must be one of {}", spec.allowed.join(", ")));
        }
    }
    Ok(())
}
