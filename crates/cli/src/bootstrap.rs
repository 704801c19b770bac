//! Dependency wiring: every collaborator is built here and injected into
//! the runtime. Nothing downstream reaches for globals.

use std::sync::Arc;
use std::time::Duration;

use agent::{
    AgentRuntime, InMemoryStore, MemoryStore, ModelRouter, OpenAiProvider, RedisMemoryStore,
    RemotePlanner, RouterStrategy, ToolRegistry,
};
use proto::RegistryError;
use tools::{
    AnalyzeExpensesTool, CaptureScreenshotTool, CreateTaskTool, DeleteExpenseTool,
    DeleteTaskTool, DeleteUserConfigTool, ExpenseBook, GetExpenseTool, GetUserConfigTool,
    GoogleSearchTool, InMemoryExpenseBook, InMemoryScreenshotArchive, InMemoryTaskBoard,
    ListTasksTool, ListUserConfigsTool, QueryExpensesTool, RecordExpenseTool,
    RecordExpensesBatchTool, SetUserConfigTool, SummarizeExpensesTool, TaskBoard,
    UpdateExpenseTool, UpdateTaskTool, WeatherTool,
};
use tracing::{info, warn};

use crate::config::{Config, MemoryBackend, PlannerKind};

/// Registers the full handler set. Duplicate names abort startup.
pub fn build_registry(config: &Config) -> Result<ToolRegistry, RegistryError> {
    let book: Arc<dyn ExpenseBook> = Arc::new(InMemoryExpenseBook::new());
    let board: Arc<dyn TaskBoard> = Arc::new(InMemoryTaskBoard::new());
    let archive = Arc::new(InMemoryScreenshotArchive::new());

    let mut registry = ToolRegistry::with_timeout(config.runtime.tool_timeout());
    registry.register_tool(RecordExpenseTool::new(Arc::clone(&book)))?;
    registry.register_tool(RecordExpensesBatchTool::new(Arc::clone(&book)))?;
    registry.register_tool(QueryExpensesTool::new(Arc::clone(&book)))?;
    registry.register_tool(GetExpenseTool::new(Arc::clone(&book)))?;
    registry.register_tool(UpdateExpenseTool::new(Arc::clone(&book)))?;
    registry.register_tool(DeleteExpenseTool::new(Arc::clone(&book)))?;
    registry.register_tool(SummarizeExpensesTool::new(Arc::clone(&book)))?;
    registry.register_tool(AnalyzeExpensesTool::new(book))?;
    registry.register_tool(CreateTaskTool::new(Arc::clone(&board)))?;
    registry.register_tool(ListTasksTool::new(Arc::clone(&board)))?;
    registry.register_tool(UpdateTaskTool::new(Arc::clone(&board)))?;
    registry.register_tool(DeleteTaskTool::new(board))?;
    registry.register_tool(WeatherTool::new(
        &config.tools.geocoding_url,
        &config.tools.forecast_url,
        &config.tools.default_city,
    ))?;
    registry.register_tool(GoogleSearchTool::new(
        &config.tools.search_url,
        &config.tools.search_language,
    ))?;
    registry.register_tool(CaptureScreenshotTool::new(
        &config.tools.output_dir,
        Duration::from_secs(config.tools.screenshot_timeout_secs),
        archive,
    ))?;
    registry.register_tool(SetUserConfigTool)?;
    registry.register_tool(GetUserConfigTool)?;
    registry.register_tool(ListUserConfigsTool)?;
    registry.register_tool(DeleteUserConfigTool)?;

    info!(tools = registry.len(), "Tool registry ready");
    Ok(registry)
}

/// Builds the configured memory backend.
pub async fn build_memory(config: &Config) -> anyhow::Result<Arc<dyn MemoryStore>> {
    let memory = &config.memory;
    match memory.backend {
        MemoryBackend::InProcess => Ok(Arc::new(InMemoryStore::new(
            memory.max_turns,
            memory.idle_ttl(),
        ))),
        MemoryBackend::Redis => {
            let store = RedisMemoryStore::connect(
                &memory.redis_url,
                memory.key_prefix.clone(),
                memory.max_turns,
                memory.idle_ttl(),
            )?
            .with_command_timeout(memory.command_timeout());
            if let Err(e) = store.health_check().await {
                warn!("Redis not reachable at startup, cycles will fail until it is: {e}");
            }
            Ok(Arc::new(store))
        }
    }
}

/// Resolves the planning strategy once.
pub fn build_router(config: &Config) -> ModelRouter {
    match config.effective_planner() {
        PlannerKind::Heuristic => ModelRouter::heuristic(),
        PlannerKind::Remote => {
            let planner = &config.planner;
            let provider = match planner.effective_base_url() {
                Some(url) => OpenAiProvider::with_base_url(planner.api_key.clone(), url),
                None => OpenAiProvider::new(planner.api_key.clone()),
            };
            let mut remote =
                RemotePlanner::new(Arc::new(provider), planner.model.clone(), planner.timeout());
            if planner.temperature.is_some() {
                remote = remote.with_temperature(planner.temperature);
            }
            ModelRouter::new(RouterStrategy::Remote(remote))
        }
    }
}

/// Builds the runtime with all collaborators injected.
pub async fn build_runtime(config: &Config) -> anyhow::Result<Arc<AgentRuntime>> {
    config.validate()?;
    let registry = build_registry(config)?;
    let memory = build_memory(config).await?;
    let router = build_router(config);
    info!(
        planner = router.strategy_name(),
        memory = ?config.memory.backend,
        offset_minutes = config.runtime.utc_offset_minutes,
        "Agent runtime configured"
    );
    let runtime = AgentRuntime::new(
        Arc::new(registry),
        memory,
        Arc::new(router),
        config.runtime.offset()?,
    )
    .with_max_tool_calls(config.runtime.max_tool_calls);
    Ok(Arc::new(runtime))
}
