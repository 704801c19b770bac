//! Agent runtime, memory layer, planning, and LLM adapter interfaces.

pub mod llm;
pub mod memory;
pub mod planner;
pub mod router;
pub mod runtime;
pub mod summary;
pub mod tool_registry;

/// Chat request/response models and provider interfaces.
pub use llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, OpenAiProvider, RawToolCall};
/// Conversation memory backends and the settings bridge handed to tools.
pub use memory::{InMemoryStore, MemoryStore, RedisMemoryStore, SettingsHandle};
/// Planning strategies.
pub use planner::{HeuristicPlanner, PlanRequest, RemotePlanner};
/// Strategy selection, fallback, and reply summarization.
pub use router::{ModelRouter, Plan, RouterStrategy};
/// Per-session processing cycle.
pub use runtime::{AgentRuntime, CycleReport, CycleState};
/// Runtime tool registry.
pub use tool_registry::ToolRegistry;
