//! Shared protocol types for channels, the agent runtime, and tools.
//!
//! This crate defines the serializable session/turn/tool structures and
//! the strongly-typed error enums shared across the workspace.

pub mod error;
pub mod event;
pub mod message;
pub mod plan;
pub mod settings;
pub mod tool;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of inbound/outbound event types.
pub use event::{AgentResponse, ChannelEvent};
/// Re-export of conversation identity and turn types.
pub use message::{ChannelId, ConversationTurn, Role, SessionKey};
/// Re-export of the router decision type.
pub use plan::{PlanSource, PlanningDecision};
/// Re-export of per-session option keys and values.
pub use settings::{SCREENSHOT_STORAGE, StoragePolicy, default_option_value};
/// Re-export of tool schema, call and result types.
pub use tool::{ParamSpec, ParamType, ToolCall, ToolResult, ToolSchema};
