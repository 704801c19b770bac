use std::time::Duration;

use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Tool registration or dispatch error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// LLM provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Planner response could not be turned into a decision.
    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    /// Tool execution error.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Session memory error.
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    /// Channel adapter error.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Internal protocol type error.
    #[error("Proto error: {0}")]
    Proto(#[from] ProtoError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Tool registry errors.
///
/// Registration errors indicate a wiring defect and are surfaced at
/// startup. Dispatch errors are reported before any handler runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A tool with the same name is already registered.
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    /// No tool is registered under the requested name.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Call arguments do not satisfy the tool's parameter declarations.
    #[error("Invalid argument '{parameter}' for {tool}: {reason}")]
    InvalidArguments {
        tool: String,
        parameter: String,
        reason: String,
    },
}

/// LLM provider errors
#[derive(Debug, Error)]
pub enum LlmError {
    /// Remote API failure.
    #[error("{0}")]
    Api(String),

    /// Provider throttled the request.
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Provider response schema/content was invalid.
    #[error("Invalid response from LLM: {0}")]
    InvalidResponse(String),

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Remote planner failures. Every variant is recovered by heuristic planning.
#[derive(Debug, Error)]
pub enum PlanningError {
    /// The model answered with neither text nor tool calls.
    #[error("Planner returned an empty response")]
    Empty,

    /// A tool call could not be decoded.
    #[error("Malformed planner response: {0}")]
    Malformed(String),

    /// The model named a tool that is not registered.
    #[error("Planner selected unknown tool: {0}")]
    UnknownTool(String),

    /// The provider call itself failed.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The provider did not answer in time.
    #[error("Planner timed out after {0:?}")]
    Timeout(Duration),
}

/// Tool execution errors
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool process or operation failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Tool exceeded allowed execution time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Tool call arguments are invalid.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// Filesystem/process IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session memory errors
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The backing store could not be reached or refused the operation.
    #[error("Memory store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Channel adapter errors
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Channel connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Sending message/event failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Channel has been closed.
    #[error("Channel closed")]
    Closed,
}

/// Internal proto errors
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Invalid role string value.
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Unknown storage policy string value.
    #[error("Invalid storage policy: {0}")]
    InvalidStoragePolicy(String),

    /// Generic serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}
