use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// Router output for one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanningDecision {
    /// No tool is needed; the text is the final reply.
    Reply(String),
    /// Execute these calls in order, then summarize.
    Execute(Vec<ToolCall>),
}

impl PlanningDecision {
    /// Returns the selected tool calls, empty for a direct reply.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            PlanningDecision::Reply(_) => &[],
            PlanningDecision::Execute(calls) => calls,
        }
    }
}

/// Which strategy produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    Heuristic,
    Remote,
    /// Remote planning failed and the heuristic rules decided instead.
    Fallback,
}

impl std::fmt::Display for PlanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanSource::Heuristic => write!(f, "heuristic"),
            PlanSource::Remote => write!(f, "remote"),
            PlanSource::Fallback => write!(f, "fallback"),
        }
    }
}
