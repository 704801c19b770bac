//! Model router: picks a planning strategy, resolves time arguments and
//! turns tool results into the final reply.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use proto::{ParamType, PlanSource, PlanningDecision, ToolCall, ToolResult, ToolSchema};
use serde_json::{Value, json};
use tools::temporal;
use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider};
use crate::planner::{HeuristicPlanner, PlanRequest, RemotePlanner};
use crate::summary;

/// Strategy chosen once at startup.
pub enum RouterStrategy {
    Heuristic,
    Remote(RemotePlanner),
}

/// A decision plus the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub decision: PlanningDecision,
    pub source: PlanSource,
}

const SUMMARY_PROMPT: &str =
    "请根据工具执行结果，用中文给用户返回最终总结。要简洁，明确给出记录条数和金额；失败的操作要说明。";

struct Summarizer {
    llm: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
}

pub struct ModelRouter {
    strategy: RouterStrategy,
    heuristic: HeuristicPlanner,
    summarizer: Option<Summarizer>,
}

impl ModelRouter {
    pub fn new(strategy: RouterStrategy) -> Self {
        let summarizer = match &strategy {
            RouterStrategy::Heuristic => None,
            RouterStrategy::Remote(remote) => Some(Summarizer {
                llm: Arc::clone(remote.llm()),
                model: remote.model().to_string(),
                timeout: remote.timeout(),
            }),
        };
        Self {
            strategy,
            heuristic: HeuristicPlanner,
            summarizer,
        }
    }

    /// Offline router using only the rule table.
    pub fn heuristic() -> Self {
        Self::new(RouterStrategy::Heuristic)
    }

    pub fn strategy_name(&self) -> &'static str {
        match self.strategy {
            RouterStrategy::Heuristic => "heuristic",
            RouterStrategy::Remote(_) => "remote",
        }
    }

    /// Produces a decision. Never fails: any remote problem falls back to
    /// the rule table for this turn.
    pub async fn plan(&self, req: &PlanRequest<'_>) -> Plan {
        let (decision, source) = match &self.strategy {
            RouterStrategy::Heuristic => (self.heuristic.plan(req), PlanSource::Heuristic),
            RouterStrategy::Remote(remote) => match remote.plan(req).await {
                Ok(decision) => (decision, PlanSource::Remote),
                Err(e) => {
                    warn!("Remote planner failed, using heuristic rules: {e}");
                    (self.heuristic.plan(req), PlanSource::Fallback)
                }
            },
        };
        let decision = match decision {
            PlanningDecision::Execute(calls) => PlanningDecision::Execute(
                calls
                    .into_iter()
                    .map(|call| resolve_time_arguments(call, req.tools, req.message, req.now))
                    .collect(),
            ),
            reply => reply,
        };
        info!(source = %source, calls = decision.tool_calls().len(), "Plan decided");
        Plan { decision, source }
    }

    /// Builds the user-facing reply from tool results in call order.
    ///
    /// Failed results are always listed, whether or not a model wrote the
    /// rest of the reply.
    pub async fn summarize(&self, message: &str, results: &[ToolResult]) -> String {
        let body = match &self.summarizer {
            Some(summarizer) => match summarizer.summarize(message, results).await {
                Some(text) => text,
                None => return summary::fallback_summary(results),
            },
            None => return summary::fallback_summary(results),
        };
        match summary::failure_notes(results) {
            Some(notes) => format!("{body}\n\n{notes}"),
            None => body,
        }
    }
}

impl Summarizer {
    async fn summarize(&self, message: &str, results: &[ToolResult]) -> Option<String> {
        let rendered: Vec<Value> = results
            .iter()
            .map(|r| {
                json!({
                    "tool": r.tool_name,
                    "success": r.success,
                    "message": r.message,
                    "data": r.payload,
                })
            })
            .collect();
        let request = ChatRequest {
            messages: vec![
                ChatMessage::user(message),
                ChatMessage::system(format!(
                    "工具执行结果：{}",
                    Value::Array(rendered)
                )),
                ChatMessage::system(SUMMARY_PROMPT),
            ],
            tools: Vec::new(),
            model: self.model.clone(),
            temperature: Some(0.2),
        };
        match tokio::time::timeout(self.timeout, self.llm.chat(request)).await {
            Ok(Ok(ChatResponse::Text(text))) if !text.trim().is_empty() => {
                Some(text.trim().to_string())
            }
            Ok(Ok(_)) => {
                debug!("Summarizer returned no text");
                None
            }
            Ok(Err(e)) => {
                warn!("Summarizer failed: {e}");
                None
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Summarizer timed out");
                None
            }
        }
    }
}

/// Normalizes `timestamp` parameters of one call.
///
/// Absolute values pass through untouched. Relative phrases are resolved
/// against `now`. A missing timestamp is filled from a relative phrase in the
/// message itself.
pub fn resolve_time_arguments(
    mut call: ToolCall,
    tools: &[ToolSchema],
    message: &str,
    now: DateTime<FixedOffset>,
) -> ToolCall {
    let Some(schema) = tools.iter().find(|s| s.name == call.name) else {
        return call;
    };
    for spec in schema
        .parameters
        .iter()
        .filter(|p| p.param_type == ParamType::Timestamp)
    {
        match call.arguments.get(&spec.name) {
            Some(Value::String(text)) if temporal::is_absolute(text) => {}
            Some(Value::String(text)) => {
                if let Some(resolved) = temporal::resolve_relative(text, now) {
                    call.arguments.insert(
                        spec.name.clone(),
                        Value::String(temporal::format_timestamp(resolved)),
                    );
                }
            }
            None | Some(Value::Null) => {
                if let Some(resolved) = temporal::resolve_relative(message, now) {
                    debug!(tool = %call.name, param = %spec.name, "Filled timestamp from message");
                    call.arguments.insert(
                        spec.name.clone(),
                        Value::String(temporal::format_timestamp(resolved)),
                    );
                }
            }
            Some(_) => {}
        }
    }
    call
}
