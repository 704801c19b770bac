//! Runtime orchestration: one plan, execute, summarize cycle per inbound message.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use proto::{
    ConversationTurn, MemoryError, PlanSource, PlanningDecision, SessionKey, ToolResult,
};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tools::SessionContext;
use tracing::{debug, error, info, warn};

use crate::memory::{MemoryStore, SettingsHandle};
use crate::planner::PlanRequest;
use crate::router::ModelRouter;
use crate::summary;
use crate::tool_registry::ToolRegistry;

const FAILURE_REPLY: &str = "抱歉，我这边暂时出了点问题，请稍后再试。";
pub const DEFAULT_MAX_TOOL_CALLS: usize = 8;

/// States of one processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Received,
    Planning,
    NoToolNeeded,
    ToolsSelected,
    Executing,
    Summarizing,
    Completed,
    Failed,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Completed | CycleState::Failed)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Received => "received",
            CycleState::Planning => "planning",
            CycleState::NoToolNeeded => "no_tool_needed",
            CycleState::ToolsSelected => "tools_selected",
            CycleState::Executing => "executing",
            CycleState::Summarizing => "summarizing",
            CycleState::Completed => "completed",
            CycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of [`AgentRuntime::run_cycle`].
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub reply: String,
    /// Terminal state, `Completed` or `Failed`.
    pub state: CycleState,
    /// Every state visited, in order, starting with `Received`.
    pub transitions: Vec<CycleState>,
    /// `None` when the cycle failed before a plan was made.
    pub plan_source: Option<PlanSource>,
    pub results: Vec<ToolResult>,
    /// Screenshot files the transport may attach to the reply.
    pub image_paths: Vec<String>,
}

struct Cycle<'a> {
    session: &'a SessionKey,
    transitions: Vec<CycleState>,
}

impl<'a> Cycle<'a> {
    fn start(session: &'a SessionKey) -> Self {
        debug!(session = %session, state = %CycleState::Received, "Cycle transition");
        Self {
            session,
            transitions: vec![CycleState::Received],
        }
    }

    fn enter(&mut self, next: CycleState) {
        debug!(session = %self.session, state = %next, "Cycle transition");
        self.transitions.push(next);
    }

    fn state(&self) -> CycleState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(CycleState::Received)
    }
}

/// Per-session FIFO locks. Entries are dropped once nobody holds or waits.
#[derive(Default)]
struct SessionLocks {
    locks: DashMap<SessionKey, Arc<Mutex<()>>>,
}

impl SessionLocks {
    async fn acquire(&self, session: &SessionKey) -> SessionLease<'_> {
        let mut lease = SessionLease {
            locks: self,
            session: session.clone(),
            guard: None,
        };
        let lock = self
            .locks
            .entry(session.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lease.guard = Some(lock.lock_owned().await);
        lease
    }

    fn prune(&self, session: &SessionKey) {
        self.locks
            .remove_if(session, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Holds a session's lock; dropping it, even from a cancelled cycle,
/// unlocks and prunes the entry.
struct SessionLease<'a> {
    locks: &'a SessionLocks,
    session: SessionKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.prune(&self.session);
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Orchestrates registry, memory and router for every inbound message.
///
/// Cycles for different sessions run concurrently. Cycles for the same
/// session queue behind each other in arrival order.
pub struct AgentRuntime {
    registry: Arc<ToolRegistry>,
    memory: Arc<dyn MemoryStore>,
    router: Arc<ModelRouter>,
    locks: SessionLocks,
    offset: FixedOffset,
    max_tool_calls: usize,
    clock: Clock,
}

impl AgentRuntime {
    pub fn new(
        registry: Arc<ToolRegistry>,
        memory: Arc<dyn MemoryStore>,
        router: Arc<ModelRouter>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            registry,
            memory,
            router,
            locks: SessionLocks::default(),
            offset,
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_max_tool_calls(mut self, max_tool_calls: usize) -> Self {
        self.max_tool_calls = max_tool_calls.max(1);
        self
    }

    /// Replaces the wall clock used to anchor relative time phrases.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.memory
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Transport entry point: returns only the reply text.
    pub async fn handle_message(
        &self,
        session_key: impl Into<SessionKey>,
        text: &str,
        attachments: Option<Value>,
    ) -> String {
        let session = session_key.into();
        self.run_cycle(&session, text, attachments).await.reply
    }

    /// Runs one full cycle under the session's lock.
    pub async fn run_cycle(
        &self,
        session: &SessionKey,
        text: &str,
        attachments: Option<Value>,
    ) -> CycleReport {
        let _lease = self.locks.acquire(session).await;
        let t0 = std::time::Instant::now();
        let report = self.cycle(session, text, attachments).await;
        info!(
            session = %session,
            state = %report.state,
            tools = report.results.len(),
            elapsed_ms = %t0.elapsed().as_millis(),
            "Cycle finished"
        );
        report
    }

    async fn cycle(
        &self,
        session: &SessionKey,
        text: &str,
        attachments: Option<Value>,
    ) -> CycleReport {
        let mut cycle = Cycle::start(session);
        cycle.enter(CycleState::Planning);

        let turns = match self.memory.get_turns(session).await {
            Ok(turns) => turns,
            Err(e) => return self.fail(cycle, None, Vec::new(), e),
        };
        let now = (self.clock)().with_timezone(&self.offset);
        let schemas = self.registry.list_schemas();
        let plan = self
            .router
            .plan(&PlanRequest {
                message: text,
                turns: &turns,
                tools: &schemas,
                now,
            })
            .await;

        let mut results = Vec::new();
        let reply = match plan.decision {
            PlanningDecision::Reply(reply) => {
                cycle.enter(CycleState::NoToolNeeded);
                reply
            }
            PlanningDecision::Execute(mut calls) => {
                cycle.enter(CycleState::ToolsSelected);
                if calls.len() > self.max_tool_calls {
                    warn!(
                        session = %session,
                        requested = calls.len(),
                        max = self.max_tool_calls,
                        "Truncating tool calls"
                    );
                    calls.truncate(self.max_tool_calls);
                }

                cycle.enter(CycleState::Executing);
                for call in &calls {
                    let ctx = SessionContext::new(
                        session.clone(),
                        now,
                        Arc::new(SettingsHandle::new(Arc::clone(&self.memory), session.clone())),
                    )
                    .with_attachments(attachments.clone());
                    let result = match self.registry.dispatch(call, ctx).await {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(session = %session, tool = %call.name, "Dispatch rejected: {e}");
                            ToolResult::failure(&call.id, &call.name, e.to_string())
                        }
                    };
                    info!(
                        session = %session,
                        tool = %result.tool_name,
                        success = result.success,
                        "Tool finished"
                    );
                    results.push(result);
                }

                cycle.enter(CycleState::Summarizing);
                self.router.summarize(text, &results).await
            }
        };

        let mut record = Vec::with_capacity(results.len() + 2);
        record.push(ConversationTurn::user(text));
        record.extend(
            results
                .iter()
                .map(|r| ConversationTurn::tool(summary::audit_line(r))),
        );
        record.push(ConversationTurn::assistant(reply.clone()));
        if let Err(e) = self.memory.append_turns(session, record).await {
            return self.fail(cycle, Some(plan.source), results, e);
        }

        cycle.enter(CycleState::Completed);
        CycleReport {
            reply,
            state: cycle.state(),
            transitions: cycle.transitions,
            plan_source: Some(plan.source),
            image_paths: summary::collect_image_paths(&results),
            results,
        }
    }

    fn fail(
        &self,
        mut cycle: Cycle<'_>,
        plan_source: Option<PlanSource>,
        results: Vec<ToolResult>,
        cause: MemoryError,
    ) -> CycleReport {
        error!(session = %cycle.session, state = %cycle.state(), "Cycle failed: {cause}");
        cycle.enter(CycleState::Failed);
        CycleReport {
            reply: FAILURE_REPLY.to_string(),
            state: CycleState::Failed,
            transitions: cycle.transitions,
            plan_source,
            results,
            image_paths: Vec::new(),
        }
    }

    /// Flushes pending memory writes. Called once at process shutdown.
    pub async fn shutdown(&self) -> Result<(), MemoryError> {
        info!("Agent runtime shutting down");
        self.memory.flush().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use proto::{LlmError, ParamSpec, ParamType, Role, ToolError, ToolSchema};
    use serde_json::{Map, json};
    use tools::{ToolOutput, handler_fn};

    use super::*;
    use crate::llm::{ChatRequest, ChatResponse, LlmProvider, RawToolCall};
    use crate::memory::{InMemoryStore, RedisMemoryStore};
    use crate::planner::RemotePlanner;
    use crate::router::RouterStrategy;

    struct MockLlm {
        queue: StdMutex<VecDeque<ChatResponse>>,
    }

    impl MockLlm {
        fn new(responses: Vec<ChatResponse>) -> Arc<Self> {
            Arc::new(Self {
                queue: StdMutex::new(VecDeque::from(responses)),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.queue
                .lock()
                .expect("lock queue")
                .pop_front()
                .ok_or_else(|| LlmError::InvalidResponse("No mock response left".to_string()))
        }
    }

    /// Replies with the last user message after a short pause.
    struct EchoLlm;

    #[async_trait]
    impl LlmProvider for EchoLlm {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            let last = req
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ChatResponse::Text(format!("echo:{last}")))
        }
    }

    /// Store whose writes can be switched off.
    struct FlakyStore {
        inner: InMemoryStore,
        down: AtomicBool,
        flushed: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryStore::default(),
                down: AtomicBool::new(false),
                flushed: AtomicBool::new(false),
            })
        }

        fn check(&self) -> Result<(), MemoryError> {
            if self.down.load(Ordering::SeqCst) {
                Err(MemoryError::Unavailable("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl MemoryStore for FlakyStore {
        async fn append_turn(
            &self,
            session: &SessionKey,
            turn: ConversationTurn,
        ) -> Result<(), MemoryError> {
            self.check()?;
            self.inner.append_turn(session, turn).await
        }

        async fn append_turns(
            &self,
            session: &SessionKey,
            turns: Vec<ConversationTurn>,
        ) -> Result<(), MemoryError> {
            self.check()?;
            self.inner.append_turns(session, turns).await
        }

        async fn get_turns(
            &self,
            session: &SessionKey,
        ) -> Result<Vec<ConversationTurn>, MemoryError> {
            self.inner.get_turns(session).await
        }

        async fn get_config(
            &self,
            session: &SessionKey,
            option: &str,
        ) -> Result<Option<String>, MemoryError> {
            self.inner.get_config(session, option).await
        }

        async fn set_config(
            &self,
            session: &SessionKey,
            option: &str,
            value: &str,
        ) -> Result<(), MemoryError> {
            self.inner.set_config(session, option, value).await
        }

        async fn list_config(
            &self,
            session: &SessionKey,
        ) -> Result<Vec<(String, String)>, MemoryError> {
            self.inner.list_config(session).await
        }

        async fn delete_config(
            &self,
            session: &SessionKey,
            option: &str,
        ) -> Result<bool, MemoryError> {
            self.inner.delete_config(session, option).await
        }

        async fn flush(&self) -> Result<(), MemoryError> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn search_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        register_search(&mut registry);
        registry
    }

    fn register_search(registry: &mut ToolRegistry) {
        registry
            .register(
                ToolSchema::new("google_search", "search")
                    .param(ParamSpec::required("query", ParamType::String, "q")),
                Arc::new(handler_fn(|args: Map<String, Value>, _ctx| async move {
                    let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
                    Ok::<_, ToolError>(ToolOutput::new(
                        "找到 1 条结果",
                        json!({
                            "query": query,
                            "items": [{"title": format!("{query} 入门"), "url": "https://example.com/a"}],
                        }),
                    ))
                })),
            )
            .expect("register");
    }

    fn runtime_with(
        registry: ToolRegistry,
        memory: Arc<dyn MemoryStore>,
        router: ModelRouter,
    ) -> AgentRuntime {
        let offset = FixedOffset::east_opt(8 * 3600).expect("offset");
        AgentRuntime::new(Arc::new(registry), memory, Arc::new(router), offset).with_clock(|| {
            Utc.with_ymd_and_hms(2026, 10, 18, 1, 30, 0)
                .single()
                .expect("time")
        })
    }

    fn remote_router(llm: Arc<dyn LlmProvider>) -> ModelRouter {
        ModelRouter::new(RouterStrategy::Remote(RemotePlanner::new(
            llm,
            "test-model",
            Duration::from_secs(2),
        )))
    }

    #[tokio::test]
    async fn direct_reply_skips_tools_and_records_pair() {
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::default());
        let runtime = runtime_with(search_registry(), Arc::clone(&memory), ModelRouter::heuristic());

        let report = runtime.run_cycle(&SessionKey::from("s1"), "你好", None).await;
        assert_eq!(report.state, CycleState::Completed);
        assert_eq!(
            report.transitions,
            vec![
                CycleState::Received,
                CycleState::Planning,
                CycleState::NoToolNeeded,
                CycleState::Completed,
            ]
        );
        assert!(report.results.is_empty());

        let turns = memory.get_turns(&SessionKey::from("s1")).await.expect("turns");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].content, report.reply);
    }

    #[tokio::test]
    async fn tool_cycle_visits_every_state_and_audits_calls() {
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::default());
        let runtime = runtime_with(search_registry(), Arc::clone(&memory), ModelRouter::heuristic());

        let report = runtime
            .run_cycle(&SessionKey::from("s1"), "帮我搜一下 tokio", None)
            .await;
        assert_eq!(
            report.transitions,
            vec![
                CycleState::Received,
                CycleState::Planning,
                CycleState::ToolsSelected,
                CycleState::Executing,
                CycleState::Summarizing,
                CycleState::Completed,
            ]
        );
        assert_eq!(report.plan_source, Some(PlanSource::Heuristic));
        assert!(report.reply.contains("tokio 入门"));

        let roles: Vec<Role> = memory
            .get_turns(&SessionKey::from("s1"))
            .await
            .expect("turns")
            .into_iter()
            .map(|t| t.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::Tool, Role::Assistant]);
    }

    #[tokio::test]
    async fn empty_remote_answer_falls_back_and_completes() {
        let llm = MockLlm::new(vec![ChatResponse::Text("   ".to_string())]);
        let runtime = runtime_with(
            search_registry(),
            Arc::new(InMemoryStore::default()),
            remote_router(llm),
        );
        let report = runtime
            .run_cycle(&SessionKey::from("s1"), "帮我搜一下 rust", None)
            .await;
        assert_eq!(report.state, CycleState::Completed);
        assert_eq!(report.plan_source, Some(PlanSource::Fallback));
        assert_eq!(report.results[0].tool_name, "google_search");
        assert!(report.results[0].success);
    }

    #[tokio::test]
    async fn remote_call_with_invalid_arguments_is_reported_as_failure() {
        let llm = MockLlm::new(vec![ChatResponse::ToolCalls(vec![RawToolCall {
            id: "c1".to_string(),
            name: "google_search".to_string(),
            arguments: r#"{"q":"rust"}"#.to_string(),
        }])]);
        let runtime = runtime_with(
            search_registry(),
            Arc::new(InMemoryStore::default()),
            remote_router(llm),
        );
        let report = runtime.run_cycle(&SessionKey::from("s1"), "rust", None).await;
        assert_eq!(report.state, CycleState::Completed);
        assert!(!report.results[0].success);
        assert!(report.reply.contains("网页搜索失败"));
    }

    #[tokio::test]
    async fn calls_beyond_limit_are_dropped() {
        let calls = (0..5)
            .map(|i| RawToolCall {
                id: format!("c{i}"),
                name: "google_search".to_string(),
                arguments: format!(r#"{{"query":"q{i}"}}"#),
            })
            .collect();
        let llm = MockLlm::new(vec![ChatResponse::ToolCalls(calls)]);
        let runtime = runtime_with(
            search_registry(),
            Arc::new(InMemoryStore::default()),
            remote_router(llm),
        )
        .with_max_tool_calls(2);
        let report = runtime.run_cycle(&SessionKey::from("s1"), "many", None).await;
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[1].call_id, "c1");
    }

    #[tokio::test]
    async fn failing_call_does_not_stop_later_calls() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolSchema::new("flaky_tool", "always fails"),
                Arc::new(handler_fn(|_args: Map<String, Value>, _ctx| async move {
                    Err::<ToolOutput, _>(ToolError::ExecutionFailed("upstream down".to_string()))
                })),
            )
            .expect("register");
        register_search(&mut registry);
        let llm = MockLlm::new(vec![ChatResponse::ToolCalls(vec![
            RawToolCall {
                id: "c1".to_string(),
                name: "flaky_tool".to_string(),
                arguments: "{}".to_string(),
            },
            RawToolCall {
                id: "c2".to_string(),
                name: "google_search".to_string(),
                arguments: r#"{"query":"rust"}"#.to_string(),
            },
        ])]);
        let runtime = runtime_with(registry, Arc::new(InMemoryStore::default()), remote_router(llm));

        let report = runtime.run_cycle(&SessionKey::from("s1"), "two things", None).await;
        assert_eq!(report.state, CycleState::Completed);
        assert_eq!(report.results.len(), 2);
        assert!(!report.results[0].success);
        assert!(report.results[1].success);
        assert!(report.reply.contains("rust 入门"), "{}", report.reply);
        assert!(report.reply.contains("flaky_tool失败"), "{}", report.reply);
        assert!(report.reply.contains("upstream down"), "{}", report.reply);
    }

    #[tokio::test]
    async fn cancelled_cycle_releases_its_session_lock() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolSchema::new("google_search", "slow search")
                    .param(ParamSpec::required("query", ParamType::String, "q")),
                Arc::new(handler_fn(|_args: Map<String, Value>, _ctx| async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok::<_, ToolError>(ToolOutput::new("late", json!({})))
                })),
            )
            .expect("register");
        let runtime = runtime_with(registry, Arc::new(InMemoryStore::default()), ModelRouter::heuristic());
        let key = SessionKey::from("s1");

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            runtime.run_cycle(&key, "搜索 slow", None),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(runtime.locks.len(), 0);

        let report = tokio::time::timeout(Duration::from_secs(2), runtime.run_cycle(&key, "你好", None))
            .await
            .expect("session is not blocked");
        assert_eq!(report.state, CycleState::Completed);
        assert_eq!(runtime.locks.len(), 0);
    }

    #[tokio::test]
    async fn unresponsive_memory_fails_cycle_without_blocking_session() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let store = RedisMemoryStore::connect(&format!("redis://{addr}"), "clerk-test", 10, None)
            .expect("pool")
            .with_command_timeout(Duration::from_millis(200));
        let runtime = runtime_with(search_registry(), Arc::new(store), ModelRouter::heuristic());
        let key = SessionKey::from("s1");

        for text in ["你好", "帮我搜一下 rust"] {
            let report = tokio::time::timeout(Duration::from_secs(5), runtime.run_cycle(&key, text, None))
                .await
                .expect("cycle must finish");
            assert_eq!(report.state, CycleState::Failed);
            assert_eq!(report.reply, FAILURE_REPLY);
        }
        assert_eq!(runtime.locks.len(), 0);
        server.abort();
    }

    #[tokio::test]
    async fn memory_failure_leaves_no_partial_turns() {
        let store = FlakyStore::new();
        let memory: Arc<dyn MemoryStore> = store.clone();
        let runtime = runtime_with(search_registry(), memory, ModelRouter::heuristic());

        store.down.store(true, Ordering::SeqCst);
        let report = runtime
            .run_cycle(&SessionKey::from("s1"), "帮我搜一下 rust", None)
            .await;
        assert_eq!(report.state, CycleState::Failed);
        assert_eq!(report.reply, FAILURE_REPLY);
        assert_eq!(report.transitions.last(), Some(&CycleState::Failed));
        assert!(
            store
                .inner
                .get_turns(&SessionKey::from("s1"))
                .await
                .expect("turns")
                .is_empty()
        );

        store.down.store(false, Ordering::SeqCst);
        let report = runtime.run_cycle(&SessionKey::from("s1"), "你好", None).await;
        assert_eq!(report.state, CycleState::Completed);
    }

    #[tokio::test]
    async fn concurrent_messages_on_one_session_do_not_interleave() {
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new(1_000, None));
        let runtime = Arc::new(runtime_with(
            ToolRegistry::new(),
            Arc::clone(&memory),
            remote_router(Arc::new(EchoLlm)),
        ));

        let mut handles = Vec::new();
        for i in 0..50 {
            let runtime = Arc::clone(&runtime);
            handles.push(tokio::spawn(async move {
                runtime.handle_message("shared", &format!("m{i}"), None).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.expect("join"), format!("echo:m{i}"));
        }

        let turns = memory.get_turns(&SessionKey::from("shared")).await.expect("turns");
        assert_eq!(turns.len(), 100);
        let mut seen = std::collections::HashSet::new();
        for pair in turns.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[1].content, format!("echo:{}", pair[0].content));
            assert!(seen.insert(pair[0].content.clone()));
        }
        assert_eq!(seen.len(), 50);
        assert_eq!(runtime.locks.len(), 0);
    }

    #[tokio::test]
    async fn different_sessions_progress_independently() {
        let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::default());
        let runtime = Arc::new(runtime_with(
            ToolRegistry::new(),
            Arc::clone(&memory),
            remote_router(Arc::new(EchoLlm)),
        ));
        let (a, b) = tokio::join!(
            runtime.handle_message("a", "hello a", None),
            runtime.handle_message("b", "hello b", None)
        );
        assert_eq!(a, "echo:hello a");
        assert_eq!(b, "echo:hello b");
        assert_eq!(memory.get_turns(&SessionKey::from("a")).await.expect("a").len(), 2);
        assert_eq!(memory.get_turns(&SessionKey::from("b")).await.expect("b").len(), 2);
    }

    #[tokio::test]
    async fn tools_see_session_settings_and_local_time() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolSchema::new("inspect_context", "reads context")
                    .param(ParamSpec::optional("at", ParamType::Timestamp, "t")),
                Arc::new(handler_fn(|args: Map<String, Value>, ctx: SessionContext| async move {
                    let storage = ctx.settings.get(proto::SCREENSHOT_STORAGE).await?;
                    Ok::<_, ToolError>(ToolOutput::new(
                        "ok",
                        json!({
                            "storage": storage,
                            "now": ctx.now.to_rfc3339(),
                            "at": args.get("at"),
                        }),
                    ))
                })),
            )
            .expect("register");
        let llm = MockLlm::new(vec![
            ChatResponse::ToolCalls(vec![RawToolCall {
                id: "c1".to_string(),
                name: "inspect_context".to_string(),
                arguments: "{}".to_string(),
            }]),
            ChatResponse::Text("done".to_string()),
        ]);
        let runtime = runtime_with(registry, Arc::new(InMemoryStore::default()), remote_router(llm));
        let report = runtime
            .run_cycle(&SessionKey::from("s1"), "明天早上提醒我", None)
            .await;
        let payload = &report.results[0].payload;
        assert_eq!(payload["storage"], "none");
        assert_eq!(payload["now"], "2026-10-18T09:30:00+08:00");
        assert_eq!(payload["at"], "2026-10-19T08:00:00+08:00");
        assert_eq!(report.reply, "done");
    }

    #[tokio::test]
    async fn shutdown_flushes_memory() {
        let store = FlakyStore::new();
        let runtime = runtime_with(ToolRegistry::new(), store.clone(), ModelRouter::heuristic());
        runtime.shutdown().await.expect("shutdown");
        assert!(store.flushed.load(Ordering::SeqCst));
    }
}
