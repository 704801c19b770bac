//! End-to-end cycles through the runtime with the production tool set.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent::{
    AgentRuntime, ChatRequest, ChatResponse, CycleState, InMemoryStore, LlmProvider, MemoryStore,
    ModelRouter, RawToolCall, RemotePlanner, RouterStrategy, ToolRegistry,
};
use async_trait::async_trait;
use chrono::{FixedOffset, TimeZone, Utc};
use proto::{LlmError, PlanSource, Role, SessionKey, ToolError};
use serde_json::{Map, Value, json};
use tools::{
    AnalyzeExpensesTool, CreateTaskTool, ExpenseBook, GoogleSearchTool, InMemoryExpenseBook,
    InMemoryTaskBoard, ListTasksTool, QueryExpensesTool, RecordExpenseTool,
    RecordExpensesBatchTool, SessionContext, TaskBoard, ToolOutput, UpdateTaskTool, handler_fn,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RESULTS_PAGE: &str = r#"
<html><body>
<a href="/url?q=https://docs.python.org/3/library/asyncio.html&amp;sa=U"><h3>asyncio: Asynchronous I/O</h3></a>
<a href="https://realpython.com/async-io-python/"><h3>Async IO in Python: A Complete Walkthrough</h3></a>
</body></html>"#;

struct ScriptedLlm {
    queue: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
}

impl ScriptedLlm {
    fn new(responses: Vec<Result<ChatResponse, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::from(responses)),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.queue
            .lock()
            .expect("lock queue")
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Api("script exhausted".to_string())))
    }
}

struct Fixture {
    runtime: AgentRuntime,
    memory: Arc<dyn MemoryStore>,
    book: Arc<dyn ExpenseBook>,
    board: Arc<dyn TaskBoard>,
}

fn fixture(router: ModelRouter, search_url: Option<String>) -> Fixture {
    let book: Arc<dyn ExpenseBook> = Arc::new(InMemoryExpenseBook::new());
    let board: Arc<dyn TaskBoard> = Arc::new(InMemoryTaskBoard::new());
    let mut registry = ToolRegistry::with_timeout(Duration::from_secs(5));
    registry
        .register_tool(RecordExpenseTool::new(Arc::clone(&book)))
        .expect("record_expense");
    registry
        .register_tool(RecordExpensesBatchTool::new(Arc::clone(&book)))
        .expect("record_expenses_batch");
    registry
        .register_tool(QueryExpensesTool::new(Arc::clone(&book)))
        .expect("query_expenses");
    registry
        .register_tool(AnalyzeExpensesTool::new(Arc::clone(&book)))
        .expect("analyze_expenses");
    registry
        .register_tool(CreateTaskTool::new(Arc::clone(&board)))
        .expect("create_task");
    registry
        .register_tool(ListTasksTool::new(Arc::clone(&board)))
        .expect("list_tasks");
    registry
        .register_tool(UpdateTaskTool::new(Arc::clone(&board)))
        .expect("update_task");
    if let Some(url) = search_url {
        registry
            .register_tool(GoogleSearchTool::new(url, "zh-CN"))
            .expect("google_search");
    }

    let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::default());
    let offset = FixedOffset::east_opt(8 * 3600).expect("offset");
    let runtime = AgentRuntime::new(
        Arc::new(registry),
        Arc::clone(&memory),
        Arc::new(router),
        offset,
    )
    .with_clock(|| {
        Utc.with_ymd_and_hms(2026, 10, 18, 1, 30, 0)
            .single()
            .expect("time")
    });
    Fixture {
        runtime,
        memory,
        book,
        board,
    }
}

#[tokio::test]
async fn heuristic_search_returns_result_titles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "Python asyncio 教程"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_PAGE))
        .mount(&server)
        .await;

    let fx = fixture(
        ModelRouter::heuristic(),
        Some(format!("{}/search", server.uri())),
    );
    let session = SessionKey::from("chat-1");
    let report = fx
        .runtime
        .run_cycle(&session, "帮我搜一下 Python asyncio 教程", None)
        .await;

    assert_eq!(report.state, CycleState::Completed);
    assert_eq!(report.plan_source, Some(PlanSource::Heuristic));
    assert_eq!(report.results.len(), 1);
    assert!(report.results[0].success);
    assert!(report.reply.contains("asyncio: Asynchronous I/O"));
    assert!(report.reply.contains("Async IO in Python: A Complete Walkthrough"));

    let turns = fx.memory.get_turns(&session).await.expect("turns");
    assert_eq!(turns.first().map(|t| t.role), Some(Role::User));
    assert_eq!(turns.last().map(|t| t.content.clone()), Some(report.reply));
}

#[tokio::test]
async fn search_backend_outage_is_reported_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fx = fixture(
        ModelRouter::heuristic(),
        Some(format!("{}/search", server.uri())),
    );
    let report = fx
        .runtime
        .run_cycle(&SessionKey::from("chat-1"), "搜索 rust tokio", None)
        .await;

    assert_eq!(report.state, CycleState::Completed);
    assert!(!report.results[0].success);
    assert!(report.reply.starts_with("❌ 工具执行失败"));
    assert!(report.reply.contains("网页搜索失败"));
}

#[tokio::test]
async fn one_message_with_two_amounts_records_one_batch() {
    let fx = fixture(ModelRouter::heuristic(), None);
    let session = SessionKey::from("chat-2");
    let report = fx
        .runtime
        .run_cycle(&session, "昨天晚上吃饭 25，打车 12.5 元", None)
        .await;

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].tool_name, "record_expenses_batch");
    assert!(report.reply.starts_with("✅ 批量记账成功\n• 笔数：2\n• 合计：37.5 元"));

    let stored = fx.book.recent(&session, None, 10).await.expect("recent");
    assert_eq!(stored.len(), 2);
    let total: f64 = stored.iter().map(|e| e.amount).sum();
    assert!((total - 37.5).abs() < f64::EPSILON);

    let other = fx
        .book
        .recent(&SessionKey::from("someone-else"), None, 10)
        .await
        .expect("recent");
    assert!(other.is_empty());
}

#[tokio::test]
async fn task_due_time_is_resolved_from_the_message() {
    let fx = fixture(ModelRouter::heuristic(), None);
    let session = SessionKey::from("chat-3");
    let report = fx
        .runtime
        .run_cycle(&session, "添加任务：明天上午交房租", None)
        .await;
    assert!(report.results[0].success);

    let tasks = fx.board.list(&session, 10).await.expect("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "明天上午交房租");
    let due = tasks[0].due_at.expect("due");
    assert_eq!(due.to_rfc3339(), "2026-10-19T08:00:00+08:00");
}

#[tokio::test]
async fn remote_outage_falls_back_to_rules() {
    let llm = ScriptedLlm::new(vec![Err(LlmError::RateLimit)]);
    let router = ModelRouter::new(RouterStrategy::Remote(RemotePlanner::new(
        llm,
        "test-model",
        Duration::from_secs(2),
    )));
    let fx = fixture(router, None);
    let report = fx
        .runtime
        .run_cycle(&SessionKey::from("chat-4"), "午饭 32 块", None)
        .await;

    assert_eq!(report.state, CycleState::Completed);
    assert_eq!(report.plan_source, Some(PlanSource::Fallback));
    assert_eq!(report.results[0].tool_name, "record_expense");
    assert!(report.reply.starts_with("✅ 记账成功"));
}

#[tokio::test]
async fn remote_plan_with_unknown_tool_falls_back() {
    let llm = ScriptedLlm::new(vec![Ok(ChatResponse::ToolCalls(vec![RawToolCall {
        id: "call-1".to_string(),
        name: "launch_rocket".to_string(),
        arguments: "{}".to_string(),
    }]))]);
    let router = ModelRouter::new(RouterStrategy::Remote(RemotePlanner::new(
        llm,
        "test-model",
        Duration::from_secs(2),
    )));
    let fx = fixture(router, None);
    let report = fx
        .runtime
        .run_cycle(&SessionKey::from("chat-5"), "查看我的任务", None)
        .await;

    assert_eq!(report.plan_source, Some(PlanSource::Fallback));
    assert_eq!(report.results[0].tool_name, "list_tasks");
    assert_eq!(report.reply, "📝 暂无任务");
}

#[tokio::test]
async fn crashing_tool_does_not_abort_the_cycle() {
    let mut registry = ToolRegistry::new();
    registry
        .register(
            proto::ToolSchema::new("google_search", "search").param(proto::ParamSpec::required(
                "query",
                proto::ParamType::String,
                "q",
            )),
            Arc::new(handler_fn(|_args: Map<String, Value>, _ctx: SessionContext| async move {
                if true {
                    panic!("parser exploded");
                }
                Ok::<_, ToolError>(ToolOutput::new("unreachable", json!({})))
            })),
        )
        .expect("register");
    let memory: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::default());
    let runtime = AgentRuntime::new(
        Arc::new(registry),
        Arc::clone(&memory),
        Arc::new(ModelRouter::heuristic()),
        FixedOffset::east_opt(0).expect("offset"),
    );

    let report = runtime
        .run_cycle(&SessionKey::from("chat-6"), "搜索 crash", None)
        .await;
    assert_eq!(report.state, CycleState::Completed);
    assert_eq!(report.results[0].message, "Tool crashed unexpectedly");

    let followup = runtime.handle_message("chat-6", "你好", None).await;
    assert!(followup.starts_with("你好"));
    assert_eq!(
        memory
            .get_turns(&SessionKey::from("chat-6"))
            .await
            .expect("turns")
            .len(),
        5
    );
}
