//! Planning strategies: a deterministic rule table and a remote model.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use proto::{ConversationTurn, PlanningDecision, PlanningError, Role, ToolCall, ToolSchema};
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, RawToolCall};

/// Everything a strategy sees when deciding.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub message: &'a str,
    /// Prior turns of the session, oldest first. Excludes `message`.
    pub turns: &'a [ConversationTurn],
    pub tools: &'a [ToolSchema],
    pub now: DateTime<FixedOffset>,
}

const GREETING_REPLY: &str = "你好，我可以帮你记账、查天气、管理任务、搜索网页和截图。";
const HELP_REPLY: &str = "我在的，你可以告诉我需要记录什么开销，或者让我查天气、搜索网页。";

static GREETING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:你好|您好|嗨|哈喽|hello|hi|hey)\s*[!！,，.。~]*\s*$").expect("valid regex")
});
static SEARCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:搜一下|搜索一下|搜一搜|搜索|搜(?:\s|[:：])|google一下|\bgoogle\b|\bsearch(?:\s+for)?\b)\s*[:：]?\s*(.+)$",
    )
    .expect("valid regex")
});
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s，。、；）)]+").expect("valid regex"));
static TASK_CREATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:(?:添加|创建|新建|新增|加个?|记个?)\s*(?:任务|待办)|\b(?:add|create)\s+(?:a\s+)?(?:task|todo))\s*[:：]?\s*(.+)$",
    )
    .expect("valid regex")
});
static CITY_FILLER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:what'?s|what|how'?s|how|is|the|like|in|for|at|today|tomorrow|now)\b")
        .expect("valid regex")
});
static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(?:元|块|rmb)?").expect("valid regex"));

const SCREENSHOT_WORDS: &[&str] = &["截图", "截屏", "截个图", "快照", "screenshot"];
const ANALYSIS_WORDS: &[&str] = &["消费分析", "开销分析", "分析", "统计"];
const CONFIG_WORDS: &[&str] = &["配置", "设置", "config", "setting"];
const LIST_WORDS: &[&str] = &["查看", "列出", "看看", "有哪些", "列表", "list", "show"];
const TASK_WORDS: &[&str] = &["任务", "待办", "task", "todo"];
const WEATHER_WORDS: &[&str] = &["天气", "气温", "weather"];
const CITY_NOISE: &[&str] = &[
    "天气", "气温", "weather", "怎么样", "如何", "查一下", "查询", "帮我", "查", "今天", "明天",
    "现在", "?", "？", "。", "!", "！",
];
/// Characters that mark a number as a date, time, or count rather than money.
const NON_MONEY_SUFFIX: &[char] = &[
    '点', '号', '月', '日', '年', '天', '岁', '个', '次', '条', '%', ':', '：', '-', '/',
];
const SEGMENT_TRIM: &[char] = &[',', '，', '、', ';', '；', '。', '和', '跟', ' '];
const CATEGORY_WORDS: &[(&str, &[&str])] = &[
    (
        "餐饮",
        &["吃", "饭", "餐", "咖啡", "奶茶", "外卖", "火锅", "饮料"],
    ),
    (
        "交通",
        &["打车", "地铁", "公交", "出租", "加油", "油费", "高铁", "机票", "停车"],
    ),
    ("购物", &["买", "购物", "超市", "淘宝"]),
    ("娱乐", &["电影", "游戏", "ktv", "演唱会"]),
];
const DEFAULT_CATEGORY: &str = "其他";

fn contains_any(haystack: &str, words: &[&str]) -> bool {
    words.iter().any(|w| haystack.contains(w))
}

/// Deterministic keyword planner. Always produces a decision.
///
/// Rules are tried in order; a rule whose tool is not registered is skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicPlanner;

impl HeuristicPlanner {
    pub fn plan(&self, req: &PlanRequest<'_>) -> PlanningDecision {
        let available: HashSet<&str> = req.tools.iter().map(|t| t.name.as_str()).collect();
        let message = req.message.trim();
        let lowered = message.to_lowercase();

        if GREETING_RE.is_match(message) {
            return PlanningDecision::Reply(GREETING_REPLY.to_string());
        }

        let mut rules = candidate_calls(message, &lowered).into_iter();
        let decision = rules.find(|call| available.contains(call.name.as_str()));
        match decision {
            Some(call) => {
                debug!(tool = %call.name, "Heuristic rule matched");
                PlanningDecision::Execute(vec![call])
            }
            None => PlanningDecision::Reply(HELP_REPLY.to_string()),
        }
    }
}

/// Every rule that matches, in priority order.
fn candidate_calls(message: &str, lowered: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();

    if let Some(query) = SEARCH_RE
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|q| !q.is_empty())
    {
        calls.push(ToolCall::from_json("google_search", json!({ "query": query })));
    }

    if contains_any(lowered, SCREENSHOT_WORDS)
        && let Some(url) = URL_RE.find(message)
    {
        calls.push(ToolCall::from_json(
            "capture_website_screenshot",
            json!({ "url": url.as_str() }),
        ));
    }

    if contains_any(lowered, ANALYSIS_WORDS) {
        calls.push(ToolCall::from_json("analyze_expenses", json!({ "days": 30 })));
    }

    if contains_any(lowered, CONFIG_WORDS) && contains_any(lowered, LIST_WORDS) {
        calls.push(ToolCall::from_json("list_user_configs", json!({})));
    }

    if let Some(title) = TASK_CREATE_RE
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|t| !t.is_empty())
    {
        calls.push(ToolCall::from_json("create_task", json!({ "title": title })));
    } else if contains_any(lowered, TASK_WORDS) && contains_any(lowered, LIST_WORDS) {
        calls.push(ToolCall::from_json("list_tasks", json!({})));
    }

    let amounts = money_amounts(message);
    if amounts.len() >= 2 {
        let items: Vec<Value> = amounts
            .iter()
            .enumerate()
            .map(|(i, found)| {
                let start = if i == 0 { 0 } else { amounts[i - 1].end };
                let segment = message[start..found.start].trim_matches(SEGMENT_TRIM);
                let description = if segment.is_empty() {
                    format!("消费{}", i + 1)
                } else {
                    segment.to_string()
                };
                json!({
                    "amount": found.value,
                    "category": guess_category(&description),
                    "description": description,
                })
            })
            .collect();
        calls.push(ToolCall::from_json(
            "record_expenses_batch",
            json!({ "items": items }),
        ));
    }

    if contains_any(lowered, WEATHER_WORDS) {
        let args = match weather_city(message) {
            Some(city) => json!({ "city": city }),
            None => json!({}),
        };
        calls.push(ToolCall::from_json("get_weather", args));
    }

    if let [found] = amounts.as_slice() {
        calls.push(ToolCall::from_json(
            "record_expense",
            json!({
                "amount": found.value,
                "category": guess_category(message),
                "description": message,
            }),
        ));
    }

    calls
}

struct Amount {
    start: usize,
    end: usize,
    value: f64,
}

/// Currency-like numbers, skipping dates, clock times and counts.
fn money_amounts(message: &str) -> Vec<Amount> {
    AMOUNT_RE
        .captures_iter(message)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1)?;
            let before = message[..number.start()].chars().next_back();
            if before.is_some_and(|c| matches!(c, '-' | ':' | '/' | '.')) {
                return None;
            }
            let after = message[number.end()..].trim_start().chars().next();
            if whole.end() == number.end() + trailing_space(message, number.end())
                && after.is_some_and(|c| NON_MONEY_SUFFIX.contains(&c))
            {
                return None;
            }
            let value: f64 = number.as_str().parse().ok()?;
            (value > 0.0).then_some(Amount {
                start: whole.start(),
                end: whole.end(),
                value,
            })
        })
        .collect()
}

fn trailing_space(message: &str, from: usize) -> usize {
    let rest = &message[from..];
    rest.len() - rest.trim_start().len()
}

fn guess_category(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    CATEGORY_WORDS
        .iter()
        .find(|(_, words)| contains_any(&lowered, words))
        .map(|(category, _)| *category)
        .unwrap_or(DEFAULT_CATEGORY)
}

fn weather_city(message: &str) -> Option<String> {
    let mut city = message.to_string();
    for noise in CITY_NOISE {
        city = city.replace(noise, "");
        city = city.replace(&noise.to_uppercase(), "");
    }
    let city = CITY_FILLER_RE.replace_all(&city, " ");
    let city = city.split_whitespace().collect::<Vec<_>>().join(" ");
    let city = city.trim_end_matches('的').trim();
    (!city.is_empty()).then(|| city.to_string())
}

const PLANNER_PROMPT: &str = "你是一个中文个人助理，负责记账、任务、天气、网页搜索和截图。
先识别意图，再决定是否调用工具：
1) 普通闲聊直接回复，不调用工具。
2) 记账必须调用工具；一句话里有多笔消费时，只调用一次 record_expenses_batch。
3) 用户提到时间（如 昨天晚上、今天中午、2026-02-26 12:30）时，在对应的时间参数里填写。
4) 用户要求配置时调用 set_user_config / get_user_config / list_user_configs / delete_user_config。
5) 参数尽量完整准确，不要编造工具。";

/// Planner backed by a remote chat model.
pub struct RemotePlanner {
    llm: Arc<dyn LlmProvider>,
    model: String,
    temperature: Option<f32>,
    timeout: Duration,
}

impl RemotePlanner {
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature: Some(0.0),
            timeout,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Asks the model for a decision.
    ///
    /// Empty answers, undecodable arguments and unregistered tool names are
    /// errors; the caller decides how to recover.
    pub async fn plan(&self, req: &PlanRequest<'_>) -> Result<PlanningDecision, PlanningError> {
        let chat = ChatRequest {
            messages: build_messages(req),
            tools: req.tools.to_vec(),
            model: self.model.clone(),
            temperature: self.temperature,
        };
        let response = tokio::time::timeout(self.timeout, self.llm.chat(chat))
            .await
            .map_err(|_| PlanningError::Timeout(self.timeout))??;
        parse_response(response, req.tools)
    }
}

fn build_messages(req: &PlanRequest<'_>) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(req.turns.len() + 2);
    messages.push(ChatMessage::system(format!(
        "{PLANNER_PROMPT}\n当前时间：{}",
        req.now.format("%Y-%m-%d %H:%M %:z")
    )));
    messages.extend(
        req.turns
            .iter()
            .map(|t| ChatMessage::new(t.role, t.content.clone())),
    );
    messages.push(ChatMessage::new(Role::User, req.message));
    messages
}

/// Turns a raw model answer into a decision.
pub fn parse_response(
    response: ChatResponse,
    tools: &[ToolSchema],
) -> Result<PlanningDecision, PlanningError> {
    match response {
        ChatResponse::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                Err(PlanningError::Empty)
            } else {
                Ok(PlanningDecision::Reply(text.to_string()))
            }
        }
        ChatResponse::ToolCalls(raw) if raw.is_empty() => Err(PlanningError::Empty),
        ChatResponse::ToolCalls(raw) => raw
            .into_iter()
            .map(|call| parse_call(call, tools))
            .collect::<Result<Vec<_>, _>>()
            .map(PlanningDecision::Execute),
    }
}

fn parse_call(raw: RawToolCall, tools: &[ToolSchema]) -> Result<ToolCall, PlanningError> {
    let name = raw.name.trim();
    if !tools.iter().any(|t| t.name == name) {
        return Err(PlanningError::UnknownTool(name.to_string()));
    }
    let arguments = parse_arguments(&raw.arguments)
        .map_err(|reason| PlanningError::Malformed(format!("{name}: {reason}")))?;
    let mut call = ToolCall::new(name, arguments);
    if !raw.id.trim().is_empty() {
        call.id = raw.id;
    }
    Ok(call)
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(format!("arguments must be an object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}
