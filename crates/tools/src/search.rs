//! Web search by scraping the HTML result page.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use proto::{ParamSpec, ParamType, ToolError, ToolSchema};
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::{SessionContext, Tool, ToolHandler, ToolOutput, parse_args};

pub const DEFAULT_SEARCH_URL: &str = "https://www.google.com/search";
const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 10;
const HTTP_TIMEOUT_SECS: u64 = 15;
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

static ANCHOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<a\s[^>]*?href="([^"]+)"[^>]*>(.*?)</a>"#).expect("valid regex"));
static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<h3[^>]*>(.*?)</h3>").expect("valid regex"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid regex"));

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    limit: Option<usize>,
    language: Option<String>,
}

/// One organic result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
}

/// `google_search`
pub struct GoogleSearchTool {
    client: reqwest::Client,
    base_url: String,
    language: String,
}

impl GoogleSearchTool {
    pub fn new(base_url: impl Into<String>, language: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            language: language.into(),
        }
    }
}

fn plain_text(html: &str) -> String {
    let stripped = TAG_RE.replace_all(html, "");
    html_escape::decode_html_entities(stripped.trim())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves a result href to the target URL, unwrapping `/url?q=` redirects.
fn target_url(href: &str) -> Option<String> {
    let href = html_escape::decode_html_entities(href);
    let url = if href.starts_with("/url?") {
        let wrapped = Url::parse(&format!("https://www.google.com{href}")).ok()?;
        let target = wrapped
            .query_pairs()
            .find(|(k, _)| k == "q" || k == "url")
            .map(|(_, v)| v.into_owned())?;
        Url::parse(&target).ok()?
    } else {
        Url::parse(&href).ok()?
    };
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    if host == "google.com" || host.ends_with(".google.com") {
        return None;
    }
    Some(url.to_string())
}

/// Extracts titled results in page order, deduplicated by URL.
pub fn parse_results(html: &str, limit: usize) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    for anchor in ANCHOR_RE.captures_iter(html) {
        let Some(heading) = HEADING_RE.captures(&anchor[2]) else {
            continue;
        };
        let Some(url) = target_url(&anchor[1]) else {
            continue;
        };
        let title = plain_text(&heading[1]);
        if title.is_empty() || !seen.insert(url.clone()) {
            continue;
        }
        hits.push(SearchHit { title, url });
        if hits.len() >= limit {
            break;
        }
    }
    hits
}

#[async_trait]
impl ToolHandler for GoogleSearchTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        _ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: SearchArgs = parse_args(args)?;
        let query = parsed.query.trim().to_string();
        if query.is_empty() {
            return Err(ToolError::InvalidArgs("query must not be empty".to_string()));
        }
        let limit = parsed.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let language = parsed.language.unwrap_or_else(|| self.language.clone());
        let num = limit.to_string();

        let html = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", query.as_str()),
                ("hl", language.as_str()),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ToolError::ExecutionFailed(format!("search request failed: {e}")))?
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("search response unreadable: {e}")))?;

        let hits = parse_results(&html, limit);
        debug!(query = %query, hits = hits.len(), "Search completed");
        let message = if hits.is_empty() {
            format!("未找到结果：{query}")
        } else {
            format!("找到 {} 条结果", hits.len())
        };
        Ok(ToolOutput::new(
            message,
            json!({
                "query": query,
                "items": hits
                    .iter()
                    .map(|h| json!({"title": h.title, "url": h.url}))
                    .collect::<Vec<_>>(),
            }),
        ))
    }
}

impl Tool for GoogleSearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("google_search", "Search the web and return result titles and links.")
            .param(ParamSpec::required("query", ParamType::String, "Search keywords"))
            .param(ParamSpec::optional("limit", ParamType::Integer, "Number of results, 1-10 (default 5)"))
            .param(ParamSpec::optional("language", ParamType::String, "Interface language, e.g. zh-CN"))
    }
}
