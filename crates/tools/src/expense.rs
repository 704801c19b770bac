//! Expense book and the recording/analytics tools built on it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeDelta};
use dashmap::DashMap;
use proto::{ParamSpec, ParamType, SessionKey, ToolError, ToolSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::{SessionContext, Tool, ToolHandler, ToolOutput, parse_args, round2, temporal};

const DEFAULT_CATEGORY: &str = "其他";
const DEFAULT_CURRENCY: &str = "CNY";
const DEFAULT_QUERY_LIMIT: usize = 20;
const DEFAULT_ANALYZE_LIMIT: usize = 200;
const DEFAULT_SUMMARY_LIMIT: usize = 30;
const MAX_LIMIT: usize = 500;

/// A stored expense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: u64,
    pub amount: f64,
    pub category: String,
    pub description: String,
    pub currency: String,
    pub spent_at: DateTime<FixedOffset>,
}

/// An expense that passed validation but has no id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpense {
    pub amount: f64,
    pub category: String,
    pub description: String,
    pub currency: String,
    pub spent_at: DateTime<FixedOffset>,
}

/// Storage collaborator for expenses.
#[async_trait]
pub trait ExpenseBook: Send + Sync {
    /// Stores all entries or none of them.
    async fn insert(
        &self,
        session: &SessionKey,
        entries: Vec<NewExpense>,
    ) -> Result<Vec<Expense>, ToolError>;

    /// Returns the newest expenses first, optionally bounded by `since`.
    async fn recent(
        &self,
        session: &SessionKey,
        since: Option<DateTime<FixedOffset>>,
        limit: usize,
    ) -> Result<Vec<Expense>, ToolError>;

    /// `None` when the expense does not belong to the session.
    async fn get(&self, session: &SessionKey, id: u64) -> Result<Option<Expense>, ToolError>;

    /// Applies the set fields of `patch`; `None` when the expense is unknown.
    async fn update(
        &self,
        session: &SessionKey,
        id: u64,
        patch: ExpensePatch,
    ) -> Result<Option<Expense>, ToolError>;

    /// Returns whether anything was removed.
    async fn delete(&self, session: &SessionKey, id: u64) -> Result<bool, ToolError>;
}

/// Field changes for [`ExpenseBook::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpensePatch {
    pub amount: Option<f64>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub spent_at: Option<DateTime<FixedOffset>>,
}

impl ExpensePatch {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.category.is_none()
            && self.description.is_none()
            && self.spent_at.is_none()
    }

    fn apply(self, expense: &mut Expense) {
        if let Some(amount) = self.amount {
            expense.amount = amount;
        }
        if let Some(category) = self.category {
            expense.category = category;
        }
        if let Some(description) = self.description {
            expense.description = description;
        }
        if let Some(spent_at) = self.spent_at {
            expense.spent_at = spent_at;
        }
    }
}

/// Process-local expense book.
#[derive(Default)]
pub struct InMemoryExpenseBook {
    next_id: AtomicU64,
    rows: DashMap<SessionKey, Vec<Expense>>,
}

impl InMemoryExpenseBook {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExpenseBook for InMemoryExpenseBook {
    async fn insert(
        &self,
        session: &SessionKey,
        entries: Vec<NewExpense>,
    ) -> Result<Vec<Expense>, ToolError> {
        let stored: Vec<Expense> = entries
            .into_iter()
            .map(|e| Expense {
                id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
                amount: e.amount,
                category: e.category,
                description: e.description,
                currency: e.currency,
                spent_at: e.spent_at,
            })
            .collect();
        self.rows
            .entry(session.clone())
            .or_default()
            .extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn recent(
        &self,
        session: &SessionKey,
        since: Option<DateTime<FixedOffset>>,
        limit: usize,
    ) -> Result<Vec<Expense>, ToolError> {
        let Some(rows) = self.rows.get(session) else {
            return Ok(Vec::new());
        };
        let mut selected: Vec<Expense> = rows
            .iter()
            .filter(|e| since.is_none_or(|s| e.spent_at >= s))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.spent_at.cmp(&a.spent_at).then(b.id.cmp(&a.id)));
        selected.truncate(limit);
        Ok(selected)
    }

    async fn get(&self, session: &SessionKey, id: u64) -> Result<Option<Expense>, ToolError> {
        Ok(self
            .rows
            .get(session)
            .and_then(|rows| rows.iter().find(|e| e.id == id).cloned()))
    }

    async fn update(
        &self,
        session: &SessionKey,
        id: u64,
        patch: ExpensePatch,
    ) -> Result<Option<Expense>, ToolError> {
        let Some(mut rows) = self.rows.get_mut(session) else {
            return Ok(None);
        };
        Ok(rows.iter_mut().find(|e| e.id == id).map(|expense| {
            patch.apply(expense);
            expense.clone()
        }))
    }

    async fn delete(&self, session: &SessionKey, id: u64) -> Result<bool, ToolError> {
        let Some(mut rows) = self.rows.get_mut(session) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|e| e.id != id);
        Ok(rows.len() < before)
    }
}

#[derive(Debug, Deserialize)]
struct ExpenseArgs {
    amount: f64,
    category: Option<String>,
    description: Option<String>,
    currency: Option<String>,
    spent_at: Option<String>,
}

impl ExpenseArgs {
    /// Validates one entry; `spent_at` falls back to phrases in the description, then `now`.
    fn into_new(self, now: DateTime<FixedOffset>) -> Result<NewExpense, String> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(format!("amount must be greater than 0, got {}", self.amount));
        }
        let description = self.description.unwrap_or_default().trim().to_string();
        let spent_at = match self.spent_at.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => temporal::resolve(text, now)
                .ok_or_else(|| format!("cannot understand spent_at '{text}'"))?,
            _ => temporal::resolve_relative(&description, now).unwrap_or(now),
        };
        Ok(NewExpense {
            amount: round2(self.amount),
            category: non_empty_or(self.category, DEFAULT_CATEGORY),
            description,
            currency: non_empty_or(self.currency, DEFAULT_CURRENCY).to_uppercase(),
            spent_at,
        })
    }
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn expense_json(e: &Expense) -> Value {
    json!({
        "id": e.id,
        "amount": e.amount,
        "category": e.category,
        "description": e.description,
        "currency": e.currency,
        "spent_at": temporal::format_timestamp(e.spent_at),
    })
}

fn expense_params(schema: ToolSchema) -> ToolSchema {
    schema
        .param(ParamSpec::required("amount", ParamType::Number, "Amount spent, greater than 0"))
        .param(ParamSpec::optional(
            "category",
            ParamType::String,
            "Category such as 餐饮, 交通, 购物 (default 其他)",
        ))
        .param(ParamSpec::optional("description", ParamType::String, "What the money was spent on"))
        .param(ParamSpec::optional("currency", ParamType::String, "ISO currency code (default CNY)"))
        .param(ParamSpec::optional(
            "spent_at",
            ParamType::Timestamp,
            "When the expense happened",
        ))
}

/// `record_expense`: stores a single expense.
pub struct RecordExpenseTool {
    book: Arc<dyn ExpenseBook>,
}

impl RecordExpenseTool {
    pub fn new(book: Arc<dyn ExpenseBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl ToolHandler for RecordExpenseTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: ExpenseArgs = parse_args(args)?;
        let entry = parsed.into_new(ctx.now).map_err(ToolError::InvalidArgs)?;
        let stored = self.book.insert(&ctx.session_key, vec![entry]).await?;
        let expense = stored
            .first()
            .ok_or_else(|| ToolError::ExecutionFailed("expense book stored nothing".to_string()))?;
        debug!(session = %ctx.session_key, id = expense.id, "Expense recorded");
        Ok(ToolOutput::new(
            format!("已记录 {} 元（{}）", expense.amount, expense.category),
            expense_json(expense),
        ))
    }
}

impl Tool for RecordExpenseTool {
    fn schema(&self) -> ToolSchema {
        expense_params(ToolSchema::new(
            "record_expense",
            "Record one expense. Prefer record_expenses_batch when the message lists several.",
        ))
    }
}

#[derive(Debug, Deserialize)]
struct BatchArgs {
    items: Vec<Value>,
}

/// `record_expenses_batch`: validates every item, then stores them together.
pub struct RecordExpensesBatchTool {
    book: Arc<dyn ExpenseBook>,
}

impl RecordExpensesBatchTool {
    pub fn new(book: Arc<dyn ExpenseBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl ToolHandler for RecordExpensesBatchTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: BatchArgs = parse_args(args)?;
        if parsed.items.is_empty() {
            return Err(ToolError::InvalidArgs("items must not be empty".to_string()));
        }

        let mut entries = Vec::with_capacity(parsed.items.len());
        for (index, item) in parsed.items.into_iter().enumerate() {
            let item: ExpenseArgs = serde_json::from_value(item)
                .map_err(|e| ToolError::InvalidArgs(format!("items[{index}]: {e}")))?;
            let entry = item
                .into_new(ctx.now)
                .map_err(|e| ToolError::InvalidArgs(format!("items[{index}]: {e}")))?;
            entries.push(entry);
        }

        let stored = self.book.insert(&ctx.session_key, entries).await?;
        let total = round2(stored.iter().map(|e| e.amount).sum());
        debug!(session = %ctx.session_key, count = stored.len(), "Expense batch recorded");
        Ok(ToolOutput::new(
            format!("已记录 {} 笔，合计 {} 元", stored.len(), total),
            json!({
                "count": stored.len(),
                "total": total,
                "items": stored.iter().map(expense_json).collect::<Vec<_>>(),
            }),
        ))
    }
}

impl Tool for RecordExpensesBatchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "record_expenses_batch",
            "Record several expenses from one message in a single call.",
        )
        .param(
            ParamSpec::required("items", ParamType::Array, "Expenses to record")
                .with_items(json!({
                    "type": "object",
                    "properties": {
                        "amount": {"type": "number"},
                        "category": {"type": "string"},
                        "description": {"type": "string"},
                        "currency": {"type": "string"},
                        "spent_at": {"type": "string", "format": "date-time"}
                    },
                    "required": ["amount"]
                })),
        )
    }
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    days: Option<i64>,
    limit: Option<usize>,
    category: Option<String>,
}

fn window_start(
    now: DateTime<FixedOffset>,
    days: Option<i64>,
) -> Result<Option<DateTime<FixedOffset>>, ToolError> {
    let Some(days) = days.filter(|d| *d > 0) else {
        return Ok(None);
    };
    TimeDelta::try_days(days)
        .and_then(|span| now.checked_sub_signed(span))
        .map(Some)
        .ok_or_else(|| ToolError::InvalidArgs(format!("days out of range: {days}")))
}

/// `query_expenses`: lists recent expenses.
pub struct QueryExpensesTool {
    book: Arc<dyn ExpenseBook>,
}

impl QueryExpensesTool {
    pub fn new(book: Arc<dyn ExpenseBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl ToolHandler for QueryExpensesTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: QueryArgs = parse_args(args)?;
        let limit = parsed.limit.unwrap_or(DEFAULT_QUERY_LIMIT).clamp(1, MAX_LIMIT);
        let since = window_start(ctx.now, parsed.days)?;
        let mut rows = self.book.recent(&ctx.session_key, since, MAX_LIMIT).await?;
        if let Some(category) = parsed.category.filter(|c| !c.trim().is_empty()) {
            rows.retain(|e| e.category == category.trim());
        }
        rows.truncate(limit);
        Ok(ToolOutput::new(
            format!("找到 {} 笔消费", rows.len()),
            json!({
                "count": rows.len(),
                "items": rows.iter().map(expense_json).collect::<Vec<_>>(),
            }),
        ))
    }
}

impl Tool for QueryExpensesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("query_expenses", "List recent expenses.")
            .param(ParamSpec::optional("days", ParamType::Integer, "Only the last N days"))
            .param(ParamSpec::optional("limit", ParamType::Integer, "Maximum rows (default 20)"))
            .param(ParamSpec::optional("category", ParamType::String, "Only this category"))
    }
}

/// `analyze_expenses`: totals, averages and per-category breakdown.
pub struct AnalyzeExpensesTool {
    book: Arc<dyn ExpenseBook>,
}

impl AnalyzeExpensesTool {
    pub fn new(book: Arc<dyn ExpenseBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl ToolHandler for AnalyzeExpensesTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: QueryArgs = parse_args(args)?;
        let limit = parsed.limit.unwrap_or(DEFAULT_ANALYZE_LIMIT).clamp(1, MAX_LIMIT);
        let since = window_start(ctx.now, parsed.days)?;
        let rows = self.book.recent(&ctx.session_key, since, limit).await?;
        if rows.is_empty() {
            return Ok(ToolOutput::new(
                "暂无消费数据",
                json!({"count": 0, "total": 0.0, "by_category": []}),
            ));
        }

        let total = round2(rows.iter().map(|e| e.amount).sum());
        let count = rows.len();
        let mut by_category: BTreeMap<&str, f64> = BTreeMap::new();
        for e in &rows {
            *by_category.entry(e.category.as_str()).or_default() += e.amount;
        }
        let mut breakdown: Vec<(&str, f64)> = by_category.into_iter().collect();
        breakdown.sort_by(|a, b| b.1.total_cmp(&a.1));
        let largest = rows
            .iter()
            .max_by(|a, b| a.amount.total_cmp(&b.amount))
            .map(expense_json)
            .unwrap_or(Value::Null);

        Ok(ToolOutput::new(
            format!("共 {count} 笔，合计 {total} 元"),
            json!({
                "count": count,
                "total": total,
                "average": round2(total / count as f64),
                "largest": largest,
                "top_category": breakdown.first().map(|(c, _)| *c),
                "by_category": breakdown
                    .iter()
                    .map(|(c, t)| json!({"category": c, "total": round2(*t)}))
                    .collect::<Vec<_>>(),
            }),
        ))
    }
}

impl Tool for AnalyzeExpensesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "analyze_expenses",
            "Summarize spending: total, average, largest expense and per-category totals.",
        )
        .param(ParamSpec::optional("days", ParamType::Integer, "Only the last N days"))
        .param(ParamSpec::optional("limit", ParamType::Integer, "Maximum rows considered"))
    }
}

#[derive(Debug, Deserialize)]
struct ExpenseIdArgs {
    expense_id: u64,
}

fn not_found(id: u64) -> ToolError {
    ToolError::ExecutionFailed(format!("expense #{id} not found"))
}

/// `get_expense`
pub struct GetExpenseTool {
    book: Arc<dyn ExpenseBook>,
}

impl GetExpenseTool {
    pub fn new(book: Arc<dyn ExpenseBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl ToolHandler for GetExpenseTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: ExpenseIdArgs = parse_args(args)?;
        let expense = self
            .book
            .get(&ctx.session_key, parsed.expense_id)
            .await?
            .ok_or_else(|| not_found(parsed.expense_id))?;
        Ok(ToolOutput::new(
            format!("#{}：{} 元（{}）", expense.id, expense.amount, expense.category),
            expense_json(&expense),
        ))
    }
}

impl Tool for GetExpenseTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("get_expense", "Show one recorded expense.")
            .param(ParamSpec::required("expense_id", ParamType::Integer, "Expense number"))
    }
}

#[derive(Debug, Deserialize)]
struct UpdateArgs {
    expense_id: u64,
    amount: Option<f64>,
    category: Option<String>,
    description: Option<String>,
    spent_at: Option<String>,
}

impl UpdateArgs {
    fn into_patch(self, now: DateTime<FixedOffset>) -> Result<(u64, ExpensePatch), ToolError> {
        let amount = match self.amount {
            Some(a) if !a.is_finite() || a <= 0.0 => {
                return Err(ToolError::InvalidArgs(format!("amount must be greater than 0, got {a}")));
            }
            other => other.map(round2),
        };
        let spent_at = match self.spent_at.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Some(temporal::resolve(text, now).ok_or_else(|| {
                ToolError::InvalidArgs(format!("cannot understand spent_at '{text}'"))
            })?),
            _ => None,
        };
        let patch = ExpensePatch {
            amount,
            category: self.category.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            description: self.description.map(|d| d.trim().to_string()),
            spent_at,
        };
        if patch.is_empty() {
            return Err(ToolError::InvalidArgs("nothing to update".to_string()));
        }
        Ok((self.expense_id, patch))
    }
}

/// `update_expense`: corrects fields of a recorded expense.
pub struct UpdateExpenseTool {
    book: Arc<dyn ExpenseBook>,
}

impl UpdateExpenseTool {
    pub fn new(book: Arc<dyn ExpenseBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl ToolHandler for UpdateExpenseTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: UpdateArgs = parse_args(args)?;
        let (id, patch) = parsed.into_patch(ctx.now)?;
        let expense = self
            .book
            .update(&ctx.session_key, id, patch)
            .await?
            .ok_or_else(|| not_found(id))?;
        debug!(session = %ctx.session_key, id, "Expense updated");
        Ok(ToolOutput::new(
            format!("已更新 #{}：{} 元（{}）", expense.id, expense.amount, expense.category),
            expense_json(&expense),
        ))
    }
}

impl Tool for UpdateExpenseTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("update_expense", "Correct a recorded expense. Only given fields change.")
            .param(ParamSpec::required("expense_id", ParamType::Integer, "Expense number"))
            .param(ParamSpec::optional("amount", ParamType::Number, "New amount, greater than 0"))
            .param(ParamSpec::optional("category", ParamType::String, "New category"))
            .param(ParamSpec::optional("description", ParamType::String, "New description"))
            .param(ParamSpec::optional("spent_at", ParamType::Timestamp, "New time"))
    }
}

/// `delete_expense`
pub struct DeleteExpenseTool {
    book: Arc<dyn ExpenseBook>,
}

impl DeleteExpenseTool {
    pub fn new(book: Arc<dyn ExpenseBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl ToolHandler for DeleteExpenseTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: ExpenseIdArgs = parse_args(args)?;
        if !self.book.delete(&ctx.session_key, parsed.expense_id).await? {
            return Err(not_found(parsed.expense_id));
        }
        debug!(session = %ctx.session_key, id = parsed.expense_id, "Expense deleted");
        Ok(ToolOutput::new(
            format!("已删除记账 #{}", parsed.expense_id),
            json!({"expense_id": parsed.expense_id}),
        ))
    }
}

impl Tool for DeleteExpenseTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("delete_expense", "Remove a recorded expense.")
            .param(ParamSpec::required("expense_id", ParamType::Integer, "Expense number"))
    }
}

#[derive(Debug, Deserialize)]
struct SummarizeArgs {
    limit: Option<usize>,
}

/// `summarize_expenses`: totals over the most recent entries.
pub struct SummarizeExpensesTool {
    book: Arc<dyn ExpenseBook>,
}

impl SummarizeExpensesTool {
    pub fn new(book: Arc<dyn ExpenseBook>) -> Self {
        Self { book }
    }
}

#[async_trait]
impl ToolHandler for SummarizeExpensesTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: SummarizeArgs = parse_args(args)?;
        let limit = parsed.limit.unwrap_or(DEFAULT_SUMMARY_LIMIT).clamp(1, MAX_LIMIT);
        let rows = self.book.recent(&ctx.session_key, None, limit).await?;
        let total = round2(rows.iter().map(|e| e.amount).sum());
        let mut by_category: BTreeMap<&str, f64> = BTreeMap::new();
        for e in &rows {
            *by_category.entry(e.category.as_str()).or_default() += e.amount;
        }
        let by_category: Map<String, Value> = by_category
            .into_iter()
            .map(|(c, t)| (c.to_string(), json!(round2(t))))
            .collect();
        Ok(ToolOutput::new(
            format!("最近 {} 笔，合计 {} 元", rows.len(), total),
            json!({
                "count": rows.len(),
                "total": total,
                "by_category": by_category,
            }),
        ))
    }
}

impl Tool for SummarizeExpensesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("summarize_expenses", "Total and per-category sums of recent expenses.")
            .param(ParamSpec::optional("limit", ParamType::Integer, "How many recent entries (default 30)"))
    }
}
