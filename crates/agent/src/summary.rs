//! Deterministic replies built from tool results.

use proto::ToolResult;
use serde_json::Value;

const SEARCH_PREVIEW: usize = 5;

fn label(tool: &str) -> &str {
    match tool {
        "record_expense" => "记账",
        "record_expenses_batch" => "批量记账",
        "query_expenses" | "get_expense" => "查询消费",
        "update_expense" => "修改记账",
        "delete_expense" => "删除记账",
        "summarize_expenses" => "消费汇总",
        "analyze_expenses" => "消费分析",
        "create_task" => "创建任务",
        "list_tasks" => "查看任务",
        "update_task" => "更新任务",
        "delete_task" => "删除任务",
        "get_weather" => "查询天气",
        "google_search" => "网页搜索",
        "capture_website_screenshot" => "网页截图",
        "set_user_config" | "get_user_config" | "list_user_configs" | "delete_user_config" => {
            "配置"
        }
        other => other,
    }
}

fn text(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn number(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::Number(n)) => n.to_string(),
        _ => "0".to_string(),
    }
}

/// Plain-language list of failed calls, `None` when everything succeeded.
pub fn failure_notes(results: &[ToolResult]) -> Option<String> {
    let lines: Vec<String> = results
        .iter()
        .filter(|r| !r.success)
        .map(|r| format!("• {}失败：{}", label(&r.tool_name), r.message))
        .collect();
    if lines.is_empty() {
        return None;
    }
    Some(format!("⚠️ 以下操作未成功：\n{}", lines.join("\n")))
}

/// Reply used when no model summary is available.
pub fn fallback_summary(results: &[ToolResult]) -> String {
    if results.is_empty() {
        return "✅ 已完成处理。".to_string();
    }
    let notes = failure_notes(results);
    let body = if results.iter().any(|r| r.success) {
        success_summary(results)
    } else {
        "❌ 工具执行失败，请稍后重试。".to_string()
    };
    match notes {
        Some(notes) => format!("{body}\n\n{notes}"),
        None => body,
    }
}

/// Picks the most specific summary among successful results.
fn success_summary(results: &[ToolResult]) -> String {
    let last = |tool: &str| {
        results
            .iter()
            .rev()
            .find(|r| r.success && r.tool_name == tool)
            .map(|r| &r.payload)
    };

    if let Some(data) = last("record_expenses_batch") {
        return format!(
            "✅ 批量记账成功\n• 笔数：{}\n• 合计：{} 元",
            number(data, "count"),
            number(data, "total")
        );
    }
    if let Some(data) = last("record_expense") {
        return format!(
            "✅ 记账成功\n• 金额：{} 元\n• 分类：{}",
            number(data, "amount"),
            text(data, "category")
        );
    }
    if let Some(data) = last("analyze_expenses") {
        let mut lines = vec![
            "📊 消费分析完成".to_string(),
            format!("• 笔数：{}", number(data, "count")),
            format!("• 合计：{} 元", number(data, "total")),
        ];
        if let Some(top) = data.get("top_category").and_then(Value::as_str) {
            lines.push(format!("• 最多：{top}"));
        }
        return lines.join("\n");
    }
    if let Some(data) = last("summarize_expenses") {
        let mut lines = vec![
            "📒 消费汇总".to_string(),
            format!("• 笔数：{}", number(data, "count")),
            format!("• 合计：{} 元", number(data, "total")),
        ];
        if let Some(categories) = data.get("by_category").and_then(Value::as_object) {
            for (category, total) in categories {
                lines.push(format!("• {category}：{total} 元"));
            }
        }
        return lines.join("\n");
    }
    if let Some(data) = last("google_search") {
        let items = data
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if items.is_empty() {
            return format!("🔎 未找到结果：{}", text(data, "query"));
        }
        let mut lines = vec![format!("🔎 Google 搜索结果（{} 条）", items.len())];
        for (i, item) in items.iter().take(SEARCH_PREVIEW).enumerate() {
            lines.push(format!(
                "{}. {}\n{}",
                i + 1,
                text(item, "title"),
                text(item, "url")
            ));
        }
        return lines.join("\n");
    }
    if let Some(data) = last("capture_website_screenshot") {
        let mut lines = vec![
            "📸 网页截图完成".to_string(),
            format!("• 标题：{}", text(data, "title")),
            format!("• 地址：{}", text(data, "url")),
            format!("• 存储：{}", text(data, "storage_mode")),
        ];
        if let Some(id) = data.get("screenshot_id").filter(|v| !v.is_null()) {
            lines.push(format!("• 数据库ID：{id}"));
        }
        return lines.join("\n");
    }
    if let Some(r) = results
        .iter()
        .rev()
        .find(|r| r.success && r.tool_name == "get_weather")
    {
        return format!("🌤️ {}", r.message);
    }
    if let Some(data) = last("list_tasks") {
        let items = data
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if items.is_empty() {
            return "📝 暂无任务".to_string();
        }
        let mut lines = vec![format!("📝 任务列表（{} 个）", items.len())];
        for item in items {
            lines.push(format!(
                "• #{} {} [{}]",
                number(item, "id"),
                text(item, "title"),
                text(item, "status")
            ));
        }
        return lines.join("\n");
    }

    let lines: Vec<String> = results
        .iter()
        .filter(|r| r.success && !r.message.is_empty())
        .map(|r| format!("• {}", r.message))
        .collect();
    if lines.is_empty() {
        "✅ 处理完成。".to_string()
    } else {
        format!("✅ 处理完成。\n{}", lines.join("\n"))
    }
}

/// Image files produced by the cycle, deduplicated in first-seen order.
pub fn collect_image_paths(results: &[ToolResult]) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for r in results
        .iter()
        .filter(|r| r.success && r.tool_name == "capture_website_screenshot")
    {
        if let Some(path) = r.payload.get("path").and_then(Value::as_str)
            && !path.is_empty()
            && !paths.iter().any(|p| p == path)
        {
            paths.push(path.to_string());
        }
    }
    paths
}

/// One-line audit record of a call and its outcome, stored as a tool turn.
pub fn audit_line(result: &ToolResult) -> String {
    let status = if result.success { "ok" } else { "failed" };
    format!("{} [{status}] {}", result.tool_name, result.message)
}
