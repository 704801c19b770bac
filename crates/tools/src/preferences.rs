//! Session configuration tools backed by [`SessionSettings`](crate::SessionSettings).

use std::str::FromStr;

use async_trait::async_trait;
use proto::{ParamSpec, ParamType, SCREENSHOT_STORAGE, StoragePolicy, ToolError, ToolSchema};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{SessionContext, Tool, ToolHandler, ToolOutput, parse_args};

#[derive(Debug, Deserialize)]
struct OptionArgs {
    option: String,
}

#[derive(Debug, Deserialize)]
struct SetArgs {
    option: String,
    value: String,
}

fn option_name(raw: &str) -> Result<String, ToolError> {
    let name = raw.trim().to_ascii_lowercase();
    if name.is_empty() {
        return Err(ToolError::InvalidArgs("option must not be empty".to_string()));
    }
    Ok(name)
}

/// Known options are stored in canonical form.
fn canonical_value(option: &str, value: &str) -> Result<String, ToolError> {
    match option {
        SCREENSHOT_STORAGE => StoragePolicy::from_str(value)
            .map(|p| p.as_str().to_string())
            .map_err(|e| ToolError::InvalidArgs(e.to_string())),
        _ => Ok(value.trim().to_string()),
    }
}

fn option_param() -> ParamSpec {
    ParamSpec::required("option", ParamType::String, "Option name, e.g. screenshot_storage")
}

pub struct SetUserConfigTool;

#[async_trait]
impl ToolHandler for SetUserConfigTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: SetArgs = parse_args(args)?;
        let option = option_name(&parsed.option)?;
        let value = canonical_value(&option, &parsed.value)?;
        ctx.settings.set(&option, &value).await?;
        Ok(ToolOutput::new(
            format!("已设置 {option} = {value}"),
            json!({ "option": option, "value": value }),
        ))
    }
}

impl Tool for SetUserConfigTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("set_user_config", "Set a per-session configuration option.")
            .param(option_param())
            .param(ParamSpec::required("value", ParamType::String, "New value"))
    }
}

pub struct GetUserConfigTool;

#[async_trait]
impl ToolHandler for GetUserConfigTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: OptionArgs = parse_args(args)?;
        let option = option_name(&parsed.option)?;
        let value = ctx.settings.get(&option).await?;
        let message = match &value {
            Some(v) => format!("{option} = {v}"),
            None => format!("{option} 未设置"),
        };
        Ok(ToolOutput::new(
            message,
            json!({ "option": option, "value": value }),
        ))
    }
}

impl Tool for GetUserConfigTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "get_user_config",
            "Read a per-session configuration option, falling back to its default.",
        )
        .param(option_param())
    }
}

pub struct ListUserConfigsTool;

#[async_trait]
impl ToolHandler for ListUserConfigsTool {
    async fn execute(
        &self,
        _args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let mut entries = ctx.settings.list().await?;
        if !entries.iter().any(|(k, _)| k == SCREENSHOT_STORAGE) {
            if let Some(value) = ctx.settings.get(SCREENSHOT_STORAGE).await? {
                entries.push((SCREENSHOT_STORAGE.to_string(), value));
                entries.sort();
            }
        }
        let message = if entries.is_empty() {
            "暂无配置".to_string()
        } else {
            entries
                .iter()
                .map(|(k, v)| format!("• {k} = {v}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let configs: Map<String, Value> = entries
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        Ok(ToolOutput::new(message, json!({ "configs": configs })))
    }
}

impl Tool for ListUserConfigsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "list_user_configs",
            "List the session's configuration options with effective values.",
        )
    }
}

pub struct DeleteUserConfigTool;

#[async_trait]
impl ToolHandler for DeleteUserConfigTool {
    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let parsed: OptionArgs = parse_args(args)?;
        let option = option_name(&parsed.option)?;
        let removed = ctx.settings.delete(&option).await?;
        let message = if removed {
            format!("已删除 {option}")
        } else {
            format!("{option} 未设置")
        };
        Ok(ToolOutput::new(
            message,
            json!({ "option": option, "removed": removed }),
        ))
    }
}

impl Tool for DeleteUserConfigTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "delete_user_config",
            "Remove a per-session configuration option so its default applies again.",
        )
        .param(option_param())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{MapSettings, args, context_with};

    #[tokio::test]
    async fn set_normalizes_storage_policy_aliases() {
        let settings = Arc::new(MapSettings::default());
        let ctx = context_with("s1", settings.clone());
        let out = SetUserConfigTool
            .execute(
                args(json!({"option": "Screenshot_Storage", "value": "database"})),
                ctx.clone(),
            )
            .await
            .expect("set");
        assert_eq!(out.payload["value"], "persisted-record");

        let got = GetUserConfigTool
            .execute(args(json!({"option": "screenshot_storage"})), ctx)
            .await
            .expect("get");
        assert_eq!(got.payload["value"], "persisted-record");
    }

    #[tokio::test]
    async fn set_rejects_unknown_storage_policy() {
        let ctx = context_with("s1", Arc::new(MapSettings::default()));
        let err = SetUserConfigTool
            .execute(
                args(json!({"option": "screenshot_storage", "value": "s3"})),
                ctx,
            )
            .await
            .expect_err("invalid");
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn get_falls_back_to_default() {
        let ctx = context_with("s1", Arc::new(MapSettings::default()));
        let out = GetUserConfigTool
            .execute(args(json!({"option": "screenshot_storage"})), ctx.clone())
            .await
            .expect("get");
        assert_eq!(out.payload["value"], "none");

        let unknown = GetUserConfigTool
            .execute(args(json!({"option": "nickname"})), ctx)
            .await
            .expect("get");
        assert!(unknown.payload["value"].is_null());
        assert_eq!(unknown.message, "nickname 未设置");
    }

    #[tokio::test]
    async fn list_includes_effective_defaults() {
        let settings = Arc::new(MapSettings::default());
        let ctx = context_with("s1", settings.clone());
        SetUserConfigTool
            .execute(args(json!({"option": "nickname", "value": " 小王 "})), ctx.clone())
            .await
            .expect("set");

        let out = ListUserConfigsTool
            .execute(Map::new(), ctx)
            .await
            .expect("list");
        assert_eq!(out.payload["configs"]["nickname"], "小王");
        assert_eq!(out.payload["configs"]["screenshot_storage"], "none");
        assert_eq!(out.message, "• nickname = 小王\n• screenshot_storage = none");
    }

    #[tokio::test]
    async fn delete_reports_whether_option_existed() {
        let settings = Arc::new(MapSettings::default());
        let ctx = context_with("s1", settings.clone());
        SetUserConfigTool
            .execute(
                args(json!({"option": "screenshot_storage", "value": "local"})),
                ctx.clone(),
            )
            .await
            .expect("set");

        let first = DeleteUserConfigTool
            .execute(args(json!({"option": "screenshot_storage"})), ctx.clone())
            .await
            .expect("delete");
        assert_eq!(first.payload["removed"], true);

        let second = DeleteUserConfigTool
            .execute(args(json!({"option": "screenshot_storage"})), ctx)
            .await
            .expect("delete");
        assert_eq!(second.payload["removed"], false);
    }

    #[tokio::test]
    async fn empty_option_is_rejected() {
        let ctx = context_with("s1", Arc::new(MapSettings::default()));
        let err = GetUserConfigTool
            .execute(args(json!({"option": "  "})), ctx)
            .await
            .expect_err("empty");
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }
}
