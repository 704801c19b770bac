use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone};
use proto::{SessionKey, ToolError, default_option_value};

use crate::context::{SessionContext, SessionSettings};

/// Map-backed settings for handler tests.
#[derive(Default)]
pub(crate) struct MapSettings {
    values: Mutex<BTreeMap<String, String>>,
}

#[async_trait]
impl SessionSettings for MapSettings {
    async fn get(&self, option: &str) -> Result<Option<String>, ToolError> {
        let values = self.values.lock().unwrap();
        Ok(values
            .get(option)
            .cloned()
            .or_else(|| default_option_value(option).map(str::to_string)))
    }

    async fn set(&self, option: &str, value: &str) -> Result<(), ToolError> {
        self.values
            .lock()
            .unwrap()
            .insert(option.to_string(), value.to_string());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, String)>, ToolError> {
        let values = self.values.lock().unwrap();
        Ok(values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn delete(&self, option: &str) -> Result<bool, ToolError> {
        Ok(self.values.lock().unwrap().remove(option).is_some())
    }
}

/// 2026-10-18 09:30:00 at UTC+8.
pub(crate) fn fixed_now() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(8 * 3600)
        .unwrap()
        .with_ymd_and_hms(2026, 10, 18, 9, 30, 0)
        .unwrap()
}

pub(crate) fn context(session: &str) -> SessionContext {
    SessionContext::new(
        SessionKey::from(session),
        fixed_now(),
        Arc::new(MapSettings::default()),
    )
}

pub(crate) fn context_with(session: &str, settings: Arc<MapSettings>) -> SessionContext {
    SessionContext::new(SessionKey::from(session), fixed_now(), settings)
}

pub(crate) fn args(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("test arguments must be an object"),
    }
}
