//! Per-call session context handed to every tool handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use proto::{SessionKey, ToolError};
use serde_json::Value;

/// Read/write access to one session's configuration options.
#[async_trait]
pub trait SessionSettings: Send + Sync {
    /// Returns the stored value, or the documented default when unset.
    async fn get(&self, option: &str) -> Result<Option<String>, ToolError>;
    /// Stores a value.
    async fn set(&self, option: &str, value: &str) -> Result<(), ToolError>;
    /// Lists explicitly stored options sorted by name.
    async fn list(&self) -> Result<Vec<(String, String)>, ToolError>;
    /// Removes an option, returning whether it existed.
    async fn delete(&self, option: &str) -> Result<bool, ToolError>;
}

/// Everything a handler may know about the conversation it serves.
#[derive(Clone)]
pub struct SessionContext {
    /// Conversation key of the current cycle.
    pub session_key: SessionKey,
    /// Wall-clock time at decision time, in the configured local offset.
    pub now: DateTime<FixedOffset>,
    /// Session option accessor backed by the memory store.
    pub settings: Arc<dyn SessionSettings>,
    /// Opaque attachments from the chat transport.
    pub attachments: Option<Value>,
}

impl SessionContext {
    pub fn new(
        session_key: SessionKey,
        now: DateTime<FixedOffset>,
        settings: Arc<dyn SessionSettings>,
    ) -> Self {
        Self {
            session_key,
            now,
            settings,
            attachments: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Option<Value>) -> Self {
        self.attachments = attachments;
        self
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_key", &self.session_key)
            .field("now", &self.now)
            .field("attachments", &self.attachments)
            .finish_non_exhaustive()
    }
}
