use serde::{Deserialize, Serialize};

use crate::message::{ChannelId, SessionKey};

/// Inbound event from a channel adapter to the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEvent {
    /// Source channel identifier.
    pub channel_id: ChannelId,
    /// Conversation key the message belongs to.
    pub session_key: SessionKey,
    /// User text payload.
    pub text: String,
    /// Opaque attachments forwarded to tool handlers (photos, files).
    pub attachments: Option<serde_json::Value>,
}

impl ChannelEvent {
    /// Creates a new inbound event without attachments.
    pub fn new(channel_id: ChannelId, session_key: SessionKey, text: impl Into<String>) -> Self {
        Self {
            channel_id,
            session_key,
            text: text.into(),
            attachments: None,
        }
    }

    /// Attaches adapter-specific payloads.
    pub fn with_attachments(mut self, attachments: serde_json::Value) -> Self {
        self.attachments = Some(attachments);
        self
    }
}

/// Outbound response from the agent to a channel adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Target channel identifier.
    pub channel_id: ChannelId,
    /// Conversation key associated with this response.
    pub session_key: SessionKey,
    /// Response text payload.
    pub content: String,
    /// Local image files the adapter should upload alongside the text.
    #[serde(default)]
    pub image_paths: Vec<String>,
    /// Whether this response represents an error message.
    pub is_error: bool,
}

impl AgentResponse {
    /// Creates a normal (non-error) agent response.
    pub fn new(channel_id: ChannelId, session_key: SessionKey, content: impl Into<String>) -> Self {
        Self {
            channel_id,
            session_key,
            content: content.into(),
            image_paths: Vec::new(),
            is_error: false,
        }
    }

    /// Creates an error response.
    pub fn error(channel_id: ChannelId, session_key: SessionKey, error: impl Into<String>) -> Self {
        Self {
            channel_id,
            session_key,
            content: error.into(),
            image_paths: Vec::new(),
            is_error: true,
        }
    }

    /// Adds image attachments to the response.
    pub fn with_images(mut self, image_paths: Vec<String>) -> Self {
        self.image_paths = image_paths;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_event_new_initializes_without_attachments() {
        let channel_id = ChannelId::new("cli", "local");
        let key = SessionKey::from("s1");
        let event = ChannelEvent::new(channel_id.clone(), key.clone(), "hello");

        assert_eq!(event.channel_id, channel_id);
        assert_eq!(event.session_key, key);
        assert_eq!(event.text, "hello");
        assert_eq!(event.attachments, None);

        let event = event.with_attachments(serde_json::json!({"photo": "file-1"}));
        assert_eq!(event.attachments.expect("attachments")["photo"], "file-1");
    }

    #[test]
    fn agent_response_new_is_not_error() {
        let resp = AgentResponse::new(ChannelId::new("cli", "local"), SessionKey::from("s1"), "ok");
        assert_eq!(resp.content, "ok");
        assert!(resp.image_paths.is_empty());
        assert!(!resp.is_error);
    }

    #[test]
    fn agent_response_error_sets_flag_and_images_attach() {
        let resp = AgentResponse::error(ChannelId::from("cli:local"), SessionKey::from("s1"), "boom");
        assert!(resp.is_error);

        let resp = AgentResponse::new(ChannelId::from("cli:local"), SessionKey::from("s1"), "shot")
            .with_images(vec!["/tmp/a.png".to_string()]);
        assert_eq!(resp.image_paths, vec!["/tmp/a.png".to_string()]);
    }
}
