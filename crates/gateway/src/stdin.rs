//! Local stdin/stdout channel adapter.

use async_trait::async_trait;
use proto::{AgentResponse, ChannelError, ChannelEvent, ChannelId, SessionKey};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tracing::info;

use crate::adapter::ChannelAdapter;

const PROMPT: &str = "clerk> ";

/// Reads one message per line from stdin and prints replies to stdout.
pub struct StdinAdapter {
    channel_id: ChannelId,
    session_key: SessionKey,
    stdout: Mutex<tokio::io::Stdout>,
}

impl StdinAdapter {
    /// Creates an adapter with a random session key.
    pub fn new() -> Self {
        Self::with_session(SessionKey::new())
    }

    /// Creates an adapter bound to a fixed session key.
    pub fn with_session(session_key: SessionKey) -> Self {
        Self {
            channel_id: ChannelId::new("stdin", "local"),
            session_key,
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    async fn prompt(&self) -> Result<(), ChannelError> {
        let mut stdout = self.stdout.lock().await;
        stdout
            .write_all(PROMPT.as_bytes())
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    /// Publishes one event per non-empty line until EOF or a quit command.
    async fn pump<R>(&self, reader: R, tx: &mpsc::Sender<ChannelEvent>) -> Result<usize, ChannelError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut sent = 0;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?
        {
            let Some(line) = normalize_input_line(&line) else {
                self.prompt().await?;
                continue;
            };
            if is_quit_command(&line) {
                break;
            }
            let event = ChannelEvent::new(self.channel_id.clone(), self.session_key.clone(), line);
            tx.send(event).await.map_err(|_| ChannelError::Closed)?;
            sent += 1;
        }
        Ok(sent)
    }
}

impl Default for StdinAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for StdinAdapter {
    fn channel_id(&self) -> ChannelId {
        self.channel_id.clone()
    }

    async fn run(self, tx: mpsc::Sender<ChannelEvent>) -> Result<(), ChannelError> {
        info!(session = %self.session_key, "Stdin adapter started");
        self.prompt().await?;
        let sent = self.pump(BufReader::new(tokio::io::stdin()), &tx).await?;
        info!(messages = sent, "Stdin adapter stopped");
        Ok(())
    }

    async fn send_response(&self, resp: AgentResponse) -> Result<(), ChannelError> {
        let mut stdout = self.stdout.lock().await;
        stdout
            .write_all(format_prompted_response(&resp).as_bytes())
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }
}

/// Trims an input line and drops empty lines.
fn normalize_input_line(raw: &str) -> Option<String> {
    let line = raw.trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

fn is_quit_command(line: &str) -> bool {
    matches!(line, "/quit" | "/exit")
}

/// Reply text, attached image paths, then a fresh prompt.
fn format_prompted_response(resp: &AgentResponse) -> String {
    let prefix = if resp.is_error { "Error: " } else { "" };
    let mut out = format!("\n{prefix}{}\n", resp.content);
    for path in &resp.image_paths {
        out.push_str(&format!("[image] {path}\n"));
    }
    out.push('\n');
    out.push_str(PROMPT);
    out
}
