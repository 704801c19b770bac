//! Fans inbound channel events out to concurrent runtime cycles.

use std::future::Future;
use std::sync::Arc;

use agent::{AgentRuntime, CycleReport, CycleState};
use proto::{AgentResponse, ChannelEvent};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Spawns one worker per inbound event. The runtime serializes workers that
/// share a session; different sessions proceed in parallel.
pub struct Dispatcher {
    runtime: Arc<AgentRuntime>,
    responses: mpsc::Sender<AgentResponse>,
}

impl Dispatcher {
    pub fn new(runtime: Arc<AgentRuntime>, responses: mpsc::Sender<AgentResponse>) -> Self {
        Self { runtime, responses }
    }

    /// Runs one event to completion and builds the outbound response.
    pub async fn handle(runtime: &AgentRuntime, event: ChannelEvent) -> AgentResponse {
        let report = runtime
            .run_cycle(&event.session_key, &event.text, event.attachments)
            .await;
        build_agent_response(event.channel_id, event.session_key, report)
    }

    /// Consumes events until the sender side closes or `shutdown` resolves,
    /// then waits for in-flight workers before returning.
    pub async fn run_until<F>(self, mut events: mpsc::Receiver<ChannelEvent>, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let mut workers = JoinSet::new();
        let mut accepted = 0usize;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                maybe = events.recv() => {
                    let Some(event) = maybe else {
                        debug!("Event channel closed");
                        break;
                    };
                    accepted += 1;
                    let runtime = Arc::clone(&self.runtime);
                    let responses = self.responses.clone();
                    workers.spawn(async move {
                        let resp = Self::handle(&runtime, event).await;
                        if responses.send(resp).await.is_err() {
                            warn!("Response channel closed, reply dropped");
                        }
                    });
                }
                Some(done) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = done {
                        warn!("Dispatch worker aborted: {e}");
                    }
                }
                _ = &mut shutdown => {
                    info!("Dispatcher stopping");
                    break;
                }
            }
        }

        let in_flight = workers.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight cycles");
        }
        while let Some(done) = workers.join_next().await {
            if let Err(e) = done {
                warn!("Dispatch worker aborted: {e}");
            }
        }
        accepted
    }

    /// Like [`Dispatcher::run_until`] without an external stop signal.
    pub async fn run(self, events: mpsc::Receiver<ChannelEvent>) -> usize {
        self.run_until(events, std::future::pending()).await
    }
}

fn build_agent_response(
    channel_id: proto::ChannelId,
    session_key: proto::SessionKey,
    report: CycleReport,
) -> AgentResponse {
    if report.state == CycleState::Failed {
        return AgentResponse::error(channel_id, session_key, report.reply);
    }
    AgentResponse::new(channel_id, session_key, report.reply).with_images(report.image_paths)
}
