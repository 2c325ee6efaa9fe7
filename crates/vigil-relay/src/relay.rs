use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use vigil_core::errors::UpstreamError;
use vigil_core::frames::{OutboundFrame, ProgressFrame};
use vigil_core::steps::{ReasoningStep, UpstreamEvent};

use crate::client::{AgentUpstream, UpstreamRequest};

/// The receiving end of a turn's frames has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame sink closed")]
pub struct SinkClosed;

/// Destination for the frames of one turn, normally the client socket.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, frame: OutboundFrame) -> Result<(), SinkClosed>;
}

#[async_trait]
impl FrameSink for mpsc::Sender<OutboundFrame> {
    async fn send(&self, frame: OutboundFrame) -> Result<(), SinkClosed> {
        mpsc::Sender::send(self, frame).await.map_err(|_| SinkClosed)
    }
}

/// A completed agent turn.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayOutcome {
    pub content: String,
    /// Conversation title suggested by the agent, if any.
    pub title: Option<String>,
    /// Intermediate steps in upstream order, excluding the final answer.
    pub reasoning_steps: Vec<ReasoningStep>,
}

/// Runs one upstream turn and republishes it as client frames.
///
/// Progress frames are forwarded as they arrive. Every turn ends with exactly
/// one `Agent` frame (the first `final_response`, or an error description)
/// unless the turn was cancelled because the client left.
pub struct StreamRelay {
    upstream: Arc<dyn AgentUpstream>,
    turn_timeout: Duration,
}

impl StreamRelay {
    pub fn new(upstream: Arc<dyn AgentUpstream>, turn_timeout: Duration) -> Self {
        Self { upstream, turn_timeout }
    }

    #[instrument(skip_all, fields(thread_id = %request.thread_id))]
    pub async fn relay(
        &self,
        request: &UpstreamRequest,
        sink: &dyn FrameSink,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, UpstreamError> {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(UpstreamError::Cancelled),
            bounded = tokio::time::timeout(self.turn_timeout, self.forward(request, sink)) => {
                bounded.unwrap_or(Err(UpstreamError::Timeout(self.turn_timeout)))
            }
        };

        match result {
            Ok(outcome) => {
                let frame = OutboundFrame::Agent {
                    content: outcome.content.clone(),
                    reasoning_steps: outcome.reasoning_steps.clone(),
                };
                if sink.send(frame).await.is_err() {
                    tracing::debug!("client left before the final frame was delivered");
                }
                Ok(outcome)
            }
            Err(UpstreamError::Cancelled) => {
                tracing::debug!("turn cancelled");
                Err(UpstreamError::Cancelled)
            }
            Err(e) => {
                tracing::warn!(error = %e, error_kind = e.error_kind(), "agent turn failed");
                let frame = OutboundFrame::AgentError { message: e.user_message() };
                let _ = sink.send(frame).await;
                Err(e)
            }
        }
    }

    /// Forward progress until the first terminal event.
    async fn forward(
        &self,
        request: &UpstreamRequest,
        sink: &dyn FrameSink,
    ) -> Result<RelayOutcome, UpstreamError> {
        let mut events = self.upstream.open(request).await?;
        let mut trace = Vec::new();

        while let Some(item) = events.next().await {
            match item? {
                UpstreamEvent::Step(step) => {
                    sink.send(OutboundFrame::Progress(ProgressFrame::from(&step)))
                        .await
                        .map_err(|_| UpstreamError::Cancelled)?;
                    trace.push(step);
                }
                UpstreamEvent::Final { content, title } => {
                    return Ok(RelayOutcome {
                        content,
                        title,
                        reasoning_steps: trace,
                    });
                }
                UpstreamEvent::Error { message } => return Err(UpstreamError::Agent(message)),
            }
        }

        Err(UpstreamError::Incomplete)
    }
}
