use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use vigil_core::errors::UpstreamError;
use vigil_core::steps::{ReasoningStep, StepKind, UpstreamEvent};

use crate::client::{AgentUpstream, UpstreamEvents, UpstreamRequest};

/// Pre-programmed upstream turns for deterministic testing.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield these items, then end the stream.
    Stream(Vec<Result<UpstreamEvent, UpstreamError>>),
    /// Fail the `open` call itself.
    Error(UpstreamError),
    /// Yield these items, then never yield again.
    Hang(Vec<UpstreamEvent>),
    /// Wait, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// One progress step per kind, then a final answer.
    pub fn steps_then_final(kinds: &[StepKind], content: &str) -> Self {
        let mut items: Vec<_> = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| {
                Ok(UpstreamEvent::Step(ReasoningStep::new(
                    *kind,
                    format!("step {i}"),
                )))
            })
            .collect();
        items.push(Ok(UpstreamEvent::Final {
            content: content.to_string(),
            title: None,
        }));
        Self::Stream(items)
    }

    pub fn answer(content: &str) -> Self {
        Self::steps_then_final(&[], content)
    }
}

/// Upstream that replays [`MockResponse`]s in order and records requests.
pub struct MockUpstream {
    responses: Vec<MockResponse>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<UpstreamRequest>>,
}

impl MockUpstream {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AgentUpstream for MockUpstream {
    async fn open(&self, request: &UpstreamRequest) -> Result<UpstreamEvents, UpstreamError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(response) = self.responses.get(idx) else {
            return Err(UpstreamError::Network(format!(
                "MockUpstream: no response configured for call {idx}"
            )));
        };

        let mut current = response.clone();
        loop {
            match current {
                MockResponse::Stream(items) => return Ok(Box::pin(stream::iter(items))),
                MockResponse::Error(e) => return Err(e),
                MockResponse::Hang(items) => {
                    let head = stream::iter(items.into_iter().map(Ok::<_, UpstreamError>));
                    return Ok(Box::pin(head.chain(stream::pending())));
                }
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}
