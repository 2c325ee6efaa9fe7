use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;
use serde::Serialize;
use tracing::instrument;

use vigil_core::errors::UpstreamError;
use vigil_core::ids::ThreadId;
use vigil_core::steps::UpstreamEvent;

use crate::sse::UpstreamStream;

const STREAM_PATH: &str = "/user_message/stream";

pub type UpstreamEvents = Pin<Box<dyn Stream<Item = Result<UpstreamEvent, UpstreamError>> + Send>>;

/// Body of one upstream turn.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpstreamRequest {
    pub query: String,
    pub thread_id: ThreadId,
}

/// Opens one streaming agent turn.
#[async_trait]
pub trait AgentUpstream: Send + Sync {
    async fn open(&self, request: &UpstreamRequest) -> Result<UpstreamEvents, UpstreamError>;
}

/// HTTP client for the agent service's streaming endpoint.
pub struct HttpAgentClient {
    client: Client,
    endpoint: String,
    idle_timeout: Duration,
}

impl HttpAgentClient {
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| UpstreamError::Network(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}{STREAM_PATH}", base_url.trim_end_matches('/')),
            idle_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AgentUpstream for HttpAgentClient {
    #[instrument(skip(self, request), fields(thread_id = %request.thread_id))]
    async fn open(&self, request: &UpstreamRequest) -> Result<UpstreamEvents, UpstreamError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status, body));
        }

        Ok(Box::pin(UpstreamStream::new(resp.bytes_stream(), self.idle_timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpAgentClient {
        HttpAgentClient::new(&server.uri(), Duration::from_secs(2), Duration::from_secs(5)).unwrap()
    }

    fn request() -> UpstreamRequest {
        UpstreamRequest {
            query: "show me fraud transactions from Japan".into(),
            thread_id: ThreadId::from_raw("user_7_abc"),
        }
    }

    #[test]
    fn endpoint_joins_base_url() {
        let c = HttpAgentClient::new(
            "http://agent:8001/",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
            .unwrap();
        assert_eq!(c.endpoint(), "http://agent:8001/user_message/stream");
    }

    #[tokio::test]
    async fn streams_events_from_agent_service() {
        let server = MockServer::start().await;
        let body = concat!(
            "event: token\ndata: {\"type\": \"tool_call\", \"tool_name\": \"sql\", \"message\": \"Querying\"}\n\n",
            "event: token\ndata: {\"type\": \"final_response\", \"content\": \"Here are 3\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/user_message/stream"))
            .and(header("accept", "text/event-stream"))
            .and(body_json(serde_json::json!({
                "query": "show me fraud transactions from Japan",
                "thread_id": "user_7_abc",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let events: Vec<_> = client(&server).open(&request()).await.unwrap().collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            Ok(UpstreamEvent::Step(s)) if s.tool_name.as_deref() == Some("sql")
        ));
        assert!(matches!(
            &events[1],
            Ok(UpstreamEvent::Final { content, .. }) if content == "Here are 3"
        ));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let result = client(&server).open(&request()).await;
        match result {
            Err(UpstreamError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            Err(other) => panic!("expected status error, got {other:?}"),
            Ok(_) => panic!("expected status error, got a stream"),
        }
    }

    #[tokio::test]
    async fn unreachable_service_is_a_network_error() {
        let c = HttpAgentClient::new(
            "http://127.0.0.1:9",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
            .unwrap();
        let result = c.open(&request()).await;
        assert!(matches!(result, Err(UpstreamError::Network(_))));
    }
}
