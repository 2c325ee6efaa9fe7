//! End-to-end tests against a bound gateway with a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use vigil_core::errors::UpstreamError;
use vigil_core::frames::WireFrame;
use vigil_core::ids::{ConversationId, ThreadId, UserId};
use vigil_core::steps::StepKind;
use vigil_relay::{AgentUpstream, HttpAgentClient, MockResponse, MockUpstream};
use vigil_server::{start, JwtVerifier, ServerConfig, ServerDeps, ServerHandle, SessionConfig};
use vigil_store::{CheckpointStore, ConversationStore, Database, MessageRole, SqliteCheckpointStore};

const SECRET: &str = "gateway-test-secret";
const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct Gateway {
    handle: ServerHandle,
    store: ConversationStore,
    checkpoints: Arc<SqliteCheckpointStore>,
}

impl Gateway {
    fn ws_url(&self, user_id: i64, token: &str, conversation_id: Option<i64>) -> String {
        let mut url = format!(
            "ws://127.0.0.1:{}/ws/agent/{user_id}?token={token}",
            self.handle.port
        );
        if let Some(id) = conversation_id {
            url.push_str(&format!("&conversation_id={id}"));
        }
        url
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.handle.port)
    }

    fn conversation_count(&self, user_id: i64) -> usize {
        self.store
            .conversations()
            .list_for_user(UserId::new(user_id), 100, 0)
            .unwrap()
            .len()
    }
}

async fn boot(upstream: Arc<dyn AgentUpstream>) -> Gateway {
    let store = ConversationStore::new(Database::in_memory().unwrap());
    let checkpoints = Arc::new(SqliteCheckpointStore::in_memory().unwrap());

    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        session: SessionConfig {
            heartbeat_interval: Duration::from_secs(30),
            max_send_queue: 64,
            initializing_indicator: true,
        },
        turn_timeout: Duration::from_secs(5),
        reconcile_interval: None,
    };
    let deps = ServerDeps {
        store: store.clone(),
        checkpoints: checkpoints.clone(),
        upstream,
        verifier: Arc::new(JwtVerifier::new(&SecretString::from(SECRET), 0)),
    };

    let handle = start(config, deps).await.unwrap();
    Gateway { handle, store, checkpoints }
}

async fn boot_mock(responses: Vec<MockResponse>) -> (Gateway, Arc<MockUpstream>) {
    let upstream = Arc::new(MockUpstream::new(responses));
    (boot(upstream.clone()).await, upstream)
}

fn token_for(user_id: i64) -> String {
    let claims = json!({ "id": user_id, "exp": chrono::Utc::now().timestamp() + 3600 });
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url))
        .await
        .expect("timeout connecting")
        .expect("connect failed");
    ws
}

async fn read_frame(ws: &mut WsStream) -> WireFrame {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream closed")
            .expect("ws error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => {}
        }
    }
}

/// Frames up to and including the turn's terminal `Agent` frame.
async fn read_turn(ws: &mut WsStream) -> Vec<WireFrame> {
    let mut frames = Vec::new();
    loop {
        let frame = read_frame(ws).await;
        let done = frame.frame_type == "Agent";
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

async fn read_close(ws: &mut WsStream) -> (u16, String) {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended without a close frame")
            .expect("ws error");
        if let Message::Close(Some(frame)) = msg {
            return (u16::from(frame.code), frame.reason.as_str().to_string());
        }
    }
}

/// Open a session and consume the handshake frames. Returns the new
/// conversation's id and thread when one was started.
async fn open_session(
    gw: &Gateway,
    user_id: i64,
    conversation_id: Option<i64>,
) -> (WsStream, Option<(ConversationId, ThreadId)>) {
    let mut ws = connect(&gw.ws_url(user_id, &token_for(user_id), conversation_id)).await;
    let auth = read_frame(&mut ws).await;
    assert_eq!(auth.frame_type, "auth_success");
    assert_eq!(
        auth.content.as_deref(),
        Some(format!("Successfully authenticated user {user_id}").as_str())
    );

    if conversation_id.is_some() {
        return (ws, None);
    }
    let started = read_frame(&mut ws).await;
    assert_eq!(started.frame_type, "conversation_started");
    let ids = (started.conversation_id.unwrap(), started.thread_id.unwrap());
    (ws, Some(ids))
}

async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(Message::text(text.to_string())).await.unwrap();
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn progress_types(frames: &[WireFrame]) -> Vec<&str> {
    frames
        .iter()
        .filter(|f| f.frame_type == "progress")
        .filter_map(|f| f.progress_type.as_deref())
        .collect()
}

// ── Authentication ──

#[tokio::test]
async fn invalid_token_closes_with_4001_and_creates_nothing() {
    let (gw, upstream) = boot_mock(vec![]).await;

    let mut ws = connect(&gw.ws_url(7, "not-a-token", None)).await;
    let (code, reason) = read_close(&mut ws).await;
    assert_eq!(code, 4001);
    assert!(reason.starts_with("Unauthorized"));

    assert_eq!(gw.conversation_count(7), 0);
    assert_eq!(gw.handle.active_connections(), 0);
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn token_for_another_user_closes_with_4001() {
    let (gw, _) = boot_mock(vec![]).await;

    let mut ws = connect(&gw.ws_url(7, &token_for(8), None)).await;
    let (code, reason) = read_close(&mut ws).await;
    assert_eq!(code, 4001);
    assert_eq!(reason, "Unauthorized: User ID mismatch");
    assert_eq!(gw.conversation_count(7), 0);
    assert_eq!(gw.conversation_count(8), 0);
}

#[tokio::test]
async fn missing_token_closes_with_4001() {
    let (gw, _) = boot_mock(vec![]).await;
    let url = format!("ws://127.0.0.1:{}/ws/agent/7", gw.handle.port);

    let mut ws = connect(&url).await;
    let (code, _) = read_close(&mut ws).await;
    assert_eq!(code, 4001);
}

// ── Turns ──

#[tokio::test]
async fn fraud_question_round_trip_over_http_upstream() {
    let agent = wiremock::MockServer::start().await;
    let body = [
        r#"{"type":"tool_call","message":"Querying transactions","tool_name":"sql_query","tool_args":{"country":"JP"}}"#,
        r#"{"type":"tool_result","message":"3 rows"}"#,
        r#"{"type":"final_response","content":"Here are 3 fraudulent transactions..."}"#,
    ]
    .iter()
    .map(|data| format!("event: token\ndata: {data}\n\n"))
    .collect::<String>();
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/user_message/stream"))
        .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&agent)
        .await;

    let client =
        HttpAgentClient::new(&agent.uri(), Duration::from_secs(2), Duration::from_secs(2))
            .unwrap();
    let gw = boot(Arc::new(client)).await;

    let (mut ws, started) = open_session(&gw, 7, None).await;
    let (conversation_id, thread_id) = started.unwrap();
    assert!(thread_id.as_str().starts_with("user_7_"));

    send_text(&mut ws, "show me fraud transactions from Japan").await;
    let frames = read_turn(&mut ws).await;

    assert_eq!(frames[0].frame_type, "User");
    assert_eq!(frames[0].content.as_deref(), Some("show me fraud transactions from Japan"));
    assert_eq!(progress_types(&frames), vec!["initializing", "tool_call", "tool_result"]);
    assert_eq!(frames[2].tool_name.as_deref(), Some("sql_query"));
    assert_eq!(frames[2].content.as_deref(), Some("Querying transactions"));

    let last = frames.last().unwrap();
    assert_eq!(last.content.as_deref(), Some("Here are 3 fraudulent transactions..."));
    assert_eq!(last.error, None);
    assert_eq!(last.reasoning_steps.as_ref().map(Vec::len), Some(2));

    let requests = agent.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["query"], "show me fraud transactions from Japan");
    assert_eq!(sent["thread_id"], thread_id.as_str());

    let store = gw.store.clone();
    eventually("both messages persisted", || {
        store.conversations().get(conversation_id).unwrap().total_messages == 2
    })
    .await;
    eventually("title generated", || {
        store.conversations().get(conversation_id).unwrap().title.as_deref()
            == Some("show me fraud transactions from Japan")
    })
    .await;

    let messages = gw.store.messages().list(conversation_id).unwrap();
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[1].role, MessageRole::Agent);
    assert_eq!(messages[1].reasoning_steps.as_ref().map(Vec::len), Some(2));
}

#[tokio::test]
async fn upstream_503_only_fails_its_own_turn() {
    let (gw, upstream) = boot_mock(vec![
        MockResponse::steps_then_final(&[StepKind::ToolCall], "first answer"),
        MockResponse::Error(UpstreamError::from_status(503, "unavailable".into())),
        MockResponse::answer("third answer"),
    ])
    .await;
    let (mut ws, started) = open_session(&gw, 7, None).await;
    let (conversation_id, _) = started.unwrap();

    send_text(&mut ws, "turn one").await;
    let one = read_turn(&mut ws).await;
    assert_eq!(one.last().unwrap().content.as_deref(), Some("first answer"));

    send_text(&mut ws, "turn two").await;
    let two = read_turn(&mut ws).await;
    let failed = two.last().unwrap();
    assert_eq!(failed.error, Some(true));
    assert_eq!(failed.content.as_deref(), Some("Agent service error: 503"));
    assert_eq!(two.iter().filter(|f| f.frame_type == "Agent").count(), 1);

    send_text(&mut ws, "turn three").await;
    let three = read_turn(&mut ws).await;
    assert_eq!(three.last().unwrap().content.as_deref(), Some("third answer"));
    assert_eq!(three.last().unwrap().error, None);

    let store = gw.store.clone();
    eventually("five messages persisted", || {
        store.conversations().get(conversation_id).unwrap().total_messages == 5
    })
    .await;
    let transcript: Vec<(MessageRole, String)> = gw
        .store
        .messages()
        .list(conversation_id)
        .unwrap()
        .into_iter()
        .map(|m| (m.role, m.content))
        .collect();
    assert_eq!(
        transcript,
        vec![
            (MessageRole::User, "turn one".to_string()),
            (MessageRole::Agent, "first answer".to_string()),
            (MessageRole::User, "turn two".to_string()),
            (MessageRole::User, "turn three".to_string()),
            (MessageRole::Agent, "third answer".to_string()),
        ]
    );
    assert_eq!(upstream.call_count(), 3);
}

#[tokio::test]
async fn duplicate_final_yields_one_agent_frame() {
    use vigil_core::steps::UpstreamEvent;
    let (gw, _) = boot_mock(vec![
        MockResponse::Stream(vec![
            Ok(UpstreamEvent::Final { content: "first".into(), title: None }),
            Ok(UpstreamEvent::Final { content: "second".into(), title: None }),
        ]),
        MockResponse::answer("next"),
    ])
    .await;
    let (mut ws, _) = open_session(&gw, 7, None).await;

    send_text(&mut ws, "hello").await;
    let frames = read_turn(&mut ws).await;
    assert_eq!(frames.last().unwrap().content.as_deref(), Some("first"));

    // the next frame belongs to the next turn, not a second final
    send_text(&mut ws, "again").await;
    let next = read_frame(&mut ws).await;
    assert_eq!(next.frame_type, "User");
    assert_eq!(next.content.as_deref(), Some("again"));
}

#[tokio::test]
async fn json_frames_are_accepted() {
    let (gw, upstream) = boot_mock(vec![MockResponse::answer("ok")]).await;
    let (mut ws, started) = open_session(&gw, 7, None).await;
    let (_, thread_id) = started.unwrap();

    send_text(&mut ws, r#"{"content":"structured question"}"#).await;
    let frames = read_turn(&mut ws).await;
    assert_eq!(frames[0].content.as_deref(), Some("structured question"));
    assert_eq!(upstream.requests()[0].query, "structured question");
    assert_eq!(upstream.requests()[0].thread_id, thread_id);
}

// ── Resolution ──

#[tokio::test]
async fn resume_reuses_the_stored_thread() {
    let (gw, upstream) = boot_mock(vec![MockResponse::answer("welcome back")]).await;
    let thread = ThreadId::from_raw("user_7_existing");
    let existing = gw
        .store
        .conversations()
        .create(UserId::new(7), &thread, Some("Earlier"))
        .unwrap();

    let (mut ws, started) = open_session(&gw, 7, Some(existing.id.get())).await;
    assert!(started.is_none());

    send_text(&mut ws, "continue").await;
    let frames = read_turn(&mut ws).await;
    assert_eq!(frames.last().unwrap().content.as_deref(), Some("welcome back"));
    assert_eq!(upstream.requests()[0].thread_id, thread);
    assert_eq!(gw.conversation_count(7), 1);

    // resumed conversations keep their title
    let store = gw.store.clone();
    eventually("turn persisted", || {
        store.conversations().get(existing.id).unwrap().total_messages == 2
    })
    .await;
    assert_eq!(
        gw.store.conversations().get(existing.id).unwrap().title.as_deref(),
        Some("Earlier")
    );
}

#[tokio::test]
async fn unknown_conversation_closes_with_4004() {
    let (gw, _) = boot_mock(vec![]).await;
    let mut ws = connect(&gw.ws_url(7, &token_for(7), Some(999))).await;

    let auth = read_frame(&mut ws).await;
    assert_eq!(auth.frame_type, "auth_success");
    let (code, _) = read_close(&mut ws).await;
    assert_eq!(code, 4004);
    assert_eq!(gw.conversation_count(7), 0);
}

#[tokio::test]
async fn foreign_conversation_closes_with_4004() {
    let (gw, _) = boot_mock(vec![]).await;
    let theirs = gw
        .store
        .conversations()
        .create(UserId::new(8), &ThreadId::from_raw("user_8_a"), None)
        .unwrap();

    let mut ws = connect(&gw.ws_url(7, &token_for(7), Some(theirs.id.get()))).await;
    read_frame(&mut ws).await;
    let (code, _) = read_close(&mut ws).await;
    assert_eq!(code, 4004);
}

#[tokio::test]
async fn per_message_override_failure_keeps_the_session() {
    let (gw, upstream) = boot_mock(vec![MockResponse::answer("fine")]).await;
    let (mut ws, _) = open_session(&gw, 7, None).await;

    send_text(&mut ws, r#"{"content":"hi","conversation_id":4242}"#).await;
    let failed = read_turn(&mut ws).await;
    assert_eq!(failed.last().unwrap().error, Some(true));
    assert_eq!(upstream.call_count(), 0);

    send_text(&mut ws, r#"{"content":"hi","thread_id":"user_8_not_mine"}"#).await;
    let failed = read_turn(&mut ws).await;
    assert_eq!(failed.last().unwrap().error, Some(true));

    send_text(&mut ws, "hi").await;
    let ok = read_turn(&mut ws).await;
    assert_eq!(ok.last().unwrap().content.as_deref(), Some("fine"));
    assert_eq!(upstream.call_count(), 1);
}

#[tokio::test]
async fn per_message_override_targets_owned_conversation() {
    let (gw, upstream) = boot_mock(vec![MockResponse::answer("routed")]).await;
    let other = gw
        .store
        .conversations()
        .create(UserId::new(7), &ThreadId::from_raw("user_7_other"), Some("Other"))
        .unwrap();
    let (mut ws, _) = open_session(&gw, 7, None).await;

    let frame = format!(r#"{{"content":"over here","conversation_id":{}}}"#, other.id);
    send_text(&mut ws, &frame).await;
    read_turn(&mut ws).await;
    assert_eq!(upstream.requests()[0].thread_id, ThreadId::from_raw("user_7_other"));

    let store = gw.store.clone();
    let other_id = other.id;
    eventually("override turn persisted", || {
        store.conversations().get(other_id).unwrap().total_messages == 2
    })
    .await;
}

#[tokio::test]
async fn string_conversation_id_routes_and_malformed_frames_are_refused() {
    let (gw, upstream) = boot_mock(vec![MockResponse::answer("routed")]).await;
    let other = gw
        .store
        .conversations()
        .create(UserId::new(7), &ThreadId::from_raw("user_7_other"), Some("Other"))
        .unwrap();
    let (mut ws, _) = open_session(&gw, 7, None).await;

    send_text(&mut ws, r#"{"content":42}"#).await;
    let refused = read_turn(&mut ws).await;
    assert_eq!(refused[0].frame_type, "User");
    let last = refused.last().unwrap();
    assert_eq!(last.error, Some(true));
    assert!(last.content.as_deref().unwrap().starts_with("Unable to read message"));
    assert_eq!(upstream.call_count(), 0);

    let frame = format!(r#"{{"content":"over here","conversation_id":"{}"}}"#, other.id);
    send_text(&mut ws, &frame).await;
    let turn = read_turn(&mut ws).await;
    assert_eq!(turn[0].content.as_deref(), Some("over here"));
    assert_eq!(turn.last().unwrap().content.as_deref(), Some("routed"));
    assert_eq!(upstream.requests()[0].thread_id, ThreadId::from_raw("user_7_other"));
    assert_eq!(upstream.requests()[0].query, "over here");
}

// ── Lifecycle ──

#[tokio::test]
async fn disconnect_cancels_the_turn_and_unregisters() {
    use vigil_core::steps::{ReasoningStep, UpstreamEvent};
    let (gw, _) = boot_mock(vec![MockResponse::Hang(vec![UpstreamEvent::Step(
        ReasoningStep::new(StepKind::AgentThinking, "thinking"),
    )])])
    .await;
    let (mut ws, started) = open_session(&gw, 7, None).await;
    let (conversation_id, _) = started.unwrap();
    assert_eq!(gw.handle.active_connections(), 1);

    send_text(&mut ws, "long question").await;
    loop {
        let frame = read_frame(&mut ws).await;
        if frame.progress_type.as_deref() == Some("agent_thinking") {
            break;
        }
    }
    ws.close(None).await.unwrap();
    drop(ws);

    let handle = &gw.handle;
    eventually("session unregistered", || handle.active_connections() == 0).await;
    // only the user message; the cancelled turn persists no agent reply
    assert_eq!(gw.store.messages().count(conversation_id).unwrap(), 1);
}

#[tokio::test]
async fn disconnect_is_seen_while_the_inbound_queue_is_full() {
    use vigil_core::steps::{ReasoningStep, UpstreamEvent};
    use vigil_server::session::QUEUE_FULL_MESSAGE;

    let (gw, _) = boot_mock(vec![MockResponse::Hang(vec![UpstreamEvent::Step(
        ReasoningStep::new(StepKind::AgentThinking, "thinking"),
    )])])
    .await;
    let (mut ws, _) = open_session(&gw, 7, None).await;

    send_text(&mut ws, "long question").await;
    loop {
        let frame = read_frame(&mut ws).await;
        if frame.progress_type.as_deref() == Some("agent_thinking") {
            break;
        }
    }

    // one turn in flight, more backlog than the queue holds
    for i in 0..40 {
        send_text(&mut ws, &format!("follow-up {i}")).await;
    }
    let refused = read_frame(&mut ws).await;
    assert_eq!(refused.frame_type, "Agent");
    assert_eq!(refused.error, Some(true));
    assert_eq!(refused.content.as_deref(), Some(QUEUE_FULL_MESSAGE));

    ws.close(None).await.unwrap();
    drop(ws);

    // well inside the 5s turn timeout: the hung turn was cancelled by the close
    let handle = &gw.handle;
    timeout(
        Duration::from_secs(1),
        eventually("session unregistered", || handle.active_connections() == 0),
    )
    .await
    .expect("disconnect not noticed behind a full queue");
}

#[tokio::test]
async fn health_reports_active_connections() {
    let (gw, _) = boot_mock(vec![]).await;
    let (_ws, _) = open_session(&gw, 7, None).await;

    let body: Value = reqwest::get(gw.http_url("/health")).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "OK");
    assert_eq!(body["active_connections"], 1);
}

// ── REST ──

#[tokio::test]
async fn rest_create_list_and_read_messages() {
    let (gw, _) = boot_mock(vec![]).await;
    let client = reqwest::Client::new();
    let auth = format!("Bearer {}", token_for(7));

    let created: Value = client
        .post(gw.http_url("/chat/7"))
        .header("Authorization", &auth)
        .json(&json!({ "title": "Japan review" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["title"], "Japan review");
    assert!(created["thread_id"].as_str().unwrap().starts_with("user_7_"));
    let id = ConversationId::new(created["id"].as_i64().unwrap());

    gw.store.messages().append(id, MessageRole::User, "q", None).unwrap();

    let listed: Value = client
        .get(gw.http_url("/chat/7"))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let messages: Value = client
        .get(gw.http_url(&format!("/chat/7/{id}/messages")))
        .header("Authorization", &auth)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(messages[0]["content"], "q");
    assert_eq!(messages[0]["role"], "user");
}

#[tokio::test]
async fn rest_routes_enforce_ownership() {
    let (gw, _) = boot_mock(vec![]).await;
    let client = reqwest::Client::new();
    let mine = gw
        .store
        .conversations()
        .create(UserId::new(7), &ThreadId::from_raw("user_7_a"), None)
        .unwrap();

    // token for 8 on user 7's path
    let resp = client
        .get(gw.http_url("/chat/7"))
        .header("Authorization", format!("Bearer {}", token_for(8)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // user 8 asking for user 7's conversation on their own path
    let resp = client
        .get(gw.http_url(&format!("/chat/8/{}", mine.id)))
        .header("Authorization", format!("Bearer {}", token_for(8)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .get(gw.http_url("/chat/7/999"))
        .header("Authorization", format!("Bearer {}", token_for(7)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn rest_delete_cascades_to_checkpoints() {
    let (gw, _) = boot_mock(vec![]).await;
    let client = reqwest::Client::new();
    let thread = ThreadId::from_raw("user_7_doomed");
    let conv = gw
        .store
        .conversations()
        .create(UserId::new(7), &thread, None)
        .unwrap();
    gw.store.messages().append(conv.id, MessageRole::User, "q", None).unwrap();
    gw.store.messages().append(conv.id, MessageRole::Agent, "a", None).unwrap();
    gw.checkpoints.insert_checkpoint(&thread, "cp1").unwrap();

    let forbidden = client
        .delete(gw.http_url(&format!("/chat/8/{}", conv.id)))
        .header("Authorization", format!("Bearer {}", token_for(8)))
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);

    let resp = client
        .delete(gw.http_url(&format!("/chat/7/{}", conv.id)))
        .header("Authorization", format!("Bearer {}", token_for(7)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["messages_deleted"], 2);
    assert_eq!(body["checkpoints_cleaned"], true);
    assert_eq!(body["thread_id"], "user_7_doomed");

    assert_eq!(gw.store.messages().count(conv.id).unwrap(), 0);
    assert!(gw.checkpoints.thread_ids().await.unwrap().is_empty());

    let again = client
        .delete(gw.http_url(&format!("/chat/7/{}", conv.id)))
        .header("Authorization", format!("Bearer {}", token_for(7)))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}
