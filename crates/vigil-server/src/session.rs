//! One WebSocket connection, from authenticated upgrade to close.
//!
//! `Connecting -> Authenticating -> Resolving -> Active -> Closed`. The token
//! is checked before the upgrade, so a session only starts for a verified
//! user. Resolving binds the socket to a conversation, then every text frame
//! is one turn, and turns never overlap.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use vigil_core::errors::{AuthError, UpstreamError};
use vigil_core::frames::{OutboundFrame, ProgressFrame};
use vigil_core::ids::{ConnectionId, ConversationId, ThreadId, UserId};
use vigil_relay::{StreamRelay, UpstreamRequest};
use vigil_store::{ConversationStore, MessageRole};

use crate::coordinator::{ConversationCoordinator, CoordinatorError, Resolved, PLACEHOLDER_TITLE};
use crate::registry::ConnectionRegistry;
use crate::server::parse_conversation_param;

pub const CLOSE_UNAUTHORIZED: u16 = 4001;
pub const CLOSE_NOT_FOUND: u16 = 4004;

/// WebSocket close reasons are capped at 123 bytes.
const MAX_CLOSE_REASON: usize = 123;
const INBOUND_QUEUE: usize = 32;
pub const QUEUE_FULL_MESSAGE: &str =
    "Too many messages are waiting for an answer; this one was not processed.";
const TITLE_MAX_WORDS: usize = 6;
const TITLE_MAX_CHARS: usize = 60;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub max_send_queue: usize,
    pub initializing_indicator: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_send_queue: 256,
            initializing_indicator: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Resolving,
    Active,
    Closed,
}

/// A client text frame: raw text, or `{content, conversation_id?, thread_id?}`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InboundMessage {
    pub content: String,
    pub conversation_id: Option<ConversationId>,
    pub thread_id: Option<ThreadId>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InboundError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("{0}")]
    BadConversationId(String),
}

/// Browser clients send the conversation id as a number or as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdField {
    Number(i64),
    Text(String),
}

#[derive(Deserialize)]
struct InboundJson {
    content: Option<String>,
    conversation_id: Option<IdField>,
    thread_id: Option<String>,
}

impl InboundMessage {
    /// Anything that is not a JSON object is the message text itself. An
    /// object must have well-typed fields.
    pub fn parse(raw: &str) -> Result<Self, InboundError> {
        let value = match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value @ serde_json::Value::Object(_)) => value,
            _ => {
                return Ok(Self {
                    content: raw.to_string(),
                    ..Self::default()
                })
            }
        };

        let json: InboundJson =
            serde_json::from_value(value).map_err(|e| InboundError::Malformed(e.to_string()))?;
        let conversation_id = match json.conversation_id {
            None => None,
            Some(IdField::Number(n)) => Some(ConversationId::new(n)),
            Some(IdField::Text(text)) => {
                parse_conversation_param(Some(&text)).map_err(InboundError::BadConversationId)?
            }
        };

        Ok(Self {
            content: json.content.unwrap_or_else(|| raw.to_string()),
            conversation_id,
            thread_id: json.thread_id.filter(|t| !t.is_empty()).map(ThreadId::from_raw),
        })
    }
}

/// Title for a fresh conversation: the agent's own suggestion if it sent one,
/// else the opening words of the first message.
pub fn derive_title(generated: Option<&str>, first_message: &str) -> String {
    if let Some(title) = generated.map(str::trim).filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    let words: Vec<&str> = first_message.split_whitespace().take(TITLE_MAX_WORDS).collect();
    let condensed: String = words.join(" ").chars().take(TITLE_MAX_CHARS).collect();
    let condensed = condensed.trim_end();
    if condensed.is_empty() {
        PLACEHOLDER_TITLE.to_string()
    } else {
        condensed.to_string()
    }
}

fn close_frame(code: u16, reason: &str) -> Message {
    let mut end = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    Message::Close(Some(CloseFrame {
        code,
        reason: reason[..end].to_string().into(),
    }))
}

/// Close a freshly upgraded socket whose token was rejected.
pub async fn reject(socket: WebSocket, error: &AuthError) {
    close_with(socket, CLOSE_UNAUTHORIZED, &error.close_reason()).await;
}

/// Close a socket that never became a session.
pub async fn close_with(mut socket: WebSocket, code: u16, reason: &str) {
    debug!(code, reason, "closing socket before session start");
    let _ = socket.send(close_frame(code, reason)).await;
}

/// Per-connection bookkeeping once the conversation is known.
struct Session {
    user_id: UserId,
    current: Resolved,
    /// Conversations created by this session that still carry the placeholder title.
    untitled: HashSet<ConversationId>,
}

pub struct SessionHandler {
    coordinator: ConversationCoordinator,
    store: ConversationStore,
    relay: Arc<StreamRelay>,
    registry: Arc<ConnectionRegistry>,
    config: SessionConfig,
}

impl SessionHandler {
    pub fn new(
        coordinator: ConversationCoordinator,
        store: ConversationStore,
        relay: Arc<StreamRelay>,
        registry: Arc<ConnectionRegistry>,
        config: SessionConfig,
    ) -> Self {
        Self {
            coordinator,
            store,
            relay,
            registry,
            config,
        }
    }

    /// Drive an authenticated socket until either side closes it.
    #[instrument(skip_all, fields(user_id = %user_id, connection_id = tracing::field::Empty))]
    pub async fn run(&self, socket: WebSocket, user_id: UserId, requested: Option<ConversationId>) {
        let mut state = SessionState::Connecting;
        transition(&mut state, SessionState::Authenticating);

        let connection_id = self.registry.register(user_id);
        tracing::Span::current().record("connection_id", tracing::field::display(&connection_id));
        info!("client connected");

        let (ws_tx, ws_rx) = socket.split();
        let cancel = CancellationToken::new();
        let (frame_tx, frame_rx) =
            mpsc::channel::<OutboundFrame>(self.config.max_send_queue.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_QUEUE);

        let writer = tokio::spawn(write_frames(
            ws_tx,
            frame_rx,
            self.config.heartbeat_interval,
            cancel.clone(),
        ));
        let reader = tokio::spawn(read_frames(ws_rx, inbound_tx, frame_tx.clone(), cancel.clone()));

        let (code, reason) = self
            .drive(&mut state, user_id, &connection_id, requested, &frame_tx, inbound_rx, &cancel)
            .await;

        transition(&mut state, SessionState::Closed);
        drop(frame_tx);
        cancel.cancel();
        let _ = reader.await;
        if let Ok(mut ws_tx) = writer.await {
            let _ = ws_tx.send(close_frame(code, reason)).await;
        }

        let connected_secs = self
            .registry
            .unregister(&connection_id)
            .map(|info| (Utc::now() - info.connected_at).num_seconds());
        info!(close_code = code, connected_secs, "client disconnected");
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        state: &mut SessionState,
        user_id: UserId,
        connection_id: &ConnectionId,
        requested: Option<ConversationId>,
        frames: &mpsc::Sender<OutboundFrame>,
        mut inbound: mpsc::Receiver<String>,
        cancel: &CancellationToken,
    ) -> (u16, &'static str) {
        if frames.send(OutboundFrame::AuthSuccess { user_id }).await.is_err() {
            return (close_code::NORMAL, "");
        }

        transition(state, SessionState::Resolving);
        let current = match self.coordinator.resolve(user_id, requested, None) {
            Ok(resolved) => resolved,
            Err(e) if e.is_not_found() => {
                warn!(error = %e, "handshake named an unknown conversation");
                return (CLOSE_NOT_FOUND, "Conversation not found");
            }
            Err(e) => {
                error!(error = %e, "failed to resolve conversation");
                return (close_code::ERROR, "Internal error");
            }
        };

        self.registry.bind_conversation(connection_id, current.conversation_id);
        let mut session = Session {
            user_id,
            untitled: HashSet::new(),
            current,
        };
        if session.current.is_new {
            session.untitled.insert(session.current.conversation_id);
            let started = OutboundFrame::ConversationStarted {
                conversation_id: session.current.conversation_id,
                thread_id: session.current.thread_id.clone(),
            };
            if frames.send(started).await.is_err() {
                return (close_code::NORMAL, "");
            }
        }

        transition(state, SessionState::Active);
        loop {
            let text = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = inbound.recv() => match next {
                    Some(text) => text,
                    None => break,
                },
            };
            self.run_turn(&mut session, &text, frames, cancel).await;
        }

        (close_code::NORMAL, "")
    }

    #[instrument(skip_all)]
    async fn run_turn(
        &self,
        session: &mut Session,
        raw: &str,
        frames: &mpsc::Sender<OutboundFrame>,
        cancel: &CancellationToken,
    ) {
        let inbound = match InboundMessage::parse(raw) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "refusing client frame");
                let echo = OutboundFrame::User { content: raw.to_string() };
                if frames.send(echo).await.is_ok() {
                    let message = format!("Unable to read message: {e}.");
                    let _ = frames.send(OutboundFrame::AgentError { message }).await;
                }
                return;
            }
        };
        if frames
            .send(OutboundFrame::User { content: inbound.content.clone() })
            .await
            .is_err()
        {
            return;
        }

        if inbound.content.trim().is_empty() {
            let _ = frames
                .send(OutboundFrame::AgentError { message: "Message content is empty.".into() })
                .await;
            return;
        }

        let target = match self.target_for(session, &inbound) {
            Ok(target) => target,
            Err(e) => {
                let message = if e.is_not_found() {
                    warn!(error = %e, "message named an unknown conversation");
                    format!("Unable to continue: {e}.")
                } else {
                    error!(error = %e, "failed to resolve conversation");
                    "Internal error while loading the conversation.".to_string()
                };
                let _ = frames.send(OutboundFrame::AgentError { message }).await;
                return;
            }
        };
        let conversation_id = target.conversation_id;

        if let Err(e) = self
            .store
            .messages()
            .append(conversation_id, MessageRole::User, &inbound.content, None)
        {
            error!(
                conversation_id = %conversation_id,
                error = %e,
                "failed to persist user message"
            );
        }

        if self.config.initializing_indicator
            && frames.send(OutboundFrame::Progress(ProgressFrame::initializing())).await.is_err()
        {
            return;
        }

        let request = UpstreamRequest {
            query: inbound.content.clone(),
            thread_id: target.thread_id,
        };
        match self.relay.relay(&request, frames, cancel).await {
            Ok(outcome) => {
                let steps = (!outcome.reasoning_steps.is_empty())
                    .then_some(outcome.reasoning_steps.as_slice());
                if let Err(e) = self
                    .store
                    .messages()
                    .append(conversation_id, MessageRole::Agent, &outcome.content, steps)
                {
                    error!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "failed to persist agent message"
                    );
                }

                if session.untitled.remove(&conversation_id) {
                    let title = derive_title(outcome.title.as_deref(), &inbound.content);
                    let stored = self.store.conversations().update_title(conversation_id, &title);
                    if let Err(e) = stored {
                        error!(
                            conversation_id = %conversation_id,
                            error = %e,
                            "failed to store title"
                        );
                    }
                }
            }
            Err(UpstreamError::Cancelled) => return,
            Err(e) => {
                debug!(
                    conversation_id = %conversation_id,
                    error_kind = e.error_kind(),
                    "turn ended without an answer"
                );
            }
        }

        if let Err(e) = self.store.conversations().touch(conversation_id) {
            error!(
                conversation_id = %conversation_id,
                error = %e,
                "failed to update conversation activity"
            );
        }
    }

    /// Conversation a message targets: its own override, else the socket's.
    fn target_for(
        &self,
        session: &Session,
        inbound: &InboundMessage,
    ) -> Result<Resolved, CoordinatorError> {
        if let Some(id) = inbound.conversation_id {
            return self.coordinator.resolve(session.user_id, Some(id), None);
        }
        if let Some(thread_id) = &inbound.thread_id {
            return self.coordinator.resolve_thread(session.user_id, thread_id);
        }
        Ok(session.current.clone())
    }
}

fn transition(state: &mut SessionState, next: SessionState) {
    debug!(from = ?*state, to = ?next, "session state");
    *state = next;
}

/// Serialize queued frames onto the socket and keep it alive with pings.
/// Returns the sink once the queue closes so the caller can send a close frame.
async fn write_frames(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<OutboundFrame>,
    heartbeat: Duration,
    cancel: CancellationToken,
) -> SplitSink<WebSocket, Message> {
    let mut ping_interval = tokio::time::interval(heartbeat.max(Duration::from_secs(1)));
    ping_interval.tick().await;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let Some(text) = frame.encode() else {
                    warn!(frame_type = frame.frame_type(), "failed to encode frame");
                    continue;
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    cancel.cancel();
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    cancel.cancel();
                    break;
                }
                tracing::trace!("sent ping");
            }
        }
    }
    ws_tx
}

enum Incoming {
    Text(String),
    Ignored,
    Gone,
}

fn classify(msg: Option<Result<Message, axum::Error>>) -> Incoming {
    match msg {
        Some(Ok(Message::Text(text))) => Incoming::Text(text.to_string()),
        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Incoming::Text(text),
            Err(_) => {
                debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                Incoming::Ignored
            }
        },
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => Incoming::Ignored,
        Some(Ok(Message::Close(_))) | None => Incoming::Gone,
        Some(Err(e)) => {
            debug!(error = %e, "socket read failed");
            Incoming::Gone
        }
    }
}

/// Forward client text frames to the turn loop. Cancels the session when the
/// client goes away.
///
/// The socket is read even while the turn loop is busy and the inbound queue
/// is full, so a close is noticed at once. Frames arriving in that window are
/// refused with an error frame.
async fn read_frames(
    mut ws_rx: SplitStream<WebSocket>,
    inbound: mpsc::Sender<String>,
    frames: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
) {
    'read: loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => return,
            msg = ws_rx.next() => msg,
        };
        let text = match classify(msg) {
            Incoming::Text(text) => text,
            Incoming::Ignored => continue,
            Incoming::Gone => break,
        };

        let send = inbound.send(text);
        tokio::pin!(send);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                sent = &mut send => {
                    if sent.is_err() {
                        break 'read;
                    }
                    break;
                }
                msg = ws_rx.next() => match classify(msg) {
                    Incoming::Text(_) => {
                        warn!(queued = INBOUND_QUEUE, "inbound queue full, refusing message");
                        let refused = OutboundFrame::AgentError {
                            message: QUEUE_FULL_MESSAGE.into(),
                        };
                        if frames.try_send(refused).is_err() {
                            debug!("outbound queue full, refusal not sent");
                        }
                    }
                    Incoming::Ignored => {}
                    Incoming::Gone => break 'read,
                },
            }
        }
    }
    cancel.cancel();
}
