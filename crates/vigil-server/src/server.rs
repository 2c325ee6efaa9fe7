use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use vigil_core::auth::{Claims, TokenVerifier};
use vigil_core::errors::AuthError;
use vigil_core::ids::{ConversationId, UserId};
use vigil_relay::{AgentUpstream, StreamRelay};
use vigil_store::{CheckpointStore, ConversationStore};

use crate::cascade::{self, CascadeDeleter};
use crate::coordinator::ConversationCoordinator;
use crate::registry::ConnectionRegistry;
use crate::routes;
use crate::session::{self, SessionConfig, SessionHandler, CLOSE_NOT_FOUND};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub session: SessionConfig,
    /// Upper bound on one agent turn, end to end.
    pub turn_timeout: Duration,
    /// `None` disables the orphaned-checkpoint sweep.
    pub reconcile_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            session: SessionConfig::default(),
            turn_timeout: Duration::from_secs(120),
            reconcile_interval: Some(Duration::from_secs(600)),
        }
    }
}

/// Collaborators the server is built from.
pub struct ServerDeps {
    pub store: ConversationStore,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub upstream: Arc<dyn AgentUpstream>,
    pub verifier: Arc<dyn TokenVerifier>,
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: ConversationStore,
    pub coordinator: ConversationCoordinator,
    pub verifier: Arc<dyn TokenVerifier>,
    pub sessions: Arc<SessionHandler>,
    pub cascade: Arc<CascadeDeleter>,
    pub registry: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(config: &ServerConfig, deps: ServerDeps) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let coordinator = ConversationCoordinator::new(deps.store.clone());
        let relay = Arc::new(StreamRelay::new(deps.upstream, config.turn_timeout));
        let sessions = Arc::new(SessionHandler::new(
            coordinator.clone(),
            deps.store.clone(),
            relay,
            Arc::clone(&registry),
            config.session.clone(),
        ));
        let cascade = Arc::new(CascadeDeleter::new(deps.store.clone(), deps.checkpoints));

        Self {
            store: deps.store,
            coordinator,
            verifier: deps.verifier,
            sessions,
            cascade,
            registry,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    // Spans carry the path only; the WebSocket token travels in the query.
    let trace = TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
        tracing::info_span!("http", method = %req.method(), path = %req.uri().path())
    });

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws/agent/{user_id}", get(ws_handler))
        .route(
            "/chat/{user_id}",
            get(routes::list_conversations).post(routes::create_conversation),
        )
        .route(
            "/chat/{user_id}/{conversation_id}",
            get(routes::get_conversation).delete(routes::delete_conversation),
        )
        .route(
            "/chat/{user_id}/{conversation_id}/messages",
            get(routes::list_messages),
        )
        .with_state(state)
        .layer(trace)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(config: ServerConfig, deps: ServerDeps) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(&config, deps);
    let shutdown = CancellationToken::new();

    let reconcile = config.reconcile_interval.map(|interval| {
        cascade::start_reconcile_task(Arc::clone(&state.cascade), interval, shutdown.clone())
    });

    let registry = Arc::clone(&state.registry);
    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, "vigil gateway listening");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server stopped with an error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        shutdown,
        server,
        _reconcile: reconcile,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    _reconcile: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn active_connections(&self) -> usize {
        self.registry.count()
    }

    /// Stop accepting connections and wait for the listener to wind down.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.server.await;
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
    pub conversation_id: Option<String>,
}

/// A conversation id sent as text may be absent, empty, or a literal `null`
/// from browser clients.
pub(crate) fn parse_conversation_param(
    raw: Option<&str>,
) -> Result<Option<ConversationId>, String> {
    match raw.map(str::trim) {
        None | Some("") | Some("null") | Some("undefined") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| format!("invalid conversation id: {value}")),
    }
}

fn authenticate(
    verifier: &dyn TokenVerifier,
    token: Option<&str>,
    path_user: UserId,
) -> Result<Claims, AuthError> {
    let claims = verifier.verify(token.ok_or(AuthError::MissingToken)?)?;
    claims.ensure_user(path_user)?;
    Ok(claims)
}

/// WebSocket upgrade handler. The token is checked before any session state exists.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<UserId>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let claims = match authenticate(state.verifier.as_ref(), params.token.as_deref(), user_id) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "websocket authentication failed");
            return ws
                .on_upgrade(move |socket| async move { session::reject(socket, &e).await })
                .into_response();
        }
    };

    let requested = match parse_conversation_param(params.conversation_id.as_deref()) {
        Ok(requested) => requested,
        Err(reason) => {
            tracing::warn!(user_id = %user_id, %reason, "bad conversation id in handshake");
            return ws
                .on_upgrade(move |socket| async move {
                    session::close_with(socket, CLOSE_NOT_FOUND, "Conversation not found").await;
                })
                .into_response();
        }
    };

    let sessions = Arc::clone(&state.sessions);
    ws.on_upgrade(move |socket| async move {
        sessions.run(socket, claims.user_id, requested).await;
    })
    .into_response()
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "OK",
        "active_connections": state.registry.count(),
    }))
}
