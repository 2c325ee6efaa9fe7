use std::time::Duration;

use crate::ids::UserId;

/// Why a bearer credential was rejected. Always fatal to the socket or request.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token expired")]
    Expired,
    #[error("User ID mismatch")]
    UserMismatch { token_user: UserId, path_user: UserId },
}

impl AuthError {
    /// Close-frame reason sent alongside code 4001.
    pub fn close_reason(&self) -> String {
        format!("Unauthorized: {self}")
    }
}

/// Failure of one upstream agent turn. Scoped to the turn, never to the session.
#[derive(Clone, Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("agent service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("agent reported error: {0}")]
    Agent(String),
    #[error("stream ended without a final response")]
    Incomplete,
    #[error("cancelled")]
    Cancelled,
}

impl UpstreamError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "upstream_status",
            Self::Network(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Timeout(_) => "timeout",
            Self::Agent(_) => "agent_error",
            Self::Incomplete => "incomplete_stream",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify a non-2xx HTTP status from the agent service.
    pub fn from_status(status: u16, body: String) -> Self {
        Self::Status { status, body }
    }

    /// Text placed in the terminal `Agent` error frame shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Status { status, .. } => format!("Agent service error: {status}"),
            Self::Network(_) => {
                "Failed to connect to agent service. Please check if the service is running."
                    .to_string()
            }
            Self::StreamInterrupted(_) => {
                "The agent stream was interrupted before a response arrived.".to_string()
            }
            Self::Timeout(d) => format!("Agent service timed out after {}s.", d.as_secs()),
            Self::Agent(msg) => format!("Agent error: {msg}"),
            Self::Incomplete => "The agent finished without producing a response.".to_string(),
            Self::Cancelled => "Request cancelled.".to_string(),
        }
    }
}
