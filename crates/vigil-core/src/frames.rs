//! Outbound WebSocket frames.
//!
//! Every frame the gateway writes to a client is an [`OutboundFrame`]. The
//! only path to JSON is [`OutboundFrame::to_wire`], which stamps the frame
//! type and an ISO-8601 timestamp onto a flat [`WireFrame`] envelope.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, ThreadId, UserId};
use crate::steps::{ReasoningStep, StepKind};

pub const INITIALIZING_MESSAGE: &str = "Agent is starting to analyze your request...";

/// `progress_type` values a progress frame can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressKind {
    Initializing,
    Step(StepKind),
}

impl ProgressKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Step(kind) => kind.as_str(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgressFrame {
    pub kind: ProgressKind,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_args: Option<serde_json::Value>,
}

impl ProgressFrame {
    pub fn initializing() -> Self {
        Self {
            kind: ProgressKind::Initializing,
            content: INITIALIZING_MESSAGE.to_string(),
            tool_name: None,
            tool_args: None,
        }
    }
}

impl From<&ReasoningStep> for ProgressFrame {
    fn from(step: &ReasoningStep) -> Self {
        Self {
            kind: ProgressKind::Step(step.kind),
            content: step.content.clone(),
            tool_name: step.tool_name.clone(),
            tool_args: step.tool_args.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OutboundFrame {
    AuthSuccess { user_id: UserId },
    ConversationStarted { conversation_id: ConversationId, thread_id: ThreadId },
    User { content: String },
    Progress(ProgressFrame),
    Agent { content: String, reasoning_steps: Vec<ReasoningStep> },
    AgentError { message: String },
}

impl OutboundFrame {
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::AuthSuccess { .. } => "auth_success",
            Self::ConversationStarted { .. } => "conversation_started",
            Self::User { .. } => "User",
            Self::Progress(_) => "progress",
            Self::Agent { .. } | Self::AgentError { .. } => "Agent",
        }
    }

    /// Final or error frame that ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Agent { .. } | Self::AgentError { .. })
    }

    pub fn to_wire(&self) -> WireFrame {
        self.to_wire_at(Utc::now())
    }

    pub fn to_wire_at(&self, at: DateTime<Utc>) -> WireFrame {
        let mut wire = WireFrame {
            frame_type: self.frame_type().to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ..WireFrame::default()
        };
        match self {
            Self::AuthSuccess { user_id } => {
                wire.content = Some(format!("Successfully authenticated user {user_id}"));
            }
            Self::ConversationStarted { conversation_id, thread_id } => {
                wire.conversation_id = Some(*conversation_id);
                wire.thread_id = Some(thread_id.clone());
                wire.content = Some(format!("Started conversation {conversation_id}"));
            }
            Self::User { content } => {
                wire.content = Some(content.clone());
            }
            Self::Progress(p) => {
                wire.progress_type = Some(p.kind.as_str().to_string());
                wire.content = Some(p.content.clone());
                wire.tool_name = p.tool_name.clone();
                wire.tool_args = p.tool_args.clone();
            }
            Self::Agent { content, reasoning_steps } => {
                wire.content = Some(content.clone());
                if !reasoning_steps.is_empty() {
                    wire.reasoning_steps = Some(reasoning_steps.clone());
                }
            }
            Self::AgentError { message } => {
                wire.content = Some(message.clone());
                wire.error = Some(true);
            }
        }
        wire
    }

    /// Serialize for a WebSocket text frame.
    pub fn encode(&self) -> Option<String> {
        serde_json::to_string(&self.to_wire()).ok()
    }
}

/// Flat JSON envelope: `{ type, timestamp, ...fields }`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_steps: Option<Vec<ReasoningStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
}
