use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Intermediate upstream event kinds that make up a reasoning trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolCall,
    ToolProgress,
    ToolResult,
    AgentThinking,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::ToolProgress => "tool_progress",
            Self::ToolResult => "tool_result",
            Self::AgentThinking => "agent_thinking",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool_call" => Ok(Self::ToolCall),
            "tool_progress" => Ok(Self::ToolProgress),
            "tool_result" => Ok(Self::ToolResult),
            "agent_thinking" => Ok(Self::AgentThinking),
            other => Err(format!("unknown step kind: {other}")),
        }
    }
}

/// One entry of an agent turn's reasoning trace. Only ever stored inside its
/// parent agent message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ReasoningStep {
    pub fn new(kind: StepKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tool_name: None,
            tool_args: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, args: Option<serde_json::Value>) -> Self {
        self.tool_name = Some(name.into());
        self.tool_args = args;
        self
    }
}

/// A parsed upstream stream frame.
#[derive(Clone, Debug, PartialEq)]
pub enum UpstreamEvent {
    Step(ReasoningStep),
    Final { content: String, title: Option<String> },
    Error { message: String },
}

impl UpstreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::Error { .. })
    }
}
