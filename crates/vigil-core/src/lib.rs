pub mod auth;
pub mod errors;
pub mod frames;
pub mod ids;
pub mod steps;

pub use auth::{Claims, TokenVerifier};
pub use errors::{AuthError, UpstreamError};
pub use frames::{OutboundFrame, ProgressFrame, ProgressKind, WireFrame};
pub use ids::{ConnectionId, ConversationId, MessageId, ThreadId, UserId};
pub use steps::{ReasoningStep, StepKind, UpstreamEvent};
