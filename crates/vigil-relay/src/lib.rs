pub mod client;
pub mod relay;
pub mod sse;

pub mod mock;

pub use client::{AgentUpstream, HttpAgentClient, UpstreamEvents, UpstreamRequest};
pub use mock::{MockResponse, MockUpstream};
pub use relay::{FrameSink, RelayOutcome, SinkClosed, StreamRelay};
