pub mod auth;
pub mod cascade;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod routes;
pub mod server;
pub mod session;

pub use auth::JwtVerifier;
pub use cascade::{CascadeDeleter, CascadeError, CascadeReport};
pub use coordinator::{ConversationCoordinator, CoordinatorError, Resolved};
pub use error::ApiError;
pub use registry::ConnectionRegistry;
pub use server::{start, AppState, ServerConfig, ServerDeps, ServerHandle};
pub use session::{SessionConfig, SessionHandler};
