//! WebSocket sessions.
//!
//! Provides the session protocol, the session registry, per-session
//! keepalive, and the upgrade plumbing shared by the streaming endpoints.

mod frame;
mod handler;
mod keepalive;
pub mod manager;
pub mod session;

pub use frame::Frame;
pub use handler::serve_session;
pub use keepalive::DEFAULT_KEEPALIVE_INTERVAL;
pub use manager::WsManager;
pub use session::{OpenRequest, OpenedSession, Session, SessionState};
