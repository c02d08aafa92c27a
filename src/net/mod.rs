pub mod local;
pub mod match_session;
pub mod properties;
pub mod protocol;
pub mod reconnect;
pub mod substrate;

pub use match_session::{MatchSession, RequestRoute, SessionError, SessionNotification};
