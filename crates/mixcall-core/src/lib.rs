//! Conference session orchestration for a mixed-view conferencing server.
//!
//! Handles token acquisition, room join, concurrent publish/subscribe and
//! event fan-out to registered listeners. Media transport, ICE and codec
//! work live behind the [`sdk::ConferenceBackend`] boundary and are not
//! reimplemented here.

pub mod auth;
pub mod config;
pub mod errors;
pub mod events;
pub mod sdk;
pub mod session;
pub mod views;

pub use auth::{Token, TokenClient};
pub use config::{IceServer, SessionConfig, SessionConfigBuilder};
pub use errors::MixcallError;
pub use events::{SessionEvent, SessionEventListener, SessionState};
pub use session::ConferenceSession;
pub use views::ViewClient;
