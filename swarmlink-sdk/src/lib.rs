//! Client SDK for the swarmlink gateway.
//!
//! Maintains many concurrent persistent WebSocket sessions — one per
//! (proxy, identity) pair — against a single gateway endpoint. Each session
//! independently dials (directly or through a SOCKS5/HTTP proxy), answers
//! the gateway's AUTH challenge, keeps the connection alive with periodic
//! PINGs, and reconnects on close or error.
//!
//! The entry point is [`ConnectionManager::run`]. Everything a session does
//! is driven by an explicit [`Config`] so tests can shrink the timing
//! constants; there is no shared mutable state between sessions.

pub mod codec;
pub mod config;
pub mod error;
pub mod manager;
pub mod proxy;
pub mod session;
pub mod sources;

pub use codec::ControlMessage;
pub use config::{Config, RetryPolicy};
pub use error::Error;
pub use manager::{fan_out, ConnectionManager, ProxyMode, SessionKey};
pub use proxy::{ProxyDescriptor, ProxyScheme};
pub use session::{Identity, Session, SessionHandler, SessionState};
