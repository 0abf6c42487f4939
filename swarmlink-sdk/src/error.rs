//! Error taxonomy for the SDK.
//!
//! Every per-session error (`Dial`, `Probe`, `Decode`, `Socket`) is
//! contained within that session: it is logged and the session enters
//! backoff. Only `Configuration` is surfaced to the caller of
//! [`crate::ConnectionManager::run`], before any session starts.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Proxy unreachable, proxy rejected the connection, TLS negotiation
    /// failed, or the dial/upgrade timed out.
    #[error("dial failed: {0}")]
    Dial(String),

    /// The egress-IP probe failed; the dial attempt is abandoned without
    /// attempting the gateway handshake.
    #[error("egress probe failed: {0}")]
    Probe(String),

    /// Malformed inbound control message. Logged and discarded by the
    /// session loop; never fatal.
    #[error("malformed control message: {0}")]
    Decode(String),

    /// Post-handshake transport fault (reset, abrupt close, protocol
    /// error).
    #[error("socket error: {0}")]
    Socket(String),

    /// Empty identity/proxy list or an unparsable proxy descriptor or
    /// endpoint. Fatal to the whole run.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Socket(e.to_string())
    }
}

impl From<tokio_socks::Error> for Error {
    fn from(e: tokio_socks::Error) -> Self {
        Error::Dial(format!("socks5: {e}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Probe(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Dial(e.to_string())
    }
}

/// True when an error message looks like a TLS failure or a connection
/// reset — the cases where swapping the proxy usually helps. Used to add a
/// hint line to disconnect logs.
pub fn looks_like_tls_or_reset(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("tls")
        || lower.contains("certificate")
        || lower.contains("reset")
        || lower.contains("econnreset")
}
