//! Session configuration.
//!
//! Everything that was an ambient constant in earlier iterations (ping
//! interval, retry interval, endpoint host, user-agent strings) lives here
//! and is threaded from the binary down into every session, so tests can
//! override the timing without touching the code under test.

use std::time::Duration;

/// How the backoff state decides whether to dial again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Give up after `max_attempts` consecutive failed dials. The counter
    /// resets whenever the session reaches `Active`.
    Bounded { max_attempts: u32 },
    /// Reschedule a fresh dial after every close or error, forever.
    Unbounded,
}

/// Configuration shared (read-only) by every session in a run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway endpoint URL. `wss://` in production; `ws://` is accepted so
    /// tests can target a local plaintext server.
    pub endpoint: String,
    /// IP-echo service used to probe a proxy's egress IP before dialing the
    /// gateway. `None` disables the probe.
    pub probe_url: Option<String>,
    /// User-Agent header sent on the WebSocket upgrade request.
    pub user_agent: String,
    /// Abbreviated user-agent reported inside the AUTH response body.
    pub auth_user_agent: String,
    /// Client version string reported in the AUTH response.
    pub auth_version: String,
    /// Protocol version carried by PING messages.
    pub ping_version: String,
    /// Keepalive period while a session is active.
    pub ping_interval: Duration,
    /// Delay between a failed/closed connection and the next dial.
    pub retry_interval: Duration,
    /// Upper bound on a single dial + handshake. Equal to the retry
    /// interval by default so a hung dial surfaces as retry activity.
    pub dial_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "wss://gw.swarmlink.net:4444".to_string(),
            probe_url: Some("https://api.ipify.org?format=json".to_string()),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:92.0) \
                         Gecko/20100101 Firefox/92.0"
                .to_string(),
            auth_user_agent: "Mozilla/5.0".to_string(),
            auth_version: "4.28.2".to_string(),
            ping_version: "1.0.0".to_string(),
            ping_interval: Duration::from_secs(45),
            retry_interval: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::Unbounded,
        }
    }
}
