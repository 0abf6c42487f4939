//! Per-session connection lifecycle.
//!
//! [`Session`] is the pure state machine: every transition and every
//! reaction to a control message is a plain method call, so the whole
//! lifecycle is unit-testable without a socket. [`SessionHandler`] is the
//! async driver that owns the one socket a session is allowed to have and
//! feeds the machine: probe → dial → handshake → keepalive → backoff →
//! retry.
//!
//! A session never observes another session; its only side effects are
//! network I/O and log lines.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::codec::{self, ControlMessage};
use crate::config::{Config, RetryPolicy};
use crate::error::{looks_like_tls_or_reset, Error};
use crate::proxy::{self, ProxyDescriptor};

/// An opaque user identifier from the identity list. Non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(raw: impl Into<String>) -> Result<Self, Error> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::Configuration("empty identity".into()));
        }
        Ok(Identity(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Error> {
        Identity::new(raw)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Dialing,
    AwaitingAuth,
    Active,
    Closing,
    Backoff,
}

/// What the backoff state decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Dial again after this delay.
    After(Duration),
    /// Bounded policy exhausted; abandon the session.
    GiveUp,
}

/// State for one (proxy, identity) pair. Owned exclusively by its
/// [`SessionHandler`]; nothing else mutates it.
#[derive(Debug)]
pub struct Session {
    proxy: Option<ProxyDescriptor>,
    identity: Identity,
    state: SessionState,
    retry_count: u32,
    last_ping_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(proxy: Option<ProxyDescriptor>, identity: Identity) -> Self {
        Self {
            proxy,
            identity,
            state: SessionState::Idle,
            retry_count: 0,
            last_ping_at: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_ping_at(&self) -> Option<DateTime<Utc>> {
        self.last_ping_at
    }

    pub fn proxy(&self) -> Option<&ProxyDescriptor> {
        self.proxy.as_ref()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Human-readable tag for log lines.
    pub fn label(&self) -> String {
        match &self.proxy {
            Some(p) => format!("{p}/{}", self.identity),
            None => format!("direct/{}", self.identity),
        }
    }

    /// `Idle`/`Backoff` → `Dialing`.
    pub fn begin_dial(&mut self) {
        self.state = SessionState::Dialing;
    }

    /// Dial succeeded; the socket is up and we wait for the AUTH challenge.
    pub fn on_dial_success(&mut self) {
        self.state = SessionState::AwaitingAuth;
    }

    /// Dial (or handshake) failed; enter backoff and consult the policy.
    /// Counts as one spent attempt under the bounded policy.
    pub fn on_dial_failure(&mut self, config: &Config) -> Retry {
        self.enter_backoff(config)
    }

    /// The socket closed or errored after the handshake.
    pub fn on_socket_closed(&mut self, config: &Config) -> Retry {
        self.enter_backoff(config)
    }

    /// Process-level shutdown; no further dials.
    pub fn begin_close(&mut self) {
        self.state = SessionState::Closing;
    }

    /// React to a decoded control message. Returns the outbound payload to
    /// send, if any. An AUTH challenge always yields exactly one response;
    /// in `AwaitingAuth` it also promotes the session to `Active` and
    /// resets the retry counter.
    pub fn on_control(&mut self, msg: &ControlMessage, config: &Config) -> Option<String> {
        match msg {
            ControlMessage::AuthChallenge { id } => {
                if self.state == SessionState::AwaitingAuth {
                    self.state = SessionState::Active;
                    self.retry_count = 0;
                }
                Some(codec::encode_auth_response(id, self.identity.as_str(), config))
            }
            ControlMessage::Pong { .. } | ControlMessage::Unknown { .. } => None,
        }
    }

    /// Keepalive timer fired. Produces a PING only while `Active`.
    pub fn on_ping_tick(&mut self, config: &Config) -> Option<String> {
        if self.state != SessionState::Active {
            return None;
        }
        self.last_ping_at = Some(Utc::now());
        Some(codec::encode_ping(config))
    }

    fn enter_backoff(&mut self, config: &Config) -> Retry {
        self.state = SessionState::Backoff;
        match config.retry_policy {
            RetryPolicy::Unbounded => Retry::After(config.retry_interval),
            RetryPolicy::Bounded { max_attempts } => {
                self.retry_count = self.retry_count.saturating_add(1);
                if self.retry_count >= max_attempts {
                    Retry::GiveUp
                } else {
                    Retry::After(config.retry_interval)
                }
            }
        }
    }
}

/// How a connected phase ended.
enum Exit {
    /// Cancellation observed; the socket got a close frame and the session
    /// is done for good.
    Shutdown,
    /// The gateway closed the socket or the transport faulted.
    Closed(String),
}

/// Drives one [`Session`] for the process lifetime.
pub struct SessionHandler {
    session: Session,
    config: Arc<Config>,
    cancel: CancellationToken,
}

impl SessionHandler {
    pub fn new(
        proxy: Option<ProxyDescriptor>,
        identity: Identity,
        config: Arc<Config>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session: Session::new(proxy, identity),
            config,
            cancel,
        }
    }

    /// Run the dial → handshake → keepalive → backoff cycle until
    /// cancellation (or, under the bounded policy, exhaustion).
    pub async fn run(mut self) {
        let label = self.session.label();
        loop {
            if self.cancel.is_cancelled() {
                self.session.begin_close();
                return;
            }
            self.session.begin_dial();

            let retry = match self.connect_and_drive().await {
                Ok(Exit::Shutdown) => {
                    self.session.begin_close();
                    tracing::info!(session = %label, "session shut down");
                    return;
                }
                Ok(Exit::Closed(reason)) => {
                    tracing::warn!(session = %label, %reason, "disconnected");
                    if looks_like_tls_or_reset(&reason) {
                        tracing::warn!(
                            session = %label,
                            "transport looks unstable (TLS/reset); consider a different proxy"
                        );
                    }
                    self.session.on_socket_closed(&self.config)
                }
                Err(e) => {
                    let msg = e.to_string();
                    tracing::warn!(session = %label, error = %msg, "dial attempt failed");
                    if looks_like_tls_or_reset(&msg) {
                        tracing::warn!(
                            session = %label,
                            "transport looks unstable (TLS/reset); consider a different proxy"
                        );
                    }
                    self.session.on_dial_failure(&self.config)
                }
            };

            match retry {
                Retry::After(delay) => {
                    tracing::debug!(
                        session = %label,
                        attempt = self.session.retry_count(),
                        ?delay,
                        "backing off before next dial"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.session.begin_close();
                            return;
                        }
                        _ = sleep(delay) => {}
                    }
                }
                Retry::GiveUp => {
                    tracing::error!(
                        session = %label,
                        attempts = self.session.retry_count(),
                        "retry budget exhausted; abandoning session"
                    );
                    return;
                }
            }
        }
    }

    /// One full connection attempt: optional egress probe, dial with
    /// timeout, handshake phase, then the steady keepalive loop.
    ///
    /// `Err` means the attempt failed before reaching `Active`-capable
    /// steady state (probe, dial, or handshake); `Ok(Exit::Closed)` means
    /// an established connection went away.
    async fn connect_and_drive(&mut self) -> Result<Exit, Error> {
        let cancel = self.cancel.clone();
        let label = self.session.label();

        // Probe first: a dead proxy is not worth a handshake round-trip.
        // Probe failure abandons this attempt, exactly like a dial failure.
        // Direct sessions skip the probe; there is no proxy to weed out and
        // an echo-service outage must not block direct dials.
        if self.config.probe_url.is_some() && self.session.proxy().is_some() {
            let probe = proxy::probe_egress_ip(self.session.proxy(), &self.config);
            let info = tokio::select! {
                _ = cancel.cancelled() => return Ok(Exit::Shutdown),
                r = probe => r?,
            };
            tracing::info!(session = %label, egress = %info, "egress probe ok");
        }

        let dialing = timeout(
            self.config.dial_timeout,
            proxy::dial(self.session.proxy(), &self.config),
        );
        let ws = tokio::select! {
            _ = cancel.cancelled() => return Ok(Exit::Shutdown),
            r = dialing => r.map_err(|_| {
                Error::Dial(format!("timed out after {:?}", self.config.dial_timeout))
            })??,
        };
        self.session.on_dial_success();
        tracing::info!(session = %label, "connected, awaiting auth challenge");

        let (mut write, mut read) = ws.split();

        // Handshake phase: read until the AUTH challenge promotes us to
        // Active. Bounded by the dial timeout so a silent gateway shows up
        // as ordinary retry activity instead of a hung session.
        let handshake_deadline = sleep(self.config.dial_timeout);
        tokio::pin!(handshake_deadline);
        while self.session.state() != SessionState::Active {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Exit::Shutdown);
                }
                _ = &mut handshake_deadline => {
                    return Err(Error::Dial("handshake timed out".into()));
                }
                frame = read.next() => {
                    self.handle_frame(frame, &mut write).await?;
                }
            }
        }
        tracing::info!(session = %label, "authenticated, session active");

        // Steady state. The keepalive interval exists only inside this
        // scope: created on entry to Active, dropped on any exit, so no
        // timer outlives the connection it belongs to.
        let mut ping = interval_at(
            Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(Exit::Shutdown);
                }
                _ = ping.tick() => {
                    if let Some(out) = self.session.on_ping_tick(&self.config) {
                        tracing::debug!(session = %label, payload = %out, "ping");
                        if let Err(e) = write.send(Message::text(out)).await {
                            return Ok(Exit::Closed(format!("ping send failed: {e}")));
                        }
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Close(close))) => {
                            let reason = close
                                .map(|f| format!("close frame, code {}: {}", f.code, f.reason))
                                .unwrap_or_else(|| "close frame".to_string());
                            return Ok(Exit::Closed(reason));
                        }
                        Some(Ok(Message::Text(text))) => {
                            if let Some(out) = self.react(&text) {
                                if let Err(e) = write.send(Message::text(out)).await {
                                    return Ok(Exit::Closed(format!("send failed: {e}")));
                                }
                            }
                        }
                        // Transport ping/pong and binary frames carry no
                        // control messages here.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Ok(Exit::Closed(e.to_string())),
                        None => return Ok(Exit::Closed("stream ended".to_string())),
                    }
                }
            }
        }
    }

    /// Handshake-phase frame handling. `Err` fails the attempt; `Ok` keeps
    /// waiting for the challenge.
    async fn handle_frame(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
        write: &mut (impl futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    ) -> Result<(), Error> {
        match frame {
            Some(Ok(Message::Text(text))) => {
                if let Some(out) = self.react(&text) {
                    write.send(Message::text(out)).await?;
                }
                Ok(())
            }
            Some(Ok(Message::Close(close))) => {
                let reason = close
                    .map(|f| format!("close frame, code {}: {}", f.code, f.reason))
                    .unwrap_or_else(|| "close frame".to_string());
                Err(Error::Dial(format!("closed during handshake: {reason}")))
            }
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(Error::Socket(e.to_string())),
            None => Err(Error::Socket("stream ended during handshake".into())),
        }
    }

    /// Decode one inbound text frame and let the state machine react.
    /// Malformed payloads are logged and dropped; they never change state
    /// and never end the session.
    fn react(&mut self, text: &str) -> Option<String> {
        let label = self.session.label();
        match codec::decode(text) {
            Ok(msg) => {
                match &msg {
                    ControlMessage::AuthChallenge { id } => {
                        tracing::info!(session = %label, challenge = %id, "auth challenge");
                    }
                    ControlMessage::Pong { raw } => {
                        tracing::debug!(session = %label, %raw, "pong");
                    }
                    ControlMessage::Unknown { raw } => {
                        tracing::debug!(session = %label, %raw, "ignoring unknown action");
                    }
                }
                self.session.on_control(&msg, &self.config)
            }
            Err(e) => {
                tracing::warn!(session = %label, error = %e, "dropping malformed message");
                None
            }
        }
    }
}
