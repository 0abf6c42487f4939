//! Fan-out orchestration.
//!
//! The manager's only jobs are to validate the inputs, enumerate the full
//! (proxy × identity) matrix up front — so the fan-out size is observable
//! before anything is launched — and spawn one independent task per
//! session. There is no shared state between the sessions it launches.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Error;
use crate::proxy::ProxyDescriptor;
use crate::session::{Identity, SessionHandler};

/// Direct connection or a pool of proxies to cross with the identities.
#[derive(Debug, Clone)]
pub enum ProxyMode {
    Direct,
    Proxied(Vec<ProxyDescriptor>),
}

/// One planned session: a (proxy, identity) pair, proxy `None` in direct
/// mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub proxy: Option<ProxyDescriptor>,
    pub identity: Identity,
}

/// Enumerate every session the given inputs imply. Pure; does not launch
/// anything.
pub fn fan_out(mode: &ProxyMode, identities: &[Identity]) -> Vec<SessionKey> {
    match mode {
        ProxyMode::Direct => identities
            .iter()
            .map(|identity| SessionKey {
                proxy: None,
                identity: identity.clone(),
            })
            .collect(),
        ProxyMode::Proxied(proxies) => proxies
            .iter()
            .flat_map(|proxy| {
                identities.iter().map(move |identity| SessionKey {
                    proxy: Some(proxy.clone()),
                    identity: identity.clone(),
                })
            })
            .collect(),
    }
}

pub struct ConnectionManager {
    config: Arc<Config>,
}

impl ConnectionManager {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Launch one session per (proxy, identity) pair and wait for the whole
    /// fan-out to quiesce.
    ///
    /// Fails fast with [`Error::Configuration`] — before launching any
    /// session — if the identity list is empty, or proxied mode was chosen
    /// with an empty proxy list. Under the unbounded retry policy this
    /// returns only after `cancel` fires; under the bounded policy it also
    /// returns once every session has exhausted its budget.
    pub async fn run(
        &self,
        identities: Vec<Identity>,
        mode: ProxyMode,
        cancel: CancellationToken,
    ) -> Result<(), Error> {
        if identities.is_empty() {
            return Err(Error::Configuration("identity list is empty".into()));
        }
        if let ProxyMode::Proxied(proxies) = &mode {
            if proxies.is_empty() {
                return Err(Error::Configuration(
                    "proxied mode selected but the proxy list is empty".into(),
                ));
            }
        }

        let keys = fan_out(&mode, &identities);
        tracing::info!(
            sessions = keys.len(),
            identities = identities.len(),
            "launching session fan-out"
        );

        let tasks: Vec<_> = keys
            .into_iter()
            .map(|key| {
                let handler = SessionHandler::new(
                    key.proxy,
                    key.identity,
                    Arc::clone(&self.config),
                    cancel.child_token(),
                );
                tokio::spawn(handler.run())
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            if let Err(e) = task {
                // A panicked session task never takes the others with it.
                tracing::error!(error = %e, "session task aborted");
            }
        }
        tracing::info!("all sessions finished");
        Ok(())
    }
}
