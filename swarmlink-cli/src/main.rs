//! swarmlink runner.
//!
//! Loads a proxy list (file or URL) and an identity list, then launches one
//! persistent gateway session per (proxy, identity) pair — or one per
//! identity with `--direct`. Runs until Ctrl-C; sessions reconnect on their
//! own per the configured retry policy.
//!
//! Usage:
//!   swarmlink --proxy-file proxy.txt --uid-file uid.txt
//!   swarmlink --proxy-url https://example.com/proxies.txt
//!   swarmlink --direct

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use swarmlink_sdk::{
    sources, Config, ConnectionManager, Identity, ProxyDescriptor, ProxyMode, RetryPolicy,
};

#[derive(Parser)]
#[command(name = "swarmlink", about = "Fan out persistent gateway sessions across proxies")]
struct Args {
    /// Gateway endpoint URL
    #[arg(long, env = "SWARMLINK_ENDPOINT", default_value = "wss://gw.swarmlink.net:4444")]
    endpoint: String,

    /// Read the proxy list from a local file (one entry per line)
    #[arg(long, conflicts_with_all = ["proxy_url", "direct"])]
    proxy_file: Option<PathBuf>,

    /// Fetch the proxy list from a URL (one entry per line)
    #[arg(long, conflicts_with_all = ["proxy_file", "direct"])]
    proxy_url: Option<String>,

    /// Connect directly, without any proxy
    #[arg(long)]
    direct: bool,

    /// Identity list file (one user id per line)
    #[arg(long, default_value = "uid.txt")]
    uid_file: PathBuf,

    /// Keepalive period in seconds
    #[arg(long, default_value = "45")]
    ping_secs: u64,

    /// Delay between reconnect attempts in seconds
    #[arg(long, default_value = "10")]
    retry_secs: u64,

    /// Abandon a session after this many consecutive failed dials
    /// (default: retry forever)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Skip the egress-IP probe before each dial
    #[arg(long)]
    no_probe: bool,

    /// IP-echo service used for the egress probe
    #[arg(long, default_value = "https://api.ipify.org?format=json")]
    probe_url: String,
}

fn banner() {
    println!("╔════════════════════════════════════════╗");
    println!("║              swarmlink                 ║");
    println!("║   persistent gateway session runner    ║");
    println!("╚════════════════════════════════════════╝");
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "swarmlink=info,swarmlink_sdk=info".into()),
        )
        .init();

    let args = Args::parse();
    banner();

    // Resolve the proxy source. Exactly one of file / URL / direct.
    let mode = if args.direct {
        tracing::info!("direct connection mode, no proxies");
        ProxyMode::Direct
    } else {
        let raw = if let Some(path) = &args.proxy_file {
            let lines = sources::read_lines(path).await?;
            tracing::info!(count = lines.len(), file = %path.display(), "loaded proxy list");
            lines
        } else if let Some(url) = &args.proxy_url {
            let lines = sources::fetch_proxies(url).await?;
            tracing::info!(count = lines.len(), %url, "fetched proxy list");
            lines
        } else {
            bail!("choose a proxy source: --proxy-file, --proxy-url, or --direct");
        };
        if raw.is_empty() {
            bail!("no proxies found; exiting");
        }
        let proxies = raw
            .iter()
            .map(|line| line.parse::<ProxyDescriptor>())
            .collect::<Result<Vec<_>, _>>()
            .context("parsing proxy list")?;
        ProxyMode::Proxied(proxies)
    };

    let identity_lines = sources::read_lines(&args.uid_file).await?;
    if identity_lines.is_empty() {
        bail!("no user IDs found in {}; exiting", args.uid_file.display());
    }
    let identities = identity_lines
        .iter()
        .map(|line| line.parse::<Identity>())
        .collect::<Result<Vec<_>, _>>()
        .context("parsing identity list")?;
    tracing::info!(count = identities.len(), "loaded user IDs");

    let retry_interval = Duration::from_secs(args.retry_secs);
    let config = Config {
        endpoint: args.endpoint.clone(),
        probe_url: (!args.no_probe).then(|| args.probe_url.clone()),
        ping_interval: Duration::from_secs(args.ping_secs),
        retry_interval,
        // Dial + handshake share the retry interval as their bound.
        dial_timeout: retry_interval,
        retry_policy: match args.max_retries {
            Some(max_attempts) => RetryPolicy::Bounded { max_attempts },
            None => RetryPolicy::Unbounded,
        },
        ..Config::default()
    };

    let cancel = CancellationToken::new();
    let manager = ConnectionManager::new(config);

    let run_cancel = cancel.clone();
    let mut run = tokio::spawn(async move { manager.run(identities, mode, run_cancel).await });

    tokio::select! {
        result = &mut run => {
            // Under the bounded policy every session can exhaust its
            // budget, at which point the run is over.
            result.context("session fan-out task failed")??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down, closing sessions");
            cancel.cancel();
            // Wait for sessions to send their close frames.
            run.await.context("session fan-out task failed")??;
        }
    }

    Ok(())
}
