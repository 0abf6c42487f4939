//! End-to-end session tests against a local WebSocket server.
//!
//! The server side is a bare `tokio_tungstenite::accept_async` loop per
//! test, so every exchange (challenge, response, keepalive, close,
//! reconnect) is observed on the wire rather than inferred from state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use swarmlink_sdk::{
    Config, ConnectionManager, Identity, ProxyMode, RetryPolicy, SessionHandler,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Config tuned for tests: local plaintext endpoint, no probe, short
/// timers.
fn test_config(addr: &str) -> Config {
    Config {
        endpoint: format!("ws://{addr}"),
        probe_url: None,
        ping_interval: Duration::from_millis(150),
        retry_interval: Duration::from_millis(50),
        dial_timeout: Duration::from_millis(500),
        ..Config::default()
    }
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

fn spawn_session(config: Config, identity: &str, cancel: &CancellationToken) {
    let handler = SessionHandler::new(
        None,
        Identity::new(identity).unwrap(),
        Arc::new(config),
        cancel.clone(),
    );
    tokio::spawn(handler.run());
}

/// Read text frames until one parses as JSON, skipping transport frames.
async fn next_json(
    ws: &mut tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
) -> Option<Value> {
    while let Some(frame) = timeout(TIMEOUT, ws.next()).await.ok()? {
        match frame {
            Ok(Message::Text(text)) => return serde_json::from_str(&text).ok(),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

#[tokio::test]
async fn handshake_then_keepalive_then_shutdown() {
    let (listener, addr) = bind().await;
    let cancel = CancellationToken::new();
    spawn_session(test_config(&addr), "u1", &cancel);

    let (stream, _) = timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap();
    let mut ws = accept_async(stream).await.unwrap();

    // Garbage and unknown actions before the challenge must not break the
    // handshake.
    ws.send(Message::text("not json at all")).await.unwrap();
    ws.send(Message::text(json!({"action": "REFRESH"}).to_string()))
        .await
        .unwrap();
    ws.send(Message::text(
        json!({"action": "AUTH", "id": "abc"}).to_string(),
    ))
    .await
    .unwrap();

    // Exactly one auth response, echoing the challenge id.
    let auth = next_json(&mut ws).await.expect("auth response");
    assert_eq!(auth["id"], "abc");
    assert_eq!(auth["origin_action"], "AUTH");
    assert_eq!(auth["result"]["user_id"], "u1");
    assert_eq!(auth["result"]["device_type"], "desktop");
    assert!(auth["result"]["browser_id"].as_str().is_some());

    // A PONG is informational; the next thing the client sends must be a
    // keepalive PING on its own timer.
    ws.send(Message::text(
        json!({"action": "PONG", "id": "p1"}).to_string(),
    ))
    .await
    .unwrap();

    let ping = next_json(&mut ws).await.expect("keepalive ping");
    assert_eq!(ping["action"], "PING");
    assert_eq!(ping["version"], "1.0.0");
    assert_eq!(ping["data"], json!({}));

    let ping2 = next_json(&mut ws).await.expect("second keepalive ping");
    assert_ne!(ping["id"], ping2["id"], "ping ids are fresh per message");

    // Cancellation closes the socket promptly.
    cancel.cancel();
    let end = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(end.is_ok(), "socket should close promptly on shutdown");
}

#[tokio::test]
async fn reconnects_after_server_close() {
    let (listener, addr) = bind().await;
    let cancel = CancellationToken::new();
    spawn_session(test_config(&addr), "u1", &cancel);

    // First connection: authenticate, then slam the door.
    let (stream, _) = timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    ws.send(Message::text(
        json!({"action": "AUTH", "id": "c1"}).to_string(),
    ))
    .await
    .unwrap();
    let auth = next_json(&mut ws).await.expect("auth response");
    assert_eq!(auth["id"], "c1");
    drop(ws);

    // The session re-dials after the configured retry interval.
    let (stream, _) = timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    ws.send(Message::text(
        json!({"action": "AUTH", "id": "c2"}).to_string(),
    ))
    .await
    .unwrap();
    let auth = next_json(&mut ws).await.expect("auth response after reconnect");
    assert_eq!(auth["id"], "c2");
    assert_eq!(auth["result"]["user_id"], "u1");

    cancel.cancel();
}

#[tokio::test]
async fn silent_server_times_out_handshake_and_redials() {
    let (listener, addr) = bind().await;
    let cancel = CancellationToken::new();
    let config = Config {
        dial_timeout: Duration::from_millis(200),
        ..test_config(&addr)
    };
    let dial_timeout = config.dial_timeout;
    spawn_session(config, "u1", &cancel);

    // Complete the upgrade, then say nothing. Keep the socket open so the
    // only way out for the client is its own handshake deadline.
    let (stream, _) = timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap();
    let silent_ws = accept_async(stream).await.unwrap();
    let first_accept = tokio::time::Instant::now();

    // The session abandons the silent connection and dials again.
    let (stream, _) = timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap();
    assert!(
        first_accept.elapsed() >= dial_timeout,
        "redial must wait out the handshake deadline"
    );
    drop(silent_ws);

    // The fresh connection handshakes normally.
    let mut ws = accept_async(stream).await.unwrap();
    ws.send(Message::text(
        json!({"action": "AUTH", "id": "after-silence"}).to_string(),
    ))
    .await
    .unwrap();
    let auth = next_json(&mut ws).await.expect("auth response after redial");
    assert_eq!(auth["id"], "after-silence");

    cancel.cancel();
}

#[tokio::test]
async fn direct_sessions_ignore_probe_configuration() {
    let (listener, addr) = bind().await;
    let cancel = CancellationToken::new();

    // A probe URL nothing listens on. A direct session must never touch it;
    // if it did, every attempt would die in the probe and the gateway dial
    // below would never happen.
    let config = Config {
        probe_url: Some("http://127.0.0.1:9/".to_string()),
        ..test_config(&addr)
    };
    spawn_session(config, "u1", &cancel);

    let (stream, _) = timeout(TIMEOUT, listener.accept()).await.unwrap().unwrap();
    let mut ws = accept_async(stream).await.unwrap();
    ws.send(Message::text(
        json!({"action": "AUTH", "id": "direct"}).to_string(),
    ))
    .await
    .unwrap();
    let auth = next_json(&mut ws).await.expect("auth response");
    assert_eq!(auth["id"], "direct");
    assert_eq!(auth["result"]["user_id"], "u1");

    cancel.cancel();
}

#[tokio::test]
async fn bounded_policy_stops_after_exact_attempt_count() {
    let (listener, addr) = bind().await;
    let accepted = Arc::new(AtomicUsize::new(0));

    // Accept and immediately drop every connection: each dial succeeds at
    // the TCP level and then fails before authentication.
    let server_accepted = Arc::clone(&accepted);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            server_accepted.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    let config = Config {
        retry_policy: RetryPolicy::Bounded { max_attempts: 3 },
        ..test_config(&addr)
    };
    let cancel = CancellationToken::new();
    let handler = SessionHandler::new(
        None,
        Identity::new("u1").unwrap(),
        Arc::new(config),
        cancel.clone(),
    );

    // The handler gives up on its own; no cancellation involved.
    timeout(TIMEOUT, handler.run())
        .await
        .expect("bounded session should abandon itself");

    // Let the accept loop drain, then verify the exact dial count and that
    // no further dials happen after abandonment.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 3, "exactly max_attempts dials");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn direct_fan_out_runs_one_session_per_identity() {
    let (listener, addr) = bind().await;
    let cancel = CancellationToken::new();

    let seen = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));
    let server_seen = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let seen = Arc::clone(&server_seen);
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                ws.send(Message::text(
                    json!({"action": "AUTH", "id": "chal"}).to_string(),
                ))
                .await
                .unwrap();
                if let Some(auth) = next_json(&mut ws).await {
                    if let Some(uid) = auth["result"]["user_id"].as_str() {
                        seen.lock().await.push(uid.to_string());
                    }
                }
                // Hold the connection open until the client goes away.
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    let manager = ConnectionManager::new(test_config(&addr));
    let identities = vec![Identity::new("u1").unwrap(), Identity::new("u2").unwrap()];
    let run_cancel = cancel.clone();
    let run = tokio::spawn(async move {
        manager.run(identities, ProxyMode::Direct, run_cancel).await
    });

    // Both identities authenticate on their own connections.
    timeout(TIMEOUT, async {
        loop {
            {
                let mut uids = seen.lock().await.clone();
                uids.sort();
                if uids == vec!["u1".to_string(), "u2".to_string()] {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("both sessions should authenticate");

    cancel.cancel();
    let result = timeout(TIMEOUT, run).await.unwrap().unwrap();
    assert!(result.is_ok());
}
