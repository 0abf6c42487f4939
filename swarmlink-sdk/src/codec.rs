//! Wire codec for gateway control messages.
//!
//! Pure encode/decode, no I/O. Inbound messages are JSON objects dispatched
//! on their `action` field; the match is closed over the known actions with
//! an explicit [`ControlMessage::Unknown`] default, so an unrecognized
//! action is never confused with a malformed payload.

use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::Error;

/// A decoded inbound control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// `AUTH` challenge; `id` must be echoed in the response.
    AuthChallenge { id: String },
    /// `PONG` reply to one of our keepalive pings. Informational only.
    Pong { raw: Value },
    /// Any other action. Logged and ignored by the session loop.
    Unknown { raw: Value },
}

/// Decode an inbound text frame.
///
/// Malformed JSON, a non-object payload, or an `AUTH` missing its `id` are
/// all [`Error::Decode`] — the caller logs and drops the frame.
pub fn decode(text: &str) -> Result<ControlMessage, Error> {
    let raw: Value =
        serde_json::from_str(text).map_err(|e| Error::Decode(e.to_string()))?;
    if !raw.is_object() {
        return Err(Error::Decode(format!("expected object, got: {raw}")));
    }
    match raw.get("action").and_then(Value::as_str) {
        Some("AUTH") => {
            let id = raw
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Decode("AUTH challenge without id".into()))?
                .to_string();
            Ok(ControlMessage::AuthChallenge { id })
        }
        Some("PONG") => Ok(ControlMessage::Pong { raw }),
        _ => Ok(ControlMessage::Unknown { raw }),
    }
}

#[derive(Serialize)]
struct AuthResponse<'a> {
    id: &'a str,
    origin_action: &'static str,
    result: AuthResult<'a>,
}

#[derive(Serialize)]
struct AuthResult<'a> {
    browser_id: String,
    user_id: &'a str,
    user_agent: &'a str,
    timestamp: i64,
    device_type: &'static str,
    version: &'a str,
}

/// Encode the response to an `AUTH` challenge.
///
/// Echoes the challenge id and carries a freshly generated v4 UUID as the
/// session-scoped browser id — unique per call.
pub fn encode_auth_response(challenge_id: &str, identity: &str, config: &Config) -> String {
    let response = AuthResponse {
        id: challenge_id,
        origin_action: "AUTH",
        result: AuthResult {
            browser_id: uuid::Uuid::new_v4().to_string(),
            user_id: identity,
            user_agent: &config.auth_user_agent,
            timestamp: chrono::Utc::now().timestamp(),
            device_type: "desktop",
            version: &config.auth_version,
        },
    };
    // Serialization of a plain struct with string/number fields cannot fail.
    serde_json::to_value(response)
        .unwrap_or_else(|_| Value::Null)
        .to_string()
}

/// Encode a keepalive `PING` with a fresh random message id.
pub fn encode_ping(config: &Config) -> String {
    serde_json::json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "version": config.ping_version,
        "action": "PING",
        "data": {},
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_auth_challenge() {
        let msg = decode(r#"{"action":"AUTH","id":"abc"}"#).unwrap();
        assert_eq!(msg, ControlMessage::AuthChallenge { id: "abc".into() });
    }

    #[test]
    fn decodes_pong() {
        let msg = decode(r#"{"action":"PONG","id":"p1"}"#).unwrap();
        assert!(matches!(msg, ControlMessage::Pong { .. }));
    }

    #[test]
    fn unknown_action_is_not_an_error() {
        let msg = decode(r#"{"action":"REFRESH","id":"x"}"#).unwrap();
        assert!(matches!(msg, ControlMessage::Unknown { .. }));
        // No action field at all is also just Unknown.
        let msg = decode(r#"{"hello":"world"}"#).unwrap();
        assert!(matches!(msg, ControlMessage::Unknown { .. }));
    }

    #[test]
    fn malformed_payloads_are_decode_errors() {
        assert!(matches!(decode("not json"), Err(Error::Decode(_))));
        assert!(matches!(decode(r#""just a string""#), Err(Error::Decode(_))));
        assert!(matches!(
            decode(r#"{"action":"AUTH"}"#),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn auth_response_echoes_id_and_identity() {
        let config = Config::default();
        let encoded = encode_auth_response("chal-7", "u42", &config);
        let v: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(v["id"], "chal-7");
        assert_eq!(v["origin_action"], "AUTH");
        assert_eq!(v["result"]["user_id"], "u42");
        assert_eq!(v["result"]["device_type"], "desktop");
        assert_eq!(v["result"]["version"], config.auth_version.as_str());
        assert_eq!(v["result"]["user_agent"], config.auth_user_agent.as_str());
        assert!(v["result"]["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn browser_id_is_fresh_per_response() {
        let config = Config::default();
        let a: Value =
            serde_json::from_str(&encode_auth_response("c1", "u1", &config)).unwrap();
        let b: Value =
            serde_json::from_str(&encode_auth_response("c1", "u1", &config)).unwrap();
        assert_ne!(a["result"]["browser_id"], b["result"]["browser_id"]);
        // Well-formed v4 UUID.
        let id = a["result"]["browser_id"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[test]
    fn ping_shape() {
        let config = Config::default();
        let v: Value = serde_json::from_str(&encode_ping(&config)).unwrap();
        assert_eq!(v["action"], "PING");
        assert_eq!(v["version"], "1.0.0");
        assert_eq!(v["data"], serde_json::json!({}));
        assert!(uuid::Uuid::parse_str(v["id"].as_str().unwrap()).is_ok());

        let w: Value = serde_json::from_str(&encode_ping(&config)).unwrap();
        assert_ne!(v["id"], w["id"]);
    }
}
