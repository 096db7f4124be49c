//! Webhook HTTP surface (axum).
//!
//! - `POST /api/webhooks/:agent_id` — generic, HMAC-verified JSON.
//! - `POST /api/webhooks/:agent_id/ha` — home-automation callbacks, unsigned.
//! - `POST /api/webhooks/:agent_id/ha/state` — state changes, needs `entity_id`.
//! - `POST /api/webhooks/gmail/push` — pub/sub notification, fans out to
//!   agents with an active Gmail watch.
//!
//! Signature schemes (any one suffices when a secret is configured):
//! `X-Hub-Signature-256: sha256=<hex>`, `Stripe-Signature: t=…,v1=<hex>`,
//! `X-Webhook-Signature: [sha256=]<hex>` — all HMAC-SHA256 over the raw body.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use attache::{AgentRegistry, EventPriority, EventRouter, RuntimeEvent};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
    pub router: Arc<EventRouter>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/webhooks/:agent_id", post(generic))
        .route("/api/webhooks/:agent_id/ha", post(home_automation))
        .route("/api/webhooks/:agent_id/ha/state", post(ha_state))
        .route("/api/webhooks/gmail/push", post(gmail_push))
        .with_state(state)
}

fn hmac_hex(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Verifies any of the three supported signature headers against the secret.
fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    let expected = hmac_hex(secret, body);

    if let Some(value) = header_str(headers, "x-hub-signature-256") {
        if let Some(hex) = value.strip_prefix("sha256=") {
            return constant_eq(hex, &expected);
        }
        return false;
    }
    if let Some(value) = header_str(headers, "stripe-signature") {
        // t=<ts>,v1=<hex>[,…] — only v1 is compared.
        return value
            .split(',')
            .filter_map(|part| part.trim().strip_prefix("v1="))
            .any(|hex| constant_eq(hex, &expected));
    }
    if let Some(value) = header_str(headers, "x-webhook-signature") {
        let hex = value.strip_prefix("sha256=").unwrap_or(value);
        return constant_eq(hex, &expected);
    }
    false
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Detects the provider and event type from well-known headers.
fn detect_source(headers: &HeaderMap, body: &Value) -> (String, String) {
    if let Some(event) = header_str(headers, "x-github-event") {
        return ("github".into(), event.to_string());
    }
    if headers.contains_key("stripe-signature") {
        let event = body
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("event");
        return ("stripe".into(), event.to_string());
    }
    if let Some(event) = header_str(headers, "x-gitlab-event") {
        return ("gitlab".into(), event.to_lowercase().replace(' ', "_"));
    }
    if headers.contains_key("x-atlassian-webhook-identifier") {
        let event = header_str(headers, "x-event-key").unwrap_or("event");
        return ("atlassian".into(), event.to_string());
    }
    if let Some(event) = header_str(headers, "linear-event") {
        return ("linear".into(), event.to_lowercase());
    }
    ("generic".into(), "event".into())
}

async fn generic(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Some(orchestrator) = state.registry.get(&agent_id) else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown agent"})));
    };

    if let Some(secret) = orchestrator.webhook_secret().await {
        if !verify_signature(&secret, &headers, &body) {
            warn!(agent = %agent_id, "webhook signature invalid or missing");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "signature invalid"})),
            );
        }
    }

    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let (provider, event) = detect_source(&headers, &payload);
    debug!(agent = %agent_id, provider, event, "webhook accepted");

    let runtime_event = RuntimeEvent::new("webhook", format!("{provider}.{event}"), payload)
        .with_targets(vec![agent_id]);
    state.router.dispatch(runtime_event).await;
    (StatusCode::OK, Json(json!({"ok": true})))
}

async fn home_automation(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if state.registry.get(&agent_id).is_none() {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown agent"})));
    }
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let event_type = payload
        .get("event_type")
        .and_then(|v| v.as_str())
        .unwrap_or("automation")
        .to_string();
    let event = RuntimeEvent::new("ha", event_type, payload).with_targets(vec![agent_id]);
    state.router.dispatch(event).await;
    (StatusCode::OK, Json(json!({"ok": true})))
}

async fn ha_state(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if state.registry.get(&agent_id).is_none() {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown agent"})));
    }
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    if payload.get("entity_id").and_then(|v| v.as_str()).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "entity_id required"})),
        );
    }
    let event =
        RuntimeEvent::new("ha", "state_changed", payload).with_targets(vec![agent_id]);
    state.router.dispatch(event).await;
    (StatusCode::OK, Json(json!({"ok": true})))
}

async fn gmail_push(
    State(state): State<AppState>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    // Pub/sub wraps the notification as {message: {data: <base64 JSON>}}.
    let decoded = payload
        .get("message")
        .and_then(|m| m.get("data"))
        .and_then(|d| d.as_str())
        .and_then(|b64| base64::engine::general_purpose::STANDARD.decode(b64).ok())
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .unwrap_or(Value::Null);

    // Fan out to agents with an active Gmail watch.
    let mut targets = Vec::new();
    for agent_id in state.registry.listing() {
        if let Some(orchestrator) = state.registry.get(&agent_id) {
            if orchestrator.gmail_enabled().await {
                targets.push(agent_id);
            }
        }
    }
    if targets.is_empty() {
        return (StatusCode::OK, Json(json!({"ok": true, "delivered": 0})));
    }
    let event = RuntimeEvent::new("gmail", "push", decoded)
        .with_targets(targets)
        .with_priority(EventPriority::High);
    let delivered = state.router.dispatch(event).await;
    (StatusCode::OK, Json(json!({"ok": true, "delivered": delivered})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_verification_accepts_all_three_schemes() {
        let secret = "s3cret";
        let body = br#"{"hello":"world"}"#;
        let sig = hmac_hex(secret, body);

        let mut h = HeaderMap::new();
        h.insert("x-hub-signature-256", format!("sha256={sig}").parse().unwrap());
        assert!(verify_signature(secret, &h, body));

        let mut h = HeaderMap::new();
        h.insert(
            "stripe-signature",
            format!("t=12345,v1={sig}").parse().unwrap(),
        );
        assert!(verify_signature(secret, &h, body));

        let mut h = HeaderMap::new();
        h.insert("x-webhook-signature", sig.parse::<axum::http::HeaderValue>().unwrap());
        assert!(verify_signature(secret, &h, body));
    }

    #[test]
    fn wrong_signature_rejected() {
        let body = b"payload";
        let mut h = HeaderMap::new();
        let bad = hmac_hex("other-secret", body);
        h.insert("x-hub-signature-256", format!("sha256={bad}").parse().unwrap());
        assert!(!verify_signature("real-secret", &h, body));
    }

    #[test]
    fn unsigned_request_fails_when_secret_set() {
        assert!(!verify_signature("secret", &HeaderMap::new(), b"body"));
    }

    #[test]
    fn source_detection() {
        let mut h = HeaderMap::new();
        h.insert("x-github-event", "push".parse().unwrap());
        assert_eq!(detect_source(&h, &Value::Null), ("github".into(), "push".into()));

        let mut h = HeaderMap::new();
        h.insert("x-gitlab-event", "Merge Request Hook".parse().unwrap());
        assert_eq!(
            detect_source(&h, &Value::Null),
            ("gitlab".into(), "merge_request_hook".into())
        );

        let mut h = HeaderMap::new();
        h.insert("x-atlassian-webhook-identifier", "abc".parse().unwrap());
        h.insert("x-event-key", "jira:issue_updated".parse().unwrap());
        assert_eq!(
            detect_source(&h, &Value::Null),
            ("atlassian".into(), "jira:issue_updated".into())
        );

        assert_eq!(
            detect_source(&HeaderMap::new(), &Value::Null),
            ("generic".into(), "event".into())
        );
    }
}
