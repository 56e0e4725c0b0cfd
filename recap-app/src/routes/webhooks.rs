//! Webhook ingress: verify, ack fast, enqueue out-of-band.
//!
//! Both endpoints acknowledge the caller as soon as the signature is
//! settled; extraction and the queue insert happen on a spawned task so
//! delivery latency never depends on the store. A degraded store is
//! logged, never surfaced as a 5xx.

use crate::billing::extract_billing_event;
use crate::model::{NewEvent, Provider, payload_hash};
use crate::server::GatewayState;
use crate::signature;
use axum::body::Bytes;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Extension;
use recap_channels::webhook::{ChatEvent, extract_event};
use std::collections::HashMap;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/webhooks/chat", post(post_chat).get(get_chat_verify))
        .route("/webhooks/billing", post(post_billing))
}

/// Subscription handshake: echo `hub.challenge` when the verify token
/// matches.
#[tracing::instrument(level = "info", skip_all)]
pub async fn get_chat_verify(
    Extension(state): Extension<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or("");
    let token = params
        .get("hub.verify_token")
        .map(String::as_str)
        .unwrap_or("");
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    let expected = state.cfg.whatsapp.verify_token.trim();
    if mode == "subscribe" && !expected.is_empty() && token == expected {
        tracing::info!("chat webhook verification handshake accepted");
        return (StatusCode::OK, challenge).into_response();
    }
    tracing::warn!(mode, "chat webhook verification handshake rejected");
    StatusCode::FORBIDDEN.into_response()
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn post_chat(
    Extension(state): Extension<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let app_secret = state.cfg.whatsapp.app_secret.trim();
    if !app_secret.is_empty() {
        let header = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if let Err(reason) = signature::verify_hub_signature(app_secret, &body, header) {
            tracing::warn!(reason, "chat webhook signature verification failed");
            return StatusCode::UNAUTHORIZED;
        }
    }

    // Ack now; extract and persist out-of-band.
    tokio::spawn(ingest_chat(state, body));
    StatusCode::OK
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn post_billing(
    Extension(state): Extension<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    // Verification runs on the raw body, strictly before any parsing.
    let header = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if let Err(reason) =
        signature::verify_hex_hmac(&state.cfg.billing.signing_secret, &body, header)
    {
        tracing::warn!(reason, "billing webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    tokio::spawn(ingest_billing(state, body));
    StatusCode::OK
}

pub async fn ingest_chat(state: Arc<GatewayState>, body: Bytes) {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(%e, "chat webhook body is not valid JSON; dropping");
            return;
        }
    };

    let event = match extract_event(&payload) {
        Some(ChatEvent::Message(msg)) => msg,
        Some(ChatEvent::Receipt(receipt)) => {
            tracing::debug!(status = %receipt.status, "chat status receipt; not enqueued");
            return;
        }
        None => {
            tracing::debug!("chat webhook carried nothing actionable; dropping");
            return;
        }
    };

    let new_event = NewEvent {
        provider: Provider::Chat,
        provider_event_id: event.message_id.into_inner(),
        event_type: "message".to_string(),
        payload_hash: payload_hash(&body),
        sender: Some(event.sender.into_inner()),
        message_type: Some(event.message_type),
        text: Some(event.text),
        detail: None,
        provider_ts: event.timestamp,
    };
    insert_or_log(&state, new_event).await;
}

pub async fn ingest_billing(state: Arc<GatewayState>, body: Bytes) {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(%e, "billing webhook body is not valid JSON; dropping");
            return;
        }
    };

    let Some((event_name, fields)) = extract_billing_event(&payload) else {
        tracing::debug!("billing webhook carried no subscription event; dropping");
        return;
    };

    let detail = match serde_json::to_string(&fields) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(%e, "billing fields failed to serialize; dropping");
            return;
        }
    };

    let new_event = NewEvent {
        provider: Provider::Billing,
        // The provider sends no native delivery id; the payload hash
        // stands in as the dedup key.
        provider_event_id: payload_hash(&body),
        event_type: event_name,
        payload_hash: payload_hash(&body),
        sender: fields.user_id.clone(),
        message_type: None,
        text: None,
        detail: Some(detail),
        provider_ts: None,
    };
    insert_or_log(&state, new_event).await;
}

async fn insert_or_log(state: &GatewayState, event: NewEvent) {
    let provider = event.provider.as_str();
    match state.store.insert_event(event, crate::model::now_ts()).await {
        Ok(true) => tracing::info!(provider, "webhook event enqueued"),
        Ok(false) => tracing::info!(provider, "webhook event already queued; redelivery ignored"),
        // The caller was already acked; a degraded store must not crash
        // ingestion.
        Err(e) => tracing::error!(%e, provider, "event store insert failed; webhook dropped"),
    }
}
