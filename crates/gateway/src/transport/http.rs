// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request/response types and axum handler implementations.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use crate::auth::{cookie, ticket};
use crate::credential::oauth::{self, now_secs};
use crate::credential::pkce;
use crate::credential::tokens::{store_tokens, TokenRecord};
use crate::credential::PASTED_TOKEN_EXPIRES_IN;
use crate::error::ErrorCode;
use crate::monitor;
use crate::sandbox::ContainerState;
use crate::store::{
    KEY_AUTH_PENDING_STATE, KEY_AUTH_RETURN_TO, KEY_OAUTH_PENDING_STATE,
    KEY_OAUTH_PENDING_VERIFIER, KEY_SETUP_COMPLETE, KEY_VAULT_LAST_PUSH,
};
use crate::transport::guard::found;
use crate::transport::state::Gateway;

// -- Health & monitor ---------------------------------------------------------

struct HealthSnapshot {
    ok: bool,
    body: serde_json::Value,
}

async fn compute_health(gateway: &Gateway) -> HealthSnapshot {
    let now = now_secs();
    let setup_complete = gateway
        .store
        .get(KEY_SETUP_COMPLETE)
        .await
        .map(|v| v == "true")
        .unwrap_or(false);
    let container = gateway.sandbox.state().await;

    let token_present = gateway.store.get(crate::store::KEY_OAUTH_TOKEN).await.is_some();
    let expires_at: Option<u64> = gateway
        .store
        .get(crate::store::KEY_TOKEN_EXPIRES_AT)
        .await
        .and_then(|v| v.parse().ok());
    let token_valid = token_present && expires_at.map(|t| t > now).unwrap_or(false);
    let expires_in = expires_at.map(|t| t.saturating_sub(now));

    let ok = setup_complete && container == ContainerState::Running && token_valid;
    let mut body = serde_json::json!({
        "status": if ok { "ok" } else { "degraded" },
        "uptime_seconds": gateway.started_at.elapsed().as_secs(),
        "setup_complete": setup_complete,
        "container_status": container.as_str(),
        "claude_token_valid": token_valid,
        "claude_token_expires_in_seconds": expires_in,
        "version": env!("CARGO_PKG_VERSION"),
    });
    if let Some(last_push) = gateway.store.get(KEY_VAULT_LAST_PUSH).await {
        body["vault_last_push"] = serde_json::Value::String(last_push);
    }
    HealthSnapshot { ok, body }
}

/// `GET /api/health` — unauthenticated liveness/readiness summary.
/// 200 when everything is in order, 503 when degraded.
pub async fn health(State(gateway): State<Arc<Gateway>>) -> Response {
    let snap = compute_health(&gateway).await;
    let status = if snap.ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(snap.body)).into_response()
}

/// `GET /api/monitor` — health extended with host metrics and usage totals.
pub async fn monitor(State(gateway): State<Arc<Gateway>>) -> Response {
    let snap = compute_health(&gateway).await;
    let system = monitor::snapshot();
    let sessions = gateway.store.sessions().await;
    let usage = monitor::usage_aggregates(&sessions);

    let mut body = snap.body;
    body["system"] = serde_json::to_value(&system).unwrap_or_default();
    body["usage"] = serde_json::to_value(&usage).unwrap_or_default();
    body["container_uptime"] =
        gateway.sandbox.status_line().await.map(serde_json::Value::String).unwrap_or_default();
    Json(body).into_response()
}

// -- Session REST -------------------------------------------------------------

/// `GET /api/session` — current session state label.
pub async fn session_get(State(gateway): State<Arc<Gateway>>) -> Response {
    let state = gateway.manager.state().await;
    Json(serde_json::json!({ "state": state.as_str() })).into_response()
}

/// `DELETE /api/session` — interrupt the running Agent, if any.
pub async fn session_delete(State(gateway): State<Arc<Gateway>>) -> Response {
    gateway.manager.interrupt().await;
    Json(serde_json::json!({ "ok": true })).into_response()
}

// -- WS ticket ----------------------------------------------------------------

/// `GET /api/ws-ticket` — a short-lived ticket for the WebSocket upgrade.
pub async fn ws_ticket(State(gateway): State<Arc<Gateway>>) -> Response {
    match ticket::issue(&gateway.settings.app_secret, std::time::SystemTime::now()) {
        Ok(ticket) => Json(serde_json::json!({ "ticket": ticket })).into_response(),
        Err(e) => ErrorCode::Internal.to_http_response(e.to_string()).into_response(),
    }
}

// -- Setup --------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SetupTokenBody {
    pub token: String,
}

/// `POST /api/setup/claude/token` — accept a pasted long-lived token.
/// Stored with a conservative 7-day expiry.
pub async fn setup_token(
    State(gateway): State<Arc<Gateway>>,
    Json(body): Json<SetupTokenBody>,
) -> Response {
    let token = body.token.trim();
    if !token.starts_with("sk-ant-") {
        return ErrorCode::BadRequest
            .to_http_response("token must start with sk-ant-")
            .into_response();
    }

    let now = now_secs();
    let record = TokenRecord {
        access_token: token.to_owned(),
        refresh_token: None,
        expires_at: now + PASTED_TOKEN_EXPIRES_IN,
        refreshed_at: now,
    };
    if let Err(e) = store_tokens(&gateway.store, &gateway.settings.encryption_key, &record).await
    {
        return ErrorCode::Internal.to_http_response(e.to_string()).into_response();
    }
    if let Err(e) = gateway.store.set(KEY_SETUP_COMPLETE, "true").await {
        return ErrorCode::Internal.to_http_response(e.to_string()).into_response();
    }

    gateway.debug_log.push("setup", "api token stored", None);
    match cookie::issue(&gateway.settings.app_secret) {
        Ok(value) => (
            [(
                header::SET_COOKIE,
                cookie::set_cookie_header(&value, gateway.settings.secure_cookies()),
            )],
            Json(serde_json::json!({ "ok": true })),
        )
            .into_response(),
        Err(e) => ErrorCode::Internal.to_http_response(e.to_string()).into_response(),
    }
}

/// `GET /api/setup/claude/start` — begin the PKCE flow; persists the
/// verifier and state for the later exchange.
pub async fn setup_claude_start(State(gateway): State<Arc<Gateway>>) -> Response {
    let verifier = pkce::generate_code_verifier();
    let state = pkce::generate_state();
    let challenge = pkce::code_challenge(&verifier);

    if let Err(e) = gateway.store.set(KEY_OAUTH_PENDING_VERIFIER, &verifier).await {
        return ErrorCode::Internal.to_http_response(e.to_string()).into_response();
    }
    if let Err(e) = gateway.store.set(KEY_OAUTH_PENDING_STATE, &state).await {
        return ErrorCode::Internal.to_http_response(e.to_string()).into_response();
    }

    let url = pkce::build_authorization_url(&challenge, &state, &Default::default());
    Json(serde_json::json!({ "url": url })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ExchangeBody {
    pub code: String,
}

/// `POST /api/setup/claude/exchange` — trade the pasted `<code>#<state>`
/// artifact for tokens using the stored PKCE verifier.
pub async fn setup_claude_exchange(
    State(gateway): State<Arc<Gateway>>,
    Json(body): Json<ExchangeBody>,
) -> Response {
    let Some(verifier) = gateway.store.get(KEY_OAUTH_PENDING_VERIFIER).await else {
        return ErrorCode::BadRequest
            .to_http_response("no pending authorization; restart setup")
            .into_response();
    };

    let (code, state) = oauth::split_code(&body.code);
    let record = match oauth::exchange_code(
        &gateway.http,
        &gateway.token_url,
        &code,
        &verifier,
        state.as_deref(),
    )
    .await
    {
        Ok(record) => record,
        Err(e) => {
            gateway.debug_log.push("setup", &format!("token exchange failed: {e}"), None);
            return ErrorCode::BadRequest.to_http_response(e.to_string()).into_response();
        }
    };

    if let Err(e) = store_tokens(&gateway.store, &gateway.settings.encryption_key, &record).await
    {
        return ErrorCode::Internal.to_http_response(e.to_string()).into_response();
    }
    let _ = gateway.store.set(KEY_SETUP_COMPLETE, "true").await;
    let _ = gateway.store.delete(KEY_OAUTH_PENDING_VERIFIER).await;
    let _ = gateway.store.delete(KEY_OAUTH_PENDING_STATE).await;

    gateway.debug_log.push("setup", "oauth tokens stored", None);
    Json(serde_json::json!({ "ok": true })).into_response()
}

// -- Identity sign-in ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AuthStartQuery {
    pub return_to: Option<String>,
}

/// `GET /api/auth/github` — redirect the browser into the provider flow.
pub async fn auth_github(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<AuthStartQuery>,
) -> Response {
    let state = pkce::generate_state();
    if let Err(e) = gateway.store.set(KEY_AUTH_PENDING_STATE, &state).await {
        return ErrorCode::Internal.to_http_response(e.to_string()).into_response();
    }
    // Only same-site paths are honored as post-login destinations.
    match query.return_to.as_deref() {
        Some(dest) if dest.starts_with('/') && !dest.starts_with("//") => {
            let _ = gateway.store.set(KEY_AUTH_RETURN_TO, dest).await;
        }
        _ => {
            let _ = gateway.store.delete(KEY_AUTH_RETURN_TO).await;
        }
    }

    let redirect_uri = format!("{}/api/auth/callback", gateway.settings.public_url);
    found(&crate::auth::identity::authorize_url(
        &gateway.settings.github_client_id,
        &redirect_uri,
        &state,
    ))
}

#[derive(Debug, Deserialize)]
pub struct AuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// `GET /api/auth/callback` — finish sign-in; only the allow-listed
/// identity gets a session cookie.
pub async fn auth_callback(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<AuthCallbackQuery>,
) -> Response {
    let (Some(code), Some(state)) = (query.code.as_deref(), query.state.as_deref()) else {
        return ErrorCode::BadRequest.to_http_response("missing code or state").into_response();
    };

    let pending = gateway.store.get(KEY_AUTH_PENDING_STATE).await;
    if pending.as_deref() != Some(state) {
        return ErrorCode::Unauthorized.to_http_response("state mismatch").into_response();
    }
    let _ = gateway.store.delete(KEY_AUTH_PENDING_STATE).await;

    let access_token = match crate::auth::identity::exchange_code(
        &gateway.http,
        &gateway.settings.github_client_id,
        &gateway.settings.github_client_secret,
        code,
    )
    .await
    {
        Ok(token) => token,
        Err(e) => {
            warn!("identity exchange failed: {e}");
            gateway.debug_log.push("auth", &format!("identity exchange failed: {e}"), None);
            return ErrorCode::Unauthorized.to_http_response("sign-in failed").into_response();
        }
    };

    let login = match crate::auth::identity::fetch_login(&gateway.http, &access_token).await {
        Ok(login) => login,
        Err(e) => {
            warn!("identity lookup failed: {e}");
            return ErrorCode::Unauthorized.to_http_response("sign-in failed").into_response();
        }
    };

    if !login.eq_ignore_ascii_case(&gateway.settings.allowed_user) {
        gateway.debug_log.push("auth", &format!("rejected sign-in from {login}"), None);
        return ErrorCode::Forbidden.to_http_response("not the allow-listed user").into_response();
    }

    let destination = gateway
        .store
        .get(KEY_AUTH_RETURN_TO)
        .await
        .unwrap_or_else(|| "/".to_owned());
    let _ = gateway.store.delete(KEY_AUTH_RETURN_TO).await;

    match cookie::issue(&gateway.settings.app_secret) {
        Ok(value) => {
            gateway.debug_log.push("auth", &format!("{login} signed in"), None);
            (
                [(
                    header::SET_COOKIE,
                    cookie::set_cookie_header(&value, gateway.settings.secure_cookies()),
                )],
                found(&destination),
            )
                .into_response()
        }
        Err(e) => ErrorCode::Internal.to_http_response(e.to_string()).into_response(),
    }
}

// -- Debug ring buffer --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DebugQuery {
    pub limit: Option<usize>,
}

/// `GET /api/debug` — dump the in-memory log ring, newest last.
pub async fn debug_get(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<DebugQuery>,
) -> Response {
    Json(serde_json::json!({ "entries": gateway.debug_log.entries(query.limit) }))
        .into_response()
}

/// `DELETE /api/debug` — clear the ring.
pub async fn debug_delete(State(gateway): State<Arc<Gateway>>) -> Response {
    gateway.debug_log.clear();
    Json(serde_json::json!({ "ok": true })).into_response()
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
