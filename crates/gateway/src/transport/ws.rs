// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport: authenticated upgrade, keepalive, and per-connection
//! routing of client messages into the session manager.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::auth::{cookie, ticket};
use crate::credential::oauth;
use crate::credential::tokens::{load_tokens, store_tokens};
use crate::error::ErrorCode;
use crate::session::SessionError;
use crate::transport::guard;
use crate::transport::msg::{ClientMessage, ServerMessage};
use crate::transport::state::Gateway;

/// Protocol ping cadence while a connection is open.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Query parameters for the WebSocket upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler. Auth comes from the session cookie or a
/// `?token=` parameter carrying either a cookie value or a WS ticket;
/// failures get a bodyless 401. A stray plain-HTTP request to this path
/// gets 426 so misrouted clients see a meaningful error.
pub async fn ws_handler(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(ws) = ws else {
        return ErrorCode::UpgradeRequired
            .to_http_response("WebSocket upgrade required")
            .into_response();
    };

    if !upgrade_authorized(&gateway, &headers, query.token.as_deref()) {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_connection(gateway, socket))
}

/// Accept a signed session cookie (header or `?token=`) or an unexpired
/// WS ticket (`?token=`).
fn upgrade_authorized(gateway: &Gateway, headers: &HeaderMap, token: Option<&str>) -> bool {
    if guard::authenticated(gateway, headers) {
        return true;
    }
    let Some(token) = token else {
        return false;
    };
    let secret = &gateway.settings.app_secret;
    cookie::verify(secret, token).is_some()
        || ticket::is_valid(secret, token, std::time::SystemTime::now())
}

/// Per-connection loop: one writer task draining the subscriber queue plus
/// keepalive pings, one reader loop routing inbound frames.
async fn handle_connection(gateway: Arc<Gateway>, socket: WebSocket) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let direct_tx = tx.clone();
    let subscriber_id = gateway.manager.add_subscriber(tx).await;
    debug!(subscriber = subscriber_id, "ws connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(KEEPALIVE_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.tick().await; // the first tick completes immediately
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let Ok(json) = serde_json::to_string(&msg) else { continue };
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => {
                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(msg) => msg,
                    Err(_) => {
                        let _ = direct_tx.send(ServerMessage::Error {
                            message: "invalid message".to_owned(),
                        });
                        continue;
                    }
                };
                handle_client_message(&gateway, client_msg, &direct_tx).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    gateway.manager.remove_subscriber(subscriber_id).await;
    writer.abort();
    debug!(subscriber = subscriber_id, "ws disconnected");
}

/// Route one parsed client message. Errors are delivered only to the
/// originating connection.
async fn handle_client_message(
    gateway: &Arc<Gateway>,
    msg: ClientMessage,
    direct_tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    match msg {
        ClientMessage::Message { content } => {
            if let Err(e) = deliver_message(gateway, &content).await {
                let _ = direct_tx.send(ServerMessage::Error { message: e.to_string() });
            }
        }
        ClientMessage::PermissionResponse { id, allow } => {
            gateway.manager.handle_permission_response(&id, allow).await;
        }
        ClientMessage::Interrupt => {
            gateway.manager.interrupt().await;
        }
    }
}

/// Deliver a user turn, lazily starting a session when none is active:
/// load tokens, refresh if stale, ensure the sandbox is up, start the
/// Agent, then send.
async fn deliver_message(gateway: &Arc<Gateway>, content: &str) -> anyhow::Result<()> {
    match gateway.manager.send_message(content).await {
        Ok(()) => return Ok(()),
        Err(SessionError::NoActiveSession) => {}
        Err(e) => return Err(e.into()),
    }

    let token = resolve_access_token(gateway).await?;
    gateway.sandbox.ensure_running().await?;

    match gateway.manager.start_session(&token, &gateway.settings.wrapper_path).await {
        Ok(_) => {}
        Err(e) => {
            // A concurrent connection may have won the start race; if so the
            // message can still be delivered below.
            if e.downcast_ref::<SessionError>().is_none() {
                return Err(e);
            }
        }
    }
    gateway.manager.send_message(content).await?;
    Ok(())
}

/// Load persisted tokens, proactively refreshing when stale. A failed
/// refresh is logged but not fatal; the extant token is passed through.
async fn resolve_access_token(gateway: &Arc<Gateway>) -> anyhow::Result<String> {
    let Some(record) =
        load_tokens(&gateway.store, &gateway.settings.encryption_key).await?
    else {
        anyhow::bail!("no credentials configured; finish setup first");
    };

    if !oauth::is_stale(Some(record.expires_at)) {
        return Ok(record.access_token);
    }
    let Some(refresh_token) = record.refresh_token.as_deref() else {
        return Ok(record.access_token);
    };

    match oauth::refresh_access_token(&gateway.http, &gateway.token_url, refresh_token).await {
        Ok(refreshed) => {
            store_tokens(&gateway.store, &gateway.settings.encryption_key, &refreshed).await?;
            gateway.debug_log.push("oauth", "access token refreshed", None);
            Ok(refreshed.access_token)
        }
        Err(e) => {
            tracing::warn!("token refresh failed: {e}");
            gateway.debug_log.push("oauth", &format!("token refresh failed: {e}"), None);
            Ok(record.access_token)
        }
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
