// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP and WebSocket transports: router assembly, route guards, REST
//! handlers, and the wire protocol types.

pub mod guard;
pub mod http;
pub mod msg;
pub mod state;
pub mod ws;

pub use state::Gateway;

use std::sync::Arc;

use axum::http::header;
use axum::middleware;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

/// Embedded browser shell (chat page).
const CHAT_HTML: &str = include_str!("../../web/chat.html");
const LOGIN_HTML: &str = include_str!("../../web/login.html");
const SETUP_HTML: &str = include_str!("../../web/setup.html");
const MANIFEST: &str = include_str!("../../web/manifest.webmanifest");
const SERVICE_WORKER: &str = include_str!("../../web/sw.js");

/// Build the axum `Router` with all HTTP and WebSocket routes.
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let ws_path = gateway.settings.ws_path.clone();
    Router::new()
        .route("/", get(|| async { Html(CHAT_HTML) }))
        .route("/login", get(|| async { Html(LOGIN_HTML) }))
        .route("/setup", get(|| async { Html(SETUP_HTML) }))
        .route(
            "/manifest.webmanifest",
            get(|| async { ([(header::CONTENT_TYPE, "application/manifest+json")], MANIFEST) }),
        )
        .route(
            "/sw.js",
            get(|| async { ([(header::CONTENT_TYPE, "text/javascript")], SERVICE_WORKER) }),
        )
        .route("/api/health", get(http::health))
        .route("/api/monitor", get(http::monitor))
        .route("/api/session", get(http::session_get).delete(http::session_delete))
        .route("/api/ws-ticket", get(http::ws_ticket))
        .route("/api/setup/claude/token", post(http::setup_token))
        .route("/api/setup/claude/start", get(http::setup_claude_start))
        .route("/api/setup/claude/exchange", post(http::setup_claude_exchange))
        .route("/api/auth/github", get(http::auth_github))
        .route("/api/auth/callback", get(http::auth_callback))
        .route("/api/debug", get(http::debug_get).delete(http::debug_delete))
        .route(&ws_path, get(ws::ws_handler))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(Arc::clone(&gateway), guard::guard_layer))
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

/// JSON 404 for anything unrouted.
pub async fn not_found() -> impl IntoResponse {
    crate::error::ErrorCode::NotFound.to_http_response("no such route")
}
