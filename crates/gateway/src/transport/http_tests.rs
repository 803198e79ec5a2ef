// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use axum_test::TestServer;

use crate::auth::ticket;
use crate::credential::tokens::load_tokens;
use crate::store::{KEY_OAUTH_PENDING_STATE, KEY_OAUTH_PENDING_VERIFIER, KEY_SETUP_COMPLETE};
use crate::test_support::{
    gateway_with_script, seed_credentials, test_cookie, AnyhowExt, GatewayCtx, TEST_KEY,
    TEST_SECRET,
};
use crate::transport::build_router;

fn server(ctx: &GatewayCtx) -> anyhow::Result<TestServer> {
    TestServer::new(build_router(Arc::clone(&ctx.gateway))).anyhow()
}

fn cookie_value() -> anyhow::Result<HeaderValue> {
    HeaderValue::from_str(&test_cookie()?).anyhow()
}

#[tokio::test]
async fn health_is_degraded_before_setup() -> anyhow::Result<()> {
    let ctx = gateway_with_script(vec![])?;
    let server = server(&ctx)?;

    let resp = server.get("/api/health").await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["setup_complete"], false);
    assert_eq!(body["claude_token_valid"], false);
    assert_eq!(body["container_status"], "running");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[tokio::test]
async fn health_is_ok_once_configured() -> anyhow::Result<()> {
    let ctx = gateway_with_script(vec![])?;
    seed_credentials(&ctx.gateway).await?;
    let server = server(&ctx)?;

    let resp = server.get("/api/health").await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["claude_token_valid"], true);
    assert!(body["claude_token_expires_in_seconds"].as_u64().unwrap_or(0) > 0);
    Ok(())
}

#[tokio::test]
async fn unauthenticated_page_redirects_to_login() -> anyhow::Result<()> {
    let ctx = gateway_with_script(vec![])?;
    let server = server(&ctx)?;

    let resp = server.get("/").await;
    resp.assert_status(StatusCode::FOUND);
    let location = resp.header(header::LOCATION);
    assert_eq!(location.to_str().anyhow()?, "/login?return_to=%2F");
    Ok(())
}

#[tokio::test]
async fn unauthenticated_api_gets_401_envelope() -> anyhow::Result<()> {
    let ctx = gateway_with_script(vec![])?;
    let server = server(&ctx)?;

    let resp = server.get("/api/session").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    Ok(())
}

#[tokio::test]
async fn setup_gate_redirects_until_complete() -> anyhow::Result<()> {
    let ctx = gateway_with_script(vec![])?;
    let server = server(&ctx)?;

    let resp = server.get("/").add_header(header::COOKIE, cookie_value()?).await;
    resp.assert_status(StatusCode::FOUND);
    assert_eq!(resp.header(header::LOCATION).to_str().anyhow()?, "/setup");

    // Setup-class routes stay reachable.
    let resp = server.get("/setup").add_header(header::COOKIE, cookie_value()?).await;
    resp.assert_status(StatusCode::OK);

    ctx.gateway.store.set(KEY_SETUP_COMPLETE, "true").await?;
    let resp = server.get("/").add_header(header::COOKIE, cookie_value()?).await;
    resp.assert_status(StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn session_rest_roundtrip() -> anyhow::Result<()> {
    let ctx = gateway_with_script(vec![])?;
    seed_credentials(&ctx.gateway).await?;
    let server = server(&ctx)?;

    let resp = server.get("/api/session").add_header(header::COOKIE, cookie_value()?).await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["state"], "idle");

    let resp = server.delete("/api/session").add_header(header::COOKIE, cookie_value()?).await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["ok"], true);
    Ok(())
}

#[tokio::test]
async fn ws_ticket_is_fresh_and_signed() -> anyhow::Result<()> {
    let ctx = gateway_with_script(vec![])?;
    seed_credentials(&ctx.gateway).await?;
    let server = server(&ctx)?;

    let resp = server.get("/api/ws-ticket").add_header(header::COOKIE, cookie_value()?).await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    let issued = body["ticket"].as_str().unwrap_or_default();
    assert!(ticket::is_valid(TEST_SECRET, issued, std::time::SystemTime::now()));
    Ok(())
}

#[tokio::test]
async fn pasted_token_completes_setup() -> anyhow::Result<()> {
    let ctx = gateway_with_script(vec![])?;
    let server = server(&ctx)?;

    let resp = server
        .post("/api/setup/claude/token")
        .add_header(header::COOKIE, cookie_value()?)
        .json(&serde_json::json!({"token": "not-a-token"}))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    let resp = server
        .post("/api/setup/claude/token")
        .add_header(header::COOKIE, cookie_value()?)
        .json(&serde_json::json!({"token": "sk-ant-api03-pasted"}))
        .await;
    resp.assert_status(StatusCode::OK);
    assert!(resp
        .header(header::SET_COOKIE)
        .to_str()
        .anyhow()?
        .contains("perch_session="));

    assert_eq!(ctx.gateway.store.get(KEY_SETUP_COMPLETE).await.as_deref(), Some("true"));
    let record = load_tokens(&ctx.gateway.store, &TEST_KEY).await?;
    let record = record.ok_or_else(|| anyhow::anyhow!("expected stored tokens"))?;
    assert_eq!(record.access_token, "sk-ant-api03-pasted");
    // Conservative 7-day expiry.
    let week = 7 * 24 * 60 * 60;
    assert!(record.expires_at >= record.refreshed_at + week - 5);
    Ok(())
}

#[tokio::test]
async fn oauth_setup_start_then_exchange() -> anyhow::Result<()> {
    let mut ctx = gateway_with_script(vec![])?;

    // Point the token endpoint at a local mock upstream.
    let upstream = Router::new().route(
        "/token",
        post(|| async {
            Json(serde_json::json!({
                "access_token": "sk-ant-oat01-new",
                "refresh_token": "sk-ant-ort01-new",
                "expires_in": 28800,
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, upstream).await;
    });
    if let Some(gateway) = Arc::get_mut(&mut ctx.gateway) {
        gateway.token_url = format!("http://{addr}/token");
    }

    let server = server(&ctx)?;

    // Exchange before start fails.
    let resp = server
        .post("/api/setup/claude/exchange")
        .add_header(header::COOKIE, cookie_value()?)
        .json(&serde_json::json!({"code": "codeX#stateY"}))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    let resp = server
        .get("/api/setup/claude/start")
        .add_header(header::COOKIE, cookie_value()?)
        .await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    let url = body["url"].as_str().unwrap_or_default();
    assert!(url.starts_with("https://claude.ai/oauth/authorize?"));
    assert!(ctx.gateway.store.get(KEY_OAUTH_PENDING_VERIFIER).await.is_some());
    assert!(ctx.gateway.store.get(KEY_OAUTH_PENDING_STATE).await.is_some());

    let resp = server
        .post("/api/setup/claude/exchange")
        .add_header(header::COOKIE, cookie_value()?)
        .json(&serde_json::json!({"code": "codeX#stateY"}))
        .await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["ok"], true);

    assert_eq!(ctx.gateway.store.get(KEY_SETUP_COMPLETE).await.as_deref(), Some("true"));
    assert_eq!(ctx.gateway.store.get(KEY_OAUTH_PENDING_VERIFIER).await, None);
    assert_eq!(ctx.gateway.store.get(KEY_OAUTH_PENDING_STATE).await, None);

    let record = load_tokens(&ctx.gateway.store, &TEST_KEY).await?;
    let record = record.ok_or_else(|| anyhow::anyhow!("expected stored tokens"))?;
    assert_eq!(record.access_token, "sk-ant-oat01-new");
    assert_eq!(record.refresh_token.as_deref(), Some("sk-ant-ort01-new"));
    Ok(())
}

#[tokio::test]
async fn debug_ring_over_http() -> anyhow::Result<()> {
    let ctx = gateway_with_script(vec![])?;
    seed_credentials(&ctx.gateway).await?;
    let server = server(&ctx)?;

    ctx.gateway.debug_log.push("test", "first entry", None);
    ctx.gateway.debug_log.push("test", "Bearer sk-ant-oat01-secret", None);

    let resp = server.get("/api/debug").add_header(header::COOKIE, cookie_value()?).await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    let entries = body["entries"].as_array().cloned().unwrap_or_default();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["message"], "first entry");
    assert!(
        !entries[1]["message"].as_str().unwrap_or_default().contains("sk-ant-oat01-secret"),
        "secret must be scrubbed: {entries:?}"
    );

    let resp = server.delete("/api/debug").add_header(header::COOKIE, cookie_value()?).await;
    resp.assert_status(StatusCode::OK);
    assert!(ctx.gateway.debug_log.is_empty());
    Ok(())
}

#[tokio::test]
async fn monitor_extends_health() -> anyhow::Result<()> {
    let ctx = gateway_with_script(vec![])?;
    seed_credentials(&ctx.gateway).await?;
    let server = server(&ctx)?;

    let resp = server.get("/api/monitor").add_header(header::COOKIE, cookie_value()?).await;
    resp.assert_status(StatusCode::OK);
    let body: serde_json::Value = resp.json();
    assert!(body["system"]["memory_total_bytes"].as_u64().unwrap_or(0) > 0);
    assert_eq!(body["usage"]["session_count"], 0);
    assert_eq!(body["container_uptime"], "Up 5 minutes");
    Ok(())
}

#[tokio::test]
async fn stray_http_on_ws_path_gets_426() -> anyhow::Result<()> {
    let ctx = gateway_with_script(vec![])?;
    let server = server(&ctx)?;

    let resp = server.get("/ws").await;
    resp.assert_status(StatusCode::UPGRADE_REQUIRED);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "UPGRADE_REQUIRED");
    Ok(())
}

#[tokio::test]
async fn identity_flow_rejects_state_mismatch() -> anyhow::Result<()> {
    let ctx = gateway_with_script(vec![])?;
    let server = server(&ctx)?;

    let resp = server.get("/api/auth/github").await;
    resp.assert_status(StatusCode::FOUND);
    let location = resp.header(header::LOCATION);
    assert!(location
        .to_str()
        .anyhow()?
        .starts_with("https://github.com/login/oauth/authorize?"));

    let resp = server.get("/api/auth/callback?code=abc&state=wrong").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    Ok(())
}
