// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `perch` binary and exercise
//! its public HTTP surface.

use std::time::Duration;

use perch_specs::{run_unconfigured, PerchProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn unconfigured_start_fails_fast_listing_missing_names() -> anyhow::Result<()> {
    let output = run_unconfigured()?;
    assert_eq!(output.status.code(), Some(1));

    let stderr = String::from_utf8_lossy(&output.stderr);
    for name in [
        "PERCH_APP_SECRET",
        "PERCH_ENCRYPTION_KEY",
        "PERCH_GITHUB_CLIENT_ID",
        "PERCH_GITHUB_CLIENT_SECRET",
        "PERCH_ALLOWED_USER",
        "PERCH_PUBLIC_URL",
    ] {
        assert!(stderr.contains(name), "expected {name} in stderr: {stderr}");
    }
    Ok(())
}

#[tokio::test]
async fn health_is_public_and_degraded_on_fresh_state() -> anyhow::Result<()> {
    let perch = PerchProcess::start()?;
    perch.wait_responsive(TIMEOUT).await?;

    let resp = reqwest::get(format!("{}/api/health", perch.base_url())).await?;
    assert_eq!(resp.status().as_u16(), 503);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["setup_complete"], false);
    assert_eq!(body["claude_token_valid"], false);
    assert!(body["uptime_seconds"].is_number());
    assert!(body["version"].is_string());
    Ok(())
}

#[tokio::test]
async fn protected_page_redirects_and_api_requires_auth() -> anyhow::Result<()> {
    let perch = PerchProcess::start()?;
    perch.wait_responsive(TIMEOUT).await?;

    let client = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build()?;

    let resp = client.get(perch.base_url()).send().await?;
    assert_eq!(resp.status().as_u16(), 302);
    let location = resp
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    assert!(location.starts_with("/login"), "unexpected location: {location}");

    let resp = client.get(format!("{}/api/session", perch.base_url())).send().await?;
    assert_eq!(resp.status().as_u16(), 401);
    Ok(())
}

#[tokio::test]
async fn ws_upgrade_without_auth_is_rejected() -> anyhow::Result<()> {
    let perch = PerchProcess::start()?;
    perch.wait_responsive(TIMEOUT).await?;

    let err = match tokio_tungstenite::connect_async(perch.ws_url()).await {
        Err(e) => e.to_string(),
        Ok(_) => anyhow::bail!("expected 401 on unauthenticated upgrade"),
    };
    assert!(err.contains("401"), "expected 401, got: {err}");
    Ok(())
}
