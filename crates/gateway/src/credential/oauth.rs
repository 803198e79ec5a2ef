// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Code/token exchanges with the assistant service's OAuth endpoints.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::{DEFAULT_EXPIRES_IN, REFRESH_THRESHOLD};
use crate::credential::pkce::{CLIENT_ID, REDIRECT_URI};
use crate::credential::tokens::TokenRecord;

/// Token endpoint.
pub const TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";

/// Standard OAuth2 token response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    fn expires_in_or_default(&self) -> u64 {
        self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN)
    }
}

/// Exchange an authorization code (plus PKCE verifier) for tokens.
///
/// Non-2xx responses fail with the upstream status and body so the setup
/// caller can see what went wrong.
pub async fn exchange_code(
    client: &reqwest::Client,
    token_url: &str,
    code: &str,
    verifier: &str,
    state: Option<&str>,
) -> anyhow::Result<TokenRecord> {
    let mut body = serde_json::json!({
        "grant_type": "authorization_code",
        "client_id": CLIENT_ID,
        "code": code,
        "redirect_uri": REDIRECT_URI,
        "code_verifier": verifier,
    });
    if let Some(state) = state {
        body["state"] = serde_json::Value::String(state.to_owned());
    }

    let resp = client
        .post(token_url)
        .header("Content-Type", "application/json")
        .body(body.to_string())
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("token exchange failed ({status}): {text}");
    }

    let token: TokenResponse = resp.json().await?;
    Ok(record_from_response(&token, None, now_secs()))
}

/// Refresh an access token. The old refresh token is preserved when the
/// upstream does not rotate it.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    token_url: &str,
    refresh_token: &str,
) -> anyhow::Result<TokenRecord> {
    let resp = client
        .post(token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", CLIENT_ID),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("token refresh failed ({status}): {text}");
    }

    let token: TokenResponse = resp.json().await?;
    Ok(record_from_response(&token, Some(refresh_token), now_secs()))
}

/// Assemble a [`TokenRecord`] from an upstream response.
pub fn record_from_response(
    resp: &TokenResponse,
    previous_refresh: Option<&str>,
    now_secs: u64,
) -> TokenRecord {
    TokenRecord {
        access_token: resp.access_token.clone(),
        refresh_token: resp
            .refresh_token
            .clone()
            .or_else(|| previous_refresh.map(str::to_owned)),
        expires_at: now_secs + resp.expires_in_or_default(),
        refreshed_at: now_secs,
    }
}

/// Whether the access token is absent or expires within the threshold.
pub fn needs_refresh(expires_at: Option<u64>, threshold_secs: u64, now_secs: u64) -> bool {
    match expires_at {
        None => true,
        Some(t) => t.saturating_sub(now_secs) < threshold_secs,
    }
}

/// [`needs_refresh`] with the standard 30-minute threshold and wall clock.
pub fn is_stale(expires_at: Option<u64>) -> bool {
    needs_refresh(expires_at, REFRESH_THRESHOLD.as_secs(), now_secs())
}

/// Split a pasted authorization artifact of the form `<code>#<state>`.
///
/// Trims surrounding whitespace first; without a `#`, the whole value is
/// the code and the state is absent.
pub fn split_code(raw: &str) -> (String, Option<String>) {
    let trimmed = raw.trim();
    match trimmed.split_once('#') {
        Some((code, state)) => (code.to_owned(), Some(state.to_owned())),
        None => (trimmed.to_owned(), None),
    }
}

/// Wall-clock epoch seconds.
pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;
