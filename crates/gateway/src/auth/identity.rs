// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owner sign-in via the GitHub OAuth web flow. One identity is
//! allow-listed; everyone else gets the door.

use serde::Deserialize;

const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
}

/// Build the GitHub authorization redirect URL.
pub fn authorize_url(client_id: &str, redirect_uri: &str, state: &str) -> String {
    format!(
        "{AUTHORIZE_URL}?client_id={}&redirect_uri={}&scope=read%3Auser&state={}",
        urlencode(client_id),
        urlencode(redirect_uri),
        urlencode(state),
    )
}

/// Exchange an authorization code for a GitHub access token.
pub async fn exchange_code(
    client: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
    code: &str,
) -> anyhow::Result<String> {
    let resp = client
        .post(TOKEN_URL)
        .header("Accept", "application/json")
        .form(&[("client_id", client_id), ("client_secret", client_secret), ("code", code)])
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("identity code exchange failed ({status}): {text}");
    }

    let token: AccessTokenResponse = resp.json().await?;
    Ok(token.access_token)
}

/// Resolve the authenticated user's login name.
pub async fn fetch_login(client: &reqwest::Client, access_token: &str) -> anyhow::Result<String> {
    let resp = client
        .get(USER_URL)
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "perch")
        .bearer_auth(access_token)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        anyhow::bail!("identity lookup failed ({status})");
    }

    let user: GithubUser = resp.json().await?;
    Ok(user.login)
}

/// Percent-encode a URL query component.
pub(crate) fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push(char::from(HEX[(b >> 4) as usize]));
                out.push(char::from(HEX[(b & 0xf) as usize]));
            }
        }
    }
    out
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
