// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth authorization code + PKCE (RFC 7636) helpers for the assistant
//! service.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::auth::identity::urlencode;

/// Well-known client id the assistant service issues to its own tooling.
pub const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
/// Authorization endpoint.
pub const AUTHORIZE_URL: &str = "https://claude.ai/oauth/authorize";
/// Upstream-controlled callback that displays the code for pasting.
pub const REDIRECT_URI: &str = "https://console.anthropic.com/oauth/code/callback";
/// Scopes the gateway requests.
pub const SCOPE: &str = "org:create_api_key user:profile user:inference";

/// Generate a PKCE code verifier: 32 random bytes as 43 URL-safe chars.
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// code_challenge = base64url_nopad(sha256(verifier)).
pub fn code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate a random OAuth state parameter.
pub fn generate_state() -> String {
    generate_code_verifier()
}

/// Optional overrides for [`build_authorization_url`].
#[derive(Debug, Default, Clone)]
pub struct AuthUrlOverrides {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
}

/// Build the full authorization URL with PKCE parameters.
pub fn build_authorization_url(
    code_challenge: &str,
    state: &str,
    overrides: &AuthUrlOverrides,
) -> String {
    let client_id = overrides.client_id.as_deref().unwrap_or(CLIENT_ID);
    let redirect_uri = overrides.redirect_uri.as_deref().unwrap_or(REDIRECT_URI);
    let scope = overrides.scope.as_deref().unwrap_or(SCOPE);

    format!(
        "{AUTHORIZE_URL}?code=true\
         &client_id={client_id}\
         &response_type=code\
         &redirect_uri={redirect_uri}\
         &scope={scope}\
         &code_challenge={code_challenge}\
         &code_challenge_method=S256\
         &state={state}",
        client_id = urlencode(client_id),
        redirect_uri = urlencode(redirect_uri),
        scope = urlencode(scope),
        code_challenge = urlencode(code_challenge),
        state = urlencode(state),
    )
}

#[cfg(test)]
#[path = "pkce_tests.rs"]
mod tests;
