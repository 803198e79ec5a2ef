// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browser authentication: signed session cookies, short-lived WebSocket
//! upgrade tickets, and the identity-provider sign-in flow.

pub mod cookie;
pub mod identity;
pub mod ticket;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::MIN_SECRET_LEN;

type HmacSha256 = Hmac<Sha256>;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "perch_session";

fn mac_for(secret: &str, payload: &str) -> anyhow::Result<HmacSha256> {
    if secret.len() < MIN_SECRET_LEN {
        anyhow::bail!("app secret must be at least {MIN_SECRET_LEN} characters");
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid mac key"))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// base64url(hmac_sha256(secret, payload)), no padding.
pub(crate) fn sign_payload(secret: &str, payload: &str) -> anyhow::Result<String> {
    let mac = mac_for(secret, payload)?;
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a base64url MAC segment against a payload.
/// Wrong-length or undecodable MACs simply fail verification.
pub(crate) fn verify_payload(secret: &str, payload: &str, mac_b64: &str) -> bool {
    let Ok(mac) = mac_for(secret, payload) else {
        return false;
    };
    let Ok(given) = URL_SAFE_NO_PAD.decode(mac_b64) else {
        return false;
    };
    mac.verify_slice(&given).is_ok()
}

/// 32 random bytes as a 43-char base64url string.
pub(crate) fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
