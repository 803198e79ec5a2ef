// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HMAC-signed opaque session tokens carried in a cookie.
//!
//! Format: `<opaque_token>.<base64url(hmac_sha256(secret, opaque_token))>`.

use super::{random_token, sign_payload, verify_payload};

/// Issue a fresh signed session token.
pub fn issue(secret: &str) -> anyhow::Result<String> {
    sign(secret, &random_token())
}

/// Sign an existing opaque token.
pub fn sign(secret: &str, token: &str) -> anyhow::Result<String> {
    let mac = sign_payload(secret, token)?;
    Ok(format!("{token}.{mac}"))
}

/// Verify a signed cookie value, returning the underlying opaque token.
///
/// Rejects values without a `.` separator, empty segments, and any MAC
/// mismatch. Comparison is constant-time.
pub fn verify(secret: &str, cookie: &str) -> Option<String> {
    let (token, mac) = cookie.split_once('.')?;
    if token.is_empty() || mac.is_empty() {
        return None;
    }
    if verify_payload(secret, token, mac) {
        Some(token.to_owned())
    } else {
        None
    }
}

/// Build the `Set-Cookie` header value for a signed session token.
pub fn set_cookie_header(value: &str, secure: bool) -> String {
    let mut header = format!("{}={value}; Path=/; HttpOnly; SameSite=Lax", super::SESSION_COOKIE);
    if secure {
        header.push_str("; Secure");
    }
    header
}

#[cfg(test)]
#[path = "cookie_tests.rs"]
mod tests;
