// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stateless, short-lived WebSocket upgrade tickets.
//!
//! Format: `<timestamp_base36>.<nonce>.<base64url(hmac_sha256(secret,
//! "<timestamp_base36>.<nonce>"))>` where the timestamp is epoch
//! milliseconds. Tickets are valid for 30 seconds from issuance.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{random_token, sign_payload, verify_payload};

/// How long an issued ticket stays valid.
pub const TICKET_TTL: Duration = Duration::from_secs(30);

/// Issue a ticket valid for [`TICKET_TTL`] from `now`.
pub fn issue(secret: &str, now: SystemTime) -> anyhow::Result<String> {
    let millis = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    let payload = format!("{}.{}", to_base36(millis), random_token());
    let mac = sign_payload(secret, &payload)?;
    Ok(format!("{payload}.{mac}"))
}

/// Check a ticket: all three segments present, timestamp parseable and
/// within the validity window, MAC verified in constant time. Returns
/// `false` on any defect rather than an error.
pub fn is_valid(secret: &str, ticket: &str, now: SystemTime) -> bool {
    let mut parts = ticket.splitn(3, '.');
    let (Some(ts), Some(nonce), Some(mac)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    if ts.is_empty() || nonce.is_empty() {
        return false;
    }

    let Some(issued_millis) = from_base36(ts) else {
        return false;
    };
    let now_millis = now.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    if now_millis < issued_millis {
        return false;
    }
    if now_millis - issued_millis >= TICKET_TTL.as_millis() as u64 {
        return false;
    }

    verify_payload(secret, &format!("{ts}.{nonce}"), mac)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_owned();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn from_base36(s: &str) -> Option<u64> {
    u64::from_str_radix(s, 36).ok()
}

#[cfg(test)]
#[path = "ticket_tests.rs"]
mod tests;
