// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Encrypted persistence of the assistant-service token record.
//!
//! Access and refresh tokens are stored as ciphertext; expiry and
//! refreshed-at instants as plain epoch-second strings.

use crate::crypto;
use crate::store::{
    Store, KEY_OAUTH_TOKEN, KEY_REFRESH_TOKEN, KEY_TOKEN_EXPIRES_AT, KEY_TOKEN_REFRESHED_AT,
};

/// The logical OAuth token record assembled from config entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Epoch seconds.
    pub expires_at: u64,
    /// Epoch seconds. Invariant: `refreshed_at <= expires_at`.
    pub refreshed_at: u64,
}

impl TokenRecord {
    /// Seconds until expiry, zero if already expired.
    pub fn expires_in_secs(&self, now_secs: u64) -> u64 {
        self.expires_at.saturating_sub(now_secs)
    }
}

/// Encrypt and persist a token record.
pub async fn store_tokens(
    store: &Store,
    key: &[u8],
    record: &TokenRecord,
) -> anyhow::Result<()> {
    store.set(KEY_OAUTH_TOKEN, &crypto::encrypt(key, &record.access_token)?).await?;
    match &record.refresh_token {
        Some(refresh) => {
            store.set(KEY_REFRESH_TOKEN, &crypto::encrypt(key, refresh)?).await?;
        }
        None => store.delete(KEY_REFRESH_TOKEN).await?,
    }
    store.set(KEY_TOKEN_EXPIRES_AT, &record.expires_at.to_string()).await?;
    store.set(KEY_TOKEN_REFRESHED_AT, &record.refreshed_at.to_string()).await?;
    Ok(())
}

/// Load and decrypt the persisted token record, if any.
///
/// `refreshed_at` falls back to `expires_at` when it was never persisted.
pub async fn load_tokens(store: &Store, key: &[u8]) -> anyhow::Result<Option<TokenRecord>> {
    let Some(access_ct) = store.get(KEY_OAUTH_TOKEN).await else {
        return Ok(None);
    };
    let access_token = crypto::decrypt(key, &access_ct)?;

    let refresh_token = match store.get(KEY_REFRESH_TOKEN).await {
        Some(ct) => Some(crypto::decrypt(key, &ct)?),
        None => None,
    };

    let expires_at = store
        .get(KEY_TOKEN_EXPIRES_AT)
        .await
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let refreshed_at = store
        .get(KEY_TOKEN_REFRESHED_AT)
        .await
        .and_then(|v| v.parse().ok())
        .unwrap_or(expires_at);

    Ok(Some(TokenRecord { access_token, refresh_token, expires_at, refreshed_at }))
}

#[cfg(test)]
#[path = "tokens_tests.rs"]
mod tests;
