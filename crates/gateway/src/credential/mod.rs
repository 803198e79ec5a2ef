// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential lifecycle for the upstream assistant service: PKCE flow,
//! code/token exchanges, proactive refresh, and encrypted persistence.

pub mod oauth;
pub mod pkce;
pub mod tokens;

use std::time::Duration;

/// Refresh when the access token expires within this margin.
pub const REFRESH_THRESHOLD: Duration = Duration::from_secs(30 * 60);

/// Expiry assumed when the upstream omits `expires_in` (8 hours).
pub const DEFAULT_EXPIRES_IN: u64 = 8 * 60 * 60;

/// Conservative expiry applied to manually pasted API tokens (7 days).
pub const PASTED_TOKEN_EXPIRES_IN: u64 = 7 * 24 * 60 * 60;
