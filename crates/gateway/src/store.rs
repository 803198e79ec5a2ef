// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed key-value store with a session-history table.
//!
//! One JSON document on disk, rewritten atomically (write tmp + rename) on
//! every mutation. All access goes through an async mutex so concurrent
//! handlers see consistent reads and serialized writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

// Known keys.
pub const KEY_SETUP_COMPLETE: &str = "setup_complete";
pub const KEY_OAUTH_TOKEN: &str = "claude_oauth_token";
pub const KEY_REFRESH_TOKEN: &str = "claude_refresh_token";
pub const KEY_TOKEN_EXPIRES_AT: &str = "claude_token_expires_at";
pub const KEY_TOKEN_REFRESHED_AT: &str = "claude_token_refreshed_at";
pub const KEY_OAUTH_PENDING_STATE: &str = "oauth_pending_state";
pub const KEY_OAUTH_PENDING_VERIFIER: &str = "oauth_pending_verifier";
pub const KEY_AUTH_PENDING_STATE: &str = "auth_pending_state";
pub const KEY_AUTH_RETURN_TO: &str = "auth_return_to";
pub const KEY_VAULT_LAST_PUSH: &str = "vault_last_push";

/// Terminal status of a recorded session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

/// One row of the session-history table. Timestamps are epoch seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
    pub status: SessionStatus,
    #[serde(default)]
    pub turn_count: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    entries: HashMap<String, String>,
    #[serde(default)]
    sessions: Vec<SessionRecord>,
}

/// Persistent gateway state (config entries + session history).
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl Store {
    /// Open the store at `path`, loading existing state if present.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, state: Mutex::new(state) })
    }

    /// Read a config entry.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.state.lock().await.entries.get(key).cloned()
    }

    /// Upsert a config entry.
    pub async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.entries.insert(key.to_owned(), value.to_owned());
        save(&self.path, &state)
    }

    /// Delete a config entry. Deleting an absent key is a no-op.
    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.entries.remove(key).is_some() {
            save(&self.path, &state)?;
        }
        Ok(())
    }

    /// Append a new running session row.
    pub async fn create_session(&self, id: Uuid, started_at: u64) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.sessions.push(SessionRecord {
            id,
            started_at,
            ended_at: None,
            status: SessionStatus::Running,
            turn_count: 0,
            cost_usd: 0.0,
        });
        save(&self.path, &state)
    }

    /// Update turn count and cumulative cost for a session.
    pub async fn record_turn(
        &self,
        id: Uuid,
        turn_count: u64,
        cost_usd: f64,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.sessions.iter_mut().find(|s| s.id == id) {
            row.turn_count = turn_count;
            row.cost_usd = cost_usd;
            save(&self.path, &state)?;
        }
        Ok(())
    }

    /// Mark a session finished. Idempotent: a second call leaves the first
    /// terminal status in place.
    pub async fn finish_session(
        &self,
        id: Uuid,
        ended_at: u64,
        status: SessionStatus,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.sessions.iter_mut().find(|s| s.id == id) {
            if row.ended_at.is_none() {
                row.ended_at = Some(ended_at);
                row.status = status;
                save(&self.path, &state)?;
            }
        }
        Ok(())
    }

    /// Snapshot of the session-history table.
    pub async fn sessions(&self) -> Vec<SessionRecord> {
        self.state.lock().await.sessions.clone()
    }
}

/// Save state to disk atomically (write tmp + rename).
fn save(path: &Path, state: &PersistedState) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
