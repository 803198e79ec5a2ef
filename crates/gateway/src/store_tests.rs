// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use uuid::Uuid;

use crate::store::{SessionStatus, Store};

fn temp_store() -> anyhow::Result<(tempfile::TempDir, Store)> {
    let dir = tempfile::tempdir()?;
    let store = Store::open(dir.path().join("state.json"))?;
    Ok((dir, store))
}

#[tokio::test]
async fn set_get_delete() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;

    assert_eq!(store.get("setup_complete").await, None);
    store.set("setup_complete", "true").await?;
    assert_eq!(store.get("setup_complete").await.as_deref(), Some("true"));

    store.delete("setup_complete").await?;
    assert_eq!(store.get("setup_complete").await, None);

    // Deleting again is a no-op.
    store.delete("setup_complete").await?;
    Ok(())
}

#[tokio::test]
async fn upsert_takes_last_write() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    store.set("k", "v1").await?;
    store.set("k", "v2").await?;
    assert_eq!(store.get("k").await.as_deref(), Some("v2"));
    Ok(())
}

#[tokio::test]
async fn state_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("state.json");

    let store = Store::open(&path)?;
    store.set("claude_token_expires_at", "1234567890").await?;
    let id = Uuid::new_v4();
    store.create_session(id, 100).await?;
    store.record_turn(id, 2, 0.05).await?;
    store.finish_session(id, 160, SessionStatus::Stopped).await?;
    drop(store);

    let reopened = Store::open(&path)?;
    assert_eq!(reopened.get("claude_token_expires_at").await.as_deref(), Some("1234567890"));
    let sessions = reopened.sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, id);
    assert_eq!(sessions[0].ended_at, Some(160));
    assert_eq!(sessions[0].status, SessionStatus::Stopped);
    assert_eq!(sessions[0].turn_count, 2);
    assert!((sessions[0].cost_usd - 0.05).abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
async fn finish_session_is_idempotent() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    let id = Uuid::new_v4();
    store.create_session(id, 10).await?;
    store.finish_session(id, 20, SessionStatus::Error).await?;
    store.finish_session(id, 99, SessionStatus::Stopped).await?;

    let sessions = store.sessions().await;
    assert_eq!(sessions[0].ended_at, Some(20));
    assert_eq!(sessions[0].status, SessionStatus::Error);
    Ok(())
}

#[tokio::test]
async fn unknown_session_updates_are_noops() -> anyhow::Result<()> {
    let (_dir, store) = temp_store()?;
    store.record_turn(Uuid::new_v4(), 1, 0.01).await?;
    store.finish_session(Uuid::new_v4(), 5, SessionStatus::Stopped).await?;
    assert!(store.sessions().await.is_empty());
    Ok(())
}
