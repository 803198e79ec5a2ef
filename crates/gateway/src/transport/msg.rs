// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket wire protocol: internally-tagged JSON enums
//! (`{"type": "text", ...}`) for both directions.

use serde::{Deserialize, Serialize};

/// Server-to-client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Text {
        content: String,
    },
    ToolStart {
        tool: String,
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        input: serde_json::Value,
    },
    ToolEnd {
        tool: String,
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        output: serde_json::Value,
    },
    PermissionRequest {
        id: String,
        tool: String,
        input: serde_json::Value,
        description: String,
    },
    SessionState {
        state: String,
    },
    Cost {
        #[serde(rename = "totalUsd")]
        total_usd: f64,
    },
    Error {
        message: String,
    },
}

/// Client-to-server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Message { content: String },
    PermissionResponse { id: String, allow: bool },
    Interrupt,
}

#[cfg(test)]
#[path = "msg_tests.rs"]
mod tests;
