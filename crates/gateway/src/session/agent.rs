// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent subprocess adapter.
//!
//! The Agent is reached through a wrapper program that execs it inside the
//! sandbox, speaking line-delimited JSON on stdio: user turns and permission
//! responses go down stdin, semantic events come back up stdout.

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Environment variable the Agent reads its OAuth token from.
pub const OAUTH_TOKEN_ENV: &str = "CLAUDE_CODE_OAUTH_TOKEN";

const STDERR_TAIL_LINES: usize = 20;

/// One block of assistant output.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
}

/// Semantic events parsed from the Agent's output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Assistant {
        content: Vec<ContentBlock>,
    },
    /// Tool output echoed back through the stream.
    ToolResult {
        tool_use_id: String,
        output: serde_json::Value,
    },
    /// Terminal record for a turn; cost is cumulative.
    Result {
        total_cost_usd: f64,
        num_turns: u64,
    },
    /// The Agent asking "may I?" for a tool invocation.
    PermissionRequest {
        tool_name: String,
        input: serde_json::Value,
        tool_use_id: String,
        description: Option<String>,
    },
    /// Progress chatter; the session manager ignores it.
    ToolProgress,
}

/// Records written to the Agent's stdin.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentInput {
    User { message: UserTurn },
    PermissionResponse { id: String, behavior: String, #[serde(skip_serializing_if = "Option::is_none")] message: Option<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct UserTurn {
    pub role: String,
    pub content: String,
}

impl AgentInput {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User { message: UserTurn { role: "user".to_owned(), content: content.into() } }
    }

    pub fn permission(id: impl Into<String>, allow: bool, message: Option<String>) -> Self {
        Self::PermissionResponse {
            id: id.into(),
            behavior: if allow { "allow" } else { "deny" }.to_owned(),
            message,
        }
    }
}

/// Launch parameters for one Agent run.
pub struct AgentLaunchOptions {
    pub executable_path: PathBuf,
    pub env: Vec<(String, String)>,
    pub abort: CancellationToken,
}

/// A launched Agent: its input channel and output event stream.
///
/// Dropping `input_tx` (and every clone) closes the Agent's stdin; the
/// event channel closing marks the end of the output stream.
pub struct AgentSession {
    pub input_tx: mpsc::Sender<AgentInput>,
    pub events: mpsc::Receiver<anyhow::Result<AgentEvent>>,
}

/// Pluggable Agent launcher so tests can script the subprocess away.
pub trait AgentLauncher: Send + Sync {
    fn launch(
        &self,
        opts: AgentLaunchOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<AgentSession>> + Send + '_>>;
}

/// Production launcher: spawns the wrapper program with piped stdio.
pub struct SubprocessLauncher;

impl AgentLauncher for SubprocessLauncher {
    fn launch(
        &self,
        opts: AgentLaunchOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<AgentSession>> + Send + '_>> {
        Box::pin(async move {
            let mut cmd = Command::new(&opts.executable_path);
            cmd.stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            for (key, value) in &opts.env {
                cmd.env(key, value);
            }

            let mut child = cmd.spawn().map_err(|e| {
                anyhow::anyhow!("failed to spawn {}: {e}", opts.executable_path.display())
            })?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow::anyhow!("agent stdin not captured"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| anyhow::anyhow!("agent stdout not captured"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| anyhow::anyhow!("agent stderr not captured"))?;

            let (input_tx, mut input_rx) = mpsc::channel::<AgentInput>(64);
            let (event_tx, events) = mpsc::channel::<anyhow::Result<AgentEvent>>(256);

            // Stdin writer: one JSON line per input record; EOF on close.
            tokio::spawn(async move {
                let mut stdin = stdin;
                while let Some(input) = input_rx.recv().await {
                    let Ok(mut line) = serde_json::to_string(&input) else {
                        continue;
                    };
                    line.push('\n');
                    if stdin.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                    let _ = stdin.flush().await;
                }
            });

            // Stderr tail, kept for exit diagnostics.
            let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
            let tail = Arc::clone(&stderr_tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "agent", "stderr: {line}");
                    let mut tail = tail.lock();
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            });

            // Supervisor: pump stdout into events until EOF or abort.
            let abort = opts.abort;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                let mut aborted = false;
                let mut failed = false;
                loop {
                    tokio::select! {
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => {
                                if line.trim().is_empty() {
                                    continue;
                                }
                                match parse_line(&line) {
                                    Ok(Some(event)) => {
                                        if event_tx.send(Ok(event)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(None) => {}
                                    Err(e) => {
                                        let _ = event_tx.send(Err(e)).await;
                                        failed = true;
                                        break;
                                    }
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                let _ = event_tx
                                    .send(Err(anyhow::anyhow!("agent stream read failed: {e}")))
                                    .await;
                                failed = true;
                                break;
                            }
                        },
                        _ = abort.cancelled() => {
                            aborted = true;
                            break;
                        }
                    }
                }

                if aborted || failed {
                    let _ = child.start_kill();
                }
                match child.wait().await {
                    Ok(status) if !status.success() && !aborted && !failed => {
                        let tail: Vec<String> =
                            stderr_tail.lock().iter().cloned().collect();
                        let _ = event_tx
                            .send(Err(anyhow::anyhow!(
                                "agent exited with {status}: {}",
                                tail.join(" | ")
                            )))
                            .await;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("agent wait failed: {e}"),
                }
                // event_tx drops here, ending the stream.
            });

            Ok(AgentSession { input_tx, events })
        })
    }
}

/// Parse one stdout line. Unknown record kinds are skipped (`None`);
/// malformed JSON is an error that ends the session.
pub fn parse_line(line: &str) -> anyhow::Result<Option<AgentEvent>> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| anyhow::anyhow!("malformed agent record: {e}"))?;

    let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
    match kind {
        "assistant" => {
            let blocks = value
                .pointer("/message/content")
                .and_then(|c| c.as_array())
                .map(|blocks| blocks.iter().filter_map(parse_block).collect())
                .unwrap_or_default();
            Ok(Some(AgentEvent::Assistant { content: blocks }))
        }
        "user" => {
            // Tool results come back through user-side records.
            let results: Vec<AgentEvent> = value
                .pointer("/message/content")
                .and_then(|c| c.as_array())
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_result"))
                        .filter_map(|b| {
                            Some(AgentEvent::ToolResult {
                                tool_use_id: b.get("tool_use_id")?.as_str()?.to_owned(),
                                output: b.get("content").cloned().unwrap_or(serde_json::Value::Null),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            // At most one tool result per record in practice.
            Ok(results.into_iter().next())
        }
        "result" => Ok(Some(AgentEvent::Result {
            total_cost_usd: value.get("total_cost_usd").and_then(|v| v.as_f64()).unwrap_or(0.0),
            num_turns: value.get("num_turns").and_then(|v| v.as_u64()).unwrap_or(0),
        })),
        "permission_request" => {
            let tool_use_id = value
                .get("tool_use_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("permission_request without tool_use_id"))?
                .to_owned();
            Ok(Some(AgentEvent::PermissionRequest {
                tool_name: value
                    .get("tool_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_owned(),
                input: value.get("input").cloned().unwrap_or(serde_json::Value::Null),
                tool_use_id,
                description: value
                    .get("description")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned),
            }))
        }
        "tool_progress" => Ok(Some(AgentEvent::ToolProgress)),
        _ => Ok(None),
    }
}

fn parse_block(block: &serde_json::Value) -> Option<ContentBlock> {
    match block.get("type").and_then(|t| t.as_str())? {
        "text" => Some(ContentBlock::Text {
            text: block.get("text").and_then(|t| t.as_str()).unwrap_or("").to_owned(),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_owned(),
            name: block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_owned(),
            input: block.get("input").cloned().unwrap_or(serde_json::Value::Null),
        }),
        _ => None,
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
