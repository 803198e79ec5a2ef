// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-active-session state machine: drives the Agent subprocess, merges
//! browser input into its stdin, fans output out to every subscriber, and
//! arbitrates tool-permission requests.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::logbuf::LogBuffer;
use crate::session::agent::{
    AgentEvent, AgentInput, AgentLaunchOptions, AgentLauncher, ContentBlock, OAUTH_TOKEN_ENV,
};
use crate::store::{SessionStatus, Store};
use crate::transport::msg::ServerMessage;

/// How long a permission request waits for a human before denying.
pub const PERMISSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    WaitingPermission,
    Done,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::WaitingPermission => "waiting_permission",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Whether a new session may start from this state.
    fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Done | Self::Error)
    }

    /// Whether the Agent is live (accepting user turns).
    fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::WaitingPermission)
    }
}

/// Operation errors surfaced to the calling connection only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// Operation not permitted in the current state.
    InvalidState(SessionState),
    /// No Agent is running to receive the message.
    NoActiveSession,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState(state) => {
                write!(f, "session already active (state: {})", state.as_str())
            }
            Self::NoActiveSession => f.write_str("no active session"),
        }
    }
}

impl std::error::Error for SessionError {}

/// The Agent's answer to a permission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allow: bool,
    pub message: Option<String>,
}

impl PermissionDecision {
    fn allow() -> Self {
        Self { allow: true, message: None }
    }

    fn deny(message: &str) -> Self {
        Self { allow: false, message: Some(message.to_owned()) }
    }
}

struct PendingPermission {
    tx: oneshot::Sender<PermissionDecision>,
}

struct Inner {
    state: SessionState,
    next_subscriber_id: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<ServerMessage>>,
    pending: HashMap<String, PendingPermission>,
    input_tx: Option<mpsc::Sender<AgentInput>>,
    abort: Option<CancellationToken>,
    session_id: Option<Uuid>,
    total_cost_usd: f64,
    turn_count: u64,
    /// tool_use_id → tool name, so `tool_end` can mirror `tool_start`.
    tool_names: HashMap<String, String>,
}

/// Process-wide singleton driving at most one Agent session.
pub struct SessionManager {
    inner: Mutex<Inner>,
    store: Arc<Store>,
    log: Arc<LogBuffer>,
    launcher: Arc<dyn AgentLauncher>,
}

impl SessionManager {
    pub fn new(store: Arc<Store>, log: Arc<LogBuffer>, launcher: Arc<dyn AgentLauncher>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                next_subscriber_id: 0,
                subscribers: HashMap::new(),
                pending: HashMap::new(),
                input_tx: None,
                abort: None,
                session_id: None,
                total_cost_usd: 0.0,
                turn_count: 0,
                tool_names: HashMap::new(),
            }),
            store,
            log,
            launcher,
        }
    }

    /// Current state label.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Register a subscriber. The new connection immediately receives the
    /// current state (and the running total cost, if any) so late joiners
    /// are synchronized; both are queued before any subsequent broadcast.
    pub async fn add_subscriber(&self, tx: mpsc::UnboundedSender<ServerMessage>) -> u64 {
        let mut inner = self.inner.lock().await;
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;

        let _ = tx.send(ServerMessage::SessionState { state: inner.state.as_str().to_owned() });
        if inner.total_cost_usd > 0.0 {
            let _ = tx.send(ServerMessage::Cost { total_usd: inner.total_cost_usd });
        }
        inner.subscribers.insert(id, tx);
        id
    }

    /// Remove a subscriber. Never fails; unknown ids are a no-op.
    pub async fn remove_subscriber(&self, id: u64) {
        self.inner.lock().await.subscribers.remove(&id);
    }

    /// Fan an event out to every subscriber. Individual send failures are
    /// swallowed; the dead connection's close handler cleans it up.
    pub async fn broadcast(&self, msg: ServerMessage) {
        let senders: Vec<mpsc::UnboundedSender<ServerMessage>> = {
            let inner = self.inner.lock().await;
            inner.subscribers.values().cloned().collect()
        };
        for tx in senders {
            let _ = tx.send(msg.clone());
        }
    }

    /// Start a new Agent session. Fails with [`SessionError::InvalidState`]
    /// when one is already running; otherwise creates the persisted session
    /// record, launches the Agent with the OAuth token in its environment,
    /// and spawns the output loop. Returns the new session id promptly.
    ///
    /// The state check and slot reservation happen under one short lock
    /// hold; the mutex is never held across the subprocess-spawn await, so
    /// other operations stay responsive while the Agent comes up.
    pub async fn start_session(
        self: &Arc<Self>,
        oauth_token: &str,
        wrapper_path: &Path,
    ) -> anyhow::Result<Uuid> {
        let session_id = Uuid::new_v4();
        let abort = CancellationToken::new();
        {
            let mut inner = self.inner.lock().await;
            if !inner.state.can_start() {
                return Err(SessionError::InvalidState(inner.state).into());
            }
            // Reserve the single session slot before launching so a
            // concurrent start sees InvalidState immediately.
            inner.state = SessionState::Running;
            inner.input_tx = None;
            inner.abort = Some(abort.clone());
            inner.session_id = Some(session_id);
            inner.total_cost_usd = 0.0;
            inner.turn_count = 0;
            inner.tool_names.clear();
        }

        if let Err(e) = self.store.create_session(session_id, now_secs()).await {
            warn!("failed to persist session record: {e}");
        }

        let launched = self
            .launcher
            .launch(AgentLaunchOptions {
                executable_path: wrapper_path.to_path_buf(),
                env: vec![(OAUTH_TOKEN_ENV.to_owned(), oauth_token.to_owned())],
                abort: abort.clone(),
            })
            .await;

        let session = match launched {
            Ok(session) => session,
            Err(e) => {
                {
                    let mut inner = self.inner.lock().await;
                    inner.state = SessionState::Error;
                    inner.abort = None;
                    inner.session_id = None;
                }
                if let Err(persist) =
                    self.store.finish_session(session_id, now_secs(), SessionStatus::Error).await
                {
                    warn!("failed to finalize session record: {persist}");
                }
                self.log.push("session", &format!("agent launch failed: {e}"), None);
                self.broadcast(ServerMessage::SessionState {
                    state: SessionState::Error.as_str().to_owned(),
                })
                .await;
                return Err(e);
            }
        };

        self.inner.lock().await.input_tx = Some(session.input_tx);

        info!(session = %session_id, "session started");
        self.log.push("session", "session started", Some(serde_json::json!({"id": session_id})));
        self.broadcast(ServerMessage::SessionState {
            state: SessionState::Running.as_str().to_owned(),
        })
        .await;

        let manager = Arc::clone(self);
        tokio::spawn(manager.drive(session_id, session.events));

        Ok(session_id)
    }

    /// Enqueue a user turn for the Agent. Buffered until the Agent asks for
    /// its next turn; permitted while a permission request is pending.
    pub async fn send_message(&self, content: &str) -> Result<(), SessionError> {
        let input_tx = {
            let inner = self.inner.lock().await;
            if !inner.state.is_active() {
                return Err(SessionError::NoActiveSession);
            }
            inner.input_tx.clone()
        };
        match input_tx {
            Some(tx) => tx
                .send(AgentInput::user(content))
                .await
                .map_err(|_| SessionError::NoActiveSession),
            None => Err(SessionError::NoActiveSession),
        }
    }

    /// Resolve a pending permission with the browser's decision. Unknown or
    /// already-resolved ids are a no-op (the client may be racing a
    /// timeout); the first matching response wins.
    pub async fn handle_permission_response(&self, id: &str, allow: bool) {
        let pending = {
            let mut inner = self.inner.lock().await;
            let Some(pending) = inner.pending.remove(id) else {
                return;
            };
            inner.state = SessionState::Running;
            pending
        };

        self.broadcast(ServerMessage::SessionState {
            state: SessionState::Running.as_str().to_owned(),
        })
        .await;

        let decision = if allow {
            PermissionDecision::allow()
        } else {
            PermissionDecision::deny("denied by user")
        };
        let _ = pending.tx.send(decision);
    }

    /// Best-effort cancellation of the current Agent subprocess.
    /// Idempotent; safe from any state.
    pub async fn interrupt(&self) {
        let abort = self.inner.lock().await.abort.clone();
        if let Some(abort) = abort {
            self.log.push("session", "interrupt requested", None);
            abort.cancel();
        }
    }

    /// Cumulative cost of the current session in USD.
    pub async fn total_cost_usd(&self) -> f64 {
        self.inner.lock().await.total_cost_usd
    }

    /// Output loop: translate each Agent event into subscriber broadcasts,
    /// then finalize when the stream ends.
    async fn drive(
        self: Arc<Self>,
        session_id: Uuid,
        mut events: mpsc::Receiver<anyhow::Result<AgentEvent>>,
    ) {
        let mut failure: Option<String> = None;
        while let Some(event) = events.recv().await {
            match event {
                Ok(event) => self.handle_event(session_id, event).await,
                Err(e) => {
                    failure = Some(e.to_string());
                    break;
                }
            }
        }
        self.finalize(session_id, failure).await;
    }

    async fn handle_event(self: &Arc<Self>, session_id: Uuid, event: AgentEvent) {
        match event {
            AgentEvent::Assistant { content } => {
                for block in content {
                    match block {
                        ContentBlock::Text { text } => {
                            self.broadcast(ServerMessage::Text { content: text }).await;
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            self.inner
                                .lock()
                                .await
                                .tool_names
                                .insert(id.clone(), name.clone());
                            self.broadcast(ServerMessage::ToolStart {
                                tool: name,
                                tool_use_id: id,
                                input,
                            })
                            .await;
                        }
                    }
                }
            }
            AgentEvent::ToolResult { tool_use_id, output } => {
                let tool = self
                    .inner
                    .lock()
                    .await
                    .tool_names
                    .get(&tool_use_id)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_owned());
                self.broadcast(ServerMessage::ToolEnd { tool, tool_use_id, output }).await;
            }
            AgentEvent::Result { total_cost_usd, num_turns } => {
                let (cost, turns) = {
                    let mut inner = self.inner.lock().await;
                    inner.total_cost_usd = total_cost_usd;
                    inner.turn_count += 1;
                    (inner.total_cost_usd, inner.turn_count)
                };
                self.broadcast(ServerMessage::Cost { total_usd: cost }).await;
                if let Err(e) = self.store.record_turn(session_id, turns, cost).await {
                    warn!("failed to persist turn: {e}");
                }
                self.log.push(
                    "session",
                    "turn complete",
                    Some(serde_json::json!({"cost_usd": cost, "num_turns": num_turns})),
                );
            }
            AgentEvent::PermissionRequest { tool_name, input, tool_use_id, description } => {
                let decision = self
                    .request_permission(&tool_name, input, &tool_use_id, description)
                    .await;
                let input_tx = self.inner.lock().await.input_tx.clone();
                if let Some(tx) = input_tx {
                    let _ = tx
                        .send(AgentInput::permission(
                            tool_use_id,
                            decision.allow,
                            decision.message,
                        ))
                        .await;
                }
            }
            AgentEvent::ToolProgress => {}
        }
    }

    /// The permission round-trip: register a pending entry, tell the
    /// browsers, and suspend until the first of a matching response, the
    /// 5-minute deadline, or session teardown. Every resolution path
    /// removes the entry before sending, so exactly one outcome wins.
    async fn request_permission(
        self: &Arc<Self>,
        tool_name: &str,
        input: serde_json::Value,
        tool_use_id: &str,
        description: Option<String>,
    ) -> PermissionDecision {
        let (tx, mut rx) = oneshot::channel();
        let abort = {
            let mut inner = self.inner.lock().await;
            inner.pending.insert(tool_use_id.to_owned(), PendingPermission { tx });
            inner.state = SessionState::WaitingPermission;
            inner.abort.clone()
        };

        self.broadcast(ServerMessage::PermissionRequest {
            id: tool_use_id.to_owned(),
            tool: tool_name.to_owned(),
            input,
            description: description.unwrap_or_else(|| format!("Use the {tool_name} tool")),
        })
        .await;
        self.broadcast(ServerMessage::SessionState {
            state: SessionState::WaitingPermission.as_str().to_owned(),
        })
        .await;

        let abort = abort.unwrap_or_default();
        tokio::select! {
            decision = &mut rx => {
                decision.unwrap_or_else(|_| PermissionDecision::deny("session ended"))
            }
            _ = tokio::time::sleep(PERMISSION_TIMEOUT) => {
                self.resolve_unanswered(tool_use_id, &mut rx, "permission request timed out").await
            }
            _ = abort.cancelled() => {
                self.resolve_unanswered(tool_use_id, &mut rx, "session ended").await
            }
        }
    }

    /// Deadline/teardown path: claim the pending entry if a browser has not
    /// already done so. Losing the claim means a response raced in, so its
    /// value is taken instead.
    async fn resolve_unanswered(
        &self,
        tool_use_id: &str,
        rx: &mut oneshot::Receiver<PermissionDecision>,
        reason: &str,
    ) -> PermissionDecision {
        let claimed = {
            let mut inner = self.inner.lock().await;
            let claimed = inner.pending.remove(tool_use_id).is_some();
            if claimed {
                inner.state = SessionState::Running;
            }
            claimed
        };
        if claimed {
            self.log.push("session", &format!("permission {tool_use_id}: {reason}"), None);
            self.broadcast(ServerMessage::SessionState {
                state: SessionState::Running.as_str().to_owned(),
            })
            .await;
            PermissionDecision::deny(reason)
        } else {
            rx.await.unwrap_or_else(|_| PermissionDecision::deny(reason))
        }
    }

    /// Tear the session down on loop end (normal, error, or interrupt):
    /// persist the terminal record, deny anything still pending, close the
    /// input queue, and settle into `done` or `error`.
    async fn finalize(self: &Arc<Self>, session_id: Uuid, failure: Option<String>) {
        let (final_state, status, pending) = {
            let mut inner = self.inner.lock().await;
            let final_state =
                if failure.is_some() { SessionState::Error } else { SessionState::Done };
            inner.state = final_state;
            inner.input_tx = None;
            inner.session_id = None;
            inner.tool_names.clear();
            if let Some(abort) = inner.abort.take() {
                abort.cancel();
            }
            let pending: Vec<PendingPermission> =
                inner.pending.drain().map(|(_, p)| p).collect();
            let status = if failure.is_some() {
                SessionStatus::Error
            } else {
                SessionStatus::Stopped
            };
            (final_state, status, pending)
        };

        for p in pending {
            let _ = p.tx.send(PermissionDecision::deny("session ended"));
        }

        if let Err(e) = self.store.finish_session(session_id, now_secs(), status).await {
            warn!("failed to finalize session record: {e}");
        }

        if let Some(message) = failure {
            warn!(session = %session_id, "session failed: {message}");
            self.log.push("session", &format!("session error: {message}"), None);
            self.broadcast(ServerMessage::Error { message }).await;
        } else {
            info!(session = %session_id, "session finished");
            self.log.push("session", "session finished", None);
        }

        self.broadcast(ServerMessage::SessionState {
            state: final_state.as_str().to_owned(),
        })
        .await;
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
