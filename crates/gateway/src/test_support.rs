// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders, mocks, and assertion helpers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::logbuf::LogBuffer;
use crate::session::agent::{
    AgentEvent, AgentInput, AgentLaunchOptions, AgentLauncher, AgentSession,
};
use crate::session::SessionManager;
use crate::store::Store;
use crate::transport::msg::ServerMessage;

/// One step of a scripted mock Agent run.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Block until a user turn arrives on stdin.
    AwaitUser,
    /// Emit an output event. Permission requests additionally block until
    /// the matching response comes back down stdin, like the real Agent.
    Emit(AgentEvent),
    /// Raise a stream error and end the run.
    Fail(String),
}

/// A scripted Agent that stands in for the wrapper subprocess.
///
/// Mirrors the real adapter's contract: it waits for input where told to,
/// emits events in order, honors the abort token, and closes its event
/// channel when the script runs out.
#[derive(Default)]
pub struct MockLauncher {
    steps: Vec<MockStep>,
    fail_launch: Option<String>,
    launch_delay: Option<Duration>,
    captured: Arc<Mutex<Vec<AgentInput>>>,
    launch_envs: Arc<Mutex<Vec<Vec<(String, String)>>>>,
}

impl MockLauncher {
    pub fn new(steps: Vec<MockStep>) -> Self {
        Self { steps, ..Self::default() }
    }

    /// A launcher whose `launch` itself fails.
    pub fn failing(message: impl Into<String>) -> Self {
        Self { fail_launch: Some(message.into()), ..Self::default() }
    }

    /// Make `launch` suspend for `delay` before returning, modelling a slow
    /// subprocess spawn.
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = Some(delay);
        self
    }

    /// Handle on everything the manager wrote to the Agent's stdin.
    pub fn captured(&self) -> Arc<Mutex<Vec<AgentInput>>> {
        Arc::clone(&self.captured)
    }

    /// Handle on the environment passed to each launch.
    pub fn launch_envs(&self) -> Arc<Mutex<Vec<Vec<(String, String)>>>> {
        Arc::clone(&self.launch_envs)
    }
}

impl AgentLauncher for MockLauncher {
    fn launch(
        &self,
        opts: AgentLaunchOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<AgentSession>> + Send + '_>> {
        let steps = self.steps.clone();
        let fail_launch = self.fail_launch.clone();
        let launch_delay = self.launch_delay;
        let captured = Arc::clone(&self.captured);
        let launch_envs = Arc::clone(&self.launch_envs);

        Box::pin(async move {
            if let Some(message) = fail_launch {
                anyhow::bail!("{message}");
            }
            if let Some(delay) = launch_delay {
                tokio::time::sleep(delay).await;
            }
            launch_envs.lock().push(opts.env.clone());

            let (input_tx, mut input_rx) = mpsc::channel::<AgentInput>(64);
            let (event_tx, events) = mpsc::channel::<anyhow::Result<AgentEvent>>(256);
            let abort = opts.abort;

            tokio::spawn(async move {
                // Inputs that arrived while waiting for a different kind
                // (e.g. a user turn queued during a pending permission).
                let mut buffered: Vec<AgentInput> = Vec::new();

                // Take the next input matching `wanted`, buffering others.
                async fn take_matching(
                    input_rx: &mut mpsc::Receiver<AgentInput>,
                    abort: &tokio_util::sync::CancellationToken,
                    captured: &Mutex<Vec<AgentInput>>,
                    buffered: &mut Vec<AgentInput>,
                    wanted: fn(&AgentInput) -> bool,
                ) -> bool {
                    if let Some(pos) = buffered.iter().position(|i| wanted(i)) {
                        buffered.remove(pos);
                        return true;
                    }
                    loop {
                        tokio::select! {
                            input = input_rx.recv() => match input {
                                Some(input) => {
                                    captured.lock().push(input.clone());
                                    if wanted(&input) {
                                        return true;
                                    }
                                    buffered.push(input);
                                }
                                None => return false,
                            },
                            _ = abort.cancelled() => return false,
                        }
                    }
                }

                for step in steps {
                    match step {
                        MockStep::AwaitUser => {
                            if !take_matching(
                                &mut input_rx,
                                &abort,
                                &captured,
                                &mut buffered,
                                |i| matches!(i, AgentInput::User { .. }),
                            )
                            .await
                            {
                                return;
                            }
                        }
                        MockStep::Emit(event) => {
                            let wants_response =
                                matches!(event, AgentEvent::PermissionRequest { .. });
                            if event_tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                            if wants_response
                                && !take_matching(
                                    &mut input_rx,
                                    &abort,
                                    &captured,
                                    &mut buffered,
                                    |i| matches!(i, AgentInput::PermissionResponse { .. }),
                                )
                                .await
                            {
                                return;
                            }
                        }
                        MockStep::Fail(message) => {
                            let _ = event_tx.send(Err(anyhow::anyhow!("{message}"))).await;
                            return;
                        }
                    }
                }
            });

            Ok(AgentSession { input_tx, events })
        })
    }
}

/// A manager wired to a temp store and a scripted Agent, plus the handles
/// tests need to poke at it.
pub struct ManagerCtx {
    pub manager: Arc<SessionManager>,
    pub store: Arc<Store>,
    pub log: Arc<LogBuffer>,
    pub captured: Arc<Mutex<Vec<AgentInput>>>,
    _dir: tempfile::TempDir,
}

/// Build a [`SessionManager`] over a temp store and the given script.
pub fn manager_with_script(steps: Vec<MockStep>) -> anyhow::Result<ManagerCtx> {
    manager_with_launcher(MockLauncher::new(steps))
}

pub fn manager_with_launcher(launcher: MockLauncher) -> anyhow::Result<ManagerCtx> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(Store::open(dir.path().join("state.json"))?);
    let log = Arc::new(LogBuffer::new());
    let captured = launcher.captured();
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&log),
        Arc::new(launcher),
    ));
    Ok(ManagerCtx { manager, store, log, captured, _dir: dir })
}

/// Subscribe to the manager, returning the subscriber id and receive side.
pub async fn subscribe(
    manager: &SessionManager,
) -> (u64, mpsc::UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = manager.add_subscriber(tx).await;
    (id, rx)
}

/// Await the next broadcast with a deadline so hung tests fail fast.
pub async fn next_msg(
    rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
) -> anyhow::Result<ServerMessage> {
    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(msg)) => Ok(msg),
        Ok(None) => anyhow::bail!("subscriber channel closed"),
        Err(_) => anyhow::bail!("timed out waiting for broadcast"),
    }
}

/// Await the next `session_state` broadcast, skipping nothing: fails if the
/// next message is anything else.
pub async fn expect_state(
    rx: &mut mpsc::UnboundedReceiver<ServerMessage>,
    expected: &str,
) -> anyhow::Result<()> {
    let msg = next_msg(rx).await?;
    match msg {
        ServerMessage::SessionState { ref state } if state == expected => Ok(()),
        other => anyhow::bail!("expected session_state {expected}, got {other:?}"),
    }
}

/// Extension trait to convert any `Display` error into `anyhow::Error`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// A sandbox that is always in the configured state and starts on demand.
pub struct MockSandbox {
    pub state: crate::sandbox::ContainerState,
}

impl Default for MockSandbox {
    fn default() -> Self {
        Self { state: crate::sandbox::ContainerState::Running }
    }
}

impl crate::sandbox::SandboxControl for MockSandbox {
    fn state(
        &self,
    ) -> std::pin::Pin<Box<dyn Future<Output = crate::sandbox::ContainerState> + Send + '_>> {
        Box::pin(std::future::ready(self.state))
    }

    fn ensure_running(
        &self,
    ) -> std::pin::Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(std::future::ready(Ok(())))
    }

    fn status_line(
        &self,
    ) -> std::pin::Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(std::future::ready(Some("Up 5 minutes".to_owned())))
    }
}

/// Test app secret (32 chars) shared by transport tests.
pub const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";
/// Test encryption key.
pub const TEST_KEY: [u8; 32] = [7u8; 32];

/// A full [`Gateway`] over temp state, a scripted Agent, and a mock
/// sandbox, for router-level tests.
pub struct GatewayCtx {
    pub gateway: Arc<crate::transport::Gateway>,
    pub captured: Arc<Mutex<Vec<AgentInput>>>,
    pub launch_envs: Arc<Mutex<Vec<Vec<(String, String)>>>>,
    _dir: tempfile::TempDir,
}

pub fn test_settings() -> crate::transport::state::Settings {
    crate::transport::state::Settings {
        app_secret: TEST_SECRET.to_owned(),
        encryption_key: TEST_KEY.to_vec(),
        github_client_id: "iv1.test".to_owned(),
        github_client_secret: "gh-secret".to_owned(),
        allowed_user: "octocat".to_owned(),
        public_url: "http://127.0.0.1:3000".to_owned(),
        wrapper_path: "/bin/true".into(),
        ws_path: "/ws".to_owned(),
    }
}

/// Build a gateway whose Agent plays the given script.
pub fn gateway_with_script(steps: Vec<MockStep>) -> anyhow::Result<GatewayCtx> {
    crate::run::ensure_crypto();
    let dir = tempfile::tempdir()?;
    let store = Arc::new(Store::open(dir.path().join("state.json"))?);
    let log = Arc::new(LogBuffer::new());
    let launcher = MockLauncher::new(steps);
    let captured = launcher.captured();
    let launch_envs = launcher.launch_envs();
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&log),
        Arc::new(launcher),
    ));
    let gateway = Arc::new(crate::transport::Gateway::new(
        test_settings(),
        store,
        manager,
        log,
        Arc::new(MockSandbox::default()),
    ));
    Ok(GatewayCtx { gateway, captured, launch_envs, _dir: dir })
}

/// Spawn the full router on an ephemeral port for WebSocket tests.
pub async fn spawn_http_server(
    gateway: Arc<crate::transport::Gateway>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(gateway);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}

/// A signed session cookie header value for authenticated test requests.
pub fn test_cookie() -> anyhow::Result<String> {
    let value = crate::auth::cookie::issue(TEST_SECRET)?;
    Ok(format!("{}={value}", crate::auth::SESSION_COOKIE))
}

/// Mark setup complete and store a fresh-enough token record so
/// start-session paths have credentials.
pub async fn seed_credentials(gateway: &crate::transport::Gateway) -> anyhow::Result<()> {
    let now = crate::credential::oauth::now_secs();
    let record = crate::credential::tokens::TokenRecord {
        access_token: "sk-ant-oat01-test".to_owned(),
        refresh_token: None,
        expires_at: now + 24 * 60 * 60,
        refreshed_at: now,
    };
    crate::credential::tokens::store_tokens(&gateway.store, &TEST_KEY, &record).await?;
    gateway.store.set(crate::store::KEY_SETUP_COMPLETE, "true").await?;
    Ok(())
}
