// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `perch` binary as a subprocess and exercises it over
//! HTTP and WebSocket.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::Once;
use std::time::Duration;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `perch` binary.
pub fn perch_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("perch")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// App secret / encryption key used by every spawned process.
pub const SPEC_SECRET: &str = "spec-secret-0123456789abcdef0123";

/// The full required environment, pointed at a temp state file.
fn required_env(state_path: &Path) -> Vec<(&'static str, String)> {
    vec![
        ("PERCH_APP_SECRET", SPEC_SECRET.to_owned()),
        ("PERCH_ENCRYPTION_KEY", "ab".repeat(32)),
        ("PERCH_GITHUB_CLIENT_ID", "iv1.spec".to_owned()),
        ("PERCH_GITHUB_CLIENT_SECRET", "spec-gh-secret".to_owned()),
        ("PERCH_ALLOWED_USER", "octocat".to_owned()),
        ("PERCH_PUBLIC_URL", "http://127.0.0.1:0".to_owned()),
        ("PERCH_STATE_PATH", state_path.to_string_lossy().into_owned()),
    ]
}

/// Run the binary with NO environment and capture its output.
pub fn run_unconfigured() -> anyhow::Result<Output> {
    let binary = perch_binary();
    anyhow::ensure!(binary.exists(), "perch binary not found at {}", binary.display());
    Ok(Command::new(&binary)
        .env_remove("PERCH_APP_SECRET")
        .env_remove("PERCH_ENCRYPTION_KEY")
        .env_remove("PERCH_GITHUB_CLIENT_ID")
        .env_remove("PERCH_GITHUB_CLIENT_SECRET")
        .env_remove("PERCH_ALLOWED_USER")
        .env_remove("PERCH_PUBLIC_URL")
        .output()?)
}

/// A running `perch` process that is killed on drop.
pub struct PerchProcess {
    child: Child,
    port: u16,
    _state_dir: tempfile::TempDir,
}

impl PerchProcess {
    /// Spawn perch with a complete environment on a free port.
    pub fn start() -> anyhow::Result<Self> {
        ensure_crypto();
        let binary = perch_binary();
        anyhow::ensure!(binary.exists(), "perch binary not found at {}", binary.display());

        let state_dir = tempfile::tempdir()?;
        let port = free_port()?;

        let mut cmd = Command::new(&binary);
        cmd.args([
            "--host",
            "127.0.0.1",
            "--port",
            &port.to_string(),
            "--log-format",
            "text",
            "--log-level",
            "warn",
        ]);
        for (key, value) in required_env(&state_dir.path().join("state.json")) {
            cmd.env(key, value);
        }
        let child = cmd.stdout(Stdio::null()).stderr(Stdio::null()).spawn()?;

        Ok(Self { child, port, _state_dir: state_dir })
    }

    /// Base URL for HTTP requests.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// WebSocket URL.
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Poll `/api/health` until it answers (any status).
    pub async fn wait_responsive(&self, timeout: Duration) -> anyhow::Result<()> {
        let client = reqwest::Client::new();
        let url = format!("{}/api/health", self.base_url());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("perch did not come up within {timeout:?}");
            }
            if client.get(&url).send().await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for PerchProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
