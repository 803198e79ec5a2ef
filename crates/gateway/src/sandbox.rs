// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox container lifecycle. The Agent's tools run inside a container;
//! the gateway only queries and (re)starts it — the wrapper program is what
//! pipes stdio into it.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tokio::process::Command;

/// Observed container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Running,
    Stopped,
    Missing,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Missing => "missing",
        }
    }
}

/// Sandbox lifecycle operations, pluggable so tests can script them.
pub trait SandboxControl: Send + Sync {
    /// Query the container state.
    fn state(&self) -> Pin<Box<dyn Future<Output = ContainerState> + Send + '_>>;

    /// Idempotently bring the container up: running is a no-op, stopped is
    /// started, missing is created.
    fn ensure_running(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Human-readable uptime line, if the container is up.
    fn status_line(&self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;
}

/// Docker-CLI-backed sandbox control.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    name: String,
    image: String,
}

impl DockerSandbox {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self { name: name.into(), image: image.into() }
    }
}

impl SandboxControl for DockerSandbox {
    fn state(&self) -> Pin<Box<dyn Future<Output = ContainerState> + Send + '_>> {
        Box::pin(async move {
            let output = Command::new("docker")
                .args(["inspect", "--format", "{{.State.Running}}", &self.name])
                .output()
                .await;
            match output {
                Ok(out) => state_from_inspect(
                    out.status.success(),
                    &String::from_utf8_lossy(&out.stdout),
                ),
                Err(_) => ContainerState::Missing,
            }
        })
    }

    fn ensure_running(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            match self.state().await {
                ContainerState::Running => Ok(()),
                ContainerState::Stopped => {
                    let out = Command::new("docker").args(["start", &self.name]).output().await?;
                    if out.status.success() {
                        Ok(())
                    } else {
                        anyhow::bail!(
                            "docker start {} failed: {}",
                            self.name,
                            String::from_utf8_lossy(&out.stderr).trim()
                        )
                    }
                }
                ContainerState::Missing => {
                    let out = Command::new("docker")
                        .args([
                            "run", "-d", "--name", &self.name, &self.image, "sleep", "infinity",
                        ])
                        .output()
                        .await?;
                    if out.status.success() {
                        Ok(())
                    } else {
                        anyhow::bail!(
                            "docker run {} failed: {}",
                            self.image,
                            String::from_utf8_lossy(&out.stderr).trim()
                        )
                    }
                }
            }
        })
    }

    fn status_line(&self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async move {
            let out = Command::new("docker")
                .args([
                    "ps",
                    "--filter",
                    &format!("name={}", self.name),
                    "--format",
                    "{{.Status}}",
                ])
                .output()
                .await
                .ok()?;
            let line = String::from_utf8_lossy(&out.stdout).trim().to_owned();
            if line.is_empty() {
                None
            } else {
                Some(line)
            }
        })
    }
}

/// Map `docker inspect --format {{.State.Running}}` output onto a state.
/// A failed inspect means the container does not exist.
pub(crate) fn state_from_inspect(success: bool, stdout: &str) -> ContainerState {
    if !success {
        return ContainerState::Missing;
    }
    match stdout.trim() {
        "true" => ContainerState::Running,
        _ => ContainerState::Stopped,
    }
}

#[cfg(test)]
#[path = "sandbox_tests.rs"]
mod tests;
