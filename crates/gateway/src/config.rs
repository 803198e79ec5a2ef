// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Minimum length for the HMAC app secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Browser gateway for driving an agentic coding assistant.
#[derive(Debug, Clone, Parser)]
#[command(name = "perch", version, about)]
pub struct Config {
    /// HTTP port to listen on.
    #[arg(long, env = "PERCH_PORT", default_value = "3000")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "PERCH_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// App secret (32+ chars) used to sign session cookies and WS tickets.
    #[arg(long, env = "PERCH_APP_SECRET", hide_env_values = true)]
    pub app_secret: Option<String>,

    /// 64-hex-character (32-byte) key for at-rest token encryption.
    #[arg(long, env = "PERCH_ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: Option<String>,

    /// GitHub OAuth client id for owner sign-in.
    #[arg(long, env = "PERCH_GITHUB_CLIENT_ID")]
    pub github_client_id: Option<String>,

    /// GitHub OAuth client secret for owner sign-in.
    #[arg(long, env = "PERCH_GITHUB_CLIENT_SECRET", hide_env_values = true)]
    pub github_client_secret: Option<String>,

    /// The single allow-listed GitHub login permitted to sign in.
    #[arg(long, env = "PERCH_ALLOWED_USER")]
    pub allowed_user: Option<String>,

    /// Externally visible base URL (e.g. https://perch.example.com).
    #[arg(long, env = "PERCH_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Path to the wrapper program that execs the Agent inside the sandbox.
    #[arg(long, env = "PERCH_WRAPPER_PATH", default_value = "./agent-wrapper.sh")]
    pub wrapper_path: PathBuf,

    /// Sandbox container name.
    #[arg(long, env = "PERCH_CONTAINER_NAME", default_value = "perch-sandbox")]
    pub container_name: String,

    /// Sandbox container image.
    #[arg(long, env = "PERCH_CONTAINER_IMAGE", default_value = "perch-sandbox:latest")]
    pub container_image: String,

    /// Path to the file-backed key-value state store.
    #[arg(long, env = "PERCH_STATE_PATH", default_value = "./perch-state.json")]
    pub state_path: PathBuf,

    /// WebSocket upgrade path.
    #[arg(long, env = "PERCH_WS_PATH", default_value = "/ws")]
    pub ws_path: String,

    /// Log format (json or text).
    #[arg(long, env = "PERCH_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "PERCH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    ///
    /// Collects every missing or malformed required value so startup can
    /// fail once with the complete list instead of one name at a time.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut problems = Vec::new();

        match self.app_secret.as_deref() {
            None => problems.push("PERCH_APP_SECRET is not set".to_owned()),
            Some(s) if s.len() < MIN_SECRET_LEN => {
                problems.push(format!("PERCH_APP_SECRET must be at least {MIN_SECRET_LEN} chars"));
            }
            Some(_) => {}
        }

        match self.encryption_key.as_deref() {
            None => problems.push("PERCH_ENCRYPTION_KEY is not set".to_owned()),
            Some(k) if k.len() != 64 || hex::decode(k).is_err() => {
                problems.push("PERCH_ENCRYPTION_KEY must be 64 hex characters".to_owned());
            }
            Some(_) => {}
        }

        for (value, name) in [
            (&self.github_client_id, "PERCH_GITHUB_CLIENT_ID"),
            (&self.github_client_secret, "PERCH_GITHUB_CLIENT_SECRET"),
            (&self.allowed_user, "PERCH_ALLOWED_USER"),
            (&self.public_url, "PERCH_PUBLIC_URL"),
        ] {
            if value.as_deref().map(str::trim).unwrap_or("").is_empty() {
                problems.push(format!("{name} is not set"));
            }
        }

        if !self.ws_path.starts_with('/') {
            problems.push("PERCH_WS_PATH must start with '/'".to_owned());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid configuration:\n  {}", problems.join("\n  "))
        }
    }

    /// Decode the 32-byte encryption key. Call after [`Config::validate`].
    pub fn encryption_key_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let hex_key = self.encryption_key.as_deref().unwrap_or("");
        let bytes = hex::decode(hex_key)?;
        if bytes.len() != 32 {
            anyhow::bail!("encryption key must decode to 32 bytes");
        }
        Ok(bytes)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
