// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::credential::oauth::TOKEN_URL;
use crate::logbuf::LogBuffer;
use crate::sandbox::SandboxControl;
use crate::session::SessionManager;
use crate::store::Store;

/// Immutable settings distilled from [`Config`] after validation.
#[derive(Clone)]
pub struct Settings {
    pub app_secret: String,
    pub encryption_key: Vec<u8>,
    pub github_client_id: String,
    pub github_client_secret: String,
    pub allowed_user: String,
    pub public_url: String,
    pub wrapper_path: PathBuf,
    pub ws_path: String,
}

impl Settings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            app_secret: config.app_secret.clone().unwrap_or_default(),
            encryption_key: config.encryption_key_bytes()?,
            github_client_id: config.github_client_id.clone().unwrap_or_default(),
            github_client_secret: config.github_client_secret.clone().unwrap_or_default(),
            allowed_user: config.allowed_user.clone().unwrap_or_default(),
            public_url: config
                .public_url
                .clone()
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_owned(),
            wrapper_path: config.wrapper_path.clone(),
            ws_path: config.ws_path.clone(),
        })
    }

    /// Cookies are marked `Secure` when the public URL is https.
    pub fn secure_cookies(&self) -> bool {
        self.public_url.starts_with("https://")
    }
}

/// Shared application state passed to all handlers via the axum `State`
/// extractor.
pub struct Gateway {
    pub settings: Settings,
    pub store: Arc<Store>,
    pub manager: Arc<SessionManager>,
    pub debug_log: Arc<LogBuffer>,
    pub sandbox: Arc<dyn SandboxControl>,
    pub http: reqwest::Client,
    pub started_at: Instant,
    pub shutdown: CancellationToken,
    /// Assistant-service token endpoint; overridable for tests.
    pub token_url: String,
}

impl Gateway {
    pub fn new(
        settings: Settings,
        store: Arc<Store>,
        manager: Arc<SessionManager>,
        debug_log: Arc<LogBuffer>,
        sandbox: Arc<dyn SandboxControl>,
    ) -> Self {
        Self {
            settings,
            store,
            manager,
            debug_log,
            sandbox,
            http: reqwest::Client::new(),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
            token_url: TOKEN_URL.to_owned(),
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("public_url", &self.settings.public_url)
            .field("allowed_user", &self.settings.allowed_user)
            .field("ws_path", &self.settings.ws_path)
            .finish()
    }
}
