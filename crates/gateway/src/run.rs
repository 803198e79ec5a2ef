// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compose the gateway and serve it until shutdown.

use std::sync::Arc;
use std::sync::Once;

use tracing::info;

use crate::config::Config;
use crate::logbuf::LogBuffer;
use crate::sandbox::DockerSandbox;
use crate::session::agent::SubprocessLauncher;
use crate::session::SessionManager;
use crate::store::Store;
use crate::transport::state::{Gateway, Settings};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build the shared [`Gateway`] state from a validated config.
pub fn build_gateway(config: &Config) -> anyhow::Result<Arc<Gateway>> {
    let settings = Settings::from_config(config)?;
    let store = Arc::new(Store::open(&config.state_path)?);
    let debug_log = Arc::new(LogBuffer::new());
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&debug_log),
        Arc::new(SubprocessLauncher),
    ));
    let sandbox = Arc::new(DockerSandbox::new(&config.container_name, &config.container_image));
    Ok(Arc::new(Gateway::new(settings, store, manager, debug_log, sandbox)))
}

/// Run the gateway until ctrl-c.
pub async fn run(config: Config) -> anyhow::Result<()> {
    ensure_crypto();

    let gateway = build_gateway(&config)?;
    let router = crate::transport::build_router(Arc::clone(&gateway));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {addr} (public: {})", gateway.settings.public_url);
    gateway.debug_log.push("run", &format!("listening on {addr}"), None);

    let shutdown = gateway.shutdown.clone();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            signal_shutdown.cancel();
        }
    });

    let serve_gateway = Arc::clone(&gateway);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            // Stop any running Agent before the transport goes away.
            serve_gateway.manager.interrupt().await;
        })
        .await?;

    Ok(())
}
