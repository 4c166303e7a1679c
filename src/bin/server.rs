// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use anyhow::Result;
use photo_match::api::rest::{create_app, ApiConfig, AppState};
use photo_match::config::Settings;
use photo_match::context::EngineContext;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "photo_match=info,tower_http=debug".into()),
        )
        .init();

    // Load configuration from environment
    let settings = Settings::from_env()?;
    let config = load_config(&settings);
    let bind_host = settings.api.host;

    info!(
        "Starting photo match server on {}:{} (event {})",
        config.host, config.port, settings.event_slug
    );

    let ctx = EngineContext::from_settings(settings).await?;
    let state = AppState::from_context(&ctx)?;
    let app = create_app(&config, state);

    let addr = SocketAddr::new(bind_host, config.port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    // Run the server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn load_config(settings: &Settings) -> ApiConfig {
    ApiConfig {
        host: settings.api.host.to_string(),
        port: settings.api.port,
        max_request_size: settings.max_upload_bytes(),
        cors_origins: settings.api.cors_origins.clone(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
