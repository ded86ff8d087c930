//! Blackrock Server - HTTP API for the event store

mod api;

use anyhow::Context;
use blackrock_core::{IndexConfig, PostingsMode, SearchIndex};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    pub index: IndexConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            index: IndexConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `BLACKROCK_*` environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BLACKROCK_HTTP_ADDR") {
            config.http_addr = addr
                .parse()
                .with_context(|| format!("invalid BLACKROCK_HTTP_ADDR {:?}", addr))?;
        }
        if let Ok(dir) = std::env::var("BLACKROCK_DATA_DIR") {
            config.index.data_dir = dir.into();
        }
        if let Ok(step) = std::env::var("BLACKROCK_SEGMENT_STEP") {
            config.index.segment_step = step
                .parse()
                .with_context(|| format!("invalid BLACKROCK_SEGMENT_STEP {:?}", step))?;
        }
        if let Ok(list) = std::env::var("BLACKROCK_WHITELIST") {
            config.index.whitelist = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(size) = std::env::var("BLACKROCK_FORWARD_CACHE") {
            config.index.forward_cache_size = size
                .parse()
                .with_context(|| format!("invalid BLACKROCK_FORWARD_CACHE {:?}", size))?;
        }
        if let Ok(mode) = std::env::var("BLACKROCK_POSTINGS_MODE") {
            config.index.postings_mode = mode.parse::<PostingsMode>()?;
        }

        config.index.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let config = ServerConfig::from_env()?;

    info!("Starting Blackrock server...");
    info!("Data directory: {:?}", config.index.data_dir);
    info!("Segment step: {}s", config.index.segment_step);
    info!("HTTP server: http://{}", config.http_addr);

    let index = Arc::new(SearchIndex::open(config.index.clone())?);
    let app = api::create_router(index.clone());

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!("Blackrock server listening on {}", config.http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, flushing segments");
    tokio::task::spawn_blocking(move || index.close()).await??;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
