mod config;
mod error;
mod models;
mod routes;
mod services;

use anyhow::Context;
use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("coursegen=info,tower_http=info")),
        )
        .init();

    let config = Arc::new(Config::from_env());
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory {}",
                config.output_dir.display()
            )
        })?;

    let key_status = config.default_keys.status();
    tracing::info!(
        "Default keys: gemini={} deepseek={} image={}",
        key_status.gemini,
        key_status.deepseek,
        key_status.image
    );

    let state = routes::AppState::new(config.clone());
    let sweeper = state.clone();
    let (ttl, every) = (config.session_ttl, config.session_sweep_interval);
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(every);
        loop {
            ticks.tick().await;
            let reaped = sweeper.reap_idle(ttl).await;
            if reaped > 0 {
                tracing::info!("Reaped {} idle session(s)", reaped);
            }
        }
    });

    let app = routes::router(state);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
