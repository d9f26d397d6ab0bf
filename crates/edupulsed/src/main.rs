use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod proto;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("edupulsed starting");

    let config = config::Config::from_env();
    let engine = engine::spawn_engine(&config).context("engine startup failed")?;

    let app = server::router(server::AppState { engine });
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "edupulsed ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("edupulsed shutting down");
        })
        .await?;

    Ok(())
}
