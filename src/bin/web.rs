//! Scribe HTTP 服务
//!
//! 启动: cargo run --bin scribe-web --features web
//! 提交: curl -X POST localhost:5000/task -H 'content-type: application/json' -d '{"query":"growing tomatoes"}'

use std::sync::Arc;

use anyhow::Context;
use scribe::config::{load_config, AppConfig};
use scribe::observability;
use scribe::runtime::create_gateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let gateway = Arc::new(create_gateway(&cfg).await.context("Failed to create gateway")?);
    let app = scribe::web::router(Arc::clone(&gateway));

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.bind_addr))?;
    tracing::info!("Scribe listening on http://{}", cfg.server.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Ctrl+C received, shutting down");
            gateway.shutdown();
        })
        .await
        .context("Server error")?;

    Ok(())
}
