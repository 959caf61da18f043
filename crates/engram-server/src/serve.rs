use crate::config::ServerConfig;
use engram_core::{Engram, HttpLlm, LlmCapability};
use std::sync::Arc;
use tracing::info;

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!("Starting Engram server v{}", env!("CARGO_PKG_VERSION"));
    info!("HTTP: {}", config.server.http_addr);
    info!("Data: {:?}", config.server.data_dir);

    let llm_small: Arc<dyn LlmCapability> =
        Arc::new(HttpLlm::new("llm_small", config.engram.llm.small.clone()));
    let llm_large: Arc<dyn LlmCapability> =
        Arc::new(HttpLlm::new("llm_large", config.engram.llm.large.clone()));

    info!("Opening database...");
    let service = Engram::open(
        config.db_path(),
        config.engram.clone(),
        llm_small,
        llm_large,
        None,
    )?;
    {
        let stats = service.stats()?;
        info!(
            "Database loaded: {} nodes, {} edges, {} episodes",
            stats.node_count, stats.edge_count, stats.episode_count
        );
    }

    service.start();

    let app_state = crate::http::AppState::new(service.clone());
    let app = crate::http::create_router(app_state);
    let addr = config.server.http_addr;

    let http_task = tokio::spawn(async move {
        info!("Starting HTTP server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("Failed to bind HTTP server");
        axum::serve(listener, app).await.expect("HTTP server failed");
    });

    info!("Engram server ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, terminating...");

    http_task.abort();
    service.shutdown();

    Ok(())
}
