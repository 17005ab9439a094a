use std::sync::Arc;

use relevia_backend_rust::adaptive::types::NewTopic;
use relevia_backend_rust::adaptive::{AdaptiveConfig, AdaptiveEngine};
use relevia_backend_rust::config::Config;
use relevia_backend_rust::db::config::DbConfig;
use relevia_backend_rust::db::{MemoryStore, SqliteStore, Store};
use relevia_backend_rust::logging;
use relevia_backend_rust::services::{
    ContentGenerator, LLMProvider, LlmContentGenerator, TemplateGenerator,
};
use relevia_backend_rust::workers::WorkerManager;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log_level);

    let db_config = DbConfig::from_env();
    let store: Arc<dyn Store> = match db_config.url {
        Some(_) => match SqliteStore::from_config(&db_config).await {
            Ok(store) => Arc::new(store),
            Err(err) => {
                tracing::error!(error = %err, "sqlite store not initialized");
                return;
            }
        },
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let provider = LLMProvider::from_env();
    let generator: Arc<dyn ContentGenerator> = if provider.is_available() {
        tracing::info!(model = provider.model(), "LLM content generator enabled");
        Arc::new(LlmContentGenerator::new(provider))
    } else {
        tracing::warn!("LLM not configured, using template content generator");
        Arc::new(TemplateGenerator)
    };

    let engine = Arc::new(AdaptiveEngine::new(store, generator, AdaptiveConfig::from_env()));

    match engine
        .bootstrap_root(NewTopic::root(
            config.root_topic_name.clone(),
            config.root_topic_description.clone(),
        ))
        .await
    {
        Ok(root) => tracing::info!(topic_id = root.id, name = %root.name, "root topic ready"),
        Err(err) => {
            tracing::error!(error = %err, "failed to bootstrap root topic");
            return;
        }
    }

    let worker_manager = match WorkerManager::new(Arc::clone(&engine)).await {
        Ok(manager) => {
            if let Err(e) = manager.start().await {
                tracing::error!(error = %e, "failed to start workers");
            }
            Some(manager)
        }
        Err(e) => {
            tracing::warn!(error = %e, "worker manager not initialized");
            None
        }
    };

    tracing::info!("adaptive engine running");
    shutdown_signal().await;
    tracing::info!("shutdown signal received, initiating graceful shutdown sequence");

    if let Some(ref manager) = worker_manager {
        manager.stop().await;
    }
    engine.drain_background().await;

    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
