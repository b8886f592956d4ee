use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use mesabot_core::{
    load_config, AssistantOrchestrator, BuiltinToolExecutor, ConversationProcessor, DecisionDispatcher,
    DedupCache, MesabotConfig, Worker,
};
use mesabot_provider::{LlmProvider, OpenAiProvider};
use mesabot_server::state::AppState;
use mesabot_store::DataStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mesabot", about = "Conversational reservation backend")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config/main.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    tracing::info!(
        app = %config.app.name,
        env = %config.app.env,
        "configuration loaded"
    );

    run(config).await
}

async fn run(config: MesabotConfig) -> Result<()> {
    let store = DataStore::open(&config.store.db_path)?;

    let provider: Option<Arc<dyn LlmProvider>> = if config.assistant.api_key.trim().is_empty() {
        tracing::warn!("assistant.api_key not set, running in degraded mode");
        None
    } else {
        Some(Arc::new(OpenAiProvider::new(
            config.assistant.api_key.clone(),
            config.assistant.api_base.clone(),
        )))
    };

    let sender = Arc::new(mesabot_channels::WhatsAppSender::new(
        config.whatsapp.api_base.clone(),
        config.whatsapp.phone_id.clone(),
        config.whatsapp.access_token.clone(),
    ));
    let alerts: Option<Arc<dyn mesabot_core::AlertSender>> = match (
        config.alerts.enabled,
        config.alerts.webhook_url.as_deref(),
    ) {
        (true, Some(url)) if !url.trim().is_empty() => {
            Some(Arc::new(mesabot_channels::WebhookAlertSender::new(url)))
        }
        (true, _) => {
            tracing::warn!("alerts.enabled set without alerts.webhook_url, alerts disabled");
            None
        }
        _ => None,
    };

    let (queue, receiver) = mesabot_queue::channel();
    let shutdown = CancellationToken::new();

    let worker = Worker::new(
        receiver,
        ConversationProcessor::new(store.clone(), config.pipeline.history_limit),
        AssistantOrchestrator::new(&config.assistant, provider, Arc::new(BuiltinToolExecutor)),
        DecisionDispatcher::new(
            store.clone(),
            sender,
            alerts,
            config.pipeline.pending_ttl_secs,
        ),
        store,
        shutdown.clone(),
    );
    let worker_handle = worker.spawn();

    let state = AppState {
        dedup: Arc::new(DedupCache::new(Duration::from_secs(
            config.pipeline.dedup_window_secs,
        ))),
        queue,
        verify_token: config.whatsapp.verify_token.clone(),
    };

    tokio::select! {
        result = mesabot_server::serve(state, &config.server.bind) => {
            if let Err(error) = result {
                tracing::error!(error = %error, "server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    // Stop pulling new envelopes; the in-flight one finishes first.
    shutdown.cancel();
    let _ = worker_handle.await;
    Ok(())
}
