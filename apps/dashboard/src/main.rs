use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dashboard::api_client::ApiClient;
use dashboard::cache::{CacheOptions, ResourceCache, Subscription};
use dashboard::config::Config;
use dashboard::documents::{DocumentList, DocumentPage};
use dashboard::models::document::{DocumentFilters, DocumentStatus};
use dashboard::poller::{
    PollingSupervisor, StatusSink, StatusUpdate, TrackedEntity, TrackedStatus,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting document watcher v{}", env!("CARGO_PKG_VERSION"));

    let client = Arc::new(ApiClient::new(
        config.api_url.clone(),
        Some(config.api_token.clone()),
    )?);
    info!("API client initialized ({})", config.api_url);

    let cache: ResourceCache<DocumentPage> = ResourceCache::new(client.clone());
    let list = DocumentList::new(client.clone(), cache, DocumentFilters::default());
    let mut documents = list.subscribe(CacheOptions::default());

    let initial = documents.settled().await;
    if let Some(err) = &initial.error {
        warn!("Initial document list failed: {err}");
    }

    let supervisor = PollingSupervisor::new(client.clone());
    let (tx, mut updates) = mpsc::unbounded_channel::<StatusUpdate<DocumentStatus>>();
    let sink: StatusSink<DocumentStatus> = Arc::new(move |update| {
        let _ = tx.send(update);
    });

    let tracked = tracked_entities(&documents);
    info!("Tracking {} documents still in progress", tracked.len());
    supervisor.sync(&tracked, sink.clone(), &config.polling);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            changed = documents.changed() => {
                if !changed {
                    warn!("Document list subscription closed");
                    break;
                }
                // Any list change (revalidation, focus refetch, patch) may add or finish documents.
                supervisor.sync(&tracked_entities(&documents), sink.clone(), &config.polling);
            }
            Some(update) = updates.recv() => {
                info!("Document {} is now {}", update.entity_id, update.status);
                if let Some(message) = &update.error_message {
                    warn!("Document {} reported: {message}", update.entity_id);
                }

                if let Err(err) = list.set_status(&update.entity_id, update.status).await {
                    error!("Failed to patch document list: {err}");
                }
                if update.status.is_terminal() {
                    if let Err(err) = list.refresh().await {
                        error!("Failed to refresh document list: {err}");
                    }
                }
            }
        }
    }

    supervisor.shutdown();
    Ok(())
}

fn tracked_entities(documents: &Subscription<DocumentPage>) -> Vec<TrackedEntity<DocumentStatus>> {
    documents
        .data()
        .unwrap_or_default()
        .into_iter()
        .map(|doc| TrackedEntity::new(doc.id.to_string(), doc.status))
        .collect()
}
