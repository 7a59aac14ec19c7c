//! `ragkeeper-server`: boots the HTTP surface over a configured store,
//! object store, vector index, and provider clients.

use ragkeeper::api::{create_router, AppState};
use ragkeeper::config::Config;
use ragkeeper::embedding::HttpEmbeddingClient;
use ragkeeper::nli::HttpNliClient;
use ragkeeper::object_store::FsObjectStore;
use ragkeeper::store::Store;
use ragkeeper::verifier::{HttpVerifier, VerifierBackend, HttpVerifierConfig};
use ragkeeper::vector_store::SqliteVectorStore;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var("RAGKEEPER_CONFIG").ok();
    let config = match config_path {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };
    config.validate()?;

    let store = Arc::new(Store::connect(&config.storage.database_url).await?);
    let objects: Arc<dyn ragkeeper::object_store::ObjectStore> =
        Arc::new(FsObjectStore::new(&config.storage.object_store_dir));
    let vectors: Arc<dyn ragkeeper::vector_store::VectorStore> =
        Arc::new(SqliteVectorStore::connect(&config.storage.database_url).await?);

    let provider_timeout = Duration::from_secs(config.providers.request_timeout_secs);
    let embedder: Arc<dyn ragkeeper::embedding::EmbeddingClient> =
        Arc::new(HttpEmbeddingClient::new(config.providers.embedding_url.clone(), provider_timeout)?);
    let nli: Arc<dyn ragkeeper::nli::NliClient> =
        Arc::new(HttpNliClient::new(config.providers.nli_url.clone(), provider_timeout)?);
    let verifier: Arc<dyn ragkeeper::verifier::GenerativeVerifier> = Arc::new(HttpVerifier::new(
        VerifierBackend::Http(HttpVerifierConfig {
            url: config.providers.verifier_url.clone(),
            timeout: Duration::from_secs(config.conflict.verifier_timeout_secs),
        }),
    )?);

    let state = AppState::new(store, objects, vectors, embedder, nli, verifier, &config)?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!(addr = %config.server.bind_addr, "ragkeeper-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
