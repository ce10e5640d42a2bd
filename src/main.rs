use docqa::answer::AnswerComposer;
use docqa::embedding::{EmbeddingClient, HttpEmbeddingClient, RetryPolicy};
use docqa::extract::ExtractorRegistry;
use docqa::generation::HttpLanguageModel;
use docqa::index::{IndexManager, IndexSettings};
use docqa::metrics::ServiceMetrics;
use docqa::processing::DocumentService;
use docqa::retrieval::RetrievalEngine;
use docqa::{api, config, logging};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    let retry = RetryPolicy::with_attempts(config.retry_max_attempts);
    let embedder: Arc<dyn EmbeddingClient> = Arc::new(
        HttpEmbeddingClient::new(
            &config.embedding_url,
            &config.embedding_api_key,
            &config.embedding_model,
            config.embedding_dimension,
            retry,
        )
        .expect("Failed to build embedding client"),
    );
    let model = Arc::new(
        HttpLanguageModel::new(
            &config.generation_url,
            &config.generation_api_key,
            &config.generation_model,
            retry,
        )
        .expect("Failed to build generation client"),
    );

    let settings = IndexSettings {
        data_dir: config.data_dir.clone(),
        dimension: config.embedding_dimension,
        chunk_size: config.chunk_size,
        chunk_overlap: config.chunk_overlap,
        compact_threshold: config.compact_threshold,
        auto_repair: config.auto_repair,
    };
    let index = Arc::new(
        IndexManager::open(settings, ExtractorRegistry::with_defaults(), embedder.clone())
            .expect("Failed to open document index"),
    );

    let retrieval = RetrievalEngine::new(index.clone(), embedder, config.oversample_factor);
    let composer = AnswerComposer::new(model);
    let service = DocumentService::new(
        index,
        retrieval,
        composer,
        Arc::new(ServiceMetrics::new()),
        config.chunk_size,
        config.top_k,
        config.per_document_cap,
    );
    let app = api::create_router(Arc::new(service));

    let (listener, port) = bind_listener().await.expect("Failed to bind listener");
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.unwrap();
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4200..=4299;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4200-4299",
    ))
}
