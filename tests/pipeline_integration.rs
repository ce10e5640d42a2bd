use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use docqa::answer::AnswerComposer;
use docqa::api::create_router;
use docqa::embedding::{EmbeddingClient, EmbeddingError};
use docqa::extract::ExtractorRegistry;
use docqa::generation::{GenerationError, LanguageModel};
use docqa::index::{IndexManager, IndexSettings};
use docqa::metrics::ServiceMetrics;
use docqa::processing::DocumentService;
use docqa::retrieval::RetrievalEngine;
use serde_json::{Value, json};
use tower::ServiceExt;

const DIMENSION: usize = 16;

/// Deterministic embedder so retrieval results are stable across runs.
struct HashEmbedder;

impl HashEmbedder {
    fn encode(text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; DIMENSION];
        for (idx, byte) in text.bytes().enumerate() {
            embedding[idx % DIMENSION] += f32::from(byte) / 255.0;
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(Self::encode(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| Self::encode(text)).collect())
    }
}

/// Canned model that always cites the first passage.
struct CitingModel;

#[async_trait]
impl LanguageModel for CitingModel {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Ok(json!({
            "answer": "The report covers quarterly revenue.",
            "key_points": ["revenue grew"],
            "cited_sources": [1]
        })
        .to_string())
    }
}

struct FailingModel;

#[async_trait]
impl LanguageModel for FailingModel {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::RateLimited)
    }
}

fn build_app(data_dir: &std::path::Path, model: Arc<dyn LanguageModel>) -> Router {
    let embedder: Arc<dyn EmbeddingClient> = Arc::new(HashEmbedder);
    let settings = IndexSettings {
        data_dir: data_dir.to_path_buf(),
        dimension: DIMENSION,
        chunk_size: 200,
        chunk_overlap: 40,
        compact_threshold: 4,
        auto_repair: true,
    };
    let index = Arc::new(
        IndexManager::open(settings, ExtractorRegistry::with_defaults(), embedder.clone())
            .expect("index opened"),
    );
    let retrieval = RetrievalEngine::new(index.clone(), embedder, 4);
    let composer = AnswerComposer::new(model);
    let service = DocumentService::new(
        index,
        retrieval,
        composer,
        Arc::new(ServiceMetrics::new()),
        200,
        5,
        None,
    );
    create_router(Arc::new(service))
}

async fn request(app: &Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .expect("request"),
        )
        .await
        .expect("router response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn sample_document(topic: &str) -> String {
    format!("This paragraph discusses {topic} in detail. ").repeat(20)
}

#[tokio::test]
async fn upload_list_ask_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_app(dir.path(), Arc::new(CitingModel));

    let (status, upload) = request(
        &app,
        Method::POST,
        "/documents?filename=revenue.txt",
        Body::from(sample_document("quarterly revenue")),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(upload["status"], "indexed");
    assert!(upload["chunk_count"].as_u64().expect("count") > 1);

    let (status, listing) = request(&app, Method::GET, "/documents", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let documents = listing["documents"].as_array().expect("array");
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0]["filename"], "revenue.txt");

    let ask_body = json!({ "question": "What does the report cover?" }).to_string();
    let (status, answer) = request(&app, Method::POST, "/ask", Body::from(ask_body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answer["outcome"], "answered");
    assert_eq!(answer["text"], "The report covers quarterly revenue.");
    let sources = answer["sources"].as_array().expect("sources");
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["filename"], "revenue.txt");

    let (status, metrics) = request(&app, Method::GET, "/metrics", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["documents_indexed"], 1);
    assert_eq!(metrics["questions_answered"], 1);
}

#[tokio::test]
async fn deleted_documents_stop_answering() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_app(dir.path(), Arc::new(CitingModel));

    let (_, uploaded) = request(
        &app,
        Method::POST,
        "/documents?filename=doomed.txt",
        Body::from(sample_document("obsolete plans")),
    )
    .await;
    let document_id = uploaded["document_id"].as_str().expect("id").to_string();

    let (status, _) = request(
        &app,
        Method::DELETE,
        &format!("/documents/{document_id}"),
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Second delete of the same id is a 404.
    let (status, _) = request(
        &app,
        Method::DELETE,
        &format!("/documents/{document_id}"),
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let ask_body = json!({ "question": "What about the obsolete plans?" }).to_string();
    let (status, answer) = request(&app, Method::POST, "/ask", Body::from(ask_body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answer["outcome"], "no_relevant_content");
    assert_eq!(answer["sources"].as_array().expect("sources").len(), 0);
}

#[tokio::test]
async fn unsupported_upload_is_rejected_and_recorded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_app(dir.path(), Arc::new(CitingModel));

    let (status, _) = request(
        &app,
        Method::POST,
        "/documents?filename=tool.exe",
        Body::from(vec![0x4d, 0x5a, 0x00]),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, listing) = request(&app, Method::GET, "/documents", Body::empty()).await;
    let documents = listing["documents"].as_array().expect("array");
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0]["status"], "failed");
    assert_eq!(documents[0]["chunk_count"], 0);

    let (_, metrics) = request(&app, Method::GET, "/metrics", Body::empty()).await;
    assert_eq!(metrics["documents_failed"], 1);
}

#[tokio::test]
async fn generation_failure_degrades_instead_of_erroring() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = build_app(dir.path(), Arc::new(FailingModel));

    request(
        &app,
        Method::POST,
        "/documents?filename=facts.txt",
        Body::from(sample_document("stubborn facts")),
    )
    .await;

    let ask_body = json!({ "question": "What are the facts?" }).to_string();
    let (status, answer) = request(&app, Method::POST, "/ask", Body::from(ask_body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answer["outcome"], "generation_failed");
    assert_eq!(answer["text"], "");
    assert!(
        !answer["sources"].as_array().expect("sources").is_empty(),
        "degraded answers keep the retrieved sources"
    );
}

#[tokio::test]
async fn index_survives_process_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let app = build_app(dir.path(), Arc::new(CitingModel));
        let (status, _) = request(
            &app,
            Method::POST,
            "/documents?filename=durable.txt",
            Body::from(sample_document("long-lived records")),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let app = build_app(dir.path(), Arc::new(CitingModel));
    let (status, listing) = request(&app, Method::GET, "/documents", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let documents = listing["documents"].as_array().expect("array");
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0]["filename"], "durable.txt");
    assert_eq!(documents[0]["status"], "indexed");

    let ask_body = json!({ "question": "Where are the long-lived records?" }).to_string();
    let (status, answer) = request(&app, Method::POST, "/ask", Body::from(ask_body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answer["outcome"], "answered");
}
