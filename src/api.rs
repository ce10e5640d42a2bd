//! HTTP surface for the document question-answering service.
//!
//! This module exposes a compact Axum router with a handful of endpoints:
//!
//! - `POST /documents?filename=...` – Extract, chunk, embed, and index an uploaded file
//!   (raw bytes body). Returns `{document_id, chunk_count, chunk_size, status}`.
//! - `GET /documents` – List stored documents with status and chunk counts.
//! - `DELETE /documents/{id}` – Remove a document and its vectors.
//! - `POST /ask` – Answer a question from the indexed documents with citations.
//! - `GET /metrics` – Observe ingestion and question counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::answer::Answer;
use crate::index::{Document, IndexError, IngestError};
use crate::processing::{DocumentApi, ServiceError, UploadOutcome};
use crate::retrieval::RetrieveError;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Build the HTTP router exposing the document API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: DocumentApi + 'static,
{
    Router::new()
        .route(
            "/documents",
            get(list_documents::<S>).post(upload_document::<S>),
        )
        .route("/documents/:id", delete(delete_document::<S>))
        .route("/ask", post(ask::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Query parameters for `POST /documents`.
#[derive(Deserialize)]
struct UploadParams {
    /// Original filename; the extension selects the extractor.
    filename: String,
}

/// Ingest an uploaded file into the index.
///
/// The body is the raw file bytes; extraction, chunking, and embedding run
/// before the request returns, so the response carries the final status.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadOutcome>), AppError>
where
    S: DocumentApi,
{
    let outcome = service.upload(&params.filename, &body).await?;
    tracing::info!(
        filename = %params.filename,
        document = %outcome.document_id,
        chunks = outcome.chunk_count,
        "Upload completed"
    );
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

/// Response body for `GET /documents`.
#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<Document>,
}

/// List stored documents, including failed ingestions.
async fn list_documents<S>(State(service): State<Arc<S>>) -> Json<DocumentsResponse>
where
    S: DocumentApi,
{
    Json(DocumentsResponse {
        documents: service.list_documents().await,
    })
}

/// Delete a document and its vectors.
async fn delete_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<Uuid>,
) -> Result<(), AppError>
where
    S: DocumentApi,
{
    service.delete_document(id).await?;
    Ok(())
}

/// Request body for `POST /ask`.
#[derive(Deserialize)]
struct AskRequest {
    /// Question to answer from the indexed documents.
    question: String,
    /// Optional override of the configured result count.
    #[serde(default)]
    top_k: Option<usize>,
}

/// Answer a question from the indexed documents.
async fn ask<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<Answer>, AppError>
where
    S: DocumentApi,
{
    let answer = service.ask(&request.question, request.top_k).await?;
    Ok(Json(answer))
}

/// Return ingestion and question counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Response
where
    S: DocumentApi,
{
    Json(service.metrics_snapshot()).into_response()
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "upload_document",
                method: "POST",
                path: "/documents",
                description: "Extract, chunk, embed, and index a file. The body is the raw file bytes; pass the original name as ?filename=. Response returns { \"document_id\": uuid, \"chunk_count\": number, \"chunk_size\": number, \"status\": string }.",
                request_example: Some(json!({
                    "query": { "filename": "report.txt" },
                    "body": "<raw file bytes>"
                })),
            },
            CommandDescriptor {
                name: "list_documents",
                method: "GET",
                path: "/documents",
                description: "Return stored documents with status, chunk counts, and upload timestamps.",
                request_example: None,
            },
            CommandDescriptor {
                name: "delete_document",
                method: "DELETE",
                path: "/documents/{id}",
                description: "Remove a document and all of its vectors from the index.",
                request_example: None,
            },
            CommandDescriptor {
                name: "ask",
                method: "POST",
                path: "/ask",
                description: "Answer a question from the indexed documents, with citations back to the source files.",
                request_example: Some(json!({
                    "question": "What were the Q3 revenue figures?",
                    "top_k": 5
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion and question counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

struct AppError(ServiceError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Ingest(IngestError::Extract(_) | IngestError::EmptyContent) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::Ingest(IngestError::Embedding(error)) if error.is_transient() => {
                StatusCode::BAD_GATEWAY
            }
            ServiceError::Retrieve(RetrieveError::Embedding(error)) if error.is_transient() => {
                StatusCode::BAD_GATEWAY
            }
            ServiceError::Index(IndexError::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), self.0.to_string()).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self(inner)
    }
}
