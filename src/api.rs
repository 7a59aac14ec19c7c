//! External Boundary: the HTTP surface over the publish pipeline and
//! resolution controller.
//!
//! Routing, OpenAPI generation, and error-to-status mapping follow the
//! teacher's `create_router`/`ApiError`/`ApiDoc` pattern, generalized to this
//! crate's document/conflict endpoints.

use crate::conflict_engine::ConflictEngine;
use crate::embedding::EmbeddingClient;
use crate::error::Error;
use crate::model::{Chunk, Conflict, Document, DocumentStatus, ResolutionAction};
use crate::nli::NliClient;
use crate::object_store::ObjectStore;
use crate::parser;
use crate::publish::{PublishEvent, PublishPipeline};
use crate::resolution::ResolutionController;
use crate::store::Store;
use crate::verifier::GenerativeVerifier;
use crate::vector_store::VectorStore;
use crate::Result;
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub objects: Arc<dyn ObjectStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub pipeline: Arc<PublishPipeline>,
    pub resolution: Arc<ResolutionController>,
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        objects: Arc<dyn ObjectStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        nli: Arc<dyn NliClient>,
        verifier: Arc<dyn GenerativeVerifier>,
        config: &crate::config::Config,
    ) -> Result<Self> {
        let chunker = Arc::new(crate::chunker::Chunker::new(
            config.chunking.chunk_size,
            config.chunking.chunk_overlap,
        )?);
        let conflict_engine = Arc::new(ConflictEngine::new(
            config.conflict.clone(),
            Arc::clone(&vectors),
            nli,
            verifier,
        ));
        let pipeline = Arc::new(PublishPipeline::new(
            Arc::clone(&store),
            Arc::clone(&objects),
            Arc::clone(&vectors),
            embedder,
            chunker,
            conflict_engine,
            config.storage.max_upload_bytes,
        ));
        let resolution = Arc::new(ResolutionController::new(Arc::clone(&store), Arc::clone(&vectors)));
        Ok(Self { store, objects, vectors, pipeline, resolution })
    }
}

// ---- Request/response bodies -------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct IngestResponse {
    pub document_id: Uuid,
    pub duplicate: bool,
    pub status: String,
    pub processing_status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublishResponse {
    pub document_id: Uuid,
    pub status: String,
    pub conflict_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentStatusResponse {
    pub document: Document,
    pub total_chunks: i64,
    pub total_conflicts: i64,
    pub total_dedup_groups: i64,
}

/// A chunk summary as returned by `GET /documents/{id}`: the full text is
/// never sent over this endpoint, only a bounded preview.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChunkSummary {
    pub id: Uuid,
    pub idx: i64,
    pub text_preview: String,
    pub hash: u64,
    pub page: Option<i64>,
    pub section_path: Option<String>,
}

const TEXT_PREVIEW_CHARS: usize = 160;

impl From<&Chunk> for ChunkSummary {
    fn from(chunk: &Chunk) -> Self {
        let text_preview: String = chunk.text.chars().take(TEXT_PREVIEW_CHARS).collect();
        Self {
            id: chunk.id,
            idx: chunk.idx,
            text_preview,
            hash: chunk.hash,
            page: chunk.page,
            section_path: chunk.section_path.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteDocumentResponse {
    pub ok: bool,
    pub document_id: Uuid,
    pub deleted: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveConflictRequest {
    pub action: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResolveConflictResponse {
    pub id: Uuid,
    pub resolved: bool,
    pub action: String,
    pub kept_chunk_id: Uuid,
    pub removed_chunk_id: Option<Uuid>,
    pub auto_published: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResolveAllResponse {
    pub resolved_count: usize,
    pub chunks_kept: Vec<Uuid>,
    pub chunks_removed: Vec<Uuid>,
    pub auto_published_documents: Vec<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// Wraps crate errors for HTTP status mapping at the boundary.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(category = self.0.category(), error = %self.0, "request failed");
        } else {
            tracing::warn!(category = self.0.category(), error = %self.0, "request rejected");
        }
        let body = Json(ErrorResponse { error: self.0.to_string() });
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(OpenApi)]
#[openapi(
    paths(
        healthz_handler,
        ingest_handler,
        publish_handler,
        list_documents_handler,
        get_document_handler,
        document_status_handler,
        delete_document_handler,
        list_conflicts_handler,
        resolve_conflict_handler,
        resolve_all_conflicts_handler,
    ),
    components(schemas(
        IngestResponse,
        PublishResponse,
        DocumentStatusResponse,
        ChunkSummary,
        DeleteDocumentResponse,
        ResolveConflictRequest,
        ResolveConflictResponse,
        ResolveAllResponse,
        HealthResponse,
        ErrorResponse,
        Document,
        Chunk,
        Conflict,
        DocumentStatus,
    )),
    tags(
        (name = "documents", description = "Document ingestion and publishing"),
        (name = "conflicts", description = "Conflict review and resolution"),
        (name = "health", description = "Health check endpoint"),
    ),
    info(
        title = "ragkeeper API",
        version = "0.1.0",
        description = "Document ingestion and conflict-detection pipeline for a retrieval-augmented knowledge base",
    )
)]
struct ApiDoc;

/// Build the full router, ready for `axum::serve`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/documents", post(ingest_handler).get(list_documents_handler))
        .route("/documents/{id}", get(get_document_handler).delete(delete_document_handler))
        .route("/documents/{id}/status", get(document_status_handler))
        .route("/documents/{id}/publish", post(publish_handler))
        .route("/documents/{id}/publish-stream", get(publish_stream_handler))
        .route("/conflicts", get(list_conflicts_handler))
        .route("/conflicts/{id}/resolve", post(resolve_conflict_handler))
        .route("/conflicts/resolve-all", post(resolve_all_conflicts_handler))
        .route("/api-docs/openapi.json", get(openapi_spec_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn openapi_spec_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(get, path = "/healthz", tag = "health", responses((status = 200, body = HealthResponse)))]
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string(), version: crate::VERSION.to_string() })
}

/// Accept a multipart upload: a `file` part (binary, with filename) or a
/// `url` text part, plus an optional `title` text part.
#[utoipa::path(post, path = "/documents", tag = "documents", responses((status = 200, body = IngestResponse)))]
async fn ingest_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<IngestResponse>> {
    let mut title: Option<String> = None;
    let mut file_bytes: Option<(String, String, Vec<u8>)> = None; // (filename, ext, bytes)
    let mut url: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from(Error::BadInput(e.to_string())))?
    {
        match field.name().unwrap_or("") {
            "title" => {
                title = Some(field.text().await.map_err(|e| ApiError::from(Error::BadInput(e.to_string())))?);
            }
            "url" => {
                url = Some(field.text().await.map_err(|e| ApiError::from(Error::BadInput(e.to_string())))?);
            }
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let extension = filename
                    .rsplit('.')
                    .next()
                    .unwrap_or("")
                    .to_lowercase();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::from(Error::BadInput(e.to_string())))?
                    .to_vec();
                file_bytes = Some((filename, extension, bytes));
            }
            _ => {}
        }
    }

    let (document, duplicate) = if let Some(url) = url {
        let text = parser::parse_url(&url).await.map_err(ApiError::from)?;
        let title = title.unwrap_or_else(|| url.clone());
        state
            .pipeline
            .ingest(&title, &url, "txt", text.as_bytes())
            .await
            .map_err(ApiError::from)?
    } else if let Some((filename, extension, bytes)) = file_bytes {
        let title = title.unwrap_or(filename.clone());
        state
            .pipeline
            .ingest(&title, &filename, &extension, &bytes)
            .await
            .map_err(ApiError::from)?
    } else {
        return Err(ApiError::from(Error::BadInput("request must include a file or url part".to_string())));
    };

    Ok(Json(IngestResponse {
        document_id: document.id,
        duplicate,
        status: document.status.as_str().to_string(),
        processing_status: "draft".to_string(),
    }))
}

#[utoipa::path(post, path = "/documents/{id}/publish", tag = "documents", responses((status = 200, body = PublishResponse)))]
async fn publish_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<PublishResponse>> {
    let outcome = state.pipeline.publish(id).await.map_err(ApiError::from)?;
    Ok(Json(PublishResponse {
        document_id: id,
        status: outcome.status.as_str().to_string(),
        conflict_count: outcome.conflicts.len(),
    }))
}

async fn publish_stream_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.pipeline.publish_stream(id);
    let stream = UnboundedReceiverStream::new(rx).map(|event: PublishEvent| {
        Ok(Event::default().data(serde_json::to_string(&event).unwrap_or_default()))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[utoipa::path(get, path = "/documents", tag = "documents", responses((status = 200, body = [Document])))]
async fn list_documents_handler(State(state): State<AppState>) -> ApiResult<Json<Vec<Document>>> {
    Ok(Json(state.store.list_documents().await.map_err(ApiError::from)?))
}

/// Returns the document's chunks, not the document row: `GET /documents/{id}`
/// is the chunk-listing endpoint, `GET /documents/{id}/status` is where the
/// document itself lives.
#[utoipa::path(get, path = "/documents/{id}", tag = "documents", responses((status = 200, body = [ChunkSummary])))]
async fn get_document_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ChunkSummary>>> {
    let chunks = state.store.get_chunks_for_document(id).await.map_err(ApiError::from)?;
    if chunks.is_empty() {
        return Err(ApiError::from(Error::NotFound(format!("document {id}"))));
    }
    Ok(Json(chunks.iter().map(ChunkSummary::from).collect()))
}

#[utoipa::path(get, path = "/documents/{id}/status", tag = "documents", responses((status = 200, body = DocumentStatusResponse)))]
async fn document_status_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DocumentStatusResponse>> {
    let document = state
        .store
        .get_document(id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::from(Error::NotFound(format!("document {id}"))))?;
    let total_chunks = state.store.chunk_count(id).await.map_err(ApiError::from)?;
    let total_conflicts = state.store.open_conflict_count_for_document(id).await.map_err(ApiError::from)?;
    let total_dedup_groups =
        state.store.open_dedup_conflict_count_for_document(id).await.map_err(ApiError::from)?;
    Ok(Json(DocumentStatusResponse { document, total_chunks, total_conflicts, total_dedup_groups }))
}

#[utoipa::path(delete, path = "/documents/{id}", tag = "documents", responses((status = 200, body = DeleteDocumentResponse)))]
async fn delete_document_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeleteDocumentResponse>> {
    let document = state
        .store
        .get_document(id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::from(Error::NotFound(format!("document {id}"))))?;

    let chunks = state.store.get_chunks_for_document(id).await.map_err(ApiError::from)?;
    let chunk_ids: Vec<Uuid> = chunks.iter().map(|c| c.id).collect();
    if !chunk_ids.is_empty() {
        let _ = state.vectors.delete(&chunk_ids).await;
    }
    let _ = state.objects.delete(&document.storage_key).await;
    state.store.delete_document(id).await.map_err(ApiError::from)?;
    Ok(Json(DeleteDocumentResponse { ok: true, document_id: id, deleted: true }))
}

#[utoipa::path(get, path = "/conflicts", tag = "conflicts", responses((status = 200, body = [Conflict])))]
async fn list_conflicts_handler(State(state): State<AppState>) -> ApiResult<Json<Vec<Conflict>>> {
    Ok(Json(state.store.list_open_conflicts().await.map_err(ApiError::from)?))
}

fn parse_action(raw: &str) -> ApiResult<ResolutionAction> {
    ResolutionAction::parse(raw)
        .ok_or_else(|| ApiError::from(Error::BadInput(format!("unknown resolution action: {raw}"))))
}

#[utoipa::path(post, path = "/conflicts/{id}/resolve", tag = "conflicts", responses((status = 200, body = ResolveConflictResponse)))]
async fn resolve_conflict_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveConflictRequest>,
) -> ApiResult<Json<ResolveConflictResponse>> {
    let action = parse_action(&body.action)?;
    let result = state.resolution.resolve(id, action, &body.note).await.map_err(ApiError::from)?;
    Ok(Json(ResolveConflictResponse {
        id: result.conflict_id,
        resolved: true,
        action: result.action.as_str().to_string(),
        kept_chunk_id: result.kept_chunk_id,
        removed_chunk_id: result.removed_chunk_id,
        auto_published: result.auto_published_document.is_some(),
    }))
}

#[utoipa::path(post, path = "/conflicts/resolve-all", tag = "conflicts", responses((status = 200, body = ResolveAllResponse)))]
async fn resolve_all_conflicts_handler(
    State(state): State<AppState>,
    Json(body): Json<ResolveConflictRequest>,
) -> ApiResult<Json<ResolveAllResponse>> {
    let action = parse_action(&body.action)?;
    let results = state.resolution.resolve_all(action, &body.note).await.map_err(ApiError::from)?;
    let resolved_count = results.len();
    let chunks_kept = results.iter().map(|r| r.kept_chunk_id).collect();
    let chunks_removed = results.iter().filter_map(|r| r.removed_chunk_id).collect();
    let auto_published_documents = results.iter().filter_map(|r| r.auto_published_document).collect();
    Ok(Json(ResolveAllResponse { resolved_count, chunks_kept, chunks_removed, auto_published_documents }))
}
