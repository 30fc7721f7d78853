//! HTTP server for the deliberation API
//!
//! Thin layer over the engine: conversation management, turn submission
//! (aggregated JSON or an SSE event stream), cancellation, and the document
//! library. No auth; intended to sit behind a local UI.

use crate::config::Config;
use crate::council::{CouncilEngine, EngineError, TurnMode, TurnRequest};
use crate::documents::DocumentLibrary;
use crate::personality::PersonalityConfig;
use crate::storage::{Conversation, ConversationStore, ConversationSummary};
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Shared application state
pub struct AppState {
    engine: CouncilEngine,
    store: Arc<dyn ConversationStore>,
    documents: Arc<DocumentLibrary>,
    config: Config,
}

impl AppState {
    pub fn new(
        engine: CouncilEngine,
        store: Arc<dyn ConversationStore>,
        documents: Arc<DocumentLibrary>,
        config: Config,
    ) -> Self {
        Self {
            engine,
            store,
            documents,
            config,
        }
    }
}

/// Request to create a new conversation
#[derive(Debug, Deserialize, Default)]
struct CreateConversationRequest {
    #[serde(default)]
    personalities: Option<PersonalityConfig>,
}

/// Request to send a message in a conversation
#[derive(Debug, Deserialize)]
struct MessageRequest {
    content: String,
    #[serde(default)]
    mode: Option<TurnMode>,
    #[serde(default)]
    include_documents: bool,
}

/// Aggregated turn response
#[derive(Debug, Serialize)]
struct TurnResponse {
    mode: TurnMode,
    message: crate::storage::Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    service: String,
}

/// Council configuration response
#[derive(Debug, Serialize)]
struct ConfigResponse {
    council_models: Vec<String>,
    chairman_model: String,
}

#[derive(Debug, Deserialize)]
struct AddDocumentRequest {
    filename: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct SetDocumentActiveRequest {
    active: bool,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
}

fn engine_error_response(e: EngineError) -> (StatusCode, String) {
    let status = match &e {
        EngineError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
        EngineError::TurnInFlight(_) => StatusCode::CONFLICT,
        EngineError::TurnFailed(_) | EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "quorum".to_string(),
    })
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        council_models: state.config.council.models.clone(),
        chairman_model: state.config.council.chairman.clone(),
    })
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<Json<Conversation>, (StatusCode, String)> {
    let conversation = state
        .store
        .create(request.personalities)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(conversation))
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ConversationSummary>>, (StatusCode, String)> {
    let summaries = state
        .store
        .list()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(summaries))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, (StatusCode, String)> {
    let conversation = state
        .store
        .load(&id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((StatusCode::NOT_FOUND, "Conversation not found".to_string()))?;
    Ok(Json(conversation))
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<TurnResponse>, (StatusCode, String)> {
    let outcome = state
        .engine
        .submit_turn(TurnRequest {
            conversation_id: id,
            content: request.content,
            mode: request.mode,
            include_documents: request.include_documents,
        })
        .await
        .map_err(engine_error_response)?;

    Ok(Json(TurnResponse {
        mode: outcome.mode,
        message: outcome.message,
        title: outcome.title,
    }))
}

async fn send_message_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let events = state
        .engine
        .submit_turn_streaming(TurnRequest {
            conversation_id: id,
            content: request.content,
            mode: request.mode,
            include_documents: request.include_documents,
        })
        .await
        .map_err(engine_error_response)?;

    let stream = events.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn cancel_turn(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.engine.cancel(&id),
    })
}

async fn list_documents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.documents.list() {
        Ok(records) => Json(records).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn add_document(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddDocumentRequest>,
) -> impl IntoResponse {
    match state.documents.add(&request.filename, &request.text) {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn set_document_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<SetDocumentActiveRequest>,
) -> impl IntoResponse {
    match state.documents.set_active(&id, request.active) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Document not found".to_string()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.documents.remove(&id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Document not found".to_string()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Build the API router for the given state
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/api/config", get(get_config))
        .route("/api/conversations", post(create_conversation))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/:id", get(get_conversation))
        .route("/api/conversations/:id/message", post(send_message))
        .route(
            "/api/conversations/:id/message/stream",
            post(send_message_stream),
        )
        .route("/api/conversations/:id/cancel", post(cancel_turn))
        .route("/api/documents", get(list_documents))
        .route("/api/documents", post(add_document))
        .route("/api/documents/:id", patch(set_document_active))
        .route("/api/documents/:id", delete(delete_document))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Start the HTTP server
pub async fn run_http_server(
    host: &str,
    port: u16,
    engine: CouncilEngine,
    store: Arc<dyn ConversationStore>,
    documents: Arc<DocumentLibrary>,
    config: Config,
) -> Result<()> {
    let state = Arc::new(AppState::new(engine, store, documents, config));

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
