//! REST API for the portfolio insights assistant
//!
//! One chat per `chat_id`; the server keeps each chat's transcript and
//! passes the recent turns into every question.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::Assistant;
use crate::bootstrap::AssistantContext;
use crate::memory::{SessionStore, Turn};

/// =============================
/// Request / Response Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub chat_id: Option<String>,
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub chat_id: String,
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatHistory {
    pub chat_id: String,
    pub turns: Vec<Turn>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub assistant: Arc<Assistant>,
    pub sessions: Arc<SessionStore>,
    pub max_history_turns: usize,
}

impl ApiState {
    pub fn from_context(context: &AssistantContext) -> Self {
        Self {
            assistant: context.assistant.clone(),
            sessions: context.sessions.clone(),
            max_history_turns: context.config.max_history_turns,
        }
    }
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

/// Client chat ids are kept if they are UUIDs and hashed into one otherwise;
/// a missing id starts a new chat.
fn resolve_chat_id(value: Option<&str>) -> uuid::Uuid {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => uuid::Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v)),
        _ => uuid::Uuid::new_v4(),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Chat Endpoints
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let question = req.question.trim();
    if question.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Question must not be empty".into())),
        );
    }

    let chat_id = resolve_chat_id(req.chat_id.as_deref()).to_string();
    info!(chat_id = %chat_id, "[User Question] {}", question);

    let transcript = state
        .sessions
        .load(&chat_id)
        .await
        .recent(state.max_history_turns);

    let answer = state.assistant.handle_turn(question, &transcript).await;
    info!(chat_id = %chat_id, "[Answer] {}", answer);

    state.sessions.append(&chat_id, Turn::new(question, answer.clone())).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(ChatReply { chat_id, answer })),
    )
}

async fn history_handler(
    State(state): State<ApiState>,
    Path(chat_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let chat_id = resolve_chat_id(Some(chat_id.as_str())).to_string();
    let transcript = state.sessions.load(&chat_id).await;
    (
        StatusCode::OK,
        Json(ApiResponse::success(ChatHistory {
            chat_id,
            turns: transcript.turns().to_vec(),
        })),
    )
}

async fn reset_handler(
    State(state): State<ApiState>,
    Path(chat_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let chat_id = resolve_chat_id(Some(chat_id.as_str())).to_string();
    state.sessions.reset(&chat_id).await;
    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "chat_id": chat_id,
            "message": "Started a new conversation."
        }))),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/:chat_id", get(history_handler).delete(reset_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::PropertyIndexes;
    use crate::feedback::InMemoryFeedbackStore;
    use crate::sales::tests::loaded_store;
    use crate::testing::{HashEmbedder, ScriptedModel};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_state() -> ApiState {
        let model = ScriptedModel::new()
            .reply("message classification assistant", "general")
            .reply("friendly and professional assistant", "Hello! Ask me about your portfolio.");

        let assistant = Assistant::new(
            Arc::new(model),
            Arc::new(HashEmbedder),
            loaded_store().await,
            PropertyIndexes::new(),
            Arc::new(InMemoryFeedbackStore::new()),
            "feedback_feedback",
            3,
        );

        ApiState {
            assistant: Arc::new(assistant),
            sessions: Arc::new(SessionStore::in_memory()),
            max_history_turns: 10,
        }
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, ApiResponse) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_chat(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_stable_chat_ids() {
        let a = resolve_chat_id(Some("session-42"));
        let b = resolve_chat_id(Some("session-42"));
        assert_eq!(a, b);
        assert_eq!(a.get_version_num(), 4);

        let explicit = uuid::Uuid::new_v4();
        assert_eq!(resolve_chat_id(Some(&explicit.to_string())), explicit);
        assert_ne!(resolve_chat_id(None), resolve_chat_id(None));
    }

    #[tokio::test]
    async fn test_health() {
        let router = create_router(test_state().await);
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chat_records_history_and_reset() {
        let state = test_state().await;
        let chat_id = uuid::Uuid::new_v4().to_string();

        let (status, body) = send(
            create_router(state.clone()),
            post_chat(serde_json::json!({"chat_id": chat_id, "question": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let data = body.data.unwrap();
        assert_eq!(data["chat_id"], chat_id.as_str());
        assert_eq!(data["answer"], "Hello! Ask me about your portfolio.");

        let (_, history) = send(
            create_router(state.clone()),
            Request::builder()
                .uri(format!("/api/chat/{}", chat_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let turns = history.data.unwrap()["turns"].as_array().unwrap().clone();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0]["question"], "hi");

        let (status, _) = send(
            create_router(state.clone()),
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/chat/{}", chat_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.sessions.load(&chat_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_free_form_chat_id_across_endpoints() {
        let state = test_state().await;

        let (_, body) = send(
            create_router(state.clone()),
            post_chat(serde_json::json!({"chat_id": "session-42", "question": "hi"})),
        )
        .await;
        let resolved = body.data.unwrap()["chat_id"].as_str().unwrap().to_string();
        assert_eq!(resolved, resolve_chat_id(Some("session-42")).to_string());

        let (_, history) = send(
            create_router(state.clone()),
            Request::builder()
                .uri("/api/chat/session-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let data = history.data.unwrap();
        assert_eq!(data["chat_id"], resolved.as_str());
        assert_eq!(data["turns"].as_array().unwrap().len(), 1);

        let (status, reset) = send(
            create_router(state.clone()),
            Request::builder()
                .method("DELETE")
                .uri("/api/chat/session-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reset.data.unwrap()["chat_id"], resolved.as_str());
        assert!(state.sessions.load(&resolved).await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let (status, body) = send(
            create_router(test_state().await),
            post_chat(serde_json::json!({"question": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
        assert!(body.error.is_some());
    }
}
