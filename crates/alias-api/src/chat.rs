// Chat streaming HTTP routes (SSE)
//
// Two streaming entry points share one backend:
// - POST /v1/responses streams the canonical sequenced protocol
// - POST /v1/conversations/{id}/chat relays the engine's native chunks
// Both terminate every stream with a literal `data: [DONE]` frame and
// stop the engine task when the client disconnects mid-stream.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use alias_contracts::{StopChatPayload, StopChatResponse};
use alias_core::{stable_user_id, ChatBackend, NativeContext, NativeFrame, ResponseRunner};

const DONE_FRAME: &str = "[DONE]";

/// App state for chat routes
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<ResponseRunner>,
}

impl AppState {
    pub fn new(runner: Arc<ResponseRunner>) -> Self {
        Self { runner }
    }
}

/// Create chat routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/responses", post(create_response))
        .route("/v1/conversations/:conversation_id/chat", post(chat_native))
        .route(
            "/v1/conversations/:conversation_id/chat/:task_id/stop",
            post(stop_chat),
        )
        .with_state(state)
}

// ============================================
// Disconnect handling
// ============================================

/// Fires one `stop(user_id, task_id)` call if dropped before the stream
/// ran to completion. Dropping the SSE body is how axum surfaces a client
/// disconnect, so this is the cancellation path.
struct StopOnDisconnect {
    backend: Arc<dyn ChatBackend>,
    user_id: Uuid,
    task_id: Uuid,
    armed: AtomicBool,
}

impl StopOnDisconnect {
    fn new(backend: Arc<dyn ChatBackend>, user_id: Uuid, task_id: Uuid) -> Self {
        Self {
            backend,
            user_id,
            task_id,
            armed: AtomicBool::new(true),
        }
    }

    /// Mark the stream as completed; drop becomes a no-op
    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl Drop for StopOnDisconnect {
    fn drop(&mut self) {
        if !self.armed.load(Ordering::SeqCst) {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let (user_id, task_id) = (self.user_id, self.task_id);
        tracing::warn!(%task_id, "client disconnected during stream; stopping chat task");
        tokio::spawn(async move {
            if let Err(err) = backend.stop(user_id, task_id).await {
                tracing::error!(%task_id, error = %err, "failed to stop chat task");
            }
        });
    }
}

/// Resolve the identities the runner will use for this request, writing
/// them back into the body so the disconnect guard and the runner agree.
fn prepare_identity(body: &mut Value) -> (Uuid, Uuid) {
    let session_id = body
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("session_{}", Uuid::new_v4()));
    let raw_user = body
        .get("user_id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| session_id.clone());
    let user_id = Uuid::parse_str(&raw_user).unwrap_or_else(|_| stable_user_id(&raw_user));
    let task_id = body
        .get("task_id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .unwrap_or_else(Uuid::new_v4);

    if let Some(map) = body.as_object_mut() {
        map.entry("session_id")
            .or_insert_with(|| json!(session_id));
        map.insert("task_id".to_string(), json!(task_id.to_string()));
    }
    (user_id, task_id)
}

fn data_frame(payload: &impl serde::Serialize) -> SseEvent {
    let json = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default().data(json)
}

// ============================================
// HTTP Handlers
// ============================================

/// POST /v1/responses - Stream the canonical sequenced protocol
///
/// Accepts a structured request or a raw mapping; every emitted event is
/// one `data:` frame, terminated by `data: [DONE]`.
#[utoipa::path(
    post,
    path = "/v1/responses",
    request_body = alias_contracts::AgentRequest,
    responses(
        (status = 200, description = "Canonical event stream", content_type = "text/event-stream")
    ),
    tag = "chat"
)]
pub async fn create_response(
    State(state): State<AppState>,
    Json(mut body): Json<Value>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (user_id, task_id) = prepare_identity(&mut body);
    tracing::info!(%user_id, %task_id, "starting canonical chat stream");

    let guard = StopOnDisconnect::new(state.runner.backend(), user_id, task_id);
    let mut events = state.runner.handle(body);

    let stream = async_stream::stream! {
        while let Some(event) = events.next().await {
            yield Ok::<_, Infallible>(data_frame(&event));
        }
        yield Ok(SseEvent::default().data(DONE_FRAME));
        guard.disarm();
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /v1/conversations/{conversation_id}/chat - Native passthrough
///
/// Relays the engine's own event shape verbatim. Identity context is
/// explicit: the user id comes from the `x-user-id` header and the task id
/// from `x-request-id` (generated when absent).
#[utoipa::path(
    post,
    path = "/v1/conversations/{conversation_id}/chat",
    params(
        ("conversation_id" = Uuid, Path, description = "Conversation ID")
    ),
    request_body = alias_contracts::ChatRequest,
    responses(
        (status = 200, description = "Raw engine event stream", content_type = "text/event-stream")
    ),
    tag = "chat"
)]
pub async fn chat_native(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let user_id = header_uuid(&headers, "x-user-id");
    let task_id = header_uuid(&headers, "x-request-id").unwrap_or_else(Uuid::new_v4);
    tracing::info!(%conversation_id, %task_id, "starting native chat stream");

    let ctx = NativeContext {
        user_id,
        conversation_id: Some(conversation_id),
        task_id: Some(task_id),
    };
    let guard =
        user_id.map(|user_id| StopOnDisconnect::new(state.runner.backend(), user_id, task_id));
    let mut frames = state.runner.handle_native(body.into(), ctx);

    let stream = async_stream::stream! {
        while let Some(frame) = frames.next().await {
            match frame {
                NativeFrame::Data(value) => yield Ok::<_, Infallible>(data_frame(&value)),
                NativeFrame::Done => yield Ok(SseEvent::default().data(DONE_FRAME)),
            }
        }
        if let Some(guard) = &guard {
            guard.disarm();
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// POST /v1/conversations/{conversation_id}/chat/{task_id}/stop - Abort a task
#[utoipa::path(
    post,
    path = "/v1/conversations/{conversation_id}/chat/{task_id}/stop",
    params(
        ("conversation_id" = Uuid, Path, description = "Conversation ID"),
        ("task_id" = Uuid, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Chat stopped", body = StopChatResponse),
        (status = 422, description = "Missing user identity"),
        (status = 500, description = "Engine stop failed")
    ),
    tag = "chat"
)]
pub async fn stop_chat(
    State(state): State<AppState>,
    Path((conversation_id, task_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<Json<StopChatResponse>, StatusCode> {
    let user_id = header_uuid(&headers, "x-user-id").ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;

    state
        .runner
        .backend()
        .stop(user_id, task_id)
        .await
        .map_err(|err| {
            tracing::error!(%task_id, error = %err, "failed to stop chat");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(StopChatResponse {
        status: true,
        message: "Stop chat successfully.".to_string(),
        payload: StopChatPayload {
            conversation_id,
            task_id,
        },
    }))
}

fn header_uuid(headers: &HeaderMap, name: &str) -> Option<Uuid> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| Uuid::parse_str(raw).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alias_core::{RunnerConfig, ScriptedBackend, StaticConversations};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn script() -> Vec<alias_core::memory::ScriptEntry> {
        vec![
            Ok(json!({"data": {"messages": [{
                "id": "m1",
                "message": {"type": "text", "content": "Hello"}
            }]}})),
            Ok(json!({"data": {"messages": [{
                "id": "m1",
                "message": {"type": "text", "content": "Hello world", "status": "finished"}
            }]}})),
        ]
    }

    fn app_with(backend: ScriptedBackend) -> Router {
        let runner = Arc::new(ResponseRunner::new(
            Arc::new(backend),
            Arc::new(StaticConversations::new()),
            RunnerConfig::default(),
        ));
        routes(AppState::new(runner))
    }

    async fn sse_payloads(body: Body) -> Vec<String> {
        let bytes = body.collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        text.split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .map(str::to_owned)
            .collect()
    }

    #[tokio::test]
    async fn test_create_response_streams_lifecycle_and_sentinel() {
        let app = app_with(ScriptedBackend::new(script()));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/responses")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"input": "hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );

        let payloads = sse_payloads(response.into_body()).await;
        assert_eq!(payloads.last().map(String::as_str), Some(DONE_FRAME));

        let events: Vec<Value> = payloads[..payloads.len() - 1]
            .iter()
            .map(|p| serde_json::from_str(p).unwrap())
            .collect();
        assert_eq!(events[0]["object"], "response");
        assert_eq!(events[0]["status"], "created");
        assert_eq!(events[1]["status"], "in_progress");
        assert_eq!(events.last().unwrap()["status"], "completed");
        // Sequence numbers are strictly increasing and gapless
        for (index, event) in events.iter().enumerate() {
            assert_eq!(event["sequence_number"], index as u64);
        }
    }

    #[tokio::test]
    async fn test_native_chat_relays_raw_chunks() {
        let app = app_with(ScriptedBackend::new(script()));
        let user_id = Uuid::new_v4();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/v1/conversations/{}/chat", Uuid::new_v4()))
                    .header("content-type", "application/json")
                    .header("x-user-id", user_id.to_string())
                    .body(Body::from(r#"{"query": "hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let payloads = sse_payloads(response.into_body()).await;
        assert_eq!(payloads.len(), 3);
        let first: Value = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(first["data"]["messages"][0]["id"], "m1");
        assert_eq!(payloads[2], DONE_FRAME);
    }

    #[tokio::test]
    async fn test_stop_endpoint_stops_task() {
        let backend = ScriptedBackend::new(vec![]);
        let app = app_with(backend.clone());
        let user_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!(
                        "/v1/conversations/{}/chat/{}/stop",
                        Uuid::new_v4(),
                        task_id
                    ))
                    .header("x-user-id", user_id.to_string())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(backend.stops(), vec![(user_id, task_id)]);
    }

    #[tokio::test]
    async fn test_stop_endpoint_requires_user_header() {
        let app = app_with(ScriptedBackend::new(vec![]));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!(
                        "/v1/conversations/{}/chat/{}/stop",
                        Uuid::new_v4(),
                        Uuid::new_v4()
                    ))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_disconnect_triggers_single_stop() {
        let backend =
            ScriptedBackend::new(script()).with_chunk_delay(Duration::from_millis(20));
        let app = app_with(backend.clone());
        let task_id = Uuid::new_v4();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/responses")
                    .header("content-type", "application/json")
                    .body(Body::from(format!(
                        r#"{{"input": "hi", "task_id": "{task_id}"}}"#
                    )))
                    .unwrap(),
            )
            .await
            .unwrap();

        // Read the first frame, then drop the body mid-stream
        let mut body = response.into_body().into_data_stream();
        let _first = body.next().await;
        drop(body);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stops = backend.stops();
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].1, task_id);
    }

    #[tokio::test]
    async fn test_completed_stream_does_not_stop() {
        let backend = ScriptedBackend::new(script());
        let app = app_with(backend.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/responses")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"input": "hi"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let _payloads = sse_payloads(response.into_body()).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.stops().is_empty());
    }
}
