// Response sequencer / runner
//
// One handle() call wraps one request/response exchange: normalize the
// request, resolve identity context, invoke the chat engine, adapt its raw
// stream, and relay every canonical event with a strictly increasing
// sequence number. The response lifecycle is created -> in_progress ->
// completed | failed; failed and completed are terminal.
//
// handle_native() is the passthrough path for clients that want the
// engine's native event shape: no canonicalization, no sequencing, raw
// chunks verbatim plus the [DONE] sentinel.

use alias_contracts::{
    ChatMode, ChatRequest, ErrorPayload, ResponseEnvelope, RunnerRequest, SequenceNumbers,
    StreamEvent,
};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::adapter::{adapt, AdapterEvent};
use crate::error::Result;
use crate::traits::{ChatBackend, ConversationResolver};

/// Type alias for the sequenced canonical event stream
pub type SequencedStream = Pin<Box<dyn Stream<Item = alias_contracts::Sequenced> + Send>>;

/// Frames produced by the native passthrough path
#[derive(Debug, Clone, PartialEq)]
pub enum NativeFrame {
    /// One raw engine chunk (or a structured error chunk), verbatim
    Data(Value),
    /// The literal `[DONE]` sentinel terminator
    Done,
}

/// Type alias for the native passthrough stream
pub type NativeStream = Pin<Box<dyn Stream<Item = NativeFrame> + Send>>;

/// Explicit identity context required by the native path
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeContext {
    pub user_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Chat mode used when the request does not specify one
    pub default_chat_mode: ChatMode,
    /// Name given to conversations created on behalf of a session
    pub conversation_name: String,
    /// Description given to created conversations
    pub conversation_description: String,
    /// Bound on the session -> conversation cache
    pub conversation_cache_capacity: usize,
    /// First sequence number assigned within each response
    pub initial_sequence: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_chat_mode: ChatMode::General,
            conversation_name: "webui".to_string(),
            conversation_description: "created by the Alias web gateway".to_string(),
            conversation_cache_capacity: 1024,
            initial_sequence: 0,
        }
    }
}

/// Derive a stable user identity from an arbitrary fallback string.
///
/// The same input always yields the same id, so repeated requests from one
/// unauthenticated session map to one user.
pub fn stable_user_id(raw: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, format!("alias::{raw}").as_bytes())
}

fn parse_uuid(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

/// Bounded session -> conversation cache with oldest-insertion eviction
#[derive(Debug)]
struct ConversationCache {
    entries: HashMap<String, Uuid>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ConversationCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, session_id: &str) -> Option<Uuid> {
        self.entries.get(session_id).copied()
    }

    fn insert(&mut self, session_id: String, conversation_id: Uuid) {
        if self.entries.contains_key(&session_id) {
            self.entries.insert(session_id, conversation_id);
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(session_id.clone());
        self.entries.insert(session_id, conversation_id);
    }
}

/// The response sequencer.
///
/// Cheap to clone and shared across concurrent requests; each handle()
/// call gets its own envelope, sequence counter, and adapter state. The
/// only shared mutable state is the conversation cache, guarded by a
/// mutex held across the whole check-then-create step.
#[derive(Clone)]
pub struct ResponseRunner {
    backend: Arc<dyn ChatBackend>,
    conversations: Arc<dyn ConversationResolver>,
    config: RunnerConfig,
    conversation_cache: Arc<Mutex<ConversationCache>>,
}

impl ResponseRunner {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        conversations: Arc<dyn ConversationResolver>,
        config: RunnerConfig,
    ) -> Self {
        let cache = ConversationCache::new(config.conversation_cache_capacity);
        Self {
            backend,
            conversations,
            config,
            conversation_cache: Arc::new(Mutex::new(cache)),
        }
    }

    /// The chat engine this runner drives (for transport-level stop wiring)
    pub fn backend(&self) -> Arc<dyn ChatBackend> {
        Arc::clone(&self.backend)
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Look up the conversation for a session, creating one on first use.
    ///
    /// The guard is held across the create call so concurrent first
    /// requests for one session cannot create duplicate conversations.
    async fn resolve_conversation(&self, session_id: &str, user_id: Uuid) -> Result<Uuid> {
        let mut cache = self.conversation_cache.lock().await;
        if let Some(id) = cache.get(session_id) {
            return Ok(id);
        }
        let conversation = self
            .conversations
            .create_or_get(
                user_id,
                &self.config.conversation_name,
                &self.config.conversation_description,
                self.config.default_chat_mode,
            )
            .await?;
        cache.insert(session_id.to_string(), conversation.id);
        tracing::debug!(session_id, conversation_id = %conversation.id, "conversation resolved");
        Ok(conversation.id)
    }

    /// Handle one exchange, producing the sequenced canonical event stream.
    pub fn handle(&self, request: impl Into<RunnerRequest>) -> SequencedStream {
        let runner = self.clone();
        let request = request.into();

        Box::pin(async_stream::stream! {
            let req = request.into_structured();
            let request_id = req
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let session_id = req
                .session_id
                .clone()
                .unwrap_or_else(|| format!("session_{}", Uuid::new_v4()));

            let mut seq = SequenceNumbers::starting_at(runner.config.initial_sequence);
            let mut response = ResponseEnvelope::new(request_id, session_id.clone());
            yield seq.tag(StreamEvent::Response(response.clone()));

            response.start();
            yield seq.tag(StreamEvent::Response(response.clone()));

            let user_text = req.input_text().unwrap_or_default();
            if user_text.is_empty() {
                response.fail(ErrorPayload::new("422", "Empty input text in request input."));
                yield seq.tag(StreamEvent::Response(response.clone()));
                return;
            }

            let raw_user = req.user_id.clone().unwrap_or_else(|| session_id.clone());
            let user_id = parse_uuid(&raw_user).unwrap_or_else(|| stable_user_id(&raw_user));

            let conversation_id = match req.conversation_id.as_deref().and_then(parse_uuid) {
                Some(id) => id,
                None => match runner.resolve_conversation(&session_id, user_id).await {
                    Ok(id) => id,
                    Err(err) => {
                        response.fail(ErrorPayload::new(
                            "500",
                            format!("Failed to create conversation: {err}"),
                        ));
                        yield seq.tag(StreamEvent::Response(response.clone()));
                        return;
                    }
                },
            };

            let task_id = req
                .task_id
                .as_deref()
                .and_then(parse_uuid)
                .unwrap_or_else(Uuid::new_v4);

            let chat_mode = match req.chat_mode.as_deref() {
                Some(raw) => match raw.parse::<ChatMode>() {
                    Ok(mode) => mode,
                    Err(err) => {
                        response.fail(ErrorPayload::new(
                            "422",
                            format!("Chat request validation failed: {err}"),
                        ));
                        yield seq.tag(StreamEvent::Response(response.clone()));
                        return;
                    }
                },
                None => runner.config.default_chat_mode,
            };

            let chat_request = match ChatRequest::new(user_text, chat_mode) {
                Ok(request) => request,
                Err(err) => {
                    response.fail(ErrorPayload::new(
                        "422",
                        format!("Chat request validation failed: {err}"),
                    ));
                    yield seq.tag(StreamEvent::Response(response.clone()));
                    return;
                }
            };

            tracing::debug!(
                response_id = %response.id,
                %user_id,
                %conversation_id,
                %task_id,
                "invoking chat engine"
            );

            let source = match runner
                .backend
                .invoke(user_id, conversation_id, task_id, chat_request)
                .await
            {
                Ok(source) => source,
                Err(err) => {
                    response.fail(err.error_payload());
                    yield seq.tag(StreamEvent::Response(response.clone()));
                    return;
                }
            };

            let mut events = adapt(source);
            while let Some(event) = events.next().await {
                match event {
                    Ok(AdapterEvent::Message(message)) => {
                        if !response.absorb_output(message.clone()) {
                            tracing::trace!(
                                message_id = %message.id,
                                "message not absorbed into response output"
                            );
                        }
                        yield seq.tag(StreamEvent::Message(message));
                    }
                    Ok(AdapterEvent::Content(content)) => {
                        yield seq.tag(StreamEvent::Content(content));
                    }
                    Ok(AdapterEvent::Done) => break,
                    Err(err) => {
                        response.fail(err.error_payload());
                        yield seq.tag(StreamEvent::Response(response.clone()));
                        return;
                    }
                }
            }

            if let Some(last) = response.output.last() {
                response.usage = last.usage.clone();
            }
            response.complete();
            yield seq.tag(StreamEvent::Response(response.clone()));
        })
    }

    /// Handle one exchange in the engine's native event shape.
    ///
    /// Requires explicit identity context; performs no derivation and no
    /// caching. Every stream ends with the `[DONE]` sentinel, error or not.
    pub fn handle_native(&self, request: RunnerRequest, ctx: NativeContext) -> NativeStream {
        let runner = self.clone();

        Box::pin(async_stream::stream! {
            let value = request.into_value();

            let user_id = ctx.user_id.or_else(|| {
                value.get("user_id").and_then(Value::as_str).and_then(parse_uuid)
            });
            let conversation_id = ctx.conversation_id.or_else(|| {
                value
                    .get("conversation_id")
                    .and_then(Value::as_str)
                    .and_then(parse_uuid)
            });
            let task_id = ctx
                .task_id
                .or_else(|| value.get("task_id").and_then(Value::as_str).and_then(parse_uuid))
                .unwrap_or_else(Uuid::new_v4);

            let (user_id, conversation_id) = match (user_id, conversation_id) {
                (Some(user_id), Some(conversation_id)) => (user_id, conversation_id),
                _ => {
                    yield NativeFrame::Data(json!({
                        "error": "missing_context",
                        "code": 422,
                        "message": "Native mode requires user_id and conversation_id \
                                    in the context or request body.",
                    }));
                    yield NativeFrame::Done;
                    return;
                }
            };

            let chat_request = match serde_json::from_value::<ChatRequest>(value) {
                Ok(request) => request,
                Err(err) => {
                    yield NativeFrame::Data(json!({
                        "error": "invalid_request",
                        "code": 422,
                        "message": "Chat request validation failed",
                        "detail": err.to_string(),
                    }));
                    yield NativeFrame::Done;
                    return;
                }
            };

            let mut source = match runner
                .backend
                .invoke(user_id, conversation_id, task_id, chat_request)
                .await
            {
                Ok(source) => source,
                Err(err) => {
                    let payload = err.error_payload();
                    yield NativeFrame::Data(json!({
                        "error": payload.message,
                        "code": payload.code,
                    }));
                    yield NativeFrame::Done;
                    return;
                }
            };

            while let Some(chunk) = source.next().await {
                match chunk {
                    Ok(chunk) => yield NativeFrame::Data(chunk),
                    Err(err) => {
                        let payload = err.error_payload();
                        yield NativeFrame::Data(json!({
                            "error": payload.message,
                            "code": payload.code,
                        }));
                        yield NativeFrame::Done;
                        return;
                    }
                }
            }

            yield NativeFrame::Done;
        })
    }
}
