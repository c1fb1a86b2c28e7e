// Canonical stream protocol events
//
// Every event sent over the wire is one of three shapes, discriminated by
// the "object" field: a response envelope, a message lifecycle event, or a
// content event. The transport wraps each in a sequence number so clients
// can reconstruct ordering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status shared by responses and messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    InProgress,
    Completed,
    Failed,
}

/// The kind of logical message being streamed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Reasoning,
    PluginCall,
    PluginCallOutput,
    Message,
}

/// Message role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// Content payload discriminator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Data,
}

// ============================================
// Structured payloads carried by data content
// ============================================

/// A tool invocation emitted by the assistant
///
/// `arguments` is always a canonical JSON string so web clients can parse it
/// without guessing at nesting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct FunctionCall {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// The result of a tool invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct FunctionCallOutput {
    pub call_id: String,
    pub name: String,
    pub output: String,
}

/// Token accounting copied from the engine when available
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// A part of accumulated message content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Data { data: serde_json::Value },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn data(data: serde_json::Value) -> Self {
        ContentPart::Data { data }
    }

    /// Get text if this is a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

// ============================================
// Message and content lifecycle events
// ============================================

/// A message lifecycle event (`object = "message"`)
///
/// Emitted once with `in_progress` status when the logical message opens,
/// and once with `completed` status (carrying the accumulated content) when
/// it closes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct MessageEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub role: Role,
    pub status: RunStatus,
    pub content: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl MessageEvent {
    /// Open a new message with a generated id
    pub fn open(kind: MessageKind, role: Role) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            kind,
            role,
            status: RunStatus::InProgress,
            content: Vec::new(),
            usage: None,
        }
    }
}

/// A content event (`object = "content"`)
///
/// `delta = true` carries only the newly appended text suffix; `delta =
/// false` replaces the content wholesale. A `completed` status closes the
/// content without a payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ContentEvent {
    pub message_id: String,
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub status: RunStatus,
    pub delta: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ContentEvent {
    /// Incremental text suffix
    pub fn text_delta(message_id: impl Into<String>, index: usize, delta: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            index,
            kind: ContentKind::Text,
            status: RunStatus::InProgress,
            delta: true,
            text: Some(delta.into()),
            data: None,
        }
    }

    /// Full text replacement
    pub fn text_set(message_id: impl Into<String>, index: usize, text: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            index,
            kind: ContentKind::Text,
            status: RunStatus::InProgress,
            delta: false,
            text: Some(text.into()),
            data: None,
        }
    }

    /// Structured data replacement
    pub fn data_set(message_id: impl Into<String>, index: usize, data: serde_json::Value) -> Self {
        Self {
            message_id: message_id.into(),
            index,
            kind: ContentKind::Data,
            status: RunStatus::InProgress,
            delta: false,
            text: None,
            data: Some(data),
        }
    }

    /// Terminal marker for one content slot
    pub fn completed(message_id: impl Into<String>, index: usize, kind: ContentKind) -> Self {
        Self {
            message_id: message_id.into(),
            index,
            kind,
            status: RunStatus::Completed,
            delta: false,
            text: None,
            data: None,
        }
    }
}

// ============================================
// Response envelope
// ============================================

/// Structured error carried by a failed response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Top-level response envelope (`object = "response"`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ResponseEnvelope {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub status: RunStatus,
    pub output: Vec<MessageEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    pub created_at: DateTime<Utc>,
}

impl ResponseEnvelope {
    pub fn new(id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            session_id: Some(session_id.into()),
            status: RunStatus::Created,
            output: Vec::new(),
            usage: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Transition to `in_progress`
    pub fn start(&mut self) {
        self.status = RunStatus::InProgress;
    }

    /// Transition to terminal `completed`
    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
    }

    /// Transition to terminal `failed` with a structured error
    pub fn fail(&mut self, error: ErrorPayload) {
        self.status = RunStatus::Failed;
        self.error = Some(error);
    }

    /// Append a finished assistant message to the accumulated output.
    ///
    /// Returns `false` (leaving the envelope untouched) when the event is
    /// not a completed assistant-side message, so callers can audit what was
    /// absorbed and what was not.
    pub fn absorb_output(&mut self, message: MessageEvent) -> bool {
        if message.status != RunStatus::Completed || message.role != Role::Assistant {
            return false;
        }
        self.output.push(message);
        true
    }
}

// ============================================
// Wire framing
// ============================================

/// Union of everything the canonical stream can carry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum StreamEvent {
    Response(ResponseEnvelope),
    Message(MessageEvent),
    Content(ContentEvent),
}

/// A stream event tagged with its position in the response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Sequenced {
    pub sequence_number: u64,
    #[serde(flatten)]
    pub event: StreamEvent,
}

/// Strictly increasing per-response sequence counter.
///
/// Every event sent over the wire consumes exactly one number; gaps only
/// ever appear across independent responses.
#[derive(Debug)]
pub struct SequenceNumbers {
    next: u64,
}

impl SequenceNumbers {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(initial: u64) -> Self {
        Self { next: initial }
    }

    pub fn tag(&mut self, event: StreamEvent) -> Sequenced {
        let sequence_number = self.next;
        self.next += 1;
        Sequenced {
            sequence_number,
            event,
        }
    }
}

impl Default for SequenceNumbers {
    fn default() -> Self {
        Self::new()
    }
}
