// Inbound request shapes
//
// The gateway accepts requests either as a typed AgentRequest or as a raw
// JSON mapping; RunnerRequest is the tagged union covering both, with one
// explicit conversion per variant. Backend-facing requests (ChatRequest)
// are a separate, stricter shape.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

// ============================================
// Agent-facing request
// ============================================

/// A single conversational turn inside `input`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Turn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<TurnContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Turn content: plain text or a list of typed blocks
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A typed content block within a turn
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContentBlock {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Request input: a bare string or a sequence of turns
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum AgentInput {
    Text(String),
    Turns(Vec<Turn>),
}

/// The structured request accepted by the canonical streaming endpoint.
///
/// Identity fields are kept as strings: unparseable ids are not a request
/// error, they fall back to derived identities downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AgentRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<AgentInput>,
}

impl AgentRequest {
    /// Extract the user-facing input text.
    ///
    /// Plain text is used directly. For a sequence of turns, the last turn
    /// wins: its text content, else the last block typed "text", else the
    /// turn's own `text` field. Returns `None` when nothing is extractable;
    /// emptiness is a policy decision left to the caller.
    pub fn input_text(&self) -> Option<String> {
        match self.input.as_ref()? {
            AgentInput::Text(text) => Some(text.clone()),
            AgentInput::Turns(turns) => {
                let last = turns.last()?;
                match &last.content {
                    Some(TurnContent::Text(text)) => Some(text.clone()),
                    Some(TurnContent::Blocks(blocks)) => blocks
                        .iter()
                        .rev()
                        .find(|block| block.kind.as_deref() == Some("text"))
                        .map(|block| block.text.clone().unwrap_or_default())
                        .or_else(|| last.text.clone()),
                    None => last.text.clone(),
                }
            }
        }
    }
}

/// Tagged union over the two accepted request forms
#[derive(Debug, Clone)]
pub enum RunnerRequest {
    Structured(AgentRequest),
    Raw(serde_json::Value),
}

impl RunnerRequest {
    /// Normalize either variant into the structured shape.
    ///
    /// The raw variant is read field by field so one malformed field never
    /// rejects the whole request; unreadable fields resolve to `None`.
    pub fn into_structured(self) -> AgentRequest {
        match self {
            RunnerRequest::Structured(request) => request,
            RunnerRequest::Raw(value) => AgentRequest {
                id: string_field(&value, "id"),
                session_id: string_field(&value, "session_id"),
                user_id: string_field(&value, "user_id"),
                conversation_id: string_field(&value, "conversation_id"),
                task_id: string_field(&value, "task_id"),
                chat_mode: string_field(&value, "chat_mode"),
                input: value
                    .get("input")
                    .cloned()
                    .and_then(|input| serde_json::from_value(input).ok()),
            },
        }
    }

    /// The request as a raw JSON value, for lossless validation paths
    pub fn into_value(self) -> serde_json::Value {
        match self {
            RunnerRequest::Raw(value) => value,
            RunnerRequest::Structured(request) => {
                serde_json::to_value(request).unwrap_or(serde_json::Value::Null)
            }
        }
    }
}

impl From<AgentRequest> for RunnerRequest {
    fn from(request: AgentRequest) -> Self {
        RunnerRequest::Structured(request)
    }
}

impl From<serde_json::Value> for RunnerRequest {
    fn from(value: serde_json::Value) -> Self {
        RunnerRequest::Raw(value)
    }
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_owned)
}

// ============================================
// Backend-facing request
// ============================================

/// Chat modes understood by the engine
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    #[default]
    General,
    Dr,
    Browser,
    Ds,
    Finance,
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChatMode::General => "general",
            ChatMode::Dr => "dr",
            ChatMode::Browser => "browser",
            ChatMode::Ds => "ds",
            ChatMode::Finance => "finance",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(ChatMode::General),
            "dr" => Ok(ChatMode::Dr),
            "browser" => Ok(ChatMode::Browser),
            "ds" => Ok(ChatMode::Ds),
            "finance" => Ok(ChatMode::Finance),
            other => Err(format!("unknown chat mode: {other:?}")),
        }
    }
}

/// The validated request handed to the chat engine
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub chat_mode: ChatMode,
}

impl ChatRequest {
    /// Build a chat request, rejecting empty queries
    pub fn new(query: impl Into<String>, chat_mode: ChatMode) -> Result<Self, String> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err("query must not be empty".to_string());
        }
        Ok(Self { query, chat_mode })
    }
}

// ============================================
// Stop endpoint payloads
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopChatPayload {
    pub conversation_id: Uuid,
    pub task_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopChatResponse {
    pub status: bool,
    pub message: String,
    pub payload: StopChatPayload,
}
