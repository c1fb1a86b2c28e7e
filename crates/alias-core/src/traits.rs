// Collaborator interfaces consumed by the core
//
// The chat engine and conversation persistence live outside this crate;
// the core only sees these traits. Raw chunks are untyped JSON on purpose:
// the stream adapter is the single place that interprets (and tolerates)
// the engine's event shapes.

use alias_contracts::{ChatMode, ChatRequest};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::error::Result;

/// One raw event chunk as produced by the chat engine
pub type RawChunk = serde_json::Value;

/// Type alias for the raw engine event stream
pub type RawChunkStream = Pin<Box<dyn Stream<Item = Result<RawChunk>> + Send>>;

/// The chat engine driving a conversation exchange
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start a chat exchange and return the raw event stream
    async fn invoke(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        task_id: Uuid,
        request: ChatRequest,
    ) -> Result<RawChunkStream>;

    /// Abort the in-flight work for one task
    async fn stop(&self, user_id: Uuid, task_id: Uuid) -> Result<()>;
}

/// A persisted conversation handle
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
}

/// External conversation management
#[async_trait]
pub trait ConversationResolver: Send + Sync {
    /// Create a conversation for the user, or return an existing one
    async fn create_or_get(
        &self,
        user_id: Uuid,
        name: &str,
        description: &str,
        chat_mode: ChatMode,
    ) -> Result<Conversation>;
}
