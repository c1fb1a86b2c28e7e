// In-memory collaborators for examples and testing
//
// These implementations keep everything in memory:
// - ScriptedBackend replays a fixed chunk script and records stop calls
// - SimulatedBackend fabricates a plausible engine stream from the query,
//   so the server binary can run without a real engine
// - StaticConversations hands out fresh conversation ids and counts creates

use alias_contracts::{ChatMode, ChatRequest};
use async_trait::async_trait;
use futures::stream;
use serde_json::json;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{AliasError, Result};
use crate::traits::{ChatBackend, Conversation, ConversationResolver, RawChunk, RawChunkStream};

/// One recorded engine invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    pub task_id: Uuid,
    pub request: ChatRequest,
}

/// A chunk script entry: a raw chunk, or a backend error to inject
pub type ScriptEntry = std::result::Result<RawChunk, (i64, String)>;

/// Replays a fixed script of raw chunks
#[derive(Debug, Default, Clone)]
pub struct ScriptedBackend {
    script: Vec<ScriptEntry>,
    chunk_delay: Option<std::time::Duration>,
    invocations: Arc<Mutex<Vec<Invocation>>>,
    stops: Arc<Mutex<Vec<(Uuid, Uuid)>>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<ScriptEntry>) -> Self {
        Self {
            script,
            chunk_delay: None,
            invocations: Arc::new(Mutex::new(Vec::new())),
            stops: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Pause before each chunk, approximating a slow engine
    pub fn with_chunk_delay(mut self, delay: std::time::Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// All invocations recorded so far
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// All (user_id, task_id) stop calls recorded so far
    pub fn stops(&self) -> Vec<(Uuid, Uuid)> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn invoke(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        task_id: Uuid,
        request: ChatRequest,
    ) -> Result<RawChunkStream> {
        self.invocations.lock().unwrap().push(Invocation {
            user_id,
            conversation_id,
            task_id,
            request,
        });
        let items: Vec<Result<RawChunk>> = self
            .script
            .iter()
            .cloned()
            .map(|entry| entry.map_err(|(code, message)| AliasError::backend(code, message)))
            .collect();
        match self.chunk_delay {
            None => Ok(Box::pin(stream::iter(items))),
            Some(delay) => Ok(Box::pin(async_stream::stream! {
                for item in items {
                    tokio::time::sleep(delay).await;
                    yield item;
                }
            })),
        }
    }

    async fn stop(&self, user_id: Uuid, task_id: Uuid) -> Result<()> {
        self.stops.lock().unwrap().push((user_id, task_id));
        Ok(())
    }
}

/// Fabricates an engine stream from the query text.
///
/// Emits a short reasoning message followed by an answer whose content
/// grows prefix-wise chunk by chunk, the way the real engine streams.
#[derive(Debug, Default, Clone)]
pub struct SimulatedBackend {
    stops: Arc<Mutex<Vec<(Uuid, Uuid)>>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stops(&self) -> Vec<(Uuid, Uuid)> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for SimulatedBackend {
    async fn invoke(
        &self,
        _user_id: Uuid,
        _conversation_id: Uuid,
        task_id: Uuid,
        request: ChatRequest,
    ) -> Result<RawChunkStream> {
        let thought_id = format!("sim_thought_{task_id}");
        let answer_id = format!("sim_answer_{task_id}");
        let answer = format!("You said: {}", request.query);

        let mut chunks: Vec<Result<RawChunk>> = vec![Ok(json!({
            "data": {"messages": [{
                "id": thought_id,
                "message": {
                    "type": "thought",
                    "content": "Considering the question.",
                    "status": "finished",
                }
            }]}
        }))];

        // Grow the answer word by word so the adapter's prefix-delta path
        // is exercised end to end.
        let words: Vec<&str> = answer.split_inclusive(' ').collect();
        let mut partial = String::new();
        for (index, word) in words.iter().enumerate() {
            partial.push_str(word);
            let status = if index + 1 == words.len() {
                "finished"
            } else {
                "running"
            };
            chunks.push(Ok(json!({
                "data": {"messages": [{
                    "id": answer_id,
                    "message": {
                        "type": "text",
                        "content": partial,
                        "status": status,
                    }
                }]}
            })));
        }

        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn stop(&self, user_id: Uuid, task_id: Uuid) -> Result<()> {
        self.stops.lock().unwrap().push((user_id, task_id));
        Ok(())
    }
}

/// Hands out fresh conversation ids, counting create calls
#[derive(Debug, Default, Clone)]
pub struct StaticConversations {
    created: Arc<Mutex<Vec<(Uuid, String)>>>,
    failing: bool,
}

impl StaticConversations {
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolver whose create_or_get always fails
    pub fn failing() -> Self {
        Self {
            created: Arc::new(Mutex::new(Vec::new())),
            failing: true,
        }
    }

    /// Number of conversations created so far
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl ConversationResolver for StaticConversations {
    async fn create_or_get(
        &self,
        user_id: Uuid,
        name: &str,
        _description: &str,
        _chat_mode: ChatMode,
    ) -> Result<Conversation> {
        if self.failing {
            return Err(AliasError::from(anyhow::anyhow!(
                "conversation service unavailable"
            )));
        }
        let id = Uuid::new_v4();
        self.created
            .lock()
            .unwrap()
            .push((user_id, name.to_string()));
        Ok(Conversation { id })
    }
}
