// HTTP chat engine client
//
// ChatBackend implementation for a remote Alias engine speaking SSE.
// Each invoke POSTs the chat request and reads `data:` frames until the
// [DONE] sentinel; frames that fail to parse as JSON are passed through as
// plain strings (the adapter skips them).

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use alias_contracts::ChatRequest;

use crate::error::{AliasError, Result};
use crate::traits::{ChatBackend, RawChunkStream};

const DONE_SENTINEL: &str = "[DONE]";

/// Remote chat engine reached over HTTP + SSE
#[derive(Clone)]
pub struct HttpChatBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpChatBackend {
    /// Create a client for the engine at the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    /// Attach a bearer token for engine authentication
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Create a client from the ALIAS_ENGINE_URL environment variable
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("ALIAS_ENGINE_URL")
            .map_err(|_| AliasError::validation("ALIAS_ENGINE_URL environment variable not set"))?;
        let mut backend = Self::new(base_url);
        if let Ok(api_key) = std::env::var("ALIAS_ENGINE_API_KEY") {
            backend = backend.with_api_key(api_key);
        }
        Ok(backend)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json");
        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {api_key}"));
        }
        builder
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn invoke(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        task_id: Uuid,
        request: ChatRequest,
    ) -> Result<RawChunkStream> {
        let response = self
            .request(reqwest::Method::POST, "/v1/chat")
            .json(&json!({
                "user_id": user_id,
                "conversation_id": conversation_id,
                "task_id": task_id,
                "query": request.query,
                "chat_mode": request.chat_mode,
            }))
            .send()
            .await
            .map_err(|err| anyhow::anyhow!("failed to reach chat engine: {err}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AliasError::backend(
                status.as_u16() as i64,
                format!("engine error: {body}"),
            ));
        }

        let mut events = response.bytes_stream().eventsource();
        Ok(Box::pin(async_stream::stream! {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        if event.data == DONE_SENTINEL {
                            break;
                        }
                        match serde_json::from_str::<Value>(&event.data) {
                            Ok(value) => yield Ok(value),
                            Err(err) => {
                                tracing::debug!(error = %err, "engine frame is not JSON");
                                yield Ok(Value::String(event.data));
                            }
                        }
                    }
                    Err(err) => {
                        yield Err(AliasError::from(anyhow::anyhow!(
                            "engine stream error: {err}"
                        )));
                        return;
                    }
                }
            }
        }))
    }

    async fn stop(&self, user_id: Uuid, task_id: Uuid) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, &format!("/v1/chat/{task_id}/stop"))
            .json(&json!({"user_id": user_id}))
            .send()
            .await
            .map_err(|err| anyhow::anyhow!("failed to reach chat engine: {err}"))?;

        if !response.status().is_success() {
            return Err(AliasError::backend(
                response.status().as_u16() as i64,
                "engine stop failed".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for HttpChatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChatBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
