// Stream adapter: raw engine chunks -> canonical message/content events
//
// The engine emits heterogeneous, partially-ordered chunks. The adapter
// keys them by (correlation_id, message_kind), tracks one open logical
// message per identity, and re-emits a well-formed open/content/complete
// lifecycle per message. Text is reconstructed with prefix-delta
// detection; tool payloads are normalized to canonical JSON strings.
//
// Availability beats strictness throughout: malformed chunks are skipped
// and unparseable payloads degrade to opaque strings. The stream itself
// only fails when the source yields an error.

use alias_contracts::{
    ContentEvent, ContentKind, ContentPart, FunctionCall, FunctionCallOutput, MessageEvent,
    MessageKind, Role, RunStatus,
};
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::pin::Pin;

use crate::error::Result;
use crate::payload::{canonical_json_string, extract_tool_output};
use crate::traits::{RawChunk, RawChunkStream};

/// Terminal status marker used by the engine
const STATUS_FINISHED: &str = "finished";

/// Default tool name when the engine leaves it unset
const DEFAULT_TOOL_NAME: &str = "tool";

/// Events produced by the adapter
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    Message(MessageEvent),
    Content(ContentEvent),
    /// End-of-stream marker, emitted after all open messages are closed
    Done,
}

/// Type alias for the adapted event stream
pub type AdapterEventStream = Pin<Box<dyn Stream<Item = Result<AdapterEvent>> + Send>>;

/// Identity of one logical message within a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub correlation_id: String,
    pub kind: MessageKind,
}

/// One logical message being incrementally built from an identity's events
#[derive(Debug)]
struct LogicalMessage {
    message: MessageEvent,
    content_kind: ContentKind,
    last_content: String,
    part: Option<ContentPart>,
    closed: bool,
}

impl LogicalMessage {
    fn open(kind: MessageKind, role: Role) -> Self {
        let content_kind = match kind {
            MessageKind::PluginCall | MessageKind::PluginCallOutput => ContentKind::Data,
            MessageKind::Reasoning | MessageKind::Message => ContentKind::Text,
        };
        Self {
            message: MessageEvent::open(kind, role),
            content_kind,
            last_content: String::new(),
            part: None,
            closed: false,
        }
    }

    /// Apply new text, emitting a delta when it extends the previous value
    /// and a full replacement otherwise. Unchanged text emits nothing.
    fn apply_text(&mut self, raw_text: String) -> Option<ContentEvent> {
        let event = match raw_text.strip_prefix(self.last_content.as_str()) {
            Some(suffix) if !suffix.is_empty() => {
                Some(ContentEvent::text_delta(self.message.id.clone(), 0, suffix))
            }
            Some(_) => None,
            None => Some(ContentEvent::text_set(
                self.message.id.clone(),
                0,
                raw_text.clone(),
            )),
        };
        self.last_content = raw_text;
        self.part = Some(ContentPart::text(self.last_content.clone()));
        event
    }

    /// Replace the structured data payload
    fn apply_data(&mut self, data: Value) -> ContentEvent {
        self.part = Some(ContentPart::data(data.clone()));
        ContentEvent::data_set(self.message.id.clone(), 0, data)
    }

    /// Close the message, returning the content-completed and
    /// message-completed events. Idempotent: a second close yields nothing.
    fn close(&mut self) -> Option<(ContentEvent, MessageEvent)> {
        if self.closed {
            return None;
        }
        self.closed = true;
        self.message.status = RunStatus::Completed;
        self.message.content = self.part.iter().cloned().collect();
        let content = ContentEvent::completed(self.message.id.clone(), 0, self.content_kind);
        Some((content, self.message.clone()))
    }
}

/// The adapter's synchronous state machine.
///
/// `handle_chunk` and `finish` are pure state transitions over the identity
/// table; `adapt` wraps them into an async stream. Keeping the core
/// synchronous makes the ordering rules directly testable.
#[derive(Debug, Default)]
pub struct StreamAdapter {
    table: HashMap<Identity, LogicalMessage>,
    order: Vec<Identity>,
    active: Option<Identity>,
}

impl StreamAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one raw chunk, returning the canonical events it produces.
    /// Chunks without the expected envelope are skipped.
    pub fn handle_chunk(&mut self, chunk: &RawChunk) -> Vec<AdapterEvent> {
        let mut events = Vec::new();

        let Some(items) = chunk
            .get("data")
            .and_then(|data| data.get("messages"))
            .and_then(Value::as_array)
        else {
            return events;
        };

        for item in items {
            self.handle_item(item, &mut events);
        }
        events
    }

    fn handle_item(&mut self, item: &Value, events: &mut Vec<AdapterEvent>) {
        let inner = item.get("message");
        let item_type = field_str(inner, "type").unwrap_or_default();
        let item_status = field_str(inner, "status");

        let correlation_id = field_str(inner, "tool_call_id")
            .or_else(|| item.get("id").and_then(Value::as_str).map(str::to_owned))
            .unwrap_or_default();

        let (kind, role) = match item_type.as_str() {
            "thought" | "sub_thought" => (MessageKind::Reasoning, Role::Assistant),
            "tool_call" | "tool_use" => (MessageKind::PluginCall, Role::Assistant),
            "tool_result" => (MessageKind::PluginCallOutput, Role::Tool),
            _ => (MessageKind::Message, Role::Assistant),
        };

        let identity = Identity {
            correlation_id: correlation_id.clone(),
            kind,
        };

        // At most one logical message receives deltas at a time: switching
        // identity force-closes the previous one if still open.
        if let Some(previous) = self.active.take() {
            if previous != identity {
                if let Some(state) = self.table.get_mut(&previous) {
                    if let Some((content, message)) = state.close() {
                        events.push(AdapterEvent::Content(content));
                        events.push(AdapterEvent::Message(message));
                    }
                }
            }
        }
        self.active = Some(identity.clone());

        // A closed identity that shows up again starts a fresh logical
        // message rather than mutating the finished one.
        let recreate = self
            .table
            .get(&identity)
            .map(|state| state.closed)
            .unwrap_or(true);
        if recreate {
            let state = LogicalMessage::open(kind, role);
            events.push(AdapterEvent::Message(state.message.clone()));
            if !self.table.contains_key(&identity) {
                self.order.push(identity.clone());
            }
            self.table.insert(identity.clone(), state);
        }

        let state = self
            .table
            .get_mut(&identity)
            .expect("logical message exists after creation");

        match kind {
            MessageKind::Message | MessageKind::Reasoning => {
                let raw_text = render_text(inner, &item_type);
                if let Some(event) = state.apply_text(raw_text) {
                    events.push(AdapterEvent::Content(event));
                }
            }
            MessageKind::PluginCall => {
                let arguments = match inner.and_then(|m| m.get("arguments")) {
                    None | Some(Value::Null) => json!({}),
                    Some(value) => value.clone(),
                };
                let call = FunctionCall {
                    call_id: correlation_id.clone(),
                    name: field_str(inner, "tool_name")
                        .unwrap_or_else(|| DEFAULT_TOOL_NAME.to_string()),
                    arguments: canonical_json_string(arguments),
                };
                let data = serde_json::to_value(call).unwrap_or(Value::Null);
                events.push(AdapterEvent::Content(state.apply_data(data)));
            }
            MessageKind::PluginCallOutput => {
                let output = match inner.and_then(|m| m.get("content")) {
                    Some(Value::String(content)) => extract_tool_output(content),
                    Some(other) => other.clone(),
                    None => extract_tool_output(""),
                };
                let result = FunctionCallOutput {
                    call_id: correlation_id.clone(),
                    name: field_str(inner, "tool_name")
                        .unwrap_or_else(|| DEFAULT_TOOL_NAME.to_string()),
                    output: canonical_json_string(output),
                };
                let data = serde_json::to_value(result).unwrap_or(Value::Null);
                events.push(AdapterEvent::Content(state.apply_data(data)));
            }
        }

        if item_status.as_deref() == Some(STATUS_FINISHED) {
            if let Some((content, message)) = state.close() {
                events.push(AdapterEvent::Content(content));
                events.push(AdapterEvent::Message(message));
            }
        }
    }

    /// Force-close every logical message still open, in insertion order,
    /// then emit the stream-completed marker. Each closure is independent.
    pub fn finish(&mut self) -> Vec<AdapterEvent> {
        let mut events = Vec::new();
        for identity in std::mem::take(&mut self.order) {
            let Some(state) = self.table.get_mut(&identity) else {
                continue;
            };
            match state.close() {
                Some((content, message)) => {
                    events.push(AdapterEvent::Content(content));
                    events.push(AdapterEvent::Message(message));
                }
                None => {
                    tracing::trace!(
                        correlation_id = %identity.correlation_id,
                        "logical message already closed at stream end"
                    );
                }
            }
        }
        events.push(AdapterEvent::Done);
        events
    }
}

/// Adapt a raw engine stream into canonical message/content events.
///
/// A source error terminates adaptation immediately: the error is yielded
/// and no finalization events follow it.
pub fn adapt(mut source: RawChunkStream) -> AdapterEventStream {
    Box::pin(async_stream::stream! {
        let mut adapter = StreamAdapter::new();
        while let Some(chunk) = source.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in adapter.handle_chunk(&chunk) {
                        yield Ok(event);
                    }
                }
                Err(err) => {
                    yield Err(err);
                    return;
                }
            }
        }
        for event in adapter.finish() {
            yield Ok(event);
        }
    })
}

fn field_str(inner: Option<&Value>, key: &str) -> Option<String> {
    inner
        .and_then(|m| m.get(key))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Render the item's text content. A `files` item renders as a bullet list
/// of `[filename](url)` links, one per line.
fn render_text(inner: Option<&Value>, item_type: &str) -> String {
    if item_type == "files" {
        if let Some(files) = inner.and_then(|m| m.get("files")).and_then(Value::as_array) {
            return files
                .iter()
                .map(|file| {
                    let filename = file.get("filename").and_then(Value::as_str).unwrap_or("");
                    let url = file.get("url").and_then(Value::as_str).unwrap_or("");
                    format!("\u{1F4C1} [{filename}]({url})")
                })
                .collect::<Vec<_>>()
                .join("\n");
        }
    }

    match inner.and_then(|m| m.get("content")) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    fn chunk(items: Vec<Value>) -> RawChunk {
        json!({"data": {"messages": items}})
    }

    fn text_item(id: &str, kind: &str, content: &str) -> Value {
        json!({"id": id, "message": {"type": kind, "content": content}})
    }

    fn finished_item(id: &str, kind: &str, content: &str) -> Value {
        json!({"id": id, "message": {"type": kind, "content": content, "status": "finished"}})
    }

    fn collect(adapter: &mut StreamAdapter, chunks: Vec<RawChunk>) -> Vec<AdapterEvent> {
        let mut events = Vec::new();
        for c in &chunks {
            events.extend(adapter.handle_chunk(c));
        }
        events.extend(adapter.finish());
        events
    }

    fn opened(events: &[AdapterEvent]) -> Vec<&MessageEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::Message(m) if m.status == RunStatus::InProgress => Some(m),
                _ => None,
            })
            .collect()
    }

    fn completions(events: &[AdapterEvent]) -> Vec<&MessageEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::Message(m) if m.status == RunStatus::Completed => Some(m),
                _ => None,
            })
            .collect()
    }

    fn deltas(events: &[AdapterEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::Content(c) if c.delta => c.text.as_deref(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_one_open_per_identity() {
        let mut adapter = StreamAdapter::new();
        let events = collect(
            &mut adapter,
            vec![
                chunk(vec![text_item("a", "thought", "th")]),
                chunk(vec![text_item("a", "thought", "think")]),
                chunk(vec![text_item("b", "text", "answer")]),
            ],
        );
        // Two distinct identities -> exactly two message-opened events
        assert_eq!(opened(&events).len(), 2);
        assert_eq!(completions(&events).len(), 2);
    }

    #[test]
    fn test_prefix_delta_round_trip() {
        let mut adapter = StreamAdapter::new();
        let events = collect(
            &mut adapter,
            vec![
                chunk(vec![text_item("a", "text", "he")]),
                chunk(vec![text_item("a", "text", "hello")]),
                chunk(vec![text_item("a", "text", "hello world")]),
            ],
        );
        let suffixes = deltas(&events);
        assert_eq!(suffixes, vec!["he", "llo", " world"]);
        assert_eq!(suffixes.concat(), "hello world");
        // No full replacements along the way
        assert!(!events.iter().any(|e| matches!(
            e,
            AdapterEvent::Content(c) if !c.delta && c.text.is_some()
        )));
    }

    #[test]
    fn test_unchanged_text_emits_no_delta() {
        let mut adapter = StreamAdapter::new();
        let mut events = adapter.handle_chunk(&chunk(vec![text_item("a", "text", "same")]));
        events.extend(adapter.handle_chunk(&chunk(vec![text_item("a", "text", "same")])));
        assert_eq!(deltas(&events), vec!["same"]);
    }

    #[test]
    fn test_non_prefix_resets_to_replacement() {
        let mut adapter = StreamAdapter::new();
        let events = collect(
            &mut adapter,
            vec![
                chunk(vec![text_item("a", "text", "hello world")]),
                chunk(vec![text_item("a", "text", "hello")]),
                chunk(vec![text_item("a", "text", "hello!")]),
            ],
        );
        let replacement = events
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::Content(c) if !c.delta && c.text.is_some() => c.text.as_deref(),
                _ => None,
            })
            .collect::<Vec<_>>();
        // Shrinking text forces a full replacement...
        assert_eq!(replacement, vec!["hello"]);
        // ...and later deltas are relative to the replacement value only
        assert_eq!(deltas(&events), vec!["hello world", "!"]);
    }

    #[test]
    fn test_identity_switch_closes_previous() {
        let mut adapter = StreamAdapter::new();
        let events = adapter.handle_chunk(&chunk(vec![
            text_item("a", "thought", "thinking"),
            text_item("b", "text", "answer"),
        ]));
        // The reasoning message closes before the answer opens
        let kinds: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AdapterEvent::Message(m) => Some((m.kind, m.status)),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (MessageKind::Reasoning, RunStatus::InProgress),
                (MessageKind::Reasoning, RunStatus::Completed),
                (MessageKind::Message, RunStatus::InProgress),
            ]
        );
    }

    #[test]
    fn test_finished_closes_immediately_and_reuse_reopens() {
        let mut adapter = StreamAdapter::new();
        let mut events = adapter.handle_chunk(&chunk(vec![finished_item("a", "text", "done")]));
        assert_eq!(completions(&events).len(), 1);

        // Same identity again: a fresh logical message, not a mutation
        events.extend(adapter.handle_chunk(&chunk(vec![text_item("a", "text", "again")])));
        let opened_ids: Vec<_> = opened(&events).iter().map(|m| m.id.clone()).collect();
        assert_eq!(opened_ids.len(), 2);
        assert_ne!(opened_ids[0], opened_ids[1]);
    }

    #[test]
    fn test_no_duplicate_completion_at_finish() {
        let mut adapter = StreamAdapter::new();
        let events = collect(
            &mut adapter,
            vec![chunk(vec![finished_item("a", "text", "done")])],
        );
        assert_eq!(completions(&events).len(), 1);
        assert_eq!(events.last(), Some(&AdapterEvent::Done));
    }

    #[test]
    fn test_force_close_order_is_insertion_order() {
        let mut adapter = StreamAdapter::new();
        // Two plugin-call identities stay open (no terminal status); the
        // second becomes active last, so only the first is closed on switch.
        adapter.handle_chunk(&chunk(vec![json!({
            "id": "call_1",
            "message": {"type": "tool_call", "tool_call_id": "call_1", "tool_name": "a", "arguments": {}}
        })]));
        let mut events = adapter.handle_chunk(&chunk(vec![json!({
            "id": "call_2",
            "message": {"type": "tool_call", "tool_call_id": "call_2", "tool_name": "b", "arguments": {}}
        })]));
        events.extend(adapter.finish());
        let closed: Vec<_> = completions(&events)
            .iter()
            .flat_map(|m| m.content.first())
            .collect();
        assert_eq!(closed.len(), 2);
    }

    #[test]
    fn test_malformed_chunks_are_skipped() {
        let mut adapter = StreamAdapter::new();
        assert!(adapter.handle_chunk(&json!("nonsense")).is_empty());
        assert!(adapter.handle_chunk(&json!({"other": 1})).is_empty());
        assert!(adapter.handle_chunk(&json!({"data": {}})).is_empty());
        assert_eq!(adapter.finish(), vec![AdapterEvent::Done]);
    }

    #[test]
    fn test_tool_call_arguments_deep_parse() {
        let mut adapter = StreamAdapter::new();
        let events = adapter.handle_chunk(&chunk(vec![json!({
            "id": "item_1",
            "message": {
                "type": "tool_call",
                "tool_call_id": "call_9",
                "arguments": {"x": "{\"a\":1}"}
            }
        })]));
        let data = events
            .iter()
            .find_map(|e| match e {
                AdapterEvent::Content(c) => c.data.as_ref(),
                _ => None,
            })
            .expect("function call payload");
        assert_eq!(data["call_id"], "call_9");
        assert_eq!(data["name"], "tool");
        let arguments: Value = serde_json::from_str(data["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(arguments, json!({"x": {"a": 1}}));
    }

    #[test]
    fn test_tool_result_output_extraction() {
        let mut adapter = StreamAdapter::new();
        let events = adapter.handle_chunk(&chunk(vec![json!({
            "id": "item_1",
            "message": {
                "type": "tool_result",
                "tool_call_id": "call_9",
                "tool_name": "search",
                "content": "[{\"output\": {\"rows\": 2}}]"
            }
        })]));
        let message = opened(&events)[0];
        assert_eq!(message.kind, MessageKind::PluginCallOutput);
        assert_eq!(message.role, Role::Tool);
        let data = events
            .iter()
            .find_map(|e| match e {
                AdapterEvent::Content(c) => c.data.as_ref(),
                _ => None,
            })
            .unwrap();
        assert_eq!(data["output"], json!("{\"rows\":2}"));
        assert_eq!(data["name"], "search");
    }

    #[test]
    fn test_files_item_renders_link_list() {
        let mut adapter = StreamAdapter::new();
        let events = adapter.handle_chunk(&chunk(vec![json!({
            "id": "item_1",
            "message": {
                "type": "files",
                "files": [
                    {"filename": "report.pdf", "url": "https://x/report.pdf"},
                    {"filename": "data.csv", "url": "https://x/data.csv"}
                ]
            }
        })]));
        let text = deltas(&events).concat();
        assert_eq!(
            text,
            "\u{1F4C1} [report.pdf](https://x/report.pdf)\n\u{1F4C1} [data.csv](https://x/data.csv)"
        );
    }

    #[tokio::test]
    async fn test_adapt_stream_end_to_end() {
        let source: RawChunkStream = Box::pin(stream::iter(vec![
            Ok(chunk(vec![text_item("a", "thought", "hmm")])),
            Ok(json!({"malformed": true})),
            Ok(chunk(vec![text_item("b", "text", "hi")])),
        ]));
        let events: Vec<_> = adapt(source).collect::<Vec<_>>().await;
        let events: Vec<_> = events.into_iter().map(|e| e.unwrap()).collect();
        // thought opens, closes on switch; answer opens, force-closed at end
        assert_eq!(opened(&events).len(), 2);
        assert_eq!(completions(&events).len(), 2);
        assert_eq!(events.last(), Some(&AdapterEvent::Done));
    }

    #[tokio::test]
    async fn test_adapt_stream_error_stops_finalization() {
        let source: RawChunkStream = Box::pin(stream::iter(vec![
            Ok(chunk(vec![text_item("a", "text", "partial")])),
            Err(crate::error::AliasError::backend(503, "down")),
        ]));
        let events: Vec<_> = adapt(source).collect::<Vec<_>>().await;
        assert!(events.last().unwrap().is_err());
        // No Done marker and no force-close events after the error
        let ok_events: Vec<_> = events.iter().filter_map(|e| e.as_ref().ok()).collect();
        assert!(!ok_events.contains(&&AdapterEvent::Done));
        assert!(ok_events
            .iter()
            .all(|e| !matches!(e, AdapterEvent::Message(m) if m.status == RunStatus::Completed)));
    }
}
