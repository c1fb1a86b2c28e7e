// Stream adapter and response sequencing core
//
// This crate turns a chat engine's raw, heterogeneous event stream into
// the canonical message/content protocol and wraps each exchange in a
// sequenced response lifecycle.
//
// Key design decisions:
// - Collaborators (ChatBackend, ConversationResolver) are trait seams;
//   the engine itself lives outside this crate
// - Raw engine chunks stay serde_json::Value: the adapter is the single
//   validation boundary and favors availability over strictness
// - The adapter's state machine is synchronous and wrapped into a stream,
//   so its ordering rules are directly testable
// - One handle() call = one exchange; no shared mutable state between
//   concurrent exchanges except the guarded conversation cache

pub mod adapter;
pub mod error;
pub mod http_backend;
pub mod memory;
pub mod payload;
pub mod runner;
pub mod traits;

pub use adapter::{adapt, AdapterEvent, AdapterEventStream, Identity, StreamAdapter};
pub use error::{AliasError, Result};
pub use http_backend::HttpChatBackend;
pub use memory::{Invocation, ScriptedBackend, SimulatedBackend, StaticConversations};
pub use runner::{
    stable_user_id, NativeContext, NativeFrame, NativeStream, ResponseRunner, RunnerConfig,
    SequencedStream,
};
pub use traits::{ChatBackend, Conversation, ConversationResolver, RawChunk, RawChunkStream};
