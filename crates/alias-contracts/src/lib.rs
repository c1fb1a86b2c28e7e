// Wire-protocol contracts for the Alias stream gateway
//
// - events: canonical stream events (response / message / content) and
//   sequence numbering
// - request: inbound request shapes and the backend-facing ChatRequest

pub mod events;
pub mod request;

pub use events::{
    ContentEvent, ContentKind, ContentPart, ErrorPayload, FunctionCall, FunctionCallOutput,
    MessageEvent, MessageKind, ResponseEnvelope, Role, RunStatus, SequenceNumbers, Sequenced,
    StreamEvent, Usage,
};
pub use request::{
    AgentInput, AgentRequest, ChatMode, ChatRequest, ContentBlock, RunnerRequest, StopChatPayload,
    StopChatResponse, Turn, TurnContent,
};
