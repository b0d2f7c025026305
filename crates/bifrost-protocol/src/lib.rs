//! Normalized request/response data model — spec.md §3.
//!
//! This crate has no opinion about HTTP, providers, or concurrency; it is
//! the shape every other crate in the workspace agrees on. `bifrost-core`
//! consumes [`request::NormalizedRequest`] and produces
//! [`response::NormalizedResponse`] or a channel of [`response::DeltaEnvelope`].

mod opaque_json;
pub mod request;
pub mod response;

pub use opaque_json::OpaqueJson;
pub use request::{
    ContentPart, EmbeddingItem, Input, Message, MessageContent, NormalizedRequest, Params,
    Provider, ProviderModel, RequestType, Role, ShapeError, Tool, ToolFunction,
};
pub use response::{
    AttemptTrailEntry, Choice, Delta, DeltaEnvelope, ErrorEnvelope, ExtraFields,
    NormalizedResponse, ResponseMessage, ToolCall, Usage,
};
