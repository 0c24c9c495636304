//! Metis Core - Provider-Neutral Content Model
//!
//! This crate defines the data types shared by the metis subsystems:
//! - Content: message bodies exchanged with LLM providers
//! - Request/Response: the provider-neutral generation contract
//! - Event: one turn in a session, as stored by the session service
//!
//! Everything here is plain data with serde support; no I/O lives in this
//! crate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod content;
pub mod event;
pub mod request;
pub mod response;

pub use content::{Content, Part, Role};
pub use event::{Event, EventActions};
pub use request::{
    GenerateConfig, LlmRequest, ResponseSchema, ThinkingLevel, ToolDeclaration,
};
pub use response::{FinishReason, LlmResponse, Usage};
