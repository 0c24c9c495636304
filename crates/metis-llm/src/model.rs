//! The provider-neutral LLM contract

use std::pin::Pin;

use futures_util::Stream;
use metis_core::{LlmRequest, LlmResponse};

use crate::error::Result;

/// Lazy, single-use sequence of responses from one generation call
///
/// Properties every adapter guarantees:
/// - no I/O happens before the first poll;
/// - items arrive in upstream order;
/// - non-streaming calls yield exactly one `Ok` or one `Err`;
/// - streaming calls yield zero or more partial responses followed by
///   exactly one final response (`turn_complete = true`), or terminate
///   with a single `Err` on upstream failure;
/// - dropping the stream cancels the in-flight request and releases the
///   upstream connection.
pub type LlmResponseStream = Pin<Box<dyn Stream<Item = Result<LlmResponse>> + Send>>;

/// An LLM adapter
pub trait Llm: Send + Sync {
    /// The model name this adapter was configured with
    fn name(&self) -> &str;

    /// Send a request and return the response sequence
    ///
    /// With `stream = false` the sequence carries a single complete
    /// response. With `stream = true` it carries incremental partials
    /// followed by the aggregated final response.
    fn generate_content(&self, request: LlmRequest, stream: bool) -> LlmResponseStream;
}
