//! Server-Sent Events plumbing shared by the streaming adapters
//!
//! SSE frames are newline-delimited, but TCP chunks are not aligned to
//! frame boundaries: one chunk may carry several events, and one event may
//! span two chunks. [`SseLineBuffer`] buffers partial lines and emits
//! complete events only. [`sse_response_stream`] turns a raw byte stream
//! plus a stateful event handler into an [`LlmResponseStream`].

use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::unfold;
use futures_util::{Stream, StreamExt};

use crate::error::{Error, Result};
use crate::model::LlmResponseStream;
use metis_core::LlmResponse;

/// A parsed SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseEvent {
    /// A `data:` payload with the prefix stripped
    Data(String),
    /// The `[DONE]` termination marker
    Done,
}

/// Input to a streaming handler
pub(crate) enum SseSignal {
    /// A complete SSE event arrived
    Event(SseEvent),
    /// The byte stream ended (any buffered partial line already flushed)
    End,
}

/// Line buffer that assembles SSE events across TCP chunk boundaries
#[derive(Debug, Default)]
pub(crate) struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every complete event they finish
    ///
    /// A trailing partial line stays buffered for the next call.
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_owned();
            self.buffer.drain(..=pos);
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Parse whatever is left in the buffer when the stream ends
    pub(crate) fn flush(&mut self) -> Vec<SseEvent> {
        let rest = mem::take(&mut self.buffer);
        parse_line(&rest).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed == "data: [DONE]" {
        return Some(SseEvent::Done);
    }
    // Non-data fields (event:, id:, retry:, comments) are skipped; the
    // providers here repeat the event type inside the data payload.
    let data = trimmed.strip_prefix("data: ")?;
    if data.trim().is_empty() {
        return None;
    }
    Some(SseEvent::Data(data.to_owned()))
}

struct SseState<H> {
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    parser: SseLineBuffer,
    handler: H,
    pending: VecDeque<Result<LlmResponse>>,
    ended: bool,
    terminated: bool,
}

impl<H> SseState<H>
where
    H: FnMut(SseSignal) -> Vec<Result<LlmResponse>>,
{
    fn dispatch(&mut self, signal: SseSignal) {
        if self.terminated {
            return;
        }
        for item in (self.handler)(signal) {
            let is_err = item.is_err();
            self.pending.push_back(item);
            if is_err {
                self.terminated = true;
                return;
            }
        }
    }
}

/// Drive an SSE byte stream through a stateful handler
///
/// The handler receives each parsed event plus a final [`SseSignal::End`]
/// and returns the responses to emit for it (partials along the way, the
/// aggregated final at the end). The first `Err` the handler returns is
/// terminal: it is yielded and the stream ends.
pub(crate) fn sse_response_stream<S, H>(byte_stream: S, handler: H) -> LlmResponseStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    H: FnMut(SseSignal) -> Vec<Result<LlmResponse>> + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(byte_stream),
        parser: SseLineBuffer::new(),
        handler,
        pending: VecDeque::new(),
        ended: false,
        terminated: false,
    };

    Box::pin(unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                    state.ended = true;
                }
                return Some((item, state));
            }
            if state.ended {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    for event in state.parser.feed(&bytes) {
                        state.dispatch(SseSignal::Event(event));
                    }
                }
                Some(Err(e)) => {
                    state.pending.clear();
                    state
                        .pending
                        .push_back(Err(Error::Network(format!("stream read error: {e}"))));
                    state.terminated = true;
                }
                None => {
                    for event in state.parser.flush() {
                        state.dispatch(SseSignal::Event(event));
                    }
                    state.dispatch(SseSignal::End);
                    state.ended = true;
                    if state.pending.is_empty() {
                        return None;
                    }
                }
            }
        }
    }))
}
