//! Server-sent events framing for streamed chat completions.
//!
//! Frames look like:
//! ```text
//! data: {"choices":[{"index":0,"delta":{"content":"Hi"}}]}
//!
//! data: [DONE]
//! ```

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, warn};

use super::types::StreamChunk;
use crate::error::ApiError;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ApiError>> + Send>>;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    Done,
}

/// Incremental decoder from raw body bytes to `data:` frames.
///
/// Bytes may arrive split anywhere, including inside a multi-byte UTF-8
/// sequence or in the middle of a line. Only complete lines are processed.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
    buffer: String,
    done: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `[DONE]` has been seen; later input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }

        self.decode(bytes);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return frames;
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        for line in complete.split('\n') {
            match parse_line(line) {
                Some(SseFrame::Done) => {
                    self.done = true;
                    self.buffer.clear();
                    self.pending.clear();
                    frames.push(SseFrame::Done);
                    break;
                }
                Some(frame) => frames.push(frame),
                None => {}
            }
        }

        frames
    }

    /// Consume the decoder, returning any unterminated trailing text.
    pub fn finish(self) -> Option<String> {
        let mut tail = self.buffer;
        if !self.pending.is_empty() {
            tail.push_str(&String::from_utf8_lossy(&self.pending));
        }
        (!tail.is_empty()).then_some(tail)
    }

    fn decode(&mut self, bytes: &[u8]) {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);

        let mut rest = data.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Sequence cut off by the read boundary.
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn parse_line(line: &str) -> Option<SseFrame> {
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == DONE_SENTINEL {
        return Some(SseFrame::Done);
    }
    Some(SseFrame::Data(payload.to_string()))
}

/// Turn a response body into a stream of parsed chunks.
///
/// Malformed JSON payloads are logged and skipped. A transport error is
/// yielded once and ends the stream. Dropping the stream drops the body.
pub fn parse_sse_stream<S, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut decoder = LineDecoder::new();
        futures_util::pin_mut!(bytes);

        'read: while let Some(next) = bytes.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(err) => {
                    let err: ApiError = err.into();
                    yield Err(err);
                    break 'read;
                }
            };

            for frame in decoder.feed(&chunk) {
                match frame {
                    SseFrame::Done => break 'read,
                    SseFrame::Data(payload) => match serde_json::from_str::<StreamChunk>(&payload) {
                        Ok(parsed) => {
                            yield Ok(parsed);
                        }
                        Err(e) => {
                            warn!("Skipping malformed stream chunk: {} - Data: {}", e, payload);
                        }
                    },
                }
            }
        }

        if let Some(tail) = decoder.finish() {
            debug!("Dropping unterminated stream line ({} bytes)", tail.len());
        }
    })
}
