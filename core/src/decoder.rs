//! Line-protocol decoder for one dispatch turn.
//!
//! Bytes are framed into newline-terminated lines; every line that decodes as
//! a known [`Envelope`] updates the accumulated turn state, everything else
//! is dropped. The decoder finalizes exactly once: on the first `result`
//! envelope, at end of stream, or with an error if the stream faults.

use tether_protocol::Envelope;
use tether_protocol::StreamDelta;
use tether_protocol::StreamEvent;
use tether_protocol::Usage;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::trace;
use tracing::warn;

use crate::accounting::TokenCounts;
use crate::error::Result;
use crate::error::TetherErr;
use crate::transport::OutputEvent;

/// Everything observed during one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedTurn {
    /// Text accumulated from assistant blocks and streaming deltas.
    pub text: String,
    /// Final text carried by the `result` envelope, if one arrived.
    pub result_text: Option<String>,
    pub session_id: Option<String>,
    pub reported_cost: Option<f64>,
    pub duration_ms: Option<u64>,
    pub tokens: TokenCounts,
    pub compacted: bool,
    /// True when the turn ended with a `result` envelope rather than at end
    /// of stream.
    pub terminated: bool,
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
    turn: DecodedTurn,
    finalized: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk. Returns the finished turn the first time a `result`
    /// envelope completes; later input is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<DecodedTurn> {
        if self.finalized {
            return None;
        }
        self.pending.extend_from_slice(chunk);
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if self.apply_line(&line) {
                return Some(self.seal());
            }
        }
        None
    }

    /// End of stream. A trailing unterminated fragment is decoded first.
    pub fn finish(mut self) -> Option<DecodedTurn> {
        if self.finalized {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        if !rest.is_empty() {
            self.apply_line(&rest);
        }
        Some(self.seal())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn seal(&mut self) -> DecodedTurn {
        self.finalized = true;
        self.pending.clear();
        std::mem::take(&mut self.turn)
    }

    /// Returns true when `line` was the terminal envelope.
    fn apply_line(&mut self, line: &[u8]) -> bool {
        let line = String::from_utf8_lossy(line);
        let Some(envelope) = Envelope::from_line(&line) else {
            trace!(line = %line.trim_end(), "discarding non-protocol output");
            return false;
        };
        if let Some(session_id) = envelope.session_id() {
            self.turn.session_id = Some(session_id.to_string());
        }

        match envelope {
            Envelope::System(system) => {
                if system.is_compact_boundary() {
                    self.turn.compacted = true;
                }
            }
            Envelope::Assistant(assistant) => {
                for text in assistant.message.text_blocks() {
                    self.turn.text.push_str(text);
                }
                if let Some(usage) = assistant.message.usage.as_ref() {
                    overwrite_tokens(&mut self.turn.tokens, usage);
                }
            }
            Envelope::Result(result) => {
                if result.is_error == Some(true) {
                    warn!(
                        subtype = result.subtype.as_deref(),
                        "model process reported an error result"
                    );
                }
                self.turn.reported_cost = result.reported_cost();
                self.turn.duration_ms = result.duration_ms;
                if let Some(usage) = result.usage.as_ref() {
                    overwrite_tokens(&mut self.turn.tokens, usage);
                }
                self.turn.result_text = result.result;
                self.turn.terminated = true;
                return true;
            }
            Envelope::StreamEvent(stream) => match stream.event {
                StreamEvent::MessageStart { message } => {
                    if let Some(input) = message.usage.and_then(|usage| usage.input_tokens) {
                        self.turn.tokens.input = input;
                    }
                }
                StreamEvent::ContentBlockDelta {
                    delta: StreamDelta::TextDelta { text },
                } => self.turn.text.push_str(&text),
                StreamEvent::MessageDelta { usage: Some(usage) } => {
                    overwrite_tokens(&mut self.turn.tokens, &usage);
                }
                StreamEvent::ContentBlockDelta { .. }
                | StreamEvent::MessageDelta { usage: None }
                | StreamEvent::Other => {}
            },
            Envelope::CompactBoundary => self.turn.compacted = true,
            Envelope::Unrecognized => {}
        }
        false
    }
}

/// Replaces the counters present in `usage`; absent ones keep their value.
fn overwrite_tokens(tokens: &mut TokenCounts, usage: &Usage) {
    if let Some(input) = usage.input_tokens {
        tokens.input = input;
    }
    if let Some(output) = usage.output_tokens {
        tokens.output = output;
    }
    if let Some(cache_write) = usage.cache_creation_input_tokens {
        tokens.cache_write = cache_write;
    }
    if let Some(cache_read) = usage.cache_read_input_tokens {
        tokens.cache_read = cache_read;
    }
}

/// Drives a fresh decoder over `output` until it finalizes. The receiver is
/// dropped on return, which detaches the decoder from the process.
pub async fn decode_turn(mut output: broadcast::Receiver<OutputEvent>) -> Result<DecodedTurn> {
    let mut decoder = StreamDecoder::new();
    loop {
        match output.recv().await {
            Ok(OutputEvent::Data(chunk)) => {
                if let Some(turn) = decoder.feed(&chunk) {
                    return Ok(turn);
                }
            }
            Ok(OutputEvent::Closed) | Err(RecvError::Closed) => {
                return Ok(decoder.finish().unwrap_or_default());
            }
            Ok(OutputEvent::Fault(message)) => return Err(TetherErr::StreamFault(message)),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "decoder fell behind the output stream");
            }
        }
    }
}
