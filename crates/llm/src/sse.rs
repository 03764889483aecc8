//! Line framing for server-sent completion events.
//!
//! Only `data:` lines carry payloads. The `[DONE]` sentinel is matched before any JSON
//! decoding so it can never be mistaken for a malformed frame.

use serde::Deserialize;

pub const DATA_MARKER: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Outcome of interpreting one line of the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Keep-alives, comments, blank lines and other event fields.
    Ignored,
    /// A parsed chunk that carried no content text.
    Empty,
    Delta(String),
    Done,
    /// The payload was not a JSON object; the frame is skipped.
    Malformed,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

pub fn parse_frame(line: &str) -> Frame {
    let Some(payload) = line.strip_prefix(DATA_MARKER) else {
        return Frame::Ignored;
    };

    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Frame::Done;
    }

    let chunk = match serde_json::from_str::<CompletionChunk>(payload) {
        Ok(chunk) => chunk,
        Err(_) => return Frame::Malformed,
    };

    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty())
        .map_or(Frame::Empty, Frame::Delta)
}

/// Splits an arbitrary byte chunk sequence into complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends bytes and drains every complete line, without the trailing `\n` / `\r\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline_index) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line = self.pending.drain(..=newline_index).collect::<Vec<_>>();
            line.pop();
            if matches!(line.last(), Some(b'\r')) {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        lines
    }

    /// Returns the unterminated remainder once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }

        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}
