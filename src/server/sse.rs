//! `data: <JSON>\n\n` framing for [`StreamEvent`]s.

use crate::agent_engine::state::StreamEvent;
use crate::errors::{DeskPilotError, DeskPilotResult};

const FRAME_TERMINATOR: &[u8] = b"\n\n";

pub fn encode_frame(event: &StreamEvent) -> DeskPilotResult<String> {
    let json = serde_json::to_string(event)?;
    Ok(format!("data: {json}\n\n"))
}

/// Parses one complete frame. Returns `None` for keep-alives, comments and
/// frames without a `data:` line.
pub fn parse_frame(frame: &str) -> DeskPilotResult<Option<StreamEvent>> {
    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        let event: StreamEvent =
            serde_json::from_str(data).map_err(|e| DeskPilotError::SseParsing(e.to_string()))?;
        return Ok(Some(event));
    }
    Ok(None)
}

/// Consumer-side decoder. Chunks may end anywhere, including inside a frame
/// or a multi-byte character; the unterminated tail is kept for the next push.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> DeskPilotResult<Vec<StreamEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = find_terminator(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end + FRAME_TERMINATOR.len()).collect();
            let text = std::str::from_utf8(&frame[..end])
                .map_err(|e| DeskPilotError::SseParsing(e.to_string()))?;
            if let Some(event) = parse_frame(text)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Bytes received but not yet terminated.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_TERMINATOR.len())
        .position(|w| w == FRAME_TERMINATOR)
}
