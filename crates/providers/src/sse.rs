/// Line decoder for streamed chat completions.
///
/// OpenAI-compatible servers send `data: {...}` lines and finish with
/// `data: [DONE]`. Some send bare JSON lines, so the `data:` prefix is optional.

/// Terminator line payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One meaningful line of the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    /// Payload with any `data:` prefix removed.
    Data(String),
    Done,
}

/// Incremental parser that buffers incomplete lines across chunk boundaries.
///
/// Bytes are buffered rather than text so a multi-byte character split
/// between two reads is decoded intact.
pub struct SseParser {
    buffer: Vec<u8>,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed raw bytes from the HTTP response. Returns the complete lines found.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamLine> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(line) = classify(&String::from_utf8_lossy(&raw)) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flushes a trailing line the server did not terminate.
    pub fn finish(&mut self) -> Vec<StreamLine> {
        let rest = std::mem::take(&mut self.buffer);
        classify(&String::from_utf8_lossy(&rest))
            .into_iter()
            .collect()
    }
}

fn classify(line: &str) -> Option<StreamLine> {
    let line = line.trim();
    // Blank separators and `: keep-alive` comments
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    if ["event:", "id:", "retry:"].iter().any(|f| line.starts_with(f)) {
        return None;
    }

    let payload = line
        .strip_prefix("data:")
        .map(str::trim_start)
        .unwrap_or(line);
    if payload.is_empty() {
        None
    } else if payload == DONE_SENTINEL {
        Some(StreamLine::Done)
    } else {
        Some(StreamLine::Data(payload.to_string()))
    }
}
