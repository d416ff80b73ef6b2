//! Incremental decoder for the reply stream's `data: {json}` frames.

use serde::Deserialize;

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Splits a byte stream into lines and yields the `choices[0].delta.content`
/// fragment of every data frame until `data: [DONE]`.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters split
/// across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut fragments = Vec::new();
        if self.done {
            return fragments;
        }
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.consume_line(&line[..line.len() - 1], &mut fragments);
            if self.done {
                self.buffer.clear();
                break;
            }
        }
        fragments
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<String> {
        let mut fragments = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.consume_line(&line, &mut fragments);
        }
        self.done = true;
        fragments
    }

    fn consume_line(&mut self, raw: &[u8], fragments: &mut Vec<String>) {
        let Ok(line) = std::str::from_utf8(raw) else {
            log::debug!("Skipping non UTF-8 stream line");
            return;
        };
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') || line.trim().is_empty() {
            return;
        }
        let Some(payload) = line.strip_prefix("data: ") else {
            return;
        };
        let payload = payload.trim();
        if payload == "[DONE]" {
            self.done = true;
            return;
        }
        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => {
                let content = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta)
                    .and_then(|d| d.content);
                if let Some(content) = content.filter(|c| !c.is_empty()) {
                    fragments.push(content);
                }
            }
            Err(e) => log::debug!("Skipping malformed stream frame: {}", e),
        }
    }
}
