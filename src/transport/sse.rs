//! Incremental SSE frame parser.
//!
//! The relay's push stream is `text/event-stream`. Chunks arrive at
//! arbitrary byte boundaries, so frames are assembled incrementally: a
//! frame is dispatched only once its terminating blank line has been
//! seen.
//!
//! # Wire format
//!
//! ```text
//! event: tool-request
//! data: {"id":"r1","tool":"create_data_context","args":{}}
//!
//! ```

// ============================================================================
// SseFrame
// ============================================================================

/// One complete server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event name; empty means the default `message` event.
    pub event: String,
    /// Data payload; multi-line data fields joined with `\n`.
    pub data: String,
    /// Last-event id, if the relay sent one.
    pub id: Option<String>,
}

// ============================================================================
// SseParser
// ============================================================================

/// Stateful SSE parser fed with raw byte chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: String,
    data_lines: Vec<String>,
    id: Option<String>,
}

impl SseParser {
    /// Creates an empty parser.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every frame completed by it.
    ///
    /// Bytes are buffered raw and decoded per complete line, so a
    /// multi-byte character split across chunk boundaries reassembles
    /// intact. Invalid UTF-8 bytes are replaced, not rejected; the
    /// relay frames JSON payloads that downstream parsing validates
    /// anyway.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }

            // Comment line, used by relays as keep-alive filler.
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match field {
                "event" => self.event = value.to_string(),
                "data" => self.data_lines.push(value.to_string()),
                "id" => self.id = Some(value.to_string()),
                // "retry" and unknown fields are ignored; reconnection
                // pacing is the worker's own policy.
                _ => {}
            }
        }

        frames
    }

    /// Completes the frame under construction, if it has any content.
    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.event.is_empty() && self.data_lines.is_empty() {
            return None;
        }

        let frame = SseFrame {
            event: std::mem::take(&mut self.event),
            data: self.data_lines.join("\n"),
            id: self.id.take(),
        };
        self.data_lines.clear();

        Some(frame)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"event: heartbeat\ndata: {\"timestamp\":1}\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "heartbeat");
        assert_eq!(frames[0].data, "{\"timestamp\":1}");
        assert!(frames[0].id.is_none());
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut parser = SseParser::new();

        assert!(parser.push(b"event: tool-req").is_empty());
        assert!(parser.push(b"uest\ndata: {\"id\":").is_empty());
        let frames = parser.push(b"\"r1\"}\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "tool-request");
        assert_eq!(frames[0].data, "{\"id\":\"r1\"}");
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut parser = SseParser::new();
        let frames = parser.push(
            b"event: connected\ndata: {}\n\nevent: heartbeat\ndata: {\"timestamp\":2}\n\n",
        );

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "connected");
        assert_eq!(frames[1].event, "heartbeat");
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"data: line one\ndata: line two\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let mut parser = SseParser::new();
        let frames = parser.push(b": keep-alive\n\n\n: another\n\n");
        assert!(frames.is_empty());
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"event: heartbeat\r\ndata: {}\r\n\r\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "heartbeat");
        assert_eq!(frames[0].data, "{}");
    }

    #[test]
    fn test_id_field() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"id: 42\nevent: heartbeat\ndata: {}\n\n");

        assert_eq!(frames[0].id.as_deref(), Some("42"));

        // Id does not leak into the next frame.
        let frames = parser.push(b"event: heartbeat\ndata: {}\n\n");
        assert!(frames[0].id.is_none());
    }

    #[test]
    fn test_value_without_space() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"event:heartbeat\ndata:{}\n\n");

        assert_eq!(frames[0].event, "heartbeat");
        assert_eq!(frames[0].data, "{}");
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut parser = SseParser::new();

        // "€" is e2 82 ac; the chunk boundary lands mid-character.
        assert!(parser.push(b"data: \xe2\x82").is_empty());
        let frames = parser.push(b"\xac\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "\u{20ac}");
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"event: heartbeat\ndata: \xff\xfe\n\n");

        assert_eq!(frames.len(), 1);
        assert!(!frames[0].data.is_empty());
    }
}
