// ABOUTME: Incremental server-sent-events parser shared by both HTTP transports
// ABOUTME: Splits frames on blank lines, joins multi-line data, normalises CR/LF endings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

/// One parsed SSE event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; empty means the default "message" type is implied
    pub event: String,
    /// `data:` field; consecutive data lines joined with newlines
    pub data: String,
    /// `id:` field, when present
    pub id: Option<String>,
    /// `retry:` field in milliseconds, when present and numeric
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Event type with the SSE default applied
    #[must_use]
    pub fn event_type(&self) -> &str {
        if self.event.is_empty() {
            "message"
        } else {
            &self.event
        }
    }
}

/// Incremental SSE parser fed raw bytes from a response body
///
/// Chunks may split lines and events arbitrarily; feed every chunk and
/// collect the completed events each call returns.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    current: PartialEvent,
}

#[derive(Debug, Default)]
struct PartialEvent {
    event: String,
    data_lines: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl PartialEvent {
    fn is_empty(&self) -> bool {
        self.event.is_empty() && self.data_lines.is_empty() && self.id.is_none() && self.retry.is_none()
    }

    fn finish(&mut self) -> Option<SseEvent> {
        if self.is_empty() {
            return None;
        }
        let event = SseEvent {
            event: std::mem::take(&mut self.event),
            data: self.data_lines.join("\n"),
            id: self.id.take(),
            retry: self.retry.take(),
        };
        self.data_lines.clear();
        Some(event)
    }
}

impl SseParser {
    /// Create an empty parser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every event completed by this chunk
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        let mut consumed = 0;

        // Consume complete lines; a trailing partial line stays buffered.
        // CRLF and bare CR both count as terminators.
        loop {
            let remaining = &self.buffer[consumed..];
            let Some((line, rest)) = split_line(remaining) else {
                break;
            };
            let line = line.to_owned();
            consumed += remaining.len() - rest.len();

            if line.is_empty() {
                if let Some(event) = self.current.finish() {
                    events.push(event);
                }
                continue;
            }
            self.process_line(&line);
        }

        self.buffer.drain(..consumed);
        events
    }

    /// Flush a final dangling event when the stream ends without a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            if !line.is_empty() {
                self.process_line(&line);
            }
        }
        self.current.finish()
    }

    fn process_line(&mut self, line: &str) {
        // Comment lines start with a colon
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.current.event = value.to_owned(),
            "data" => self.current.data_lines.push(value.to_owned()),
            "id" => self.current.id = Some(value.to_owned()),
            "retry" => self.current.retry = value.parse().ok(),
            _ => {}
        }
    }
}

/// Split off one line, treating `\r\n`, `\n`, and `\r` as terminators
fn split_line(buffer: &str) -> Option<(&str, &str)> {
    let bytes = buffer.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            return Some((&buffer[..i], &buffer[i + 1..]));
        }
        if b == b'\r' {
            // A CR at the very end of the buffer might be half of a CRLF;
            // wait for the next chunk to decide.
            if i + 1 == bytes.len() {
                return None;
            }
            let skip = if bytes[i + 1] == b'\n' { 2 } else { 1 };
            return Some((&buffer[..i], &buffer[i + skip..]));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut SseParser, input: &str) -> Vec<SseEvent> {
        parser.feed(input.as_bytes())
    }

    #[test]
    fn single_event_with_type_and_data() {
        let mut parser = SseParser::new();
        let events = feed_all(&mut parser, "event: endpoint\ndata: /messages?x=1\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/messages?x=1");
    }

    #[test]
    fn default_event_type_is_message() {
        let mut parser = SseParser::new();
        let events = feed_all(&mut parser, "data: {}\n\n");
        assert_eq!(events[0].event_type(), "message");
    }

    #[test]
    fn consecutive_data_lines_join_with_newline() {
        let mut parser = SseParser::new();
        let events = feed_all(&mut parser, "data: line one\ndata: line two\n\n");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn crlf_and_cr_line_endings_normalise() {
        let mut parser = SseParser::new();
        let events = feed_all(&mut parser, "event: message\r\ndata: a\r\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "a");
    }

    #[test]
    fn events_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: mess").is_empty());
        assert!(parser.feed(b"age\ndata: {\"id\"").is_empty());
        let events = parser.feed(b": 1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"id\": 1}");
    }

    #[test]
    fn cr_at_chunk_boundary_waits_for_more() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: x\r").is_empty());
        let events = parser.feed(b"\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn comment_lines_are_ignored() {
        let mut parser = SseParser::new();
        let events = feed_all(&mut parser, ": keep-alive\n\ndata: real\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "real");
    }

    #[test]
    fn id_and_retry_fields_parse() {
        let mut parser = SseParser::new();
        let events = feed_all(&mut parser, "id: 42\nretry: 3000\ndata: x\n\n");
        assert_eq!(events[0].id.as_deref(), Some("42"));
        assert_eq!(events[0].retry, Some(3000));
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let events = feed_all(&mut parser, "data: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
    }

    #[test]
    fn finish_flushes_dangling_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: tail").is_empty());
        let event = parser.finish().expect("dangling event");
        assert_eq!(event.data, "tail");
    }

    #[test]
    fn value_without_leading_space_is_kept() {
        let mut parser = SseParser::new();
        let events = feed_all(&mut parser, "data:tight\n\n");
        assert_eq!(events[0].data, "tight");
    }
}
