//! Server-sent event wire decoding.
//!
//! The byte stream arrives in chunks that can split lines and events at any
//! boundary. [`SseLineBuffer`] reassembles complete lines; [`SseEventParser`]
//! groups `event:`/`data:` fields into events delimited by blank lines.

/// Accumulates raw bytes and yields complete lines, tolerating CRLF and
/// chunk boundaries that fall mid-line. Blank lines are yielded as empty
/// strings because they delimit events.
#[derive(Default)]
struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = self.buffer[search_index..].iter().position(|b| *b == b'\n')
        {
            let newline_index = search_index + relative_pos;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }

            if let Ok(text) = std::str::from_utf8(&self.buffer[search_index..line_end]) {
                lines.push(text.to_string());
            }

            search_index = newline_index + 1;
        }

        if flush {
            if let Ok(text) = std::str::from_utf8(&self.buffer[search_index..]) {
                if !text.is_empty() {
                    lines.push(text.to_string());
                }
            }
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SseEvent {
    name: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// The event name, defaulting to `message` when the stream sent none.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("message")
    }

    fn is_empty(&self) -> bool {
        self.name.is_none() && self.data.is_empty()
    }
}

#[derive(Default)]
pub struct SseEventParser {
    lines: SseLineBuffer,
    current: SseEvent,
}

impl SseEventParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for line in self.lines.push(chunk) {
            self.feed_line(&line, &mut events);
        }
        events
    }

    /// Drains buffered input at end of stream. A final event that was never
    /// terminated by a blank line is still delivered.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for line in self.lines.finish() {
            self.feed_line(&line, &mut events);
        }
        if !self.current.is_empty() {
            events.push(std::mem::take(&mut self.current));
        }
        events
    }

    fn feed_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if !self.current.is_empty() {
                events.push(std::mem::take(&mut self.current));
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.current.name = Some(value.to_string()),
            "data" => {
                if !self.current.data.is_empty() {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
            }
            // id and retry are irrelevant to this client
            _ => {}
        }
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}
