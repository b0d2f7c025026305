use bytes::Bytes;

/// One decoded `text/event-stream` frame (ignoring `id:`/`retry:` fields,
/// which no vendor adapter in this workspace needs).
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Accumulates raw upstream bytes into complete SSE events.
///
/// HTTP chunk boundaries never line up with SSE event boundaries, so the
/// Worker Pool (spec.md §4.4) cannot feed a [`crate::invoke`] chunk straight
/// to `ProviderAdapter::parse_stream_chunk` — a `data:` line can arrive split
/// across two reads. This buffers until a blank line closes an event, then
/// hands the adapter exactly one event's `data` payload per call, matching
/// what every built-in adapter's stream decoder already assumes (a single
/// trimmed JSON payload, or the literal `[DONE]`).
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);

            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                self.finish_event(&mut events);
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("event:") {
                let value = value.trim_start();
                self.event = (!value.is_empty()).then(|| value.to_string());
                continue;
            }
            if let Some(value) = line.strip_prefix("data:") {
                self.data_lines.push(value.trim_start().to_string());
                continue;
            }
        }

        events
    }

    /// Flushes whatever partial event is left in the buffer — called once the
    /// upstream body is fully drained (clean EOF, spec.md §4.7 point 3).
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(value) = line.strip_prefix("data:") {
                self.data_lines.push(value.trim_start().to_string());
            }
        }
        self.finish_event(&mut events);
        events
    }

    fn finish_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        let data = self.data_lines.join("\n");
        events.push(SseEvent {
            event: self.event.take(),
            data,
        });
        self.data_lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_one_chunk_into_two_events() {
        let mut parser = SseParser::new();
        let events = parser.push_bytes(&Bytes::from_static(
            b"data: {\"a\":1}\n\ndata: {\"a\":2}\n\n",
        ));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].data, "{\"a\":2}");
    }

    #[test]
    fn reassembles_an_event_split_across_chunks() {
        let mut parser = SseParser::new();
        let mut events = parser.push_bytes(&Bytes::from_static(b"data: {\"a\""));
        assert!(events.is_empty());
        events = parser.push_bytes(&Bytes::from_static(b":1}\n\n"));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn finish_flushes_a_trailing_event_with_no_terminating_blank_line() {
        let mut parser = SseParser::new();
        assert!(parser.push_bytes(&Bytes::from_static(b"data: [DONE]")).is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "[DONE]");
    }
}
