use serde_json::Value;

/// A parsed Server-Sent Event.
#[derive(Debug)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: Option<Value>,
}

/// Parse a chunk of SSE text into events.
/// Events are separated by blank lines; each has optional `event:` and `data:` fields.
/// A `[DONE]` sentinel yields an event with `data = None`.
pub fn parse_sse_chunk(chunk: &str) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut current_event_type: Option<String> = None;
    let mut current_data = String::new();

    let mut flush = |event_type: Option<String>, data: &mut String| {
        if data.is_empty() {
            return;
        }
        let trimmed = data.trim().to_string();
        let parsed = if trimmed == "[DONE]" {
            None
        } else {
            serde_json::from_str::<Value>(&trimmed).ok()
        };
        events.push(SseEvent {
            event_type,
            data: parsed,
        });
        data.clear();
    };

    for line in chunk.lines() {
        if line.is_empty() {
            flush(current_event_type.take(), &mut current_data);
        } else if let Some(event_type) = line.strip_prefix("event: ") {
            current_event_type = Some(event_type.trim().to_string());
        } else if let Some(data) = line.strip_prefix("data: ") {
            if !current_data.is_empty() {
                current_data.push('\n');
            }
            current_data.push_str(data);
        }
    }

    // Final event when the chunk doesn't end with a blank line.
    flush(current_event_type, &mut current_data);

    events
}

/// Carry buffer for SSE arriving in arbitrary byte chunks. Events are only
/// parsed once their terminating blank line has arrived.
#[derive(Default)]
pub struct SseBuffer {
    pending: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete event.
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.pending.push_str(chunk);
        let mut events = Vec::new();
        while let Some(boundary) = self.pending.find("\n\n") {
            let complete: String = self.pending.drain(..boundary + 2).collect();
            events.extend(parse_sse_chunk(&complete));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_event() {
        let chunk = "data: {\"choices\":[]}\n\n";
        let events = parse_sse_chunk(chunk);
        assert_eq!(events.len(), 1);
        assert!(events[0].data.is_some());
    }

    #[test]
    fn parse_multiple_events() {
        let chunk = "data: {\"a\":1}\n\ndata: {\"b\":2}\n\n";
        let events = parse_sse_chunk(chunk);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data.as_ref().unwrap()["b"], 2);
    }

    #[test]
    fn parse_done_sentinel() {
        let events = parse_sse_chunk("data: [DONE]\n\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].data.is_none());
    }

    #[test]
    fn parse_event_type() {
        let events = parse_sse_chunk("event: delta\ndata: {\"x\":true}\n\n");
        assert_eq!(events[0].event_type.as_deref(), Some("delta"));
    }

    #[test]
    fn parse_empty_chunk() {
        assert!(parse_sse_chunk("").is_empty());
    }

    #[test]
    fn buffer_holds_partial_events_across_chunks() {
        let mut buf = SseBuffer::new();
        assert!(buf.push("data: {\"a\"").is_empty());
        assert!(buf.push(":1}\n").is_empty());
        let events = buf.push("\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data.as_ref().unwrap()["a"], 1);
        assert!(events[1].data.is_none());
    }
}
