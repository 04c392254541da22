//! Line buffering and per-line payload extraction.
use memchr::memchr_iter;

/// End-of-stream sentinel some backends send as a final data line.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Append-only text buffer that yields complete lines and holds back the
/// trailing partial one.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
    read_offset: usize,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and call `on_line` for every line it completes.
    /// A trailing `\r` is stripped from each line.
    pub fn feed(&mut self, chunk: &str, mut on_line: impl FnMut(&str)) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &self.buffer[processed_up_to..line_end];
            on_line(line.strip_suffix('\r').unwrap_or(line));
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Take the held-back partial line, if it has any non-whitespace.
    pub fn take_partial(&mut self) -> Option<String> {
        let partial = self.buffer.split_off(self.read_offset);
        self.buffer.clear();
        self.read_offset = 0;
        if partial.trim().is_empty() {
            None
        } else {
            Some(partial)
        }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset
    }
}

/// Extract the JSON text carried by one line.
///
/// Accepts `data: {...}`, `data:{...}` and bare JSON lines. Returns `None`
/// for blank lines, SSE comments, the other SSE fields and the
/// [`DONE_SENTINEL`].
#[must_use]
pub fn extract_data_payload(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    if ["event:", "id:", "retry:"]
        .iter()
        .any(|field| trimmed.starts_with(field))
    {
        return None;
    }

    let payload = trimmed.strip_prefix("data:").unwrap_or(trimmed).trim();
    if payload.is_empty() || payload == DONE_SENTINEL {
        return None;
    }
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(buffer: &mut LineBuffer, chunk: &str) -> Vec<String> {
        let mut lines = Vec::new();
        buffer.feed(chunk, |line| lines.push(line.to_string()));
        lines
    }

    #[test]
    fn test_partial_line_held_back() {
        let mut buffer = LineBuffer::new();
        assert_eq!(collect(&mut buffer, "{\"a\":1}\n{\"b\""), vec!["{\"a\":1}"]);
        assert_eq!(buffer.pending_len(), 4);
        assert_eq!(collect(&mut buffer, ":2}\n"), vec!["{\"b\":2}"]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn test_crlf_stripped() {
        let mut buffer = LineBuffer::new();
        assert_eq!(
            collect(&mut buffer, "data: x\r\n\r\ndata: y\r\n"),
            vec!["data: x", "", "data: y"]
        );
    }

    #[test]
    fn test_take_partial() {
        let mut buffer = LineBuffer::new();
        let _ = collect(&mut buffer, "one\n{\"tail\":true}");
        assert_eq!(buffer.take_partial().as_deref(), Some("{\"tail\":true}"));
        assert_eq!(buffer.take_partial(), None);

        let _ = collect(&mut buffer, "two\n  ");
        assert_eq!(buffer.take_partial(), None);
    }

    #[test]
    fn test_compaction_keeps_partial_intact() {
        let mut buffer = LineBuffer::new();
        let long_line = "x".repeat(9000);
        let lines = collect(&mut buffer, &format!("{long_line}\npar"));
        assert_eq!(lines.len(), 1);
        let lines = collect(&mut buffer, "tial\n");
        assert_eq!(lines, vec!["partial"]);
    }

    #[test]
    fn test_extract_data_payload() {
        assert_eq!(extract_data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(extract_data_payload("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(extract_data_payload("  {\"a\":1}  "), Some("{\"a\":1}"));
        assert_eq!(extract_data_payload("data: [DONE]"), None);
        assert_eq!(extract_data_payload("[DONE]"), None);
        assert_eq!(extract_data_payload("event: message"), None);
        assert_eq!(extract_data_payload(": keep-alive"), None);
        assert_eq!(extract_data_payload("id: 7"), None);
        assert_eq!(extract_data_payload("data:"), None);
        assert_eq!(extract_data_payload(""), None);
    }
}
