/// Appended to a stream that hit the capture cap.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Byte sink that keeps at most `limit` bytes of a stream.
#[derive(Debug)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        if let Some(kept) = chunk.get(..chunk.len().min(room)) {
            self.bytes.extend_from_slice(kept);
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_string(self) -> String {
        self.snapshot()
    }

    /// Text captured so far, without consuming the buffer.
    pub fn snapshot(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_everything_under_limit() {
        let mut buf = OutputBuffer::new(16);
        buf.push(b"hello ");
        buf.push(b"world");
        assert!(!buf.is_truncated());
        assert_eq!(buf.into_string(), "hello world");
    }

    #[test]
    fn drops_bytes_past_limit() {
        let mut buf = OutputBuffer::new(4);
        buf.push(b"abc");
        buf.push(b"defg");
        assert!(buf.is_truncated());
        assert_eq!(buf.into_string(), format!("abcd{TRUNCATION_MARKER}"));
    }

    #[test]
    fn snapshot_leaves_buffer_usable() {
        let mut buf = OutputBuffer::new(16);
        buf.push(b"tick 1\n");
        assert_eq!(buf.snapshot(), "tick 1\n");
        buf.push(b"tick 2\n");
        assert_eq!(buf.into_string(), "tick 1\ntick 2\n");
    }
}
