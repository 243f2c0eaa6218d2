//! Newline framing over a byte stream.
//!
//! HTTP bodies arrive in arbitrary chunks, so a UTF-8 sequence or a line may
//! be split across two of them. Bytes are buffered until a full line exists.

#[derive(Debug, Default)]
pub(super) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(super) fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Takes the next complete line, trimmed. Invalid UTF-8 is replaced.
    pub(super) fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    /// Takes whatever is left once the stream has ended.
    pub(super) fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines() {
        let mut lines = LineBuffer::default();
        lines.push(b"one\ntwo\r\nthr");

        assert_eq!(lines.next_line().as_deref(), Some("one"));
        assert_eq!(lines.next_line().as_deref(), Some("two"));
        assert_eq!(lines.next_line(), None);

        lines.push(b"ee\n");
        assert_eq!(lines.next_line().as_deref(), Some("three"));
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let bytes = "héllo\n".as_bytes();
        let mut lines = LineBuffer::default();

        lines.push(&bytes[..2]);
        assert_eq!(lines.next_line(), None);
        lines.push(&bytes[2..]);

        assert_eq!(lines.next_line().as_deref(), Some("héllo"));
    }

    #[test]
    fn finish_returns_unterminated_tail() {
        let mut lines = LineBuffer::default();
        lines.push(b"tail");
        assert_eq!(lines.finish().as_deref(), Some("tail"));
        assert_eq!(lines.finish(), None);
    }
}
