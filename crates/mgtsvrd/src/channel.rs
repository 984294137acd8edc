//! Growable byte channel with newline framing.
//!
//! The same type buffers both directions of a connection: inbound bytes are
//! drained one line at a time, outbound bytes are drained in bounded chunks so
//! a short write leaves the remainder in place for the next writable event.
//! The channel itself never refuses bytes; the multiplexer bounds inbound
//! growth with `max_line_length`.

use bytes::{Buf, BufMut, BytesMut};

const DELIMITER: u8 = b'\n';

/// Contiguous byte buffer consumed from the front.
#[derive(Debug, Default, Clone)]
pub struct FramedChannel {
    buffer: BytesMut,
}

impl FramedChannel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes to the tail.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Appends `text` followed by the delimiter.
    pub fn push_line(&mut self, text: &str) {
        self.buffer.reserve(text.len() + 1);
        self.buffer.put_slice(text.as_bytes());
        self.buffer.put_u8(DELIMITER);
    }

    /// Removes and returns the first complete line.
    ///
    /// The delimiter is dropped, as is a `\r` immediately before it. Returns
    /// `None` and leaves the buffer untouched when no delimiter is present.
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn take_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|byte| *byte == DELIMITER)?;
        let frame = self.buffer.split_to(end + 1);
        let line = frame.strip_suffix(&[DELIMITER]).unwrap_or(&frame[..]);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        Some(String::from_utf8_lossy(line).into_owned())
    }

    /// Whether a complete line is buffered.
    #[must_use]
    pub fn has_line(&self) -> bool {
        self.buffer.contains(&DELIMITER)
    }

    /// Number of buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the channel holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Borrows up to `max_len` bytes from the front without consuming them.
    #[must_use]
    pub fn peek_chunk(&self, max_len: usize) -> &[u8] {
        &self.buffer[..self.buffer.len().min(max_len)]
    }

    /// Drops `count` bytes from the front, or everything if fewer remain.
    pub fn consume_front(&mut self, count: usize) {
        let count = count.min(self.buffer.len());
        self.buffer.advance(count);
    }

    /// Discards every buffered byte.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn drain_lines(channel: &mut FramedChannel) -> Vec<String> {
        std::iter::from_fn(|| channel.take_line()).collect()
    }

    #[rstest]
    #[case(&["hello\nworld\n"])]
    #[case(&["he", "llo\nwor", "ld\n"])]
    #[case(&["h", "e", "l", "l", "o", "\n", "w", "o", "r", "l", "d", "\n"])]
    #[case(&["hello\n", "world\n"])]
    fn chunk_boundaries_do_not_change_lines(#[case] chunks: &[&str]) {
        let mut channel = FramedChannel::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            channel.append(chunk.as_bytes());
            lines.extend(drain_lines(&mut channel));
        }
        assert_eq!(lines, vec!["hello".to_owned(), "world".to_owned()]);
        assert!(channel.is_empty());
    }

    #[test]
    fn partial_line_is_left_in_place() {
        let mut channel = FramedChannel::new();
        channel.append(b"partial");
        assert_eq!(channel.take_line(), None);
        assert_eq!(channel.len(), 7);
        assert!(!channel.has_line());
        channel.append(b" line\n");
        assert_eq!(channel.take_line().as_deref(), Some("partial line"));
    }

    #[test]
    fn carriage_return_before_delimiter_is_stripped() {
        let mut channel = FramedChannel::new();
        channel.append(b"telnet\r\nraw\rvalue\n");
        assert_eq!(channel.take_line().as_deref(), Some("telnet"));
        assert_eq!(channel.take_line().as_deref(), Some("raw\rvalue"));
    }

    #[test]
    fn empty_lines_are_returned() {
        let mut channel = FramedChannel::new();
        channel.append(b"\n\nx\n");
        assert_eq!(drain_lines(&mut channel), vec!["", "", "x"]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut channel = FramedChannel::new();
        channel.append(&[b'a', 0xff, b'b', b'\n']);
        assert_eq!(channel.take_line().as_deref(), Some("a\u{fffd}b"));
    }

    #[test]
    fn chunked_drain_preserves_bytes() {
        let mut channel = FramedChannel::new();
        let payload: Vec<u8> = (0..10_000_u32).map(|n| (n % 251) as u8).collect();
        channel.append(&payload);

        let mut written = Vec::new();
        while !channel.is_empty() {
            let chunk = channel.peek_chunk(4096);
            assert_eq!(chunk.len(), channel.len().min(4096));
            let short = chunk.len().min(1000);
            written.extend_from_slice(&chunk[..short]);
            channel.consume_front(short);
        }
        assert_eq!(written, payload);
    }

    #[test]
    fn push_line_appends_delimiter() {
        let mut channel = FramedChannel::new();
        channel.push_line("username: ");
        channel.push_line("[ok]");
        assert_eq!(channel.peek_chunk(64), b"username: \n[ok]\n");
    }

    #[test]
    fn consume_front_saturates() {
        let mut channel = FramedChannel::new();
        channel.append(b"abc");
        channel.consume_front(10);
        assert!(channel.is_empty());
    }
}
