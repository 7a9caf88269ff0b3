//! Newline-delimited JSON framing over an arbitrarily chunked byte stream.
//!
//! Every segment before the last `\n` is a complete line and must parse; the
//! bytes after it are the unterminated tail and are carried to the next chunk
//! untouched. Only [`StreamBuffer::finish`] parses a leftover tail, so a final
//! message written without a newline still arrives once the stream ends.

use bytes::{Buf, BytesMut};
use tracing::warn;

use switchboard_core::errors::DecodeError;
use switchboard_core::protocol::AgentMessage;
use switchboard_core::truncate::truncate_chars;

const LINE_PREVIEW_CHARS: usize = 120;

/// Per-channel accumulator for the partial line carried between chunks.
#[derive(Debug, Default)]
pub struct StreamBuffer {
    tail: BytesMut,
    /// Prefix of `tail` already searched for a newline.
    scanned: usize,
    /// Lines that failed to decode, the final tail included.
    malformed: u64,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and decode every line it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<AgentMessage, DecodeError>> {
        self.tail.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(offset) = self.tail[self.scanned..].iter().position(|&b| b == b'\n') {
            let line = self.tail.split_to(self.scanned + offset);
            self.tail.advance(1);
            self.scanned = 0;
            if let Some(decoded) = self.decode(&line) {
                out.push(decoded);
            }
        }
        self.scanned = self.tail.len();
        out
    }

    /// End of stream: whatever remains is the final line.
    pub fn finish(&mut self) -> Option<Result<AgentMessage, DecodeError>> {
        let line = self.tail.split();
        self.scanned = 0;
        let decoded = self.decode(&line)?;
        if let Err(e) = &decoded {
            warn!(
                pending = line.len(),
                preview = %e.line_preview,
                "stream ended on an undecodable partial line"
            );
        }
        Some(decoded)
    }

    /// Bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.tail.len()
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub fn clear(&mut self) {
        self.tail.clear();
        self.scanned = 0;
    }

    fn decode(&mut self, line: &[u8]) -> Option<Result<AgentMessage, DecodeError>> {
        let decoded = decode_line(line)?;
        if decoded.is_err() {
            self.malformed += 1;
        }
        Some(decoded)
    }
}

fn decode_line(line: &[u8]) -> Option<Result<AgentMessage, DecodeError>> {
    if is_blank(line) {
        return None;
    }
    Some(
        serde_json::from_slice::<AgentMessage>(line).map_err(|e| DecodeError {
            line_preview: preview(line),
            message: e.to_string(),
        }),
    )
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

fn preview(bytes: &[u8]) -> String {
    truncate_chars(String::from_utf8_lossy(bytes).trim(), LINE_PREVIEW_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INIT: &str = r#"{"type":"system","subtype":"init","cwd":"/w","model":"m","tools":[],"session_id":"s1"}"#;
    const RESULT: &str = r#"{"type":"result","subtype":"success","session_id":"s1","num_turns":1,"result":"hi"}"#;

    fn ok(results: Vec<Result<AgentMessage, DecodeError>>) -> Vec<AgentMessage> {
        results.into_iter().map(Result::unwrap).collect()
    }

    #[test]
    fn whole_lines_in_one_chunk() {
        let mut buf = StreamBuffer::new();
        let input = format!("{INIT}\n{RESULT}\n");
        let msgs = ok(buf.feed(input.as_bytes()));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].message_type(), "system");
        assert!(msgs[1].is_terminal());
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn reassembles_across_every_split_point() {
        let input = format!("{INIT}\n{RESULT}\n");
        let bytes = input.as_bytes();
        for split in 1..bytes.len() {
            let mut buf = StreamBuffer::new();
            let mut msgs = ok(buf.feed(&bytes[..split]));
            msgs.extend(ok(buf.feed(&bytes[split..])));
            assert_eq!(msgs.len(), 2, "split at {split}");
            assert_eq!(msgs[0].message_type(), "system");
            assert_eq!(msgs[1].message_type(), "result");
        }
    }

    #[test]
    fn byte_at_a_time() {
        let input = format!("{INIT}\n{RESULT}\n");
        let mut buf = StreamBuffer::new();
        let mut msgs = Vec::new();
        for b in input.as_bytes() {
            msgs.extend(ok(buf.feed(std::slice::from_ref(b))));
        }
        assert_eq!(msgs.len(), 2);
    }

    #[test]
    fn malformed_complete_line_is_reported_and_skipped() {
        let mut buf = StreamBuffer::new();
        let input = format!("{{not json\n{RESULT}\n");
        let results = buf.feed(input.as_bytes());
        assert_eq!(results.len(), 2);
        let err = results[0].as_ref().unwrap_err();
        assert!(err.line_preview.contains("not json"));
        assert!(results[1].as_ref().unwrap().is_terminal());
    }

    #[test]
    fn partial_tail_is_silent() {
        let mut buf = StreamBuffer::new();
        let results = buf.feed(br#"{"type":"assis"#);
        assert!(results.is_empty());
        assert!(buf.pending() > 0);
    }

    #[test]
    fn blank_lines_are_ignored() {
        let mut buf = StreamBuffer::new();
        let input = format!("\n\r\n{RESULT}\n\n");
        assert_eq!(ok(buf.feed(input.as_bytes())).len(), 1);
    }

    #[test]
    fn complete_tail_waits_for_newline_or_finish() {
        let mut buf = StreamBuffer::new();
        assert!(buf.feed(RESULT.as_bytes()).is_empty());
        assert_eq!(buf.pending(), RESULT.len());
        assert!(buf.finish().unwrap().unwrap().is_terminal());

        let mut buf = StreamBuffer::new();
        let _ = buf.feed(RESULT.as_bytes());
        assert_eq!(ok(buf.feed(b"\n")).len(), 1);
        assert!(buf.finish().is_none());
    }

    #[test]
    fn long_line_in_small_chunks() {
        let text = "x".repeat(4 * 1024 * 1024);
        let line = format!(
            "{{\"type\":\"assistant\",\"session_id\":\"s1\",\"message\":{{\"content\":[{{\"type\":\"text\",\"text\":\"{text}\"}}]}}}}\n{RESULT}\n"
        );
        let mut buf = StreamBuffer::new();
        let started = std::time::Instant::now();
        let mut msgs = Vec::new();
        for chunk in line.as_bytes().chunks(8 * 1024) {
            msgs.extend(ok(buf.feed(chunk)));
        }
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].message_type(), "assistant");
        assert!(msgs[1].is_terminal());
        assert_eq!(buf.pending(), 0);
        // linear work: a few MiB should take well under this even in debug
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[test]
    fn malformed_lines_are_counted() {
        let mut buf = StreamBuffer::new();
        let input = format!("{{oops\n{INIT}\n{{\"type\":\"resu");
        let results = buf.feed(input.as_bytes());
        assert_eq!(results.len(), 2);
        assert_eq!(buf.malformed(), 1);

        assert!(buf.finish().unwrap().is_err());
        assert_eq!(buf.malformed(), 2);
    }

    #[test]
    fn finish_reports_truncated_final_line() {
        let mut buf = StreamBuffer::new();
        let _ = buf.feed(br#"{"type":"result","subtype""#);
        let last = buf.finish().unwrap();
        assert!(last.is_err());
        assert_eq!(buf.pending(), 0);
        assert!(buf.finish().is_none());
    }

    #[test]
    fn unknown_types_decode() {
        let mut buf = StreamBuffer::new();
        let msgs = ok(buf.feed(b"{\"type\":\"stream_event\",\"x\":1}\n"));
        assert_eq!(msgs, vec![AgentMessage::Unknown]);
    }

    #[test]
    fn clear_drops_tail() {
        let mut buf = StreamBuffer::new();
        let _ = buf.feed(b"{\"type\"");
        buf.clear();
        assert_eq!(buf.pending(), 0);
    }
}
