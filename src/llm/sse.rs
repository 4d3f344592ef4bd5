//! Line-oriented decoder for the upstream `text/event-stream` body.
//!
//! Bytes go in with [`SseDecoder::push`]; complete lines come out one at a
//! time so the caller can relay each frame before looking at the next.

use memchr::{memchr, memrchr};
use serde_json::Value;

use super::{LlmError, StreamChunk};

pub const DONE_SENTINEL: &str = "[DONE]";

/// Longest unterminated line the decoder will hold.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub enum SseFrame {
    Chunk(StreamChunk),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<(), LlmError> {
        self.buffer.extend_from_slice(bytes);
        let tail_start = memrchr(b'\n', &self.buffer).map_or(0, |pos| pos + 1);
        let tail = self.buffer.len() - tail_start;
        if tail > MAX_LINE_BYTES {
            return Err(LlmError::StreamAbort(format!(
                "line exceeds {MAX_LINE_BYTES} bytes without a terminator"
            )));
        }
        Ok(())
    }

    /// Next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = memchr(b'\n', &self.buffer)?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left after the body ended without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
        Some(line)
    }
}

/// Interpret one line. Non-data lines (comments, `event:`, blank separators)
/// yield `Ok(None)`. A data line that is neither the sentinel nor a valid
/// chunk is a hard error.
pub fn parse_line(line: &str) -> Result<Option<SseFrame>, LlmError> {
    let Some(payload) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(None);
    };
    if payload.is_empty() {
        return Ok(None);
    }
    if payload == DONE_SENTINEL {
        return Ok(Some(SseFrame::Done));
    }

    let value: Value = serde_json::from_str(payload)
        .map_err(|e| LlmError::StreamAbort(format!("malformed frame: {e}")))?;

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown upstream error");
        return Err(LlmError::StreamAbort(format!("upstream error frame: {message}")));
    }

    let chunk: StreamChunk = serde_json::from_value(value)
        .map_err(|e| LlmError::StreamAbort(format!("unexpected frame shape: {e}")))?;
    Ok(Some(SseFrame::Chunk(chunk)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_pushes() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: {\"choices\":[{\"delta\":{\"con").unwrap();
        assert!(decoder.next_line().is_none());
        decoder.push(b"tent\":\"Hi\"}}]}\r\n\ndata: [DONE]\n").unwrap();

        let first = decoder.next_line().unwrap();
        assert_eq!(first, r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#);
        assert_eq!(decoder.next_line().unwrap(), "");
        assert_eq!(decoder.next_line().unwrap(), "data: [DONE]");
        assert!(decoder.next_line().is_none());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn finish_returns_unterminated_tail() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: [DONE]").unwrap();
        assert!(decoder.next_line().is_none());
        assert_eq!(decoder.finish().unwrap(), "data: [DONE]");
    }

    #[test]
    fn unterminated_line_is_capped() {
        let mut decoder = SseDecoder::new();
        let half = vec![b'x'; MAX_LINE_BYTES / 2 + 1];
        decoder.push(b"data: [DONE]\n").unwrap();
        decoder.push(&half).unwrap();
        let err = decoder.push(&half).unwrap_err();
        assert!(matches!(err, LlmError::StreamAbort(m) if m.contains("without a terminator")));
    }

    #[test]
    fn long_input_with_line_breaks_is_accepted() {
        let mut decoder = SseDecoder::new();
        let mut chunk = vec![b'x'; MAX_LINE_BYTES - 1];
        chunk.push(b'\n');
        decoder.push(&chunk).unwrap();
        decoder.push(&chunk).unwrap();
        assert_eq!(decoder.next_line().map(|l| l.len()), Some(MAX_LINE_BYTES - 1));
    }

    #[test]
    fn parse_accepts_both_prefix_spellings() {
        for line in [
            r#"data: {"id":"a","choices":[{"delta":{"content":"x"}}]}"#,
            r#"data:{"id":"a","choices":[{"delta":{"content":"x"}}]}"#,
        ] {
            match parse_line(line).unwrap() {
                Some(SseFrame::Chunk(chunk)) => assert_eq!(chunk.content(), "x"),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(matches!(parse_line("data:[DONE]").unwrap(), Some(SseFrame::Done)));
    }

    #[test]
    fn parse_ignores_non_data_lines() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line(": OPENROUTER PROCESSING").unwrap().is_none());
        assert!(parse_line("event: message").unwrap().is_none());
    }

    #[test]
    fn parse_rejects_garbage_and_error_frames() {
        assert!(matches!(parse_line("data: {not json"), Err(LlmError::StreamAbort(_))));
        assert!(matches!(
            parse_line(r#"data: {"error":{"message":"overloaded"}}"#),
            Err(LlmError::StreamAbort(m)) if m.contains("overloaded")
        ));
    }

    #[test]
    fn final_frame_carries_usage() {
        let line = r#"data: {"id":"g","model":"m","choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":5,"total_tokens":8}}"#;
        let Some(SseFrame::Chunk(chunk)) = parse_line(line).unwrap() else {
            panic!("expected chunk");
        };
        assert_eq!(chunk.finish_reason(), Some("stop"));
        assert_eq!(chunk.usage.unwrap().total_tokens, 8);
    }
}
