//! Incremental server-sent-events decoder.
//!
//! Shared by the HTTP-based MCP transports and the model client. Bytes are
//! pushed in as they arrive; complete events (terminated by a blank line)
//! are popped out. Both `\n` and `\r\n` line endings are accepted. A UTF-8
//! character split across two pushes is held back until it is complete.

use futures::stream::{self, Stream, StreamExt};

/// One decoded SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if present. Consumers treat `None` as `message`.
    pub event: Option<String>,
    /// All `data:` lines joined by `\n`.
    pub data: String,
}

impl SseEvent {
    /// Event type with the SSE default applied.
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Buffering decoder for a text/event-stream body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 character.
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the wire.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        let consumed = match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                self.buffer.push_str(text);
                self.pending.len()
            }
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                self.buffer
                    .push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                valid
            }
            Err(_) => {
                self.buffer.push_str(&String::from_utf8_lossy(&self.pending));
                self.pending.len()
            }
        };
        self.pending.drain(..consumed);
        // A CRLF pair may straddle two pushes, so normalize the whole buffer.
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
    }

    /// Pop the next complete event, skipping comment-only blocks.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        loop {
            let end = self.buffer.find("\n\n")?;
            let block = self.buffer[..end].to_string();
            self.buffer.drain(..end + 2);

            if let Some(event) = parse_block(&block) {
                return Some(event);
            }
        }
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            return None;
        }
        parse_block(rest.trim_end_matches('\n'))
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

/// Adapt an HTTP byte stream into a stream of decoded events.
///
/// A read error ends the stream after being yielded once.
pub fn event_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<SseEvent, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    stream::unfold(
        (Box::pin(bytes), SseDecoder::new(), false),
        |(mut bytes, mut decoder, mut ended)| async move {
            loop {
                if let Some(event) = decoder.next_event() {
                    return Some((Ok(event), (bytes, decoder, ended)));
                }
                if ended {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => decoder.push(chunk.as_ref()),
                    Some(Err(e)) => return Some((Err(e), (bytes, decoder, true))),
                    None => {
                        ended = true;
                        if let Some(event) = decoder.finish() {
                            return Some((Ok(event), (bytes, decoder, ended)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_events_across_chunks() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"event: endpoint\ndata: /mess");
        assert!(decoder.next_event().is_none());
        decoder.push(b"ages?session=1\n\ndata: {\"a\":1}\n\n");

        let first = decoder.next_event().unwrap();
        assert_eq!(first.event_type(), "endpoint");
        assert_eq!(first.data, "/messages?session=1");

        let second = decoder.next_event().unwrap();
        assert_eq!(second.event_type(), "message");
        assert_eq!(second.data, "{\"a\":1}");
        assert!(decoder.next_event().is_none());
    }

    #[test]
    fn test_crlf_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: line one\r\ndata: line two\r\n\r\n");
        let event = decoder.next_event().unwrap();
        assert_eq!(event.data, "line one\nline two");
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let body = "data: {\"content\":\"café\"}\n\n".as_bytes();
        let split = body.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        decoder.push(&body[..split]);
        assert!(decoder.next_event().is_none());
        decoder.push(&body[split..]);
        assert_eq!(decoder.next_event().unwrap().data, "{\"content\":\"café\"}");
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: a\xFFb\n\n");
        assert_eq!(decoder.next_event().unwrap().data, "a\u{FFFD}b");
    }

    #[test]
    fn test_comments_are_skipped() {
        let mut decoder = SseDecoder::new();
        decoder.push(b": keep-alive\n\ndata: x\n\n");
        assert_eq!(decoder.next_event().unwrap().data, "x");
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: [DONE]\n");
        assert!(decoder.next_event().is_none());
        assert_eq!(decoder.finish().unwrap().data, "[DONE]");
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_event_stream_adapter() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: 1\n".to_vec()),
            Ok(b"\ndata: 2\n\n".to_vec()),
        ];
        let events: Vec<_> = event_stream(stream::iter(chunks))
            .map(|e| e.unwrap().data)
            .collect()
            .await;
        assert_eq!(events, vec!["1", "2"]);
    }
}
