//! Server-Sent Events reader (spec §2 "External clients").
//!
//! Line-oriented per the SSE spec: fields `event:`, `data:`, `id:`, `retry:`
//! accumulate until a blank line terminates the record. Only complete,
//! blank-line-terminated records are emitted; a partial record at EOF is
//! dropped rather than returned half-built.

use crate::common::error::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One decoded SSE record. `data` may span multiple `data:` lines joined by `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_empty() && self.id.is_none() && self.retry.is_none()
    }
}

/// Reads complete SSE records from a buffered async stream.
pub struct SseReader<R> {
    inner: R,
    pending: SseEvent,
}

impl<R: AsyncBufRead + Unpin> SseReader<R> {
    pub fn new(inner: R) -> Self {
        SseReader {
            inner,
            pending: SseEvent::default(),
        }
    }

    /// Returns the next complete event, or `Ok(None)` on clean EOF between
    /// records (a partial trailing record with no terminating blank line is
    /// discarded, matching "emits only complete blank-line-terminated
    /// records").
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.inner.read_line(&mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);

            if trimmed.is_empty() {
                if self.pending.is_empty() {
                    continue;
                }
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
            if trimmed.starts_with(':') {
                continue; // comment line
            }

            let (field, value) = match trimmed.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (trimmed, ""),
            };

            match field {
                "event" => self.pending.event = Some(value.to_string()),
                "data" => {
                    if !self.pending.data.is_empty() {
                        self.pending.data.push('\n');
                    }
                    self.pending.data.push_str(value);
                }
                "id" => self.pending.id = Some(value.to_string()),
                "retry" => self.pending.retry = value.parse().ok(),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_single_event() {
        let input = "event: message\ndata: hello\nid: 1\n\n";
        let mut reader = SseReader::new(BufReader::new(Cursor::new(input)));
        let event = reader.next_event().await.unwrap().unwrap();
        assert_eq!(event.event.as_deref(), Some("message"));
        assert_eq!(event.data, "hello");
        assert_eq!(event.id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_multiline_data_joined_with_newline() {
        let input = "data: line one\ndata: line two\n\n";
        let mut reader = SseReader::new(BufReader::new(Cursor::new(input)));
        let event = reader.next_event().await.unwrap().unwrap();
        assert_eq!(event.data, "line one\nline two");
    }

    #[tokio::test]
    async fn test_partial_trailing_record_is_dropped() {
        let input = "event: message\ndata: complete\n\ndata: partial-no-terminator";
        let mut reader = SseReader::new(BufReader::new(Cursor::new(input)));
        let first = reader.next_event().await.unwrap().unwrap();
        assert_eq!(first.data, "complete");
        let second = reader.next_event().await.unwrap();
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn test_comment_lines_ignored() {
        let input = ": keepalive\ndata: hi\n\n";
        let mut reader = SseReader::new(BufReader::new(Cursor::new(input)));
        let event = reader.next_event().await.unwrap().unwrap();
        assert_eq!(event.data, "hi");
    }
}
