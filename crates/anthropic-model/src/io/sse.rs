use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A single server-sent event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// A type for reading server-sent events from a chunk stream.
///
/// Bytes are buffered undecoded until a whole event is available, since
/// chunk boundaries may split multi-byte characters.
pub struct Sse {
    buf: Vec<u8>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, Error> {
        loop {
            // Events already buffered are delivered before reading more.
            if let Some(event) = self.try_parse_event()? {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                // A trailing event without the blank line is incomplete and
                // gets dropped.
                return Ok(None);
            };
            for &byte in bytes.iter() {
                if byte != b'\r' {
                    self.buf.push(byte);
                }
            }
        }
    }

    fn try_parse_event(&mut self) -> Result<Option<SseEvent>, Error> {
        loop {
            let Some(eol_idx) = find_blank_line(&self.buf) else {
                return Ok(None);
            };
            let raw: Vec<u8> = self.buf.drain(0..eol_idx + 2).collect();
            let Ok(block) = std::str::from_utf8(&raw[..eol_idx]) else {
                return Err(Error::InvalidPayload);
            };

            // event   = *( comment / field ) end-of-line
            // comment = colon *any-char end-of-line
            // field   = 1*name-char [ colon [ space ] *any-char ] end-of-line
            let mut event = SseEvent::default();
            let mut has_data = false;
            let mut saw_unknown = false;
            for line in block.split('\n') {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let (name, value) = match line.split_once(':') {
                    Some((name, value)) => {
                        (name, value.strip_prefix(' ').unwrap_or(value))
                    }
                    None => (line, ""),
                };
                match name {
                    "event" => event.event = Some(value.to_owned()),
                    "data" => {
                        if has_data {
                            event.data.push('\n');
                        }
                        event.data.push_str(value);
                        has_data = true;
                    }
                    "id" | "retry" => {}
                    _ => {
                        trace!("ignoring sse field: {name}");
                        saw_unknown = true;
                    }
                }
            }

            if has_data {
                return Ok(Some(event));
            }
            if saw_unknown && event.event.is_none() {
                // Nothing but unknown fields, the stream is not what we
                // expect.
                return Err(Error::InvalidPayload);
            }
        }
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn sse_from(chunks: Vec<&'static [u8]>) -> Sse {
        Sse::new(Chunks::from_vec_deque(
            chunks.into_iter().map(Bytes::from_static).collect(),
        ))
    }

    #[tokio::test]
    async fn test_named_events() {
        let mut sse = sse_from(vec![
            b"event: ping\ndata: {\"type\": \"ping\"}\n\n" as &[u8],
            b"event: message_stop\ndata: {}\n\n",
        ]);
        let first = sse.next_event().await.unwrap().unwrap();
        assert_eq!(first.event.as_deref(), Some("ping"));
        assert_eq!(first.data, "{\"type\": \"ping\"}");
        let second = sse.next_event().await.unwrap().unwrap();
        assert_eq!(second.event.as_deref(), Some("message_stop"));
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_quirk_streaming() {
        let mut sse = sse_from(vec![
            b"data:" as &[u8],
            b" hello\r\n",
            b"\r\n",
            b": keep-alive\n\n",
        ]);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "hello");
        assert_eq!(sse.next_event().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_split_multibyte_character() {
        // "ž" is 0xC5 0xBE in UTF-8.
        let mut sse = sse_from(vec![b"data: \xC5" as &[u8], b"\xBEmogus\n\n"]);
        assert_eq!(sse.next_event().await.unwrap().unwrap().data, "žmogus");
    }

    #[tokio::test]
    async fn test_invalid_data() {
        let mut sse = sse_from(vec![b"xxxxxx\n\n" as &[u8]]);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);

        let mut sse = sse_from(vec![b"data: hello\n" as &[u8]]);
        assert_eq!(sse.next_event().await.unwrap(), None);

        let mut sse = sse_from(vec![b"data: \xFF\n\n" as &[u8]]);
        assert_eq!(sse.next_event().await.unwrap_err(), Error::InvalidPayload);
    }
}
