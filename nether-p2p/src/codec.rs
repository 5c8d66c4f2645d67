//! Fixed-size frame codec.
//!
//! A message is cut into fragments of at most [`PAYLOAD_CAPACITY`] bytes. Each
//! fragment travels in one [`FRAME_SIZE`]-byte frame:
//!
//! ```text
//! ID:<i64> PART:<i>/<n> <fragment><END><space padding>
//! ```
//!
//! Parts are numbered from 1. The header and end marker together never exceed
//! [`HEADER_CAPACITY`] bytes, so every fragment fits.

use std::collections::BTreeMap;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use tracing::debug;

use crate::error::{FrameError, P2pError};

pub const FRAME_SIZE: usize = 1024;
pub const HEADER_CAPACITY: usize = 64;
pub const PAYLOAD_CAPACITY: usize = FRAME_SIZE - HEADER_CAPACITY;
pub const END_MARKER: &[u8] = b"<END>";

/// Upper bound on fragments per message (about 60 MiB of text).
pub const MAX_PARTS: usize = 1 << 16;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: i64,
    pub part: usize,
    pub total: usize,
    pub payload: Vec<u8>,
}

/// Splits `text` into padded frames. Empty text still produces one frame.
pub fn encode_frames(id: i64, text: &str) -> Result<Vec<Vec<u8>>, FrameError> {
    let bytes = text.as_bytes();
    let total = bytes.len().div_ceil(PAYLOAD_CAPACITY).max(1);
    if total > MAX_PARTS {
        return Err(FrameError::TooLarge(total));
    }

    let mut frames = Vec::with_capacity(total);
    for part in 1..=total {
        let start = (part - 1) * PAYLOAD_CAPACITY;
        let end = (start + PAYLOAD_CAPACITY).min(bytes.len());
        let fragment = &bytes[start.min(bytes.len())..end];

        let mut frame = format!("ID:{} PART:{}/{} ", id, part, total).into_bytes();
        debug_assert!(frame.len() + END_MARKER.len() <= HEADER_CAPACITY);
        frame.extend_from_slice(fragment);
        frame.extend_from_slice(END_MARKER);
        frame.resize(FRAME_SIZE, b' ');
        frames.push(frame);
    }
    Ok(frames)
}

/// Parses a single frame.
pub fn decode_frame(raw: &[u8]) -> Result<Frame, FrameError> {
    let mut end = raw.len();
    while end > 0 && raw[end - 1] == b' ' {
        end -= 1;
    }
    let body = &raw[..end];
    let body = body
        .strip_suffix(END_MARKER)
        .ok_or(FrameError::MissingEndMarker)?;

    let malformed = |what: &str| FrameError::MalformedHeader(what.to_string());

    let rest = body.strip_prefix(b"ID:").ok_or_else(|| malformed("missing ID"))?;
    let space = rest.iter().position(|&b| b == b' ').ok_or_else(|| malformed("unterminated ID"))?;
    let id = parse_ascii::<i64>(&rest[..space]).ok_or_else(|| malformed("bad ID"))?;

    let rest = rest[space + 1..]
        .strip_prefix(b"PART:")
        .ok_or_else(|| malformed("missing PART"))?;
    let space = rest.iter().position(|&b| b == b' ').ok_or_else(|| malformed("unterminated PART"))?;
    let (part, total) = std::str::from_utf8(&rest[..space])
        .ok()
        .and_then(|s| s.split_once('/'))
        .and_then(|(p, t)| Some((p.parse::<usize>().ok()?, t.parse::<usize>().ok()?)))
        .ok_or_else(|| malformed("bad PART"))?;

    if total > MAX_PARTS {
        return Err(FrameError::TooLarge(total));
    }
    if part == 0 || part > total {
        return Err(FrameError::PartOutOfRange { part, total });
    }

    let payload = rest[space + 1..].to_vec();
    if payload.len() > PAYLOAD_CAPACITY {
        return Err(malformed("fragment exceeds payload capacity"));
    }

    Ok(Frame { id, part, total, payload })
}

fn parse_ascii<T: std::str::FromStr>(bytes: &[u8]) -> Option<T> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

struct Partial {
    id: i64,
    total: usize,
    parts: BTreeMap<usize, Vec<u8>>,
}

/// Collects the fragments of the message currently arriving.
///
/// Writers never interleave frames of different messages, so a frame with a
/// new id means the previous message was abandoned. Its fragments are dropped.
#[derive(Default)]
pub struct Reassembler {
    pending: Option<Partial>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one frame; returns the full text once its last missing part arrives.
    pub fn push(&mut self, frame: Frame) -> Result<Option<String>, FrameError> {
        let Frame { id, part, total, payload } = frame;

        let mut partial = match self.pending.take() {
            Some(partial) if partial.id == id => partial,
            stale => {
                if let Some(stale) = stale {
                    debug!(id = stale.id, received = stale.parts.len(), "dropping incomplete message");
                }
                Partial { id, total, parts: BTreeMap::new() }
            }
        };
        if partial.total != total {
            return Err(FrameError::TotalMismatch { id, expected: partial.total, found: total });
        }

        partial.parts.insert(part, payload);
        if partial.parts.len() < partial.total {
            self.pending = Some(partial);
            return Ok(None);
        }

        let bytes: Vec<u8> = partial.parts.into_values().flatten().collect();
        String::from_utf8(bytes).map(Some).map_err(|_| FrameError::InvalidUtf8)
    }

    /// Number of messages with fragments still outstanding, zero or one.
    pub fn pending(&self) -> usize {
        usize::from(self.pending.is_some())
    }
}

/// Writes every frame of `text` back to back.
///
/// Callers sharing a writer must hold its lock for the whole call so frames of
/// different messages never interleave.
pub async fn write_message<W>(writer: &mut W, text: &str) -> Result<(), P2pError>
where
    W: AsyncWrite + Unpin,
{
    let id: i64 = rand::random();
    for frame in encode_frames(id, text)? {
        writer.write_all(&frame).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Frame-level reader that yields whole messages.
pub struct MessageReader<R> {
    reader: R,
    reassembler: Reassembler,
    buffer: Box<[u8; FRAME_SIZE]>,
}

impl<R> std::fmt::Debug for MessageReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReader").finish_non_exhaustive()
    }
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            reassembler: Reassembler::new(),
            buffer: Box::new([0u8; FRAME_SIZE]),
        }
    }

    /// Reads frames until one message is complete.
    ///
    /// End of stream is reported as [`P2pError::Closed`].
    pub async fn read_message(&mut self) -> Result<String, P2pError> {
        loop {
            match self.reader.read_exact(&mut self.buffer[..]).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(P2pError::Closed),
                Err(e) => return Err(e.into()),
            }
            let frame = decode_frame(&self.buffer[..])?;
            if let Some(text) = self.reassembler.push(frame)? {
                return Ok(text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn roundtrip(text: &str) -> (usize, String) {
        let frames = encode_frames(7, text).unwrap();
        let count = frames.len();

        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let writer = tokio::spawn({
            let text = text.to_string();
            async move {
                write_message(&mut client, &text).await.unwrap();
            }
        });
        let mut reader = MessageReader::new(server);
        let received = reader.read_message().await.unwrap();
        writer.await.unwrap();
        (count, received)
    }

    #[test]
    fn test_frame_layout() {
        let frames = encode_frames(42, "PING").unwrap();
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.len(), FRAME_SIZE);
        assert!(frame.starts_with(b"ID:42 PART:1/1 PING<END>"));
        assert!(frame[24..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn test_worst_case_header_fits() {
        let header = format!("ID:{} PART:{}/{} ", i64::MIN, MAX_PARTS, MAX_PARTS);
        assert!(header.len() + END_MARKER.len() <= HEADER_CAPACITY);
    }

    #[test]
    fn test_empty_text_is_one_frame() {
        let frames = encode_frames(1, "").unwrap();
        assert_eq!(frames.len(), 1);
        let frame = decode_frame(&frames[0]).unwrap();
        assert_eq!(frame.part, 1);
        assert_eq!(frame.total, 1);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_trailing_spaces_inside_fragment_survive() {
        let frames = encode_frames(-3, "padded   ").unwrap();
        let frame = decode_frame(&frames[0]).unwrap();
        assert_eq!(frame.id, -3);
        assert_eq!(frame.payload, b"padded   ");
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        let mut no_end = b"ID:1 PART:1/1 hello".to_vec();
        no_end.resize(FRAME_SIZE, b' ');
        assert_eq!(decode_frame(&no_end), Err(FrameError::MissingEndMarker));

        let mut bad_id = b"ID:x PART:1/1 hello<END>".to_vec();
        bad_id.resize(FRAME_SIZE, b' ');
        assert!(matches!(decode_frame(&bad_id), Err(FrameError::MalformedHeader(_))));

        let mut bad_part = b"ID:1 PART:3/2 hello<END>".to_vec();
        bad_part.resize(FRAME_SIZE, b' ');
        assert_eq!(decode_frame(&bad_part), Err(FrameError::PartOutOfRange { part: 3, total: 2 }));

        let mut zero_part = b"ID:1 PART:0/2 hello<END>".to_vec();
        zero_part.resize(FRAME_SIZE, b' ');
        assert_eq!(decode_frame(&zero_part), Err(FrameError::PartOutOfRange { part: 0, total: 2 }));
    }

    #[test]
    fn test_reassembler_out_of_order_and_mismatch() {
        let text = "x".repeat(PAYLOAD_CAPACITY * 2 + 5);
        let mut frames: Vec<Frame> = encode_frames(9, &text)
            .unwrap()
            .iter()
            .map(|f| decode_frame(f).unwrap())
            .collect();
        frames.reverse();

        let mut reassembler = Reassembler::new();
        assert_eq!(reassembler.push(frames[0].clone()).unwrap(), None);
        assert_eq!(reassembler.push(frames[1].clone()).unwrap(), None);
        assert_eq!(reassembler.push(frames[2].clone()).unwrap(), Some(text));
        assert_eq!(reassembler.pending(), 0);

        let mut reassembler = Reassembler::new();
        reassembler
            .push(Frame { id: 5, part: 1, total: 2, payload: b"a".to_vec() })
            .unwrap();
        let err = reassembler
            .push(Frame { id: 5, part: 2, total: 3, payload: b"b".to_vec() })
            .unwrap_err();
        assert_eq!(err, FrameError::TotalMismatch { id: 5, expected: 2, found: 3 });
    }

    #[test]
    fn test_reassembler_keeps_one_partial_message() {
        let mut reassembler = Reassembler::new();
        for id in 0..10_000i64 {
            let frame = Frame { id, part: 1, total: MAX_PARTS, payload: b"x".to_vec() };
            assert_eq!(reassembler.push(frame).unwrap(), None);
            assert_eq!(reassembler.pending(), 1);
        }

        // A new id drops the half-received one.
        let mut reassembler = Reassembler::new();
        reassembler
            .push(Frame { id: 1, part: 1, total: 2, payload: b"old".to_vec() })
            .unwrap();
        reassembler
            .push(Frame { id: 2, part: 1, total: 2, payload: b"new ".to_vec() })
            .unwrap();
        assert_eq!(
            reassembler.push(Frame { id: 1, part: 2, total: 2, payload: b"tail".to_vec() }).unwrap(),
            None
        );
        assert_eq!(reassembler.pending(), 1);
        reassembler
            .push(Frame { id: 2, part: 1, total: 2, payload: b"new ".to_vec() })
            .unwrap();
        assert_eq!(
            reassembler.push(Frame { id: 2, part: 2, total: 2, payload: b"message".to_vec() }).unwrap(),
            Some("new message".to_string())
        );
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_split_multibyte_char_reassembles() {
        // 959 ASCII bytes then a 2-byte char straddling the fragment boundary.
        let text = format!("{}é tail", "a".repeat(PAYLOAD_CAPACITY - 1));
        let frames = encode_frames(11, &text).unwrap();
        assert_eq!(frames.len(), 2);

        let mut reassembler = Reassembler::new();
        let mut out = None;
        for raw in &frames {
            out = reassembler.push(decode_frame(raw).unwrap()).unwrap();
        }
        assert_eq!(out.as_deref(), Some(text.as_str()));
    }

    #[tokio::test]
    async fn test_roundtrip_at_capacity_boundaries() {
        let exact = "a".repeat(PAYLOAD_CAPACITY);
        let (frames, received) = roundtrip(&exact).await;
        assert_eq!(frames, 1);
        assert_eq!(received, exact);

        let over = "b".repeat(PAYLOAD_CAPACITY + 1);
        let (frames, received) = roundtrip(&over).await;
        assert_eq!(frames, 2);
        assert_eq!(received, over);

        let (frames, received) = roundtrip("").await;
        assert_eq!(frames, 1);
        assert_eq!(received, "");
    }

    #[tokio::test]
    async fn test_reader_reports_eof_as_closed() {
        let (client, server) = tokio::io::duplex(FRAME_SIZE);
        drop(client);
        let mut reader = MessageReader::new(server);
        assert!(matches!(reader.read_message().await, Err(P2pError::Closed)));
    }

    #[tokio::test]
    async fn test_consecutive_messages_on_one_stream() {
        let (mut client, server) = tokio::io::duplex(16 * FRAME_SIZE);
        write_message(&mut client, "PING").await.unwrap();
        write_message(&mut client, "ELECTION 4 payload").await.unwrap();

        let mut reader = MessageReader::new(server);
        assert_eq!(reader.read_message().await.unwrap(), "PING");
        assert_eq!(reader.read_message().await.unwrap(), "ELECTION 4 payload");
    }
}
