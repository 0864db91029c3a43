//! Engine traces: length-prefix (4 bytes LE) + bincode [`RawInvocation`] per frame.
//! Used to record a callback stream and replay it through a trampoline later.

use crate::trampoline::RawInvocation;

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Encode one invocation into a frame.
pub fn encode_frame(raw: &RawInvocation<'_>) -> Result<Vec<u8>, FrameEncodeError> {
    let payload = bincode::serialize(raw).map_err(FrameEncodeError::Encode)?;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(FrameEncodeError::TooLarge);
    }
    let len = payload.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame too large")]
    TooLarge,
}

/// Decode one frame from the front of `bytes`. Byte fields borrow from `bytes`.
/// Returns the invocation and the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(RawInvocation<'_>, usize), FrameDecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(FrameDecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    if bytes.len() < LEN_SIZE + len {
        return Err(FrameDecodeError::NeedMore);
    }
    let raw: RawInvocation<'_> =
        bincode::deserialize(&bytes[LEN_SIZE..LEN_SIZE + len]).map_err(FrameDecodeError::Decode)?;
    Ok((raw, LEN_SIZE + len))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

/// Iterates the frames of a complete trace buffer.
pub struct TraceReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> TraceReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for TraceReader<'a> {
    type Item = Result<RawInvocation<'a>, FrameDecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest: &'a [u8] = &self.buf[self.offset..];
        if rest.is_empty() {
            return None;
        }
        match decode_frame(rest) {
            Ok((raw, n)) => {
                self.offset += n;
                Some(Ok(raw))
            }
            Err(e) => {
                // A truncated or corrupt frame ends the trace.
                self.offset = self.buf.len();
                Some(Err(e))
            }
        }
    }
}

/// Append-only trace builder.
#[derive(Default)]
pub struct TraceWriter {
    buf: Vec<u8>,
    frames: usize,
}

impl TraceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, raw: &RawInvocation<'_>) -> Result<(), FrameEncodeError> {
        let frame = encode_frame(raw)?;
        self.buf.extend_from_slice(&frame);
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk() -> RawInvocation<'static> {
        RawInvocation::FileRecvChunk {
            friend: 7,
            file: 1,
            position: 4096,
            data: b"0123456789",
        }
    }

    #[test]
    fn frame_borrows_payload() {
        let raw = sample_chunk();
        let frame = encode_frame(&raw).unwrap();
        let (decoded, n) = decode_frame(&frame).unwrap();
        assert_eq!(n, frame.len());
        assert_eq!(decoded, raw);
    }

    #[test]
    fn decode_need_more() {
        let frame = encode_frame(&sample_chunk()).unwrap();
        assert!(matches!(
            decode_frame(&frame[..2]),
            Err(FrameDecodeError::NeedMore)
        ));
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(FrameDecodeError::NeedMore)
        ));
    }

    #[test]
    fn decode_too_large() {
        let mut bytes = (MAX_FRAME_LEN + 1).to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            decode_frame(&bytes),
            Err(FrameDecodeError::TooLarge)
        ));
    }

    #[test]
    fn reader_yields_frames_in_order() {
        let mut w = TraceWriter::new();
        w.record(&RawInvocation::FriendConnectionStatus {
            friend: 0,
            connection: 2,
        })
        .unwrap();
        w.record(&sample_chunk()).unwrap();
        w.record(&RawInvocation::FriendTyping {
            friend: 0,
            typing: false,
        })
        .unwrap();
        assert_eq!(w.frames(), 3);
        let bytes = w.into_bytes();

        let frames: Vec<_> = TraceReader::new(&bytes).map(|r| r.unwrap()).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1], sample_chunk());
        assert!(matches!(
            frames[2],
            RawInvocation::FriendTyping { typing: false, .. }
        ));
    }

    #[test]
    fn reader_stops_after_truncated_frame() {
        let mut w = TraceWriter::new();
        w.record(&sample_chunk()).unwrap();
        let mut bytes = w.into_bytes();
        bytes.extend_from_slice(&[200, 0, 0, 0, 1]);

        let mut reader = TraceReader::new(&bytes);
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(
            reader.next(),
            Some(Err(FrameDecodeError::NeedMore))
        ));
        assert!(reader.next().is_none());
        assert_eq!(reader.offset(), bytes.len());
    }
}
