//! Length-prefixed, type-tagged framing for the backend connection.
//!
//! Wire format: `[4-byte big-endian tag][4-byte big-endian length][payload]`
//!
//! The tag values themselves are opaque here; see [`crate::translate::TagTable`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{RelayError, RelayResult};

/// Size of the tag + length header.
pub const HEADER_LEN: usize = 8;

/// Default upper bound on a single frame's payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One backend frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(tag: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    /// Encode into header + payload bytes.
    pub fn encode(&self) -> RelayResult<Vec<u8>> {
        let len = u32::try_from(self.payload.len()).map_err(|_| RelayError::FrameTooLarge {
            size: self.payload.len(),
            max: u32::MAX as usize,
        })?;
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.tag.to_be_bytes());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Total encoded size.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

fn parse_header(header: &[u8]) -> (u32, usize) {
    let tag = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    (tag, len)
}

/// Reads whole frames from an async byte stream.
pub struct FrameReader<R> {
    inner: R,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on a clean end-of-stream at a frame boundary. A
    /// stream ending mid-frame is a transport error.
    pub async fn read_frame(&mut self) -> RelayResult<Option<Frame>> {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(RelayError::Transport(
                    "connection closed while reading frame header".into(),
                ));
            }
            filled += n;
        }

        let (tag, len) = parse_header(&header);
        if len > self.max_frame_size {
            return Err(RelayError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                RelayError::Transport("connection closed while reading frame payload".into())
            } else {
                RelayError::Io(e)
            }
        })?;

        Ok(Some(Frame { tag, payload }))
    }
}

/// Encode and write one frame, flushing afterwards.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> RelayResult<()> {
    let bytes = frame.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout() {
        let frame = Frame::new(0xFFFF_FFFF, b"hi".to_vec());
        let bytes = frame.encode().unwrap();
        assert_eq!(&bytes[..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 2]);
        assert_eq!(&bytes[8..], b"hi");
        assert_eq!(frame.wire_len(), bytes.len());
    }

    #[tokio::test]
    async fn reader_returns_none_on_clean_eof() {
        let wire = Frame::new(7, b"payload".to_vec()).encode().unwrap();
        let mut reader = FrameReader::new(&wire[..], DEFAULT_MAX_FRAME_SIZE);
        let frame = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.tag, 7);
        assert_eq!(frame.payload, b"payload");
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reader_errors_on_truncated_frame() {
        let wire = Frame::new(7, b"payload".to_vec()).encode().unwrap();
        let mut reader = FrameReader::new(&wire[..wire.len() - 2], DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(
            reader.read_frame().await.unwrap_err(),
            RelayError::Transport(_)
        ));

        let mut reader = FrameReader::new(&wire[..3], DEFAULT_MAX_FRAME_SIZE);
        assert!(matches!(
            reader.read_frame().await.unwrap_err(),
            RelayError::Transport(_)
        ));
    }

    #[tokio::test]
    async fn reader_enforces_bound() {
        let wire = Frame::new(7, vec![0u8; 64]).encode().unwrap();
        let mut reader = FrameReader::new(&wire[..], 16);
        assert!(matches!(
            reader.read_frame().await.unwrap_err(),
            RelayError::FrameTooLarge { size: 64, max: 16 }
        ));
    }

    #[tokio::test]
    async fn write_frame_round_trips_through_duplex() {
        let (mut a, b) = tokio::io::duplex(64);
        let frame = Frame::new(0xFFFF_FFFE, b"echo".to_vec());
        write_frame(&mut a, &frame).await.unwrap();
        drop(a);
        let mut reader = FrameReader::new(b, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(reader.read_frame().await.unwrap(), Some(frame));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }
}
