//! Frame ingest wire codec
//!
//! A plugin pushes an unbounded sequence of records over one connection:
//!
//! ```text
//! +----------------+-------------------+-----------------+-----------+
//! | header len u32 | JSON FrameHeader  | payload len u32 | payload   |
//! | big endian     | (header len bytes)| big endian      |           |
//! +----------------+-------------------+-----------------+-----------+
//! ```
//!
//! End of stream between two records is a clean close; anywhere else it is
//! [`CodecError::Truncated`].

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CodecError, Error, Result};

use super::frame::{FrameHeader, VideoFrame};

/// Size limits applied while decoding
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_header_size: usize,
    max_payload_size: usize,
}

impl FrameCodec {
    pub fn new(max_header_size: usize, max_payload_size: usize) -> Self {
        Self {
            max_header_size,
            max_payload_size,
        }
    }

    /// Read the next record
    ///
    /// Returns `Ok(None)` when the peer closed the stream between records.
    pub async fn read_record<R>(&self, reader: &mut R) -> Result<Option<(FrameHeader, Bytes)>>
    where
        R: AsyncRead + Unpin,
    {
        let header_len = match read_len(reader, true).await? {
            Some(len) => len,
            None => return Ok(None),
        };
        if header_len > self.max_header_size {
            return Err(CodecError::HeaderTooLarge(header_len).into());
        }

        let header_bytes = read_exact(reader, header_len).await?;
        let header: FrameHeader =
            serde_json::from_slice(&header_bytes).map_err(CodecError::from)?;

        let payload_len = match read_len(reader, false).await? {
            Some(len) => len,
            None => return Err(CodecError::Truncated.into()),
        };
        if payload_len > self.max_payload_size {
            return Err(CodecError::PayloadTooLarge(payload_len).into());
        }

        let payload = read_exact(reader, payload_len).await?;
        Ok(Some((header, payload)))
    }

    /// Read the next record as a video frame
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<VideoFrame>>
    where
        R: AsyncRead + Unpin,
    {
        Ok(self
            .read_record(reader)
            .await?
            .map(|(header, payload)| VideoFrame::from_parts(header, payload)))
    }
}

/// Encode one frame record
pub fn encode_frame(frame: &VideoFrame) -> std::result::Result<Bytes, CodecError> {
    encode_record(&frame.header(), &frame.data)
}

/// Encode a header and payload as one record
pub fn encode_record(header: &FrameHeader, payload: &[u8]) -> std::result::Result<Bytes, CodecError> {
    let header = serde_json::to_vec(header)?;
    let header_len =
        u32::try_from(header.len()).map_err(|_| CodecError::HeaderTooLarge(header.len()))?;
    let payload_len =
        u32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;

    let mut buf = BytesMut::with_capacity(8 + header.len() + payload.len());
    buf.put_u32(header_len);
    buf.put_slice(&header);
    buf.put_u32(payload_len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Read a u32 length prefix; `None` on clean EOF when `eof_ok`
async fn read_len<R>(reader: &mut R, eof_ok: bool) -> Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4];
    let mut filled = 0;

    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 && eof_ok {
                return Ok(None);
            }
            return Err(CodecError::Truncated.into());
        }
        filled += n;
    }

    Ok(Some(u32::from_be_bytes(buf) as usize))
}

async fn read_exact<R>(reader: &mut R, len: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::zeroed(len);
    match reader.read_exact(&mut buf).await {
        Ok(_) => Ok(buf.freeze()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(Error::Codec(CodecError::Truncated))
        }
        Err(e) => Err(e.into()),
    }
}
