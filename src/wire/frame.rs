//! Length-delimited frame I/O
//!
//! Every steady-state packet is preceded by a 4-byte big-endian length
//! covering everything after the length field. Frames are read whole
//! before any field is interpreted.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::MAX_FRAME_LEN;
use crate::error::{Error, Result};

/// One complete frame, length prefix included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Bytes,
}

impl RawFrame {
    /// Wrap an already-framed buffer
    pub fn from_frame(bytes: Bytes) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::malformed("frame shorter than its length prefix"));
        }
        let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if declared != bytes.len() - 4 {
            return Err(Error::malformed(format!(
                "frame declares {} body bytes but carries {}",
                declared,
                bytes.len() - 4
            )));
        }
        Ok(Self { bytes })
    }

    /// Frame a body, computing its length prefix
    pub fn from_body(body: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(4 + body.len());
        buf.put_u32(body.len() as u32);
        buf.put_slice(body);
        Self {
            bytes: buf.freeze(),
        }
    }

    /// Everything after the length prefix
    pub fn body(&self) -> Bytes {
        self.bytes.slice(4..)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Read exactly one frame.
///
/// EOF before the first length byte is a clean close
/// ([`Error::ConnectionClosed`]); EOF anywhere later is a truncated packet.
pub async fn read_frame<R>(reader: &mut R) -> Result<RawFrame>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(Error::ConnectionClosed);
            }
            return Err(Error::malformed("connection closed inside length prefix"));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge { len });
    }

    let mut buf = BytesMut::with_capacity(4 + len as usize);
    buf.put_slice(&len_buf);
    buf.resize(4 + len as usize, 0);
    reader.read_exact(&mut buf[4..]).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::malformed(format!("connection closed inside {} byte frame", len))
        } else {
            Error::Io(e)
        }
    })?;

    Ok(RawFrame {
        bytes: buf.freeze(),
    })
}

/// Write already-framed bytes and flush.
pub async fn write_raw<W>(writer: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
