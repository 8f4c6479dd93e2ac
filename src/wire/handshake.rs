//! Connection preamble: protocol greeting and authentication block

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::primitive::{WireReader, WireWriter};
use super::request::RpcRequest;
use crate::error::{Error, Result};

/// Magic bytes opening every connection
pub const PROTOCOL_MAGIC: [u8; 4] = *b"hrpc";

/// Magic + version + auth method + serialization type
pub const HANDSHAKE_LEN: usize = 7;

/// Fixed-size greeting sent by the client before anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub version: u8,
    pub auth_method: u8,
    pub serialization: u8,
}

impl Handshake {
    pub fn from_bytes(buf: [u8; HANDSHAKE_LEN]) -> Result<Self> {
        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != PROTOCOL_MAGIC {
            return Err(Error::BadMagic(magic));
        }
        Ok(Self {
            version: buf[4],
            auth_method: buf[5],
            serialization: buf[6],
        })
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        [
            PROTOCOL_MAGIC[0],
            PROTOCOL_MAGIC[1],
            PROTOCOL_MAGIC[2],
            PROTOCOL_MAGIC[3],
            self.version,
            self.auth_method,
            self.serialization,
        ]
    }

    /// Read the greeting. A peer that disconnects before sending anything
    /// is reported as [`Error::ConnectionClosed`].
    pub async fn read<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; HANDSHAKE_LEN];
        let first = reader.read(&mut buf).await?;
        if first == 0 {
            return Err(Error::ConnectionClosed);
        }
        if first < HANDSHAKE_LEN {
            reader.read_exact(&mut buf[first..]).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Error::malformed("connection closed inside handshake")
                } else {
                    Error::Io(e)
                }
            })?;
        }
        Self::from_bytes(buf)
    }

    pub async fn write<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// One-time authentication block: a signature followed by a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPreamble {
    pub signature: Bytes,
    pub request: RpcRequest,
}

impl AuthPreamble {
    /// Decode a frame body
    pub fn decode(body: Bytes) -> Result<Self> {
        let mut r = WireReader::new(body);
        let signature = r.blob("auth signature")?;
        let request = RpcRequest::decode_from(&mut r)?;
        Ok(Self { signature, request })
    }

    /// Encode a complete frame with a recomputed length
    pub fn encode(&self) -> Result<Bytes> {
        let mut w = WireWriter::new();
        w.blob(&self.signature, "auth signature")?;
        self.request.encode_into(&mut w)?;
        w.into_frame()
    }
}
