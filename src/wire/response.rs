//! Response packets
//!
//! ```text
//! [len:4][sequence:4][status:4][declared_type:str2][value_type:str2][value]
//! ```
//!
//! On error replies the two type slots carry the error class and message
//! and the value is empty. Calls the cache understands get a typed
//! decomposition of the value; everything else stays [`RpcResponse::Generic`].

use bytes::{Bytes, BytesMut};

use super::frame::RawFrame;
use super::primitive::{WireReader, WireWriter};
use super::{METHOD_GET_FILE_INFO, METHOD_GET_LISTING};
use crate::error::Result;

/// Reply status codes
pub const STATUS_SUCCESS: u32 = 0;
pub const STATUS_ERROR: u32 = 1;
pub const STATUS_FATAL: u32 = 2;

/// Sequence field within a framed response
const SEQUENCE_START: usize = 4;
const SEQUENCE_END: usize = 8;

/// Fields shared by every response shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub sequence: u32,
    pub status: u32,
    pub declared_type: String,
    pub value_type: String,
}

impl ResponseHeader {
    pub fn success(sequence: u32, type_name: &str) -> Self {
        Self {
            sequence,
            status: STATUS_SUCCESS,
            declared_type: type_name.to_string(),
            value_type: type_name.to_string(),
        }
    }

    fn decode(r: &mut WireReader) -> Result<Self> {
        Ok(Self {
            sequence: r.u32("response sequence number")?,
            status: r.u32("response status")?,
            declared_type: r.string("declared type")?,
            value_type: r.string("value type")?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u32(self.sequence);
        w.u32(self.status);
        w.string(&self.declared_type, "declared type")?;
        w.string(&self.value_type, "value type")
    }
}

/// File status record returned by `getFileInfo` and inside listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    pub path: Bytes,
    pub length: i64,
    pub is_dir: bool,
    pub replication: u16,
    pub block_size: i64,
    pub modification_time: i64,
    pub access_time: i64,
    pub permission: u16,
    pub owner: String,
    pub group: String,
}

impl FileStatus {
    fn decode(r: &mut WireReader) -> Result<Self> {
        Ok(Self {
            path: r.blob("status path")?,
            length: r.i64("status length")?,
            is_dir: r.bool("status is_dir")?,
            replication: r.u16("status replication")?,
            block_size: r.i64("status block size")?,
            modification_time: r.i64("status mtime")?,
            access_time: r.i64("status atime")?,
            permission: r.u16("status permission")?,
            owner: r.string("status owner")?,
            group: r.string("status group")?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.blob(&self.path, "status path")?;
        w.i64(self.length);
        w.bool(self.is_dir);
        w.u16(self.replication);
        w.i64(self.block_size);
        w.i64(self.modification_time);
        w.i64(self.access_time);
        w.u16(self.permission);
        w.string(&self.owner, "status owner")?;
        w.string(&self.group, "status group")
    }
}

/// One page of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
    pub entries: Vec<FileStatus>,
    pub remaining_entries: u32,
}

impl DirectoryListing {
    fn decode(r: &mut WireReader) -> Result<Self> {
        let count = r.u32("listing count")?;
        let mut entries = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            entries.push(FileStatus::decode(r)?);
        }
        Ok(Self {
            entries,
            remaining_entries: r.u32("listing remaining")?,
        })
    }

    fn encode(&self, w: &mut WireWriter) -> Result<()> {
        w.u32(self.entries.len() as u32);
        for entry in &self.entries {
            entry.encode(w)?;
        }
        w.u32(self.remaining_entries);
        Ok(())
    }
}

/// A decoded response. Closed set of shapes, chosen by the request's method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcResponse {
    Generic {
        header: ResponseHeader,
        value: Bytes,
    },
    FileStatus {
        header: ResponseHeader,
        status: Option<FileStatus>,
    },
    Listing {
        header: ResponseHeader,
        listing: Option<DirectoryListing>,
    },
}

impl RpcResponse {
    /// Decode without interpreting the value
    pub fn decode_generic(body: Bytes) -> Result<Self> {
        let (header, value) = decode_parts(body)?;
        Ok(RpcResponse::Generic { header, value })
    }

    /// Decode a reply to `method`. Typed shapes fall back to
    /// [`RpcResponse::Generic`] when the value does not parse cleanly.
    pub fn decode_for(method: &str, body: Bytes) -> Result<Self> {
        let (header, value) = decode_parts(body)?;
        if header.status != STATUS_SUCCESS {
            return Ok(RpcResponse::Generic { header, value });
        }

        let typed = match method {
            METHOD_GET_FILE_INFO => decode_optional(&value, FileStatus::decode)
                .map(|status| RpcResponse::FileStatus {
                    header: header.clone(),
                    status,
                }),
            METHOD_GET_LISTING => decode_optional(&value, DirectoryListing::decode)
                .map(|listing| RpcResponse::Listing {
                    header: header.clone(),
                    listing,
                }),
            _ => None,
        };

        Ok(typed.unwrap_or(RpcResponse::Generic { header, value }))
    }

    pub fn header(&self) -> &ResponseHeader {
        match self {
            RpcResponse::Generic { header, .. }
            | RpcResponse::FileStatus { header, .. }
            | RpcResponse::Listing { header, .. } => header,
        }
    }

    fn header_mut(&mut self) -> &mut ResponseHeader {
        match self {
            RpcResponse::Generic { header, .. }
            | RpcResponse::FileStatus { header, .. }
            | RpcResponse::Listing { header, .. } => header,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.header().sequence
    }

    pub fn is_success(&self) -> bool {
        self.header().status == STATUS_SUCCESS
    }

    /// Same response addressed to another call
    pub fn with_sequence(&self, sequence: u32) -> Self {
        let mut copy = self.clone();
        copy.header_mut().sequence = sequence;
        copy
    }

    /// Encoded value bytes (after the two type names)
    pub fn value_bytes(&self) -> Result<Bytes> {
        match self {
            RpcResponse::Generic { value, .. } => Ok(value.clone()),
            RpcResponse::FileStatus { status, .. } => {
                let mut w = WireWriter::new();
                encode_optional(&mut w, status.as_ref(), FileStatus::encode)?;
                Ok(w.into_bytes())
            }
            RpcResponse::Listing { listing, .. } => {
                let mut w = WireWriter::new();
                encode_optional(&mut w, listing.as_ref(), DirectoryListing::encode)?;
                Ok(w.into_bytes())
            }
        }
    }

    /// Encode a complete frame
    pub fn encode(&self) -> Result<Bytes> {
        let mut w = WireWriter::new();
        self.header().encode(&mut w)?;
        w.raw(&self.value_bytes()?);
        w.into_frame()
    }
}

fn decode_parts(body: Bytes) -> Result<(ResponseHeader, Bytes)> {
    let mut r = WireReader::new(body);
    let header = ResponseHeader::decode(&mut r)?;
    Ok((header, r.rest()))
}

fn decode_optional<T>(value: &Bytes, decode: fn(&mut WireReader) -> Result<T>) -> Option<Option<T>> {
    let mut r = WireReader::new(value.clone());
    let present = r.bool("null marker").ok()?;
    let decoded = if present {
        Some(decode(&mut r).ok()?)
    } else {
        None
    };
    // Leftover bytes mean we misjudged the shape; keep the raw value instead.
    r.is_empty().then_some(decoded)
}

fn encode_optional<T>(
    w: &mut WireWriter,
    value: Option<&T>,
    encode: fn(&T, &mut WireWriter) -> Result<()>,
) -> Result<()> {
    match value {
        Some(v) => {
            w.bool(true);
            encode(v, w)
        }
        None => {
            w.bool(false);
            Ok(())
        }
    }
}

/// A response together with the exact bytes it was decoded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub response: RpcResponse,
    pub raw: RawFrame,
}

impl ResponseFrame {
    /// Decode a frame read from the upstream leg
    pub fn decode(method: Option<&str>, raw: RawFrame) -> Result<Self> {
        let body = raw.body();
        let response = match method {
            Some(m) => RpcResponse::decode_for(m, body)?,
            None => RpcResponse::decode_generic(body)?,
        };
        Ok(Self { response, raw })
    }

    /// Build from a response, encoding fresh bytes
    pub fn from_response(response: RpcResponse) -> Result<Self> {
        let raw = RawFrame::from_frame(response.encode()?)?;
        Ok(Self { response, raw })
    }

    pub fn sequence(&self) -> u32 {
        self.response.sequence()
    }

    /// Bytes to send for a call numbered `sequence`. Only the sequence
    /// field of the stored bytes changes; the value is never re-encoded.
    pub fn bytes_for(&self, sequence: u32) -> Result<Bytes> {
        let raw = self.raw.as_bytes();
        if self.response.sequence() == sequence {
            return Ok(raw.clone());
        }
        if raw.len() < SEQUENCE_END {
            return self.response.with_sequence(sequence).encode();
        }
        let mut buf = BytesMut::from(&raw[..]);
        buf[SEQUENCE_START..SEQUENCE_END].copy_from_slice(&sequence.to_be_bytes());
        Ok(buf.freeze())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HDFS_FILE_STATUS: &str = "org.apache.hadoop.hdfs.protocol.HdfsFileStatus";

    fn sample_status(path: &str) -> FileStatus {
        FileStatus {
            path: Bytes::copy_from_slice(path.as_bytes()),
            length: 1024,
            is_dir: false,
            replication: 3,
            block_size: 64 * 1024 * 1024,
            modification_time: 1_700_000_000_000,
            access_time: 1_700_000_000_500,
            permission: 0o644,
            owner: "hdfs".to_string(),
            group: "supergroup".to_string(),
        }
    }

    #[test]
    fn test_file_status_typed_decode() {
        let response = RpcResponse::FileStatus {
            header: ResponseHeader::success(4, HDFS_FILE_STATUS),
            status: Some(sample_status("a")),
        };
        let frame = response.encode().unwrap();
        let raw = RawFrame::from_frame(frame.clone()).unwrap();

        let decoded = ResponseFrame::decode(Some(METHOD_GET_FILE_INFO), raw).unwrap();
        assert_eq!(decoded.response, response);
        assert_eq!(decoded.response.encode().unwrap(), frame);
    }

    #[test]
    fn test_missing_file_is_typed_none() {
        let response = RpcResponse::FileStatus {
            header: ResponseHeader::success(4, HDFS_FILE_STATUS),
            status: None,
        };
        let raw = RawFrame::from_frame(response.encode().unwrap()).unwrap();
        let decoded = ResponseFrame::decode(Some(METHOD_GET_FILE_INFO), raw).unwrap();
        assert_eq!(decoded.response, response);
    }

    #[test]
    fn test_listing_typed_decode() {
        let response = RpcResponse::Listing {
            header: ResponseHeader::success(9, "org.apache.hadoop.hdfs.protocol.DirectoryListing"),
            listing: Some(DirectoryListing {
                entries: vec![sample_status("x"), sample_status("y")],
                remaining_entries: 0,
            }),
        };
        let raw = RawFrame::from_frame(response.encode().unwrap()).unwrap();
        let decoded = ResponseFrame::decode(Some(METHOD_GET_LISTING), raw).unwrap();
        assert_eq!(decoded.response, response);
    }

    #[test]
    fn test_unparseable_value_falls_back_to_generic() {
        let header = ResponseHeader::success(1, HDFS_FILE_STATUS);
        let generic = RpcResponse::Generic {
            header,
            value: Bytes::from_static(&[1, 0, 3, b'a']),
        };
        let raw = RawFrame::from_frame(generic.encode().unwrap()).unwrap();
        let decoded = ResponseFrame::decode(Some(METHOD_GET_FILE_INFO), raw.clone()).unwrap();
        assert_eq!(decoded.response, generic);
        assert_eq!(decoded.raw, raw);
    }

    #[test]
    fn test_error_reply_stays_generic() {
        let header = ResponseHeader {
            sequence: 2,
            status: STATUS_ERROR,
            declared_type: "java.io.FileNotFoundException".to_string(),
            value_type: "File /missing does not exist".to_string(),
        };
        let generic = RpcResponse::Generic {
            header,
            value: Bytes::new(),
        };
        let raw = RawFrame::from_frame(generic.encode().unwrap()).unwrap();
        let decoded = ResponseFrame::decode(Some(METHOD_GET_FILE_INFO), raw).unwrap();
        assert!(!decoded.response.is_success());
        assert_eq!(decoded.response, generic);
    }

    #[test]
    fn test_bytes_for_restamps_sequence() {
        let response = RpcResponse::FileStatus {
            header: ResponseHeader::success(10, HDFS_FILE_STATUS),
            status: Some(sample_status("a")),
        };
        let frame = ResponseFrame::from_response(response).unwrap();

        assert_eq!(frame.bytes_for(10).unwrap(), *frame.raw.as_bytes());

        let restamped = frame.bytes_for(11).unwrap();
        assert_eq!(&restamped[4..8], &11u32.to_be_bytes());
        assert_eq!(&restamped[8..], &frame.raw.as_bytes()[8..]);
    }

    #[test]
    fn test_restamp_keeps_value_bytes_verbatim() {
        // A directory flag of 0x02 decodes as `true`; re-encoding would
        // turn it into 0x01.
        let response = RpcResponse::FileStatus {
            header: ResponseHeader::success(1, HDFS_FILE_STATUS),
            status: Some(FileStatus {
                is_dir: true,
                ..sample_status("d")
            }),
        };
        let mut bytes = response.encode().unwrap().to_vec();
        let value_start = bytes.len() - response.value_bytes().unwrap().len();
        // present:u8, path blob "d" (2 + 1), length:i64, then is_dir
        let is_dir_at = value_start + 1 + 3 + 8;
        assert_eq!(bytes[is_dir_at], 1);
        bytes[is_dir_at] = 2;

        let raw = RawFrame::from_frame(Bytes::from(bytes.clone())).unwrap();
        let frame = ResponseFrame::decode(Some(METHOD_GET_FILE_INFO), raw).unwrap();
        assert!(matches!(frame.response, RpcResponse::FileStatus { .. }));

        let restamped = frame.bytes_for(7).unwrap();
        assert_eq!(&restamped[4..8], &7u32.to_be_bytes());
        assert_eq!(&restamped[8..], &bytes[8..]);
        assert_eq!(restamped[is_dir_at], 2);
    }
}
