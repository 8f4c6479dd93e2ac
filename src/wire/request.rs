//! Request packets
//!
//! ```text
//! [len:4][sequence:4][method_len:2][method][param_count:4]
//!     {[type_len:2][type][value_len:2][value]}* [trailer]
//! ```
//!
//! The trailer carries whatever follows the last parameter; for
//! `register` calls that is the embedded registration sub-record.

use std::fmt;

use bytes::Bytes;

use super::frame::RawFrame;
use super::primitive::{WireReader, WireWriter};
use crate::error::Result;

/// Type tag derived from a parameter's declared type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Int,
    Long,
    Boolean,
    Bytes,
    /// Any serialized object (identity records, reports, permissions)
    Writable,
}

impl ParamKind {
    /// Classify a declared type name
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "java.lang.String" | "string" => ParamKind::String,
            "int" | "java.lang.Integer" => ParamKind::Int,
            "long" | "java.lang.Long" => ParamKind::Long,
            "boolean" | "java.lang.Boolean" => ParamKind::Boolean,
            "[B" | "bytes" => ParamKind::Bytes,
            _ => ParamKind::Writable,
        }
    }
}

/// One `{type, value}` parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub type_name: String,
    pub value: Bytes,
}

impl Param {
    pub fn new(type_name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            type_name: type_name.into(),
            value: value.into(),
        }
    }

    /// A `java.lang.String` parameter
    pub fn string(value: &str) -> Self {
        Self::new("java.lang.String", Bytes::copy_from_slice(value.as_bytes()))
    }

    pub fn kind(&self) -> ParamKind {
        ParamKind::from_type_name(&self.type_name)
    }

    /// Value interpreted as UTF-8, if it is
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// A decoded request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    pub sequence: u32,
    pub method: String,
    pub params: Vec<Param>,
    pub trailer: Bytes,
}

impl RpcRequest {
    pub fn new(sequence: u32, method: impl Into<String>) -> Self {
        Self {
            sequence,
            method: method.into(),
            params: Vec::new(),
            trailer: Bytes::new(),
        }
    }

    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_trailer(mut self, trailer: impl Into<Bytes>) -> Self {
        self.trailer = trailer.into();
        self
    }

    /// Decode a frame body (length prefix already stripped)
    pub fn decode(body: Bytes) -> Result<Self> {
        let mut r = WireReader::new(body);
        Self::decode_from(&mut r)
    }

    pub(crate) fn decode_from(r: &mut WireReader) -> Result<Self> {
        let sequence = r.u32("sequence number")?;
        let method = r.string("method name")?;
        let count = r.u32("parameter count")?;

        // Cap the preallocation; a lying count still fails on the first short read.
        let mut params = Vec::with_capacity(count.min(16) as usize);
        for i in 0..count {
            let type_name = r.string(&format!("parameter {} type", i))?;
            let value = r.blob(&format!("parameter {} value", i))?;
            params.push(Param { type_name, value });
        }

        Ok(Self {
            sequence,
            method,
            params,
            trailer: r.rest(),
        })
    }

    pub(crate) fn encode_into(&self, w: &mut WireWriter) -> Result<()> {
        w.u32(self.sequence);
        w.string(&self.method, "method name")?;
        w.u32(self.params.len() as u32);
        for (i, param) in self.params.iter().enumerate() {
            w.string(&param.type_name, &format!("parameter {} type", i))?;
            w.blob(&param.value, &format!("parameter {} value", i))?;
        }
        w.raw(&self.trailer);
        Ok(())
    }

    /// Encode the body without the length prefix
    pub fn encode_body(&self) -> Result<Bytes> {
        let mut w = WireWriter::with_capacity(self.encoded_body_hint());
        self.encode_into(&mut w)?;
        Ok(w.into_bytes())
    }

    /// Encode a complete frame; the length is always recomputed
    pub fn encode(&self) -> Result<Bytes> {
        let mut w = WireWriter::with_capacity(4 + self.encoded_body_hint());
        self.encode_into(&mut w)?;
        w.into_frame()
    }

    /// Encode into a [`RawFrame`]
    pub fn to_frame(&self) -> Result<RawFrame> {
        RawFrame::from_frame(self.encode()?)
    }

    fn encoded_body_hint(&self) -> usize {
        4 + 2
            + self.method.len()
            + 4
            + self
                .params
                .iter()
                .map(|p| 4 + p.type_name.len() + p.value.len())
                .sum::<usize>()
            + self.trailer.len()
    }

    pub fn param(&self, index: usize) -> Option<&Param> {
        self.params.get(index)
    }

    /// First parameter as a path-like string (target of lookups and creates)
    pub fn first_path(&self) -> Option<&str> {
        self.params.first().and_then(Param::as_str)
    }
}

impl fmt::Display for RpcRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}({} params",
            self.sequence,
            self.method,
            self.params.len()
        )?;
        if !self.trailer.is_empty() {
            write!(f, ", {} trailing bytes", self.trailer.len())?;
        }
        write!(f, ")")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;

    fn get_file_info(seq: u32, path: &str) -> RpcRequest {
        RpcRequest::new(seq, "getFileInfo").with_param(Param::string(path))
    }

    #[test]
    fn test_wire_layout() {
        let frame = get_file_info(7, "/a").encode().unwrap();
        let mut expected: Vec<u8> = Vec::new();
        expected.extend_from_slice(&[0, 0, 0, 43]); // length
        expected.extend_from_slice(&[0, 0, 0, 7]); // sequence
        expected.extend_from_slice(&[0, 11]);
        expected.extend_from_slice(b"getFileInfo");
        expected.extend_from_slice(&[0, 0, 0, 1]); // parameter count
        expected.extend_from_slice(&[0, 16]);
        expected.extend_from_slice(b"java.lang.String");
        expected.extend_from_slice(&[0, 2]);
        expected.extend_from_slice(b"/a");
        assert_eq!(frame.as_ref(), expected.as_slice());
    }

    #[test]
    fn test_decode_encode_byte_identical() {
        let original = RpcRequest::new(99, "getListing")
            .with_param(Param::string("/user/data"))
            .with_param(Param::new("[B", Bytes::from_static(&[0, 1, 2])))
            .with_trailer(Bytes::from_static(b"tail"));
        let frame = original.to_frame().unwrap();

        let decoded = RpcRequest::decode(frame.body()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.encode().unwrap(), *frame.as_bytes());
    }

    #[test]
    fn test_length_recomputed_after_change() {
        let mut request = get_file_info(1, "/a");
        let before = request.encode().unwrap();
        request.params[0] = Param::string("/a/much/longer/path");
        let after = request.encode().unwrap();

        let declared = u32::from_be_bytes([after[0], after[1], after[2], after[3]]) as usize;
        assert_eq!(declared, after.len() - 4);
        assert_eq!(after.len() - before.len(), "/much/longer/path".len());
    }

    #[test]
    fn test_truncated_parameter_fails_whole_decode() {
        let frame = get_file_info(3, "/abc").to_frame().unwrap();
        let body = frame.body();
        let short = body.slice(..body.len() - 1);
        assert_matches!(RpcRequest::decode(short), Err(Error::MalformedPacket { .. }));
    }

    #[test]
    fn test_lying_param_count() {
        let mut request = get_file_info(3, "/abc");
        request.params.clear();
        let mut body = request.encode_body().unwrap().to_vec();
        // Claim a million parameters
        let count_at = 4 + 2 + "getFileInfo".len();
        body[count_at..count_at + 4].copy_from_slice(&1_000_000u32.to_be_bytes());
        assert_matches!(
            RpcRequest::decode(Bytes::from(body)),
            Err(Error::MalformedPacket { .. })
        );
    }

    #[test]
    fn test_param_kind() {
        assert_eq!(Param::string("/x").kind(), ParamKind::String);
        assert_eq!(Param::new("long", Bytes::new()).kind(), ParamKind::Long);
        assert_eq!(
            Param::new(
                "org.apache.hadoop.hdfs.server.protocol.DatanodeRegistration",
                Bytes::new()
            )
            .kind(),
            ParamKind::Writable
        );
    }

    #[test]
    fn test_display() {
        let request = get_file_info(5, "/a");
        assert_eq!(request.to_string(), "#5 getFileInfo(1 params)");
    }
}
