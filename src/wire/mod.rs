//! Wire Codec
//!
//! Framing and primitive serialization for the hrpc metadata protocol.
//!
//! # Connection Layout
//!
//! ```text
//! client ─▶ "hrpc" version auth_method serialization   (7 bytes, once)
//! client ─▶ [len:4] auth preamble                      (once)
//! client ─▶ [len:4] request   ◀─ [len:4] response      (repeated)
//! ```
//!
//! Frames are always read in full before decoding. Decoding an unmodified
//! frame and encoding it again yields the same bytes; any change to a
//! decoded packet produces a freshly computed length prefix.

mod frame;
mod handshake;
mod primitive;
mod registration;
mod request;
mod response;

#[cfg(test)]
mod proptest;

pub use frame::{read_frame, write_raw, RawFrame};
pub use handshake::{AuthPreamble, Handshake, HANDSHAKE_LEN, PROTOCOL_MAGIC};
pub use primitive::{WireReader, WireWriter, MAX_SHORT_LEN};
pub use registration::{BlockKey, ExportedBlockKeys, RegistrationRecord};
pub use request::{Param, ParamKind, RpcRequest};
pub use response::{
    DirectoryListing, FileStatus, ResponseFrame, ResponseHeader, RpcResponse, STATUS_ERROR,
    STATUS_FATAL, STATUS_SUCCESS,
};

#[cfg(test)]
pub(crate) use registration::tests::sample_record;

/// Largest frame body accepted from either peer (64MB)
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

// Method names the proxy interprets. Everything else is relayed opaquely.
pub const METHOD_GET_FILE_INFO: &str = "getFileInfo";
pub const METHOD_GET_LISTING: &str = "getListing";
pub const METHOD_CREATE: &str = "create";
pub const METHOD_REGISTER: &str = "register";
pub const METHOD_BLOCK_REPORT: &str = "blockReport";
pub const METHOD_SEND_HEARTBEAT: &str = "sendHeartbeat";
pub const METHOD_BLOCK_RECEIVED: &str = "blockReceived";
