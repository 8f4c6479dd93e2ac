//! Storage-node registration sub-record
//!
//! Appended after the normal parameters of a `register` call and returned
//! as the value of its reply:
//!
//! ```text
//! name:str2 storage_id:str2 info_port:2 ipc_port:2
//! layout_version:4 namespace_id:4 ctime:8 exported_keys
//! ```
//!
//! The exported block keys use zero-compressed variable-length integers.

use bytes::Bytes;

use super::primitive::{WireReader, WireWriter};
use crate::error::{Error, Result};

/// Upper bound on keys accepted in one export, guards the allocation
const MAX_EXPORTED_KEYS: i32 = 4096;

/// One block access key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockKey {
    pub key_id: i32,
    pub expiry_date: i64,
    pub key_bytes: Bytes,
}

impl BlockKey {
    fn decode(r: &mut WireReader) -> Result<Self> {
        let key_id = r.vint("block key id")?;
        let expiry_date = r.vlong("block key expiry")?;
        let len = r.vint("block key length")?;
        let len = usize::try_from(len)
            .map_err(|_| Error::malformed(format!("negative block key length {}", len)))?;
        Ok(Self {
            key_id,
            expiry_date,
            key_bytes: r.bytes(len, "block key bytes")?,
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.vint(self.key_id);
        w.vlong(self.expiry_date);
        w.vint(self.key_bytes.len() as i32);
        w.raw(&self.key_bytes);
    }
}

/// Block keys exported to a storage node on registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedBlockKeys {
    pub block_token_enabled: bool,
    pub key_update_interval: i64,
    pub token_lifetime: i64,
    pub current_key: BlockKey,
    pub all_keys: Vec<BlockKey>,
}

impl ExportedBlockKeys {
    fn decode(r: &mut WireReader) -> Result<Self> {
        let block_token_enabled = r.bool("block token flag")?;
        let key_update_interval = r.vlong("key update interval")?;
        let token_lifetime = r.vlong("token lifetime")?;
        let current_key = BlockKey::decode(r)?;
        let count = r.vint("exported key count")?;
        if !(0..=MAX_EXPORTED_KEYS).contains(&count) {
            return Err(Error::malformed(format!("exported key count {}", count)));
        }
        let mut all_keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            all_keys.push(BlockKey::decode(r)?);
        }
        Ok(Self {
            block_token_enabled,
            key_update_interval,
            token_lifetime,
            current_key,
            all_keys,
        })
    }

    fn encode(&self, w: &mut WireWriter) {
        w.bool(self.block_token_enabled);
        w.vlong(self.key_update_interval);
        w.vlong(self.token_lifetime);
        self.current_key.encode(w);
        w.vint(self.all_keys.len() as i32);
        for key in &self.all_keys {
            key.encode(w);
        }
    }
}

/// Storage node identity as announced to the metadata server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRecord {
    /// `host:port` the node serves block data on
    pub name: String,
    pub storage_id: String,
    pub info_port: u16,
    pub ipc_port: u16,
    pub layout_version: i32,
    pub namespace_id: i32,
    pub ctime: i64,
    pub keys: ExportedBlockKeys,
    /// Anything after the key export, carried through untouched
    pub extra: Bytes,
}

impl RegistrationRecord {
    pub fn decode(bytes: Bytes) -> Result<Self> {
        let mut r = WireReader::new(bytes);
        Ok(Self {
            name: r.string("registration name")?,
            storage_id: r.string("registration storage id")?,
            info_port: r.u16("registration info port")?,
            ipc_port: r.u16("registration ipc port")?,
            layout_version: r.i32("layout version")?,
            namespace_id: r.i32("namespace id")?,
            ctime: r.i64("creation time")?,
            keys: ExportedBlockKeys::decode(&mut r)?,
            extra: r.rest(),
        })
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut w = WireWriter::new();
        w.string(&self.name, "registration name")?;
        w.string(&self.storage_id, "registration storage id")?;
        w.u16(self.info_port);
        w.u16(self.ipc_port);
        w.i32(self.layout_version);
        w.i32(self.namespace_id);
        w.i64(self.ctime);
        self.keys.encode(&mut w);
        w.raw(&self.extra);
        Ok(w.into_bytes())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;

    pub(crate) fn sample_record(name: &str, storage_id: &str) -> RegistrationRecord {
        RegistrationRecord {
            name: name.to_string(),
            storage_id: storage_id.to_string(),
            info_port: 50075,
            ipc_port: 50020,
            layout_version: -32,
            namespace_id: 463_031_076,
            ctime: 0,
            keys: ExportedBlockKeys {
                block_token_enabled: true,
                key_update_interval: 600_000,
                token_lifetime: 600_000,
                current_key: BlockKey {
                    key_id: 1_717_171,
                    expiry_date: 1_700_000_600_000,
                    key_bytes: Bytes::from_static(&[7; 20]),
                },
                all_keys: vec![
                    BlockKey {
                        key_id: -5,
                        expiry_date: 1_700_000_000_000,
                        key_bytes: Bytes::from_static(&[1; 20]),
                    },
                    BlockKey {
                        key_id: 1_717_171,
                        expiry_date: 1_700_000_600_000,
                        key_bytes: Bytes::from_static(&[7; 20]),
                    },
                ],
            },
            extra: Bytes::new(),
        }
    }

    #[test]
    fn test_record_round_trip() {
        let record = sample_record("10.0.0.5:50010", "DS-1-10.0.0.5-50010-1700000000000");
        let bytes = record.encode().unwrap();
        let decoded = RegistrationRecord::decode(bytes.clone()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.encode().unwrap(), bytes);
    }

    #[test]
    fn test_fixed_fields_layout() {
        let record = sample_record("h:1", "");
        let bytes = record.encode().unwrap();
        // name(2+3) + storage id(2+0), then info port
        assert_eq!(&bytes[7..9], &50075u16.to_be_bytes());
        assert_eq!(&bytes[9..11], &50020u16.to_be_bytes());
        assert_eq!(&bytes[11..15], &(-32i32).to_be_bytes());
    }

    #[test]
    fn test_truncated_keys_rejected() {
        let bytes = sample_record("h:1", "DS-1").encode().unwrap();
        let short = bytes.slice(..bytes.len() - 3);
        assert_matches!(
            RegistrationRecord::decode(short),
            Err(Error::MalformedPacket { .. })
        );
    }

    #[test]
    fn test_unexpected_format_rejected() {
        assert!(RegistrationRecord::decode(Bytes::from_static(b"\x00\x10garbage")).is_err());
    }
}
