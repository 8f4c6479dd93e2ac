//! Property-Based Tests for the Wire Codec
//!
//! # Test Properties
//!
//! 1. **Request Roundtrip**: decode(encode(p)) = p
//! 2. **Byte Fidelity**: encode(decode(b)) = b for well-formed frames
//! 3. **Truncation**: any strict prefix of a body fails to decode
//! 4. **Varint Roundtrip**: vlong/vint decode what they encode

#![cfg(test)]

use bytes::Bytes;
use proptest::prelude::*;

use super::primitive::{WireReader, WireWriter};
use super::registration::{BlockKey, ExportedBlockKeys, RegistrationRecord};
use super::request::{Param, RpcRequest};

// =============================================================================
// Property Strategies
// =============================================================================

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_.]{0,40}"
}

fn param_strategy() -> impl Strategy<Value = Param> {
    (
        name_strategy(),
        prop::collection::vec(any::<u8>(), 0..256),
    )
        .prop_map(|(type_name, value)| Param::new(type_name, Bytes::from(value)))
}

fn request_strategy() -> impl Strategy<Value = RpcRequest> {
    (
        any::<u32>(),
        name_strategy(),
        prop::collection::vec(param_strategy(), 0..6),
        prop::collection::vec(any::<u8>(), 0..64),
    )
        .prop_map(|(sequence, method, params, trailer)| RpcRequest {
            sequence,
            method,
            params,
            trailer: Bytes::from(trailer),
        })
}

fn block_key_strategy() -> impl Strategy<Value = BlockKey> {
    (
        any::<i32>(),
        any::<i64>(),
        prop::collection::vec(any::<u8>(), 0..40),
    )
        .prop_map(|(key_id, expiry_date, key_bytes)| BlockKey {
            key_id,
            expiry_date,
            key_bytes: Bytes::from(key_bytes),
        })
}

fn record_strategy() -> impl Strategy<Value = RegistrationRecord> {
    (
        "[a-z0-9.]{1,20}:[0-9]{1,5}",
        "(DS-[0-9]{1,10}-[0-9.]{7,15}-[0-9]{1,5}-[0-9]{1,13})?",
        any::<(u16, u16, i32, i32, i64)>(),
        any::<(bool, i64, i64)>(),
        block_key_strategy(),
        prop::collection::vec(block_key_strategy(), 0..4),
    )
        .prop_map(
            |(name, storage_id, fixed, flags, current_key, all_keys)| RegistrationRecord {
                name,
                storage_id,
                info_port: fixed.0,
                ipc_port: fixed.1,
                layout_version: fixed.2,
                namespace_id: fixed.3,
                ctime: fixed.4,
                keys: ExportedBlockKeys {
                    block_token_enabled: flags.0,
                    key_update_interval: flags.1,
                    token_lifetime: flags.2,
                    current_key,
                    all_keys,
                },
                extra: Bytes::new(),
            },
        )
}

// =============================================================================
// Request Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: a request survives encode then decode unchanged.
    #[test]
    fn prop_request_roundtrip(request in request_strategy()) {
        let frame = request.encode()?;
        let decoded = RpcRequest::decode(frame.slice(4..))?;
        prop_assert_eq!(&decoded, &request);

        // And re-encoding the decoded packet reproduces the frame exactly.
        prop_assert_eq!(decoded.encode()?, frame);
    }

    /// Property: the length prefix always equals the body length.
    #[test]
    fn prop_length_prefix_matches_body(request in request_strategy()) {
        let frame = request.encode()?;
        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        prop_assert_eq!(declared, frame.len() - 4);
    }

    /// Property: cutting a body short inside the parameter list fails the decode.
    #[test]
    fn prop_truncated_params_fail(
        request in request_strategy().prop_filter("needs params and no trailer",
            |r| !r.params.is_empty() && r.trailer.is_empty()),
        cut in 1usize..8,
    ) {
        let body = request.encode_body()?;
        let cut = cut.min(body.len());
        prop_assert!(RpcRequest::decode(body.slice(..body.len() - cut)).is_err());
    }
}

// =============================================================================
// Varint and Sub-record Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_vlong_roundtrip(value in any::<i64>()) {
        let mut w = WireWriter::new();
        w.vlong(value);
        let bytes = w.into_bytes();
        prop_assert!(bytes.len() <= 9);

        let mut r = WireReader::new(bytes);
        prop_assert_eq!(r.vlong("value")?, value);
        prop_assert!(r.is_empty());
    }

    #[test]
    fn prop_vint_roundtrip(value in any::<i32>()) {
        let mut w = WireWriter::new();
        w.vint(value);
        let mut r = WireReader::new(w.into_bytes());
        prop_assert_eq!(r.vint("value")?, value);
    }

    #[test]
    fn prop_registration_roundtrip(record in record_strategy()) {
        let bytes = record.encode()?;
        let decoded = RegistrationRecord::decode(bytes.clone())?;
        prop_assert_eq!(&decoded, &record);
        prop_assert_eq!(decoded.encode()?, bytes);
    }
}
