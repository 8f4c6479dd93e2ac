//! Storage-node identity rewriting
//!
//! Every function here decodes the affected fields, substitutes them and
//! re-encodes the packet; frame and parameter lengths always follow from
//! the new content.

use super::context::RegistrationContext;
use super::location::{DataNodeEndpoint, LocationMap};
use super::storage_id::StorageId;
use crate::error::{Error, Result};
use crate::wire::{
    AuthPreamble, Param, RegistrationRecord, RpcRequest, RpcResponse, WireReader, WireWriter,
    METHOD_BLOCK_RECEIVED, METHOD_BLOCK_REPORT, METHOD_REGISTER, METHOD_SEND_HEARTBEAT,
};

/// Result of running a packet through the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome<T> {
    /// Not a rewrite target
    Unchanged,
    /// Identity substituted
    Rewritten(T),
    /// A target that could not be rewritten; forward the original
    Skipped(String),
}

impl<T> RewriteOutcome<T> {
    fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(v) => RewriteOutcome::Rewritten(v),
            Err(e) => RewriteOutcome::Skipped(e.to_string()),
        }
    }

    pub fn is_rewritten(&self) -> bool {
        matches!(self, RewriteOutcome::Rewritten(_))
    }
}

/// A rewritten request plus, for registrations, the substitution made
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenRequest {
    pub request: RpcRequest,
    pub registration: Option<RegistrationContext>,
}

/// Calls whose first parameter is the storage-node identity
fn carries_identity(method: &str) -> bool {
    matches!(
        method,
        METHOD_BLOCK_REPORT | METHOD_SEND_HEARTBEAT | METHOD_BLOCK_RECEIVED
    )
}

/// Whether `method` is ever rewritten
pub fn is_rewrite_target(method: &str) -> bool {
    method == METHOD_REGISTER || carries_identity(method)
}

/// Dispatch on the request's method
pub fn rewrite_request(request: &RpcRequest, map: &LocationMap) -> RewriteOutcome<RewrittenRequest> {
    if request.method == METHOD_REGISTER {
        RewriteOutcome::from_result(rewrite_registration_request(request, map).map(
            |(request, context)| RewrittenRequest {
                request,
                registration: Some(context),
            },
        ))
    } else if carries_identity(&request.method) {
        RewriteOutcome::from_result(rewrite_block_report(request, map).map(|request| {
            RewrittenRequest {
                request,
                registration: None,
            }
        }))
    } else {
        RewriteOutcome::Unchanged
    }
}

/// Rewrite the registration call inside an auth preamble
pub fn rewrite_auth_preamble(
    preamble: &AuthPreamble,
    map: &LocationMap,
) -> RewriteOutcome<(AuthPreamble, RegistrationContext)> {
    if preamble.request.method != METHOD_REGISTER {
        return RewriteOutcome::Unchanged;
    }
    RewriteOutcome::from_result(rewrite_registration_request(&preamble.request, map).map(
        |(request, context)| {
            (
                AuthPreamble {
                    signature: preamble.signature.clone(),
                    request,
                },
                context,
            )
        },
    ))
}

/// Substitute the identity carried in the first parameter
///
/// The parameter value is `name:str2 storage_id:str2` followed by bytes
/// that are carried through untouched.
pub fn rewrite_block_report(request: &RpcRequest, map: &LocationMap) -> Result<RpcRequest> {
    let param = request
        .param(0)
        .ok_or_else(|| Error::Rewrite(format!("{} has no identity parameter", request.method)))?;

    let mut r = WireReader::new(param.value.clone());
    let name = r.string("identity name")?;
    let storage_id = r.string("identity storage id")?;
    let rest = r.rest();

    let context = virtualize(&name, &storage_id, map)?;

    let mut w = WireWriter::with_capacity(param.value.len() + 8);
    w.string(&context.virtual_name, "identity name")?;
    w.string(&context.virtual_storage_id, "identity storage id")?;
    w.raw(&rest);

    let mut rewritten = request.clone();
    rewritten.params[0] = Param::new(param.type_name.clone(), w.into_bytes());
    Ok(rewritten)
}

/// Substitute the identity in a registration sub-record
pub fn rewrite_registration_request(
    request: &RpcRequest,
    map: &LocationMap,
) -> Result<(RpcRequest, RegistrationContext)> {
    if request.trailer.is_empty() {
        return Err(Error::Rewrite("registration call without a record".into()));
    }
    let mut record = RegistrationRecord::decode(request.trailer.clone())?;
    let context = virtualize(&record.name, &record.storage_id, map)?;

    record.name = context.virtual_name.clone();
    record.storage_id = context.virtual_storage_id.clone();

    let mut rewritten = request.clone();
    rewritten.trailer = record.encode()?;
    Ok((rewritten, context))
}

/// Apply a registration's substitution to the server's reply
pub fn rewrite_registration_response(
    response: &RpcResponse,
    context: &RegistrationContext,
) -> Result<RpcResponse> {
    let mut record = RegistrationRecord::decode(response.value_bytes()?)?;
    record.name = context.virtual_name.clone();
    record.storage_id = virtual_storage_id_in_reply(&record.storage_id, context);

    Ok(RpcResponse::Generic {
        header: response.header().clone(),
        value: record.encode()?,
    })
}

/// Rewrite a reply to `method`, given the context of its call
pub fn rewrite_response(
    method: &str,
    response: &RpcResponse,
    context: Option<&RegistrationContext>,
) -> RewriteOutcome<RpcResponse> {
    match (method, context) {
        (METHOD_REGISTER, Some(ctx)) if response.is_success() => {
            RewriteOutcome::from_result(rewrite_registration_response(response, ctx))
        }
        (METHOD_REGISTER, None) => {
            RewriteOutcome::Skipped("registration reply without a recorded request".into())
        }
        _ => RewriteOutcome::Unchanged,
    }
}

/// Decide the substitution for a node identity
fn virtualize(name: &str, storage_id: &str, map: &LocationMap) -> Result<RegistrationContext> {
    let parsed_id = StorageId::parse(storage_id);

    let from_name = split_host_port(name)
        .and_then(|(host, port)| Some((map.proxy_port_for(host, port)?, host, port)));
    let from_id = || {
        let id = parsed_id.as_ref()?;
        let port = id.port()?;
        Some((map.proxy_port_for(id.address(), port)?, id.address(), port))
    };

    let (proxy_port, host, port) = from_name.or_else(from_id).ok_or_else(|| {
        Error::Rewrite(format!(
            "no location entry for node '{}' ({})",
            name, storage_id
        ))
    })?;

    let virtual_storage_id = parsed_id
        .as_ref()
        .map(|id| id.with_port(proxy_port).to_string())
        .unwrap_or_else(|| storage_id.to_string());

    Ok(RegistrationContext {
        real_name: name.to_string(),
        real_storage_id: storage_id.to_string(),
        virtual_name: format!("{}:{}", map.advertised_host(), proxy_port),
        virtual_storage_id,
        proxy_port,
        endpoint: DataNodeEndpoint::new(host, port),
    })
}

fn virtual_storage_id_in_reply(storage_id: &str, context: &RegistrationContext) -> String {
    if storage_id == context.real_storage_id {
        return context.virtual_storage_id.clone();
    }
    // A freshly assigned id embeds the address the server saw.
    match StorageId::parse(storage_id) {
        Some(id)
            if id.port() == Some(context.endpoint.port)
                || id.address() == context.endpoint.address =>
        {
            id.with_port(context.proxy_port).to_string()
        }
        _ => storage_id.to_string(),
    }
}

fn split_host_port(name: &str) -> Option<(&str, u16)> {
    let (host, port) = name.rsplit_once(':')?;
    Some((host, port.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{sample_record, ResponseHeader};
    use assert_matches::assert_matches;
    use bytes::Bytes;

    const REAL_ID: &str = "DS-1977285430-10.0.0.5-1389-1700000000000";

    fn map() -> LocationMap {
        LocationMap::from_entries(
            "proxy.local",
            vec![
                (2010, DataNodeEndpoint::new("10.0.0.5", 1389)),
                (2011, DataNodeEndpoint::new("10.0.0.6", 1389)),
            ],
        )
        .unwrap()
    }

    fn identity(name: &str, storage_id: &str, rest: &[u8]) -> Bytes {
        let mut w = WireWriter::new();
        w.string(name, "name").unwrap();
        w.string(storage_id, "id").unwrap();
        w.raw(rest);
        w.into_bytes()
    }

    fn block_report(name: &str, storage_id: &str) -> RpcRequest {
        RpcRequest::new(42, METHOD_BLOCK_REPORT)
            .with_param(Param::new(
                "org.apache.hadoop.hdfs.server.protocol.DatanodeRegistration",
                identity(name, storage_id, &[0xAA, 0xBB]),
            ))
            .with_param(Param::new("[J", Bytes::from_static(&[0, 0, 0, 0])))
    }

    #[test]
    fn test_block_report_port_substitution() {
        let request = block_report("10.0.0.5:1389", REAL_ID);
        let before = request.encode().unwrap();

        let rewritten = rewrite_block_report(&request, &map()).unwrap();
        let after = rewritten.encode().unwrap();

        let mut r = WireReader::new(rewritten.params[0].value.clone());
        assert_eq!(r.string("n").unwrap(), "proxy.local:2010");
        assert_eq!(
            r.string("s").unwrap(),
            "DS-1977285430-10.0.0.5-2010-1700000000000"
        );
        assert_eq!(&r.rest()[..], &[0xAA, 0xBB]);
        assert_eq!(rewritten.params[1], request.params[1]);
        assert_eq!(rewritten.sequence, 42);

        // Name grew from 13 to 16 bytes; port field width unchanged.
        assert_eq!(after.len(), before.len() + 3);
        let declared = u32::from_be_bytes(after[..4].try_into().unwrap()) as usize;
        assert_eq!(declared, after.len() - 4);
    }

    #[test]
    fn test_lookup_falls_back_to_storage_id() {
        let request = block_report("dn-host-without-port", REAL_ID);
        let rewritten = rewrite_block_report(&request, &map()).unwrap();
        let mut r = WireReader::new(rewritten.params[0].value.clone());
        assert_eq!(r.string("n").unwrap(), "proxy.local:2010");
    }

    #[test]
    fn test_unknown_endpoint_is_skipped() {
        let request = block_report("10.9.9.9:1389", "DS-1-10.9.9.9-1389-1");
        assert_matches!(rewrite_request(&request, &map()), RewriteOutcome::Skipped(_));
    }

    #[test]
    fn test_undecodable_parameter_is_skipped() {
        let request = RpcRequest::new(1, METHOD_SEND_HEARTBEAT)
            .with_param(Param::new("x", Bytes::from_static(&[0, 50, 1])));
        assert_matches!(rewrite_request(&request, &map()), RewriteOutcome::Skipped(_));
    }

    #[test]
    fn test_non_targets_unchanged() {
        let request = RpcRequest::new(1, "getFileInfo").with_param(Param::string("/a"));
        assert_matches!(rewrite_request(&request, &map()), RewriteOutcome::Unchanged);
        assert!(!is_rewrite_target("getFileInfo"));
        assert!(is_rewrite_target("blockReceived"));
    }

    #[test]
    fn test_registration_request_and_reply() {
        let record = sample_record("10.0.0.6:1389", "DS-5-10.0.0.6-1389-1700000000000");
        let request = RpcRequest::new(3, METHOD_REGISTER)
            .with_param(Param::new("Registration", Bytes::from_static(b"\x01")))
            .with_trailer(record.encode().unwrap());

        let outcome = rewrite_request(&request, &map());
        let RewriteOutcome::Rewritten(RewrittenRequest {
            request: rewritten,
            registration: Some(ctx),
        }) = outcome
        else {
            panic!("expected registration rewrite, got {:?}", outcome);
        };

        assert_eq!(ctx.proxy_port, 2011);
        assert_eq!(ctx.virtual_name, "proxy.local:2011");
        assert_eq!(ctx.endpoint, DataNodeEndpoint::new("10.0.0.6", 1389));
        assert_eq!(rewritten.params, request.params);

        let sent = RegistrationRecord::decode(rewritten.trailer.clone()).unwrap();
        assert_eq!(sent.name, "proxy.local:2011");
        assert_eq!(sent.storage_id, "DS-5-10.0.0.6-2011-1700000000000");
        assert_eq!(sent.keys, record.keys);
        assert_eq!(sent.namespace_id, record.namespace_id);

        // The server answers with a fresh storage id built from what it saw.
        let reply_record = sample_record("10.0.0.6:1389", "DS-99-10.0.0.6-1389-1700000000555");
        let reply = RpcResponse::Generic {
            header: ResponseHeader::success(3, "Registration"),
            value: reply_record.encode().unwrap(),
        };
        let RewriteOutcome::Rewritten(rewritten_reply) =
            rewrite_response(METHOD_REGISTER, &reply, Some(&ctx))
        else {
            panic!("expected reply rewrite");
        };
        assert_eq!(rewritten_reply.sequence(), 3);
        let returned = RegistrationRecord::decode(rewritten_reply.value_bytes().unwrap()).unwrap();
        assert_eq!(returned.name, "proxy.local:2011");
        assert_eq!(returned.storage_id, "DS-99-10.0.0.6-2011-1700000000555");
    }

    #[test]
    fn test_reply_with_unrelated_storage_id_keeps_it() {
        let ctx = virtualize("10.0.0.5:1389", REAL_ID, &map()).unwrap();
        assert_eq!(
            virtual_storage_id_in_reply("DS-12345", &ctx),
            "DS-12345".to_string()
        );
        assert_eq!(virtual_storage_id_in_reply(REAL_ID, &ctx), ctx.virtual_storage_id);
    }

    #[test]
    fn test_registration_without_record_is_skipped() {
        let request = RpcRequest::new(3, METHOD_REGISTER);
        assert_matches!(rewrite_request(&request, &map()), RewriteOutcome::Skipped(_));
        let reply = RpcResponse::Generic {
            header: ResponseHeader::success(3, "x"),
            value: Bytes::new(),
        };
        assert_matches!(
            rewrite_response(METHOD_REGISTER, &reply, None),
            RewriteOutcome::Skipped(_)
        );
    }

    #[test]
    fn test_auth_preamble_registration() {
        let record = sample_record("10.0.0.5:1389", REAL_ID);
        let preamble = AuthPreamble {
            signature: Bytes::from_static(b"sig"),
            request: RpcRequest::new(0, METHOD_REGISTER).with_trailer(record.encode().unwrap()),
        };
        let RewriteOutcome::Rewritten((rewritten, ctx)) = rewrite_auth_preamble(&preamble, &map())
        else {
            panic!("expected rewrite");
        };
        assert_eq!(rewritten.signature, preamble.signature);
        assert_eq!(ctx.proxy_port, 2010);

        let other = AuthPreamble {
            signature: Bytes::new(),
            request: RpcRequest::new(0, "getProtocolVersion"),
        };
        assert_matches!(rewrite_auth_preamble(&other, &map()), RewriteOutcome::Unchanged);
    }
}
