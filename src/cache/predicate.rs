//! Request Equality Predicates
//!
//! Logically identical calls differ in sequence numbers and connection-local
//! fields, so cached lookups compare only the fields that decide the answer.

use std::fmt;

use crate::wire::RpcRequest;

/// Decides whether a cached request answers an incoming one.
pub trait RequestPredicate: Send + Sync + fmt::Debug {
    /// Short name used in logs and status output
    fn name(&self) -> &'static str;

    /// True when `cached`'s response is a valid answer to `incoming`
    fn matches(&self, cached: &RpcRequest, incoming: &RpcRequest) -> bool;
}

fn same_param(a: &RpcRequest, b: &RpcRequest, index: usize) -> bool {
    match (a.param(index), b.param(index)) {
        (Some(x), Some(y)) => x.value == y.value,
        _ => false,
    }
}

/// File-status lookups: same method and same target path.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStatusPredicate;

impl RequestPredicate for FileStatusPredicate {
    fn name(&self) -> &'static str {
        "file-status"
    }

    fn matches(&self, cached: &RpcRequest, incoming: &RpcRequest) -> bool {
        cached.method == incoming.method && same_param(cached, incoming, 0)
    }
}

/// Listing lookups: same method, directory path and listing options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListingPredicate;

impl RequestPredicate for ListingPredicate {
    fn name(&self) -> &'static str {
        "listing"
    }

    fn matches(&self, cached: &RpcRequest, incoming: &RpcRequest) -> bool {
        cached.method == incoming.method
            && same_param(cached, incoming, 0)
            && same_param(cached, incoming, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Param;
    use bytes::Bytes;

    fn file_info(seq: u32, path: &str, client: &str) -> RpcRequest {
        RpcRequest::new(seq, "getFileInfo")
            .with_param(Param::string(path))
            .with_param(Param::string(client))
    }

    fn listing(seq: u32, path: &str, start_after: &[u8]) -> RpcRequest {
        RpcRequest::new(seq, "getListing")
            .with_param(Param::string(path))
            .with_param(Param::new("[B", Bytes::copy_from_slice(start_after)))
    }

    #[test]
    fn test_file_status_ignores_sequence_and_client() {
        let p = FileStatusPredicate;
        let a = file_info(1, "/a", "DFSClient_1");
        let b = file_info(2, "/a", "DFSClient_2");
        assert!(p.matches(&a, &b));
    }

    #[test]
    fn test_file_status_path_must_match() {
        let p = FileStatusPredicate;
        assert!(!p.matches(&file_info(1, "/a", "c"), &file_info(1, "/b", "c")));
    }

    #[test]
    fn test_file_status_method_must_match() {
        let p = FileStatusPredicate;
        let mut other = file_info(1, "/a", "c");
        other.method = "getFileLinkInfo".to_string();
        assert!(!p.matches(&file_info(1, "/a", "c"), &other));
    }

    #[test]
    fn test_missing_params_never_match() {
        let p = FileStatusPredicate;
        let bare = RpcRequest::new(1, "getFileInfo");
        assert!(!p.matches(&bare, &bare));
    }

    #[test]
    fn test_listing_compares_options() {
        let p = ListingPredicate;
        assert!(p.matches(&listing(1, "/d", b""), &listing(7, "/d", b"")));
        assert!(!p.matches(&listing(1, "/d", b""), &listing(7, "/d", b"part-0001")));
        assert!(!p.matches(&listing(1, "/d", b""), &listing(7, "/e", b"")));
    }
}
