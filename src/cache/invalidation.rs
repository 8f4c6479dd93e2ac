//! Invalidation on file creation
//!
//! A successful `create` on one connection is broadcast to every other
//! session. What each one then drops from the shared caches is a policy
//! choice; the default drops nothing.

use std::fmt;

use serde::Deserialize;

use super::CacheSet;

/// Reaction to a file created through another connection.
pub trait InvalidationPolicy: Send + Sync + fmt::Debug {
    /// Apply the policy for `path`; returns the number of pairs removed
    fn on_create(&self, path: &str, caches: &CacheSet) -> usize;
}

/// Keep everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInvalidation;

impl InvalidationPolicy for NoInvalidation {
    fn on_create(&self, _path: &str, _caches: &CacheSet) -> usize {
        0
    }
}

/// Drop entries naming exactly the created path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactPathInvalidation;

impl InvalidationPolicy for ExactPathInvalidation {
    fn on_create(&self, path: &str, caches: &CacheSet) -> usize {
        caches
            .caches()
            .iter()
            .map(|cache| cache.invalidate(|r| r.first_path() == Some(path)))
            .sum()
    }
}

/// Drop the created path's status and its parent directory's listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParentListingInvalidation;

impl InvalidationPolicy for ParentListingInvalidation {
    fn on_create(&self, path: &str, caches: &CacheSet) -> usize {
        let parent = parent_path(path);
        caches
            .file_status()
            .invalidate(|r| r.first_path() == Some(path))
            + caches
                .listing()
                .invalidate(|r| matches!(r.first_path(), Some(p) if p == path || Some(p) == parent))
    }
}

/// Drop everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushAllInvalidation;

impl InvalidationPolicy for FlushAllInvalidation {
    fn on_create(&self, _path: &str, caches: &CacheSet) -> usize {
        caches.caches().iter().map(|cache| cache.invalidate(|_| true)).sum()
    }
}

/// Configurable selector for the built-in policies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidationMode {
    #[default]
    None,
    ExactPath,
    ParentListing,
    FlushAll,
}

impl InvalidationMode {
    pub fn build(self) -> Box<dyn InvalidationPolicy> {
        match self {
            InvalidationMode::None => Box::new(NoInvalidation),
            InvalidationMode::ExactPath => Box::new(ExactPathInvalidation),
            InvalidationMode::ParentListing => Box::new(ParentListingInvalidation),
            InvalidationMode::FlushAll => Box::new(FlushAllInvalidation),
        }
    }
}

impl fmt::Display for InvalidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationMode::None => write!(f, "none"),
            InvalidationMode::ExactPath => write!(f, "exact-path"),
            InvalidationMode::ParentListing => write!(f, "parent-listing"),
            InvalidationMode::FlushAll => write!(f, "flush-all"),
        }
    }
}

/// Parent directory of an absolute path; `None` for the root itself
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::session::SessionId;
    use crate::wire::{Param, ResponseFrame, ResponseHeader, RpcRequest, RpcResponse};
    use bytes::Bytes;

    fn seeded() -> CacheSet {
        let set = CacheSet::new(&CacheConfig::default());
        let session = SessionId(1);
        let mut seq = 0;
        let mut put = |method: &str, path: &str| {
            seq += 1;
            let cache = set.for_method(method).unwrap();
            cache.add_request(
                session,
                RpcRequest::new(seq, method)
                    .with_param(Param::string(path))
                    .with_param(Param::new("[B", Bytes::new())),
            );
            let reply = ResponseFrame::from_response(RpcResponse::Generic {
                header: ResponseHeader::success(seq, "x"),
                value: Bytes::new(),
            })
            .unwrap();
            assert!(cache.add_response(session, reply));
        };
        put("getFileInfo", "/dir/new");
        put("getFileInfo", "/dir/other");
        put("getListing", "/dir");
        put("getListing", "/elsewhere");
        set
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/a/b/c"), Some("/a/b"));
        assert_eq!(parent_path("/a"), Some("/"));
        assert_eq!(parent_path("/a/b/"), Some("/a"));
        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path("relative"), None);
    }

    #[test]
    fn test_no_invalidation() {
        let set = seeded();
        assert_eq!(NoInvalidation.on_create("/dir/new", &set), 0);
        assert_eq!(set.file_status().len(), 2);
    }

    #[test]
    fn test_exact_path() {
        let set = seeded();
        assert_eq!(ExactPathInvalidation.on_create("/dir/new", &set), 1);
        assert_eq!(set.file_status().identifiers(), vec!["/dir/other"]);
        assert_eq!(set.listing().len(), 2);
    }

    #[test]
    fn test_parent_listing() {
        let set = seeded();
        assert_eq!(ParentListingInvalidation.on_create("/dir/new", &set), 2);
        assert_eq!(set.listing().identifiers(), vec!["/elsewhere"]);
    }

    #[test]
    fn test_flush_all() {
        let set = seeded();
        assert_eq!(InvalidationMode::FlushAll.build().on_create("/x", &set), 4);
        assert!(set.file_status().is_empty());
        assert!(set.listing().is_empty());
    }
}
