//! Process-wide cache collection

use serde::{Deserialize, Serialize};

use super::predicate::{FileStatusPredicate, ListingPredicate};
use super::semantic::{CacheStats, SemanticCache};
use crate::session::SessionId;
use crate::wire::{METHOD_GET_FILE_INFO, METHOD_GET_LISTING};

/// Default number of cached file-status pairs
pub const DEFAULT_FILE_STATUS_CAPACITY: usize = 1024;

/// Default number of cached listing pairs
pub const DEFAULT_LISTING_CAPACITY: usize = 256;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Serve cached answers at all
    pub enabled: bool,
    /// Finished pairs kept for `getFileInfo`
    pub file_status_capacity: usize,
    /// Finished pairs kept for `getListing`
    pub listing_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file_status_capacity: DEFAULT_FILE_STATUS_CAPACITY,
            listing_capacity: DEFAULT_LISTING_CAPACITY,
        }
    }
}

/// One cache per cached call type, shared by every session.
#[derive(Debug)]
pub struct CacheSet {
    file_status: SemanticCache,
    listing: SemanticCache,
}

impl CacheSet {
    pub fn new(config: &CacheConfig) -> Self {
        let set = Self {
            file_status: SemanticCache::new(
                config.file_status_capacity,
                Box::new(FileStatusPredicate),
            ),
            listing: SemanticCache::new(config.listing_capacity, Box::new(ListingPredicate)),
        };
        if !config.enabled {
            set.disable_all();
        }
        set
    }

    /// The cache serving `method`, if the method is cacheable
    pub fn for_method(&self, method: &str) -> Option<&SemanticCache> {
        match method {
            METHOD_GET_FILE_INFO => Some(&self.file_status),
            METHOD_GET_LISTING => Some(&self.listing),
            _ => None,
        }
    }

    pub fn is_cacheable(method: &str) -> bool {
        matches!(method, METHOD_GET_FILE_INFO | METHOD_GET_LISTING)
    }

    pub fn file_status(&self) -> &SemanticCache {
        &self.file_status
    }

    pub fn listing(&self) -> &SemanticCache {
        &self.listing
    }

    pub fn caches(&self) -> [&SemanticCache; 2] {
        [&self.file_status, &self.listing]
    }

    pub fn disable_all(&self) {
        for cache in self.caches() {
            cache.disable();
        }
    }

    /// Release every pending slot a closed session left behind
    pub fn discard_session(&self, session: SessionId) -> usize {
        self.caches()
            .iter()
            .map(|cache| cache.discard_pending(session))
            .sum()
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        self.caches().iter().map(|cache| cache.stats()).collect()
    }
}
