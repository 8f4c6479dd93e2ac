//! Semantic Cache Engine
//!
//! Short-circuits read-only metadata calls without byte-exact matching.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      CacheSet (process-wide)                      │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  getFileInfo ─▶ SemanticCache + FileStatusPredicate               │
//! │  getListing  ─▶ SemanticCache + ListingPredicate                  │
//! │                                                                   │
//! │  each cache:  pending slots (session, seq) ──reply──▶ FIFO pairs  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A request that misses opens a pending slot; when its reply arrives on
//! the same connection the slot becomes a finished pair that later
//! lookups can match.

mod invalidation;
mod predicate;
mod semantic;
mod set;

pub use invalidation::{
    parent_path, ExactPathInvalidation, FlushAllInvalidation, InvalidationMode,
    InvalidationPolicy, NoInvalidation, ParentListingInvalidation,
};
pub use predicate::{FileStatusPredicate, ListingPredicate, RequestPredicate};
pub use semantic::{CacheStats, CachedPair, PendingKey, SemanticCache};
pub use set::{CacheConfig, CacheSet, DEFAULT_FILE_STATUS_CAPACITY, DEFAULT_LISTING_CAPACITY};
