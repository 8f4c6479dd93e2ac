//! Address Rewriting Engine
//!
//! Storage nodes announce themselves to the metadata server with their real
//! `host:port` and a storage ID embedding that port. Clients that learn
//! those identities would connect past the proxy, so every announcement is
//! rewritten to a proxy-facing endpoint from the [`LocationMap`].
//!
//! ```text
//! register / blockReport / sendHeartbeat / blockReceived
//!     10.0.0.5:1389, DS-…-10.0.0.5-1389-…
//!         ──▶ proxy.local:2010, DS-…-10.0.0.5-2010-…
//! ```

mod context;
mod engine;
mod location;
mod storage_id;

pub use context::RegistrationContext;
pub use engine::{
    is_rewrite_target, rewrite_auth_preamble, rewrite_block_report, rewrite_registration_request,
    rewrite_registration_response, rewrite_request, rewrite_response, RewriteOutcome,
    RewrittenRequest,
};
pub use location::{DataNodeEndpoint, LocationMap};
pub use storage_id::StorageId;
