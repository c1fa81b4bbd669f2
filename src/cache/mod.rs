//! Two-tier caching of flag configurations: a bounded in-process tier in front of a shared
//! distributed tier, with a supervisor that re-establishes the distributed connection.

mod backoff;
mod distributed;
mod local;
mod supervisor;
mod tiered;

pub use backoff::*;
pub use distributed::*;
pub use local::*;
pub use supervisor::*;
pub use tiered::*;

use crate::flag::FlagScope;

/// Returns the cache key of `flag_key` in `scope`: `"{prefix}:{scope}:{flag_key}"`.
pub fn cache_key(prefix: &str, scope: &FlagScope, flag_key: &str) -> String {
    format!("{}:{}:{}", prefix, scope, flag_key)
}
