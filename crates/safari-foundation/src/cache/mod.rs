//! Result caching: key derivation and the in-memory store.
//!
//! The orchestrator owns the policy (what is cached and for how long); the
//! [`CacheStore`](safari_kernel::CacheStore) only stores strings with a TTL.

mod fingerprint;
mod memory;

pub use fingerprint::fingerprint;
pub use memory::{CacheStats, MemoryCacheStore};
