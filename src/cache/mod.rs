//! Cache collaborator: a key-value store with TTL.
//!
//! The bus writes handshake results here and consumers keep dedupe markers
//! here. `InMemoryCache` is included for tests and single-process setups;
//! production deployments plug a shared store in behind the `Cache` trait.

mod cache;
mod error;
mod in_memory;

pub use cache::Cache;
pub use error::CacheError;
pub use in_memory::InMemoryCache;
