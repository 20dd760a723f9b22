//! # Cache
//!
//! Read-through caching of peer lookups with a fixed time-to-live.

pub mod ttl;
pub mod user_directory;

pub use ttl::TtlCache;
pub use user_directory::{CachedUserDirectory, UserDirectory};
