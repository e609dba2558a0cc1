//! Application services: batched loading, read-through caching, and the
//! repository contracts they rely on.

pub mod articles;
pub mod diagnostics;
pub mod error;
pub mod loader;
pub mod pagination;
pub mod repos;
pub mod seed;
