//! Batched relation loading and read-through caching for an article store.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

mod util;
