// src/watch/mod.rs

//! Event-driven package summary cache
//!
//! A long-lived task consumes lifecycle events for cluster-managed repository
//! objects and keeps a key-value cache of package summaries per repository:
//!
//! - [`WatchCache`] - watch loop, per-event indexing, cached reads
//! - [`KeyValueStore`] / [`MemoryKv`] - cache backend
//! - [`RepositoryWatcher`] / [`ChannelWatcher`] - event source
//! - [`unstructured`] - typed accessors for untyped repository objects

mod cache;
mod kv;
mod source;
pub mod unstructured;

pub use cache::{WatchCache, decode_summaries, encode_summaries};
pub use kv::{KeyValueStore, MemoryKv};
pub use source::{ChannelWatcher, RepositoryWatcher, WatchEvent};
