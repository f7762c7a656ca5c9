// src/watch/kv.rs

//! Key-value cache backend
//!
//! The watch cache only needs byte values under string keys, so the backend
//! contract is four operations. [`MemoryKv`] is the in-process backend used
//! when no external server is configured, and in tests.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Byte-valued key-value store shared by concurrent tasks
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Check that the store is reachable
    async fn ping(&self) -> Result<()>;

    /// Read a value; `Ok(None)` on a miss
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value with no expiry
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a key; returns whether it existed
    async fn del(&self, key: &str) -> Result<bool>;
}

/// In-process key-value store
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }
}
