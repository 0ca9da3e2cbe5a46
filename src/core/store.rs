//! Key/value collection contract shared by the storage engines.
//!
//! Every write goes through [`KeyValueCollection::apply`], which applies a
//! [`WriteBatch`] atomically. An upsert is a plain keyed write: it inserts the
//! key when absent and replaces the stored value otherwise, so replaying the
//! same batch leaves the collection unchanged.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Upsert { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

/// A set of writes that must succeed or fail together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, key: impl Into<Vec<u8>>, value: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Upsert {
            key: key.into(),
            value,
        });
        self
    }

    /// Serializes `value` as JSON and queues an upsert.
    pub fn upsert_json<V: Serialize>(&mut self, key: impl Into<Vec<u8>>, value: &V) -> Result<&mut Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.upsert(key, bytes))
    }

    pub fn remove(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(WriteOp::Remove { key: key.into() });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// The entry with the greatest key in `start..end`, if any.
    async fn last_in_range(&self, start: &[u8], end: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Applies every operation in `batch`, or none of them.
    async fn apply(&self, batch: WriteBatch) -> Result<()>;

    async fn upsert(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.upsert(key, value);
        self.apply(batch).await
    }
}

/// Decodes a JSON value stored by [`WriteBatch::upsert_json`].
pub fn decode_json<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    Ok(serde_json::from_slice(bytes)?)
}
