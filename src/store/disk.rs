use crate::core::store::{KeyValueCollection, WriteBatch, WriteOp};
use anyhow::{Context, Result};
use async_trait::async_trait;
use fjall::{Keyspace, PartitionHandle, PersistMode};
use std::sync::Arc;
use tracing::debug;

/// A fjall partition exposed as a [`KeyValueCollection`].
///
/// Batches are committed through the owning keyspace so that all writes of a
/// unit land together, then flushed to disk before `apply` returns.
pub struct DiskCollection {
    keyspace: Arc<Keyspace>,
    partition: PartitionHandle,
}

impl DiskCollection {
    pub fn new(keyspace: Arc<Keyspace>, partition: PartitionHandle) -> Self {
        Self {
            keyspace,
            partition,
        }
    }
}

#[async_trait]
impl KeyValueCollection for DiskCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.partition.get(key)?;
        Ok(value.map(|v| v.to_vec()))
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for item in self.partition.prefix(prefix) {
            let (key, value) = item?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    async fn last_in_range(&self, start: &[u8], end: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if start >= end {
            return Ok(None);
        }
        match self.partition.range(start..end).next_back() {
            Some(item) => {
                let (key, value) = item?;
                Ok(Some((key.to_vec(), value.to_vec())))
            }
            None => Ok(None),
        }
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        let ops = batch.into_ops();
        let op_count = ops.len();
        let mut fjall_batch = self.keyspace.batch();
        for op in ops {
            match op {
                WriteOp::Upsert { key, value } => fjall_batch.insert(&self.partition, key, value),
                WriteOp::Remove { key } => fjall_batch.remove(&self.partition, key),
            }
        }
        fjall_batch
            .commit()
            .context("Failed to commit write batch")?;
        self.keyspace
            .persist(PersistMode::SyncAll)
            .context("Failed to persist write batch")?;
        debug!("DiskCollection committed {} ops", op_count);
        Ok(())
    }
}
