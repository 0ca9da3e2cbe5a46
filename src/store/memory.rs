use crate::core::nav::{self, NavPoint};
use crate::core::quotes::QuoteStore;
use crate::core::store::{KeyValueCollection, WriteBatch, WriteOp};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// In-memory collection backed by an ordered map.
#[derive(Default)]
pub struct MemoryCollection {
    inner: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueCollection for MemoryCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let map = self.inner.lock().await;
        Ok(map.get(key).cloned())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.inner.lock().await;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn last_in_range(&self, start: &[u8], end: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if start >= end {
            return Ok(None);
        }
        let map = self.inner.lock().await;
        Ok(map
            .range(start.to_vec()..end.to_vec())
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    async fn apply(&self, batch: WriteBatch) -> Result<()> {
        // Holding the lock for the whole batch makes it atomic for readers.
        let mut map = self.inner.lock().await;
        let ops = batch.into_ops();
        debug!("MemoryCollection applying {} ops", ops.len());
        for op in ops {
            match op {
                WriteOp::Upsert { key, value } => {
                    map.insert(key, value);
                }
                WriteOp::Remove { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

/// In-memory quote store, used by tests and dry runs.
#[derive(Default)]
pub struct MemoryQuoteStore {
    series: Mutex<HashMap<String, Vec<NavPoint>>>,
}

impl MemoryQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuoteStore for MemoryQuoteStore {
    async fn load_series(&self, instrument_id: &str) -> Result<Vec<NavPoint>> {
        let series = self.series.lock().await;
        Ok(series.get(instrument_id).cloned().unwrap_or_default())
    }

    async fn save_series(&self, instrument_id: &str, points: &[NavPoint]) -> Result<()> {
        let normalized = nav::normalize(points.to_vec());
        let mut series = self.series.lock().await;
        series.insert(instrument_id.to_string(), normalized);
        Ok(())
    }

    async fn nav_dates(&self, start: NaiveDate, end: NaiveDate) -> Result<BTreeSet<NaiveDate>> {
        let series = self.series.lock().await;
        Ok(series
            .values()
            .flatten()
            .map(|p| p.date)
            .filter(|d| *d >= start && *d <= end)
            .collect())
    }

    async fn latest_date(&self) -> Result<Option<NaiveDate>> {
        let series = self.series.lock().await;
        Ok(series.values().filter_map(|s| s.last()).map(|p| p.date).max())
    }
}
