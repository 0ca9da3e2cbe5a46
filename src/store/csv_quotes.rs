//! Quote store keeping one `Date,NAV` CSV file per instrument.

use crate::core::cache::Cache;
use crate::core::nav::{self, NavPoint};
use crate::core::quotes::QuoteStore;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct CsvQuoteStore {
    dir: PathBuf,
    cache: Cache<String, Vec<NavPoint>>,
}

impl CsvQuoteStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create NAV directory: {}", dir.display()))?;
        Ok(Self {
            dir,
            cache: Cache::new(),
        })
    }

    fn series_path(&self, instrument_id: &str) -> Result<PathBuf> {
        if instrument_id.is_empty()
            || instrument_id.contains(['/', '\\'])
            || instrument_id.starts_with('.')
        {
            bail!("Invalid instrument id for NAV file: '{instrument_id}'");
        }
        Ok(self.dir.join(format!("{instrument_id}.csv")))
    }

    async fn cached_series(&self, instrument_id: &str) -> Result<Arc<Vec<NavPoint>>> {
        let key = instrument_id.to_string();
        if let Some(series) = self.cache.get(&key).await {
            return Ok(series);
        }
        let path = self.series_path(instrument_id)?;
        let series = read_series(&path)?;
        Ok(self.cache.put(key, series).await)
    }

    fn instrument_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list NAV directory: {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Reads a NAV file, skipping rows that do not parse. A missing file is an
/// empty series.
fn read_series(path: &Path) -> Result<Vec<NavPoint>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open NAV file: {}", path.display()))?;

    let mut points = Vec::new();
    for (row, record) in reader.deserialize::<NavPoint>().enumerate() {
        match record {
            Ok(point) if point.is_valid() => points.push(point),
            Ok(point) => debug!("Skipping invalid NAV {:?} in {}", point, path.display()),
            Err(e) => warn!("Skipping malformed row {} in {}: {}", row + 1, path.display(), e),
        }
    }
    Ok(nav::normalize(points))
}

fn write_series(path: &Path, points: &[NavPoint]) -> Result<()> {
    let tmp_path = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp_path)
            .with_context(|| format!("Failed to create NAV file: {}", tmp_path.display()))?;
        for point in points {
            writer.serialize(point)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace NAV file: {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl QuoteStore for CsvQuoteStore {
    async fn load_series(&self, instrument_id: &str) -> Result<Vec<NavPoint>> {
        Ok(self.cached_series(instrument_id).await?.as_ref().clone())
    }

    async fn save_series(&self, instrument_id: &str, points: &[NavPoint]) -> Result<()> {
        let path = self.series_path(instrument_id)?;
        let normalized = nav::normalize(points.to_vec());
        write_series(&path, &normalized)?;
        self.cache.invalidate(&instrument_id.to_string()).await;
        info!(
            "Saved {} records for {} to {}",
            normalized.len(),
            instrument_id,
            path.display()
        );
        Ok(())
    }

    async fn nav_on_or_before(
        &self,
        instrument_id: &str,
        date: NaiveDate,
    ) -> Result<Option<NavPoint>> {
        let series = self.cached_series(instrument_id).await?;
        Ok(nav::latest_on_or_before(&series, date).copied())
    }

    async fn nav_dates(&self, start: NaiveDate, end: NaiveDate) -> Result<BTreeSet<NaiveDate>> {
        let mut dates = BTreeSet::new();
        for id in self.instrument_ids()? {
            let series = self.cached_series(&id).await?;
            dates.extend(
                series
                    .iter()
                    .map(|p| p.date)
                    .filter(|d| *d >= start && *d <= end),
            );
        }
        Ok(dates)
    }

    async fn latest_date(&self) -> Result<Option<NaiveDate>> {
        let mut latest = None;
        for id in self.instrument_ids()? {
            let series = self.cached_series(&id).await?;
            latest = latest.max(series.last().map(|p| p.date));
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_sorted_without_duplicates() {
        let dir = tempdir().unwrap();
        let store = CsvQuoteStore::new(dir.path()).unwrap();

        store
            .save_series(
                "INF200K01RJ1",
                &[
                    NavPoint::new(d(2024, 1, 3), 12.0),
                    NavPoint::new(d(2024, 1, 1), 10.0),
                    NavPoint::new(d(2024, 1, 3), 12.5),
                ],
            )
            .await
            .unwrap();

        let content = fs::read_to_string(dir.path().join("INF200K01RJ1.csv")).unwrap();
        assert_eq!(content, "Date,NAV\n2024-01-01,10.0\n2024-01-03,12.5\n");

        let series = store.load_series("INF200K01RJ1").await.unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].nav, 12.5);
    }

    #[tokio::test]
    async fn test_reads_unsorted_file_and_skips_bad_rows() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("INF200K01RJ1.csv"),
            "Date,NAV\n2024-01-05,15.0\nnot-a-date,1.0\n2024-01-02,abc\n2024-01-01,10.0\n",
        )
        .unwrap();
        let store = CsvQuoteStore::new(dir.path()).unwrap();

        let series = store.load_series("INF200K01RJ1").await.unwrap();

        assert_eq!(
            series,
            vec![
                NavPoint::new(d(2024, 1, 1), 10.0),
                NavPoint::new(d(2024, 1, 5), 15.0)
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_instrument_is_empty() {
        let dir = tempdir().unwrap();
        let store = CsvQuoteStore::new(dir.path()).unwrap();

        assert!(store.load_series("INF000000000").await.unwrap().is_empty());
        assert!(store.latest_date().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_invalidates_cached_series() {
        let dir = tempdir().unwrap();
        let store = CsvQuoteStore::new(dir.path()).unwrap();
        store
            .save_series("A", &[NavPoint::new(d(2024, 1, 1), 1.0)])
            .await
            .unwrap();
        assert_eq!(store.load_series("A").await.unwrap().len(), 1);

        store
            .upsert_points("A", &[NavPoint::new(d(2024, 1, 2), 2.0)])
            .await
            .unwrap();

        assert_eq!(store.load_series("A").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dates_across_instruments() {
        let dir = tempdir().unwrap();
        let store = CsvQuoteStore::new(dir.path()).unwrap();
        store
            .save_series(
                "A",
                &[
                    NavPoint::new(d(2024, 1, 1), 1.0),
                    NavPoint::new(d(2024, 1, 3), 1.1),
                ],
            )
            .await
            .unwrap();
        store
            .save_series("B", &[NavPoint::new(d(2024, 1, 4), 2.0)])
            .await
            .unwrap();

        let dates = store.nav_dates(d(2024, 1, 2), d(2024, 1, 4)).await.unwrap();

        assert_eq!(
            dates.into_iter().collect::<Vec<_>>(),
            vec![d(2024, 1, 3), d(2024, 1, 4)]
        );
        assert_eq!(store.latest_date().await.unwrap(), Some(d(2024, 1, 4)));
        assert_eq!(
            store
                .nav_on_or_before("A", d(2024, 1, 2))
                .await
                .unwrap()
                .map(|p| p.nav),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempdir().unwrap();
        let store = CsvQuoteStore::new(dir.path()).unwrap();

        assert!(store.save_series("../escape", &[]).await.is_err());
    }
}
