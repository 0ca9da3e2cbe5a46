//! Contracts for the NAV history store and the upstream NAV publisher.

use crate::core::nav::{self, NavPoint};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeSet;

/// Per-instrument NAV time series, keyed by instrument id.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Stored series sorted ascending by date; empty when unknown.
    async fn load_series(&self, instrument_id: &str) -> Result<Vec<NavPoint>>;

    /// Replaces the stored series. Implementations dedupe (keep-last) and
    /// sort before writing, and write atomically.
    async fn save_series(&self, instrument_id: &str, points: &[NavPoint]) -> Result<()>;

    /// Dates in `[start, end]` with at least one NAV point for any instrument.
    async fn nav_dates(&self, start: NaiveDate, end: NaiveDate) -> Result<BTreeSet<NaiveDate>>;

    /// Most recent NAV date across all instruments.
    async fn latest_date(&self) -> Result<Option<NaiveDate>>;

    async fn nav_on_or_before(
        &self,
        instrument_id: &str,
        date: NaiveDate,
    ) -> Result<Option<NavPoint>> {
        let series = self.load_series(instrument_id).await?;
        Ok(nav::latest_on_or_before(&series, date).copied())
    }

    /// Merges `points` into the stored series, later values winning per date.
    async fn upsert_points(&self, instrument_id: &str, points: &[NavPoint]) -> Result<()> {
        let existing = self.load_series(instrument_id).await?;
        let merged = nav::merge_keep_last(&existing, points);
        self.save_series(instrument_id, &merged).await
    }
}

/// Ranged historical NAV query against the upstream publisher.
#[async_trait]
pub trait NavHistorySource: Send + Sync {
    /// NAVs for `scheme_code` within `[from, to]`. Malformed records are
    /// dropped; an `Err` means the range could not be fetched at all.
    async fn fetch_range(
        &self,
        scheme_code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NavPoint>>;
}
