//! Persisted portfolio valuations.
//!
//! Snapshots are derived data: each one is a pure function of the ledger and
//! the NAV history as of its date, so they are always written by upsert and a
//! rerun for the same `(client, date)` replaces the previous result in full.

use crate::core::store::{KeyValueCollection, WriteBatch, decode_json};
use anyhow::{Context, Result, bail};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const SEP: char = '\u{1f}';
const PORTFOLIO_PREFIX: &str = "ts";
const HOLDING_PREFIX: &str = "hs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub client_id: String,
    pub date: NaiveDate,
    pub portfolio_value: f64,
    pub invested_value: Option<f64>,
    pub day_change: f64,
    pub day_change_pct: f64,
    pub cumulative_return_pct: Option<f64>,
    pub holdings_count: usize,
    /// Date of the snapshot the day change was measured against. `None` marks
    /// a first observation, whose day change is reported as zero.
    pub previous_date: Option<NaiveDate>,
}

impl PortfolioSnapshot {
    pub fn is_first_observation(&self) -> bool {
        self.previous_date.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingSnapshot {
    pub client_id: String,
    pub date: NaiveDate,
    pub instrument_id: String,
    pub units: f64,
    pub nav: f64,
    /// Date of the NAV used, which may precede `date` on holidays.
    pub nav_date: NaiveDate,
    pub value: f64,
}

/// Performance of one calendar month of a client's stored series.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyReturn {
    /// `YYYY-MM`
    pub month: String,
    pub start_value: f64,
    pub end_value: f64,
    /// Percent change from the first to the last value of the month.
    pub return_pct: f64,
    /// Dates of the largest gain and loss. Absent for single-day months.
    pub best_day: Option<NaiveDate>,
    pub worst_day: Option<NaiveDate>,
    pub trading_days: usize,
}

/// Groups an ascending series by calendar month.
pub fn monthly_returns(series: &[PortfolioSnapshot]) -> Vec<MonthlyReturn> {
    series
        .chunk_by(|a, b| (a.date.year(), a.date.month()) == (b.date.year(), b.date.month()))
        .filter_map(month_summary)
        .collect()
}

fn month_summary(days: &[PortfolioSnapshot]) -> Option<MonthlyReturn> {
    let first = days.first()?;
    let last = days.last()?;
    let return_pct = if first.portfolio_value > 0.0 {
        (last.portfolio_value / first.portfolio_value - 1.0) * 100.0
    } else {
        0.0
    };

    let mut best: Option<&PortfolioSnapshot> = None;
    let mut worst: Option<&PortfolioSnapshot> = None;
    if days.len() > 1 {
        for day in days.iter().filter(|s| !s.is_first_observation()) {
            if best.is_none_or(|b| day.day_change > b.day_change) {
                best = Some(day);
            }
            if worst.is_none_or(|w| day.day_change < w.day_change) {
                worst = Some(day);
            }
        }
    }

    Some(MonthlyReturn {
        month: first.date.format("%Y-%m").to_string(),
        start_value: first.portfolio_value,
        end_value: last.portfolio_value,
        return_pct,
        best_day: best.map(|s| s.date),
        worst_day: worst.map(|s| s.date),
        trading_days: days.len(),
    })
}

fn check_part(part: &str) -> Result<&str> {
    if part.is_empty() || part.contains(SEP) {
        bail!("Invalid key component: '{part}'");
    }
    Ok(part)
}

fn client_prefix(kind: &str, client_id: &str) -> Result<String> {
    Ok(format!("{kind}{SEP}{}{SEP}", check_part(client_id)?))
}

fn portfolio_key(client_id: &str, date: NaiveDate) -> Result<String> {
    Ok(format!("{}{date}", client_prefix(PORTFOLIO_PREFIX, client_id)?))
}

fn holdings_prefix(client_id: &str, date: NaiveDate) -> Result<String> {
    Ok(format!("{}{date}{SEP}", client_prefix(HOLDING_PREFIX, client_id)?))
}

fn holding_key(holding: &HoldingSnapshot) -> Result<String> {
    Ok(format!(
        "{}{}",
        holdings_prefix(&holding.client_id, holding.date)?,
        check_part(&holding.instrument_id)?
    ))
}

/// Portfolio time series and holdings line items over one key/value
/// collection. Keys sort by client then ISO date, so prefix scans come back in
/// date order.
pub struct SnapshotRepository {
    collection: Arc<dyn KeyValueCollection>,
}

impl SnapshotRepository {
    pub fn new(collection: Arc<dyn KeyValueCollection>) -> Self {
        Self { collection }
    }

    /// Writes the snapshot and its full set of line items in one batch. Line
    /// items stored earlier for the same client and date but absent from
    /// `holdings` are removed.
    pub async fn upsert(
        &self,
        snapshot: &PortfolioSnapshot,
        holdings: &[HoldingSnapshot],
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.upsert_json(portfolio_key(&snapshot.client_id, snapshot.date)?, snapshot)?;

        let mut current = HashSet::new();
        for holding in holdings {
            if holding.client_id != snapshot.client_id || holding.date != snapshot.date {
                bail!(
                    "Line item for {}/{} does not belong to snapshot {}/{}",
                    holding.client_id,
                    holding.date,
                    snapshot.client_id,
                    snapshot.date
                );
            }
            let key = holding_key(holding)?;
            batch.upsert_json(key.clone(), holding)?;
            current.insert(key.into_bytes());
        }

        let prefix = holdings_prefix(&snapshot.client_id, snapshot.date)?;
        for (key, _) in self.collection.scan_prefix(prefix.as_bytes()).await? {
            if !current.contains(&key) {
                batch.remove(key);
            }
        }

        debug!(
            "Upserting snapshot {}/{} with {} ops",
            snapshot.client_id,
            snapshot.date,
            batch.len()
        );
        self.collection
            .apply(batch)
            .await
            .with_context(|| {
                format!(
                    "Failed to store snapshot for {} on {}",
                    snapshot.client_id, snapshot.date
                )
            })
    }

    pub async fn get(&self, client_id: &str, date: NaiveDate) -> Result<Option<PortfolioSnapshot>> {
        let key = portfolio_key(client_id, date)?;
        match self.collection.get(key.as_bytes()).await? {
            Some(bytes) => Ok(Some(decode_json(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Most recent snapshot for `client_id` dated strictly before `date`.
    pub async fn previous_snapshot(
        &self,
        client_id: &str,
        date: NaiveDate,
    ) -> Result<Option<PortfolioSnapshot>> {
        let prefix = client_prefix(PORTFOLIO_PREFIX, client_id)?;
        let key = portfolio_key(client_id, date)?;
        match self
            .collection
            .last_in_range(prefix.as_bytes(), key.as_bytes())
            .await?
        {
            Some((_, value)) => Ok(Some(decode_json(&value)?)),
            None => Ok(None),
        }
    }

    /// Deletes the snapshot for `client_id` on `date` with its line items.
    /// Returns whether a snapshot was stored.
    pub async fn remove(&self, client_id: &str, date: NaiveDate) -> Result<bool> {
        let key = portfolio_key(client_id, date)?;
        let existed = self.collection.get(key.as_bytes()).await?.is_some();

        let mut batch = WriteBatch::new();
        batch.remove(key);
        let prefix = holdings_prefix(client_id, date)?;
        for (key, _) in self.collection.scan_prefix(prefix.as_bytes()).await? {
            batch.remove(key);
        }
        debug!("Removing snapshot {}/{} with {} ops", client_id, date, batch.len());
        self.collection
            .apply(batch)
            .await
            .with_context(|| format!("Failed to remove snapshot for {client_id} on {date}"))?;
        Ok(existed)
    }

    /// Stored snapshots for `client_id` within the optional bounds, ascending.
    pub async fn timeseries(
        &self,
        client_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<PortfolioSnapshot>> {
        let prefix = client_prefix(PORTFOLIO_PREFIX, client_id)?;
        let mut series = Vec::new();
        for (_, value) in self.collection.scan_prefix(prefix.as_bytes()).await? {
            let snapshot: PortfolioSnapshot = decode_json(&value)?;
            if start.is_some_and(|s| snapshot.date < s) || end.is_some_and(|e| snapshot.date > e) {
                continue;
            }
            series.push(snapshot);
        }
        Ok(series)
    }

    /// Month-by-month summary of the stored series within the optional bounds.
    pub async fn monthly_returns(
        &self,
        client_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<MonthlyReturn>> {
        let series = self.timeseries(client_id, start, end).await?;
        Ok(monthly_returns(&series))
    }

    /// Every client's snapshot on `date`, largest portfolio first.
    pub async fn snapshots_on(&self, date: NaiveDate) -> Result<Vec<PortfolioSnapshot>> {
        let prefix = format!("{PORTFOLIO_PREFIX}{SEP}");
        let mut snapshots = Vec::new();
        for (_, value) in self.collection.scan_prefix(prefix.as_bytes()).await? {
            let snapshot: PortfolioSnapshot = decode_json(&value)?;
            if snapshot.date == date {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by(|a, b| b.portfolio_value.total_cmp(&a.portfolio_value));
        Ok(snapshots)
    }

    pub async fn holdings_on(
        &self,
        client_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<HoldingSnapshot>> {
        let prefix = holdings_prefix(client_id, date)?;
        self.collection
            .scan_prefix(prefix.as_bytes())
            .await?
            .iter()
            .map(|(_, value)| decode_json(value))
            .collect()
    }
}
