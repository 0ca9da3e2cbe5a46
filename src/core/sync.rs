//! Keeps per-instrument NAV history fresh.
//!
//! Each instrument is brought up to date either by appending the latest quote
//! from the bulk publication (when it closes a short gap) or by fetching the
//! missing date range from the history endpoint in bounded windows.

use crate::core::config::SyncConfig;
use crate::core::instrument::Instrument;
use crate::core::nav::{self, NavPoint};
use crate::core::quotes::{NavHistorySource, QuoteStore};
use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument as _;
use tracing::{debug, error, info, info_span, warn};

/// What a sync run should do for one instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncAction {
    /// Stored history already reaches today.
    Noop,
    /// Append the bulk quote to the stored series.
    Append(NavPoint),
    /// Fetch `[from, to]` from the history endpoint.
    RangeFetch { from: NaiveDate, to: NaiveDate },
}

/// Chooses between appending the bulk quote and a ranged fetch.
///
/// The bulk quote is used only when there is stored history and the quote
/// lands after it within `config.fast_path_max_gap_days`.
pub fn decide(
    last_known: Option<NaiveDate>,
    hint: Option<NavPoint>,
    today: NaiveDate,
    config: &SyncConfig,
) -> SyncAction {
    let Some(last) = last_known else {
        let from = today - Duration::days(365 * i64::from(config.years_back));
        return SyncAction::RangeFetch { from, to: today };
    };

    if let Some(point) = hint
        && point.date > last
        && (point.date - last).num_days() <= config.fast_path_max_gap_days
    {
        return SyncAction::Append(point);
    }

    let from = last + Duration::days(1);
    if from > today {
        SyncAction::Noop
    } else {
        SyncAction::RangeFetch { from, to: today }
    }
}

/// Splits `[start, end]` into consecutive inclusive windows whose end is at
/// most `max_days` after their start.
pub fn split_window(start: NaiveDate, end: NaiveDate, max_days: i64) -> Vec<(NaiveDate, NaiveDate)> {
    let mut windows = Vec::new();
    let mut current = start;
    while current <= end {
        let window_end = (current + Duration::days(max_days.max(0))).min(end);
        windows.push((current, window_end));
        current = window_end + Duration::days(1);
    }
    windows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    UpToDate,
    Appended,
    Fetched { added: usize },
    /// Nothing new upstream, stored history left as is.
    NoNewData,
    /// Nothing stored and nothing retrievable.
    NoData,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, SyncOutcome::NoData)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncSummary {
    pub up_to_date: usize,
    pub appended: usize,
    pub fetched: usize,
    pub no_new_data: usize,
    pub no_data: usize,
    /// Instruments without a usable scheme code.
    pub skipped: usize,
    /// Instruments whose sync returned an error.
    pub failed: Vec<String>,
}

impl SyncSummary {
    fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::UpToDate => self.up_to_date += 1,
            SyncOutcome::Appended => self.appended += 1,
            SyncOutcome::Fetched { .. } => self.fetched += 1,
            SyncOutcome::NoNewData => self.no_new_data += 1,
            SyncOutcome::NoData => self.no_data += 1,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.up_to_date + self.appended + self.fetched + self.no_new_data
    }
}

pub struct NavSynchronizer {
    store: Arc<dyn QuoteStore>,
    source: Arc<dyn NavHistorySource>,
    config: SyncConfig,
    today: Option<NaiveDate>,
}

impl NavSynchronizer {
    pub fn new(
        store: Arc<dyn QuoteStore>,
        source: Arc<dyn NavHistorySource>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            source,
            config,
            today: None,
        }
    }

    /// Pins the date treated as "today".
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// Brings the stored series for `instrument` up to date.
    ///
    /// A history window that cannot be fetched is logged and skipped; records
    /// from the other windows are still stored. Only storage failures are
    /// returned as errors.
    pub async fn ensure_updated(
        &self,
        instrument: &Instrument,
        hint: Option<NavPoint>,
    ) -> Result<SyncOutcome> {
        let id = instrument.isin.as_str();
        let existing = self.store.load_series(id).await?;
        let last_known = existing.last().map(|p| p.date);
        let today = self.today();

        match decide(last_known, hint, today, &self.config) {
            SyncAction::Noop => {
                info!("{} is already up to date", instrument.name);
                Ok(SyncOutcome::UpToDate)
            }
            SyncAction::Append(point) => {
                info!(
                    "Appending latest NAV for {} ({})",
                    instrument.name, point.date
                );
                let merged = nav::merge_keep_last(&existing, &[point]);
                self.store
                    .save_series(id, &merged)
                    .await
                    .with_context(|| format!("Failed to store NAV history for {id}"))?;
                Ok(SyncOutcome::Appended)
            }
            SyncAction::RangeFetch { from, to } => {
                let code = instrument
                    .syncable_code()
                    .with_context(|| format!("{id} has no numeric scheme code"))?;
                match last_known {
                    Some(_) => info!("Updating {} ({}) from {} to {}", instrument.name, code, from, to),
                    None => info!("Downloading full history for {} ({}) from {}", instrument.name, code, from),
                }

                let fetched = self.fetch_windows(code, from, to).await;
                if fetched.is_empty() {
                    return Ok(match last_known {
                        Some(last) => {
                            info!("No new data for {} since {}", instrument.name, last);
                            SyncOutcome::NoNewData
                        }
                        None => {
                            warn!("No data found for {} ({})", instrument.name, code);
                            SyncOutcome::NoData
                        }
                    });
                }

                let merged = nav::merge_keep_last(&existing, &fetched);
                let added = merged.len().saturating_sub(existing.len());
                self.store
                    .save_series(id, &merged)
                    .await
                    .with_context(|| format!("Failed to store NAV history for {id}"))?;
                Ok(SyncOutcome::Fetched { added })
            }
        }
    }

    async fn fetch_windows(&self, code: &str, from: NaiveDate, to: NaiveDate) -> Vec<NavPoint> {
        let mut points = Vec::new();
        for (start, end) in split_window(from, to, self.config.max_window_days) {
            match self.source.fetch_range(code, start, end).await {
                Ok(batch) => {
                    debug!("Fetched {} records for {} ({} to {})", batch.len(), code, start, end);
                    points.extend(batch);
                }
                Err(e) => warn!("Skipping {} to {} for {}: {:#}", start, end, code, e),
            }
        }
        points
    }

    /// Syncs every instrument, isolating failures per instrument.
    ///
    /// `hints` maps scheme codes to their latest bulk quote. `progress` is
    /// called once per instrument.
    pub async fn sync_all(
        &self,
        instruments: &[Instrument],
        hints: &HashMap<String, NavPoint>,
        progress: &(dyn Fn() + Send + Sync),
    ) -> SyncSummary {
        let mut summary = SyncSummary::default();
        let mut syncable = Vec::new();
        for instrument in instruments {
            match instrument.syncable_code() {
                Some(code) => syncable.push((instrument, hints.get(code).copied())),
                None => {
                    warn!(
                        "Skipping {} ({}): no numeric scheme code",
                        instrument.name, instrument.isin
                    );
                    summary.skipped += 1;
                    progress();
                }
            }
        }

        let results: Vec<_> = stream::iter(syncable)
            .map(|(instrument, hint)| {
                let span = info_span!("sync", instrument = %instrument.isin);
                async move {
                    let result = self.ensure_updated(instrument, hint).await;
                    progress();
                    (instrument, result)
                }
                .instrument(span)
            })
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        for (instrument, result) in results {
            match result {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!("Failed to sync {}: {:#}", instrument.isin, e);
                    summary.failed.push(instrument.isin.clone());
                }
            }
        }
        info!(
            "Sync finished: {} succeeded, {} without data, {} skipped, {} failed",
            summary.succeeded(),
            summary.no_data,
            summary.skipped,
            summary.failed.len()
        );
        summary
    }
}
