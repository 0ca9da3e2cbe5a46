//! Transaction-aware portfolio valuation.
//!
//! Holdings are rebuilt from the ledger as of each valuation date, priced
//! with the most recent NAV on or before that date, and stored as a snapshot
//! whose day change is measured against the client's previous snapshot.

use crate::core::config::ValuationConfig;
use crate::core::holdings::{self, Holding};
use crate::core::ledger::{HoldingsRecord, TransactionLedger};
use crate::core::quotes::QuoteStore;
use crate::core::snapshot::{HoldingSnapshot, PortfolioSnapshot, SnapshotRepository};
use anyhow::Result;
use chrono::{Duration, NaiveDate};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::Instrument as _;
use tracing::{debug, error, info, info_span, warn};

const PROGRESS_LOG_EVERY: usize = 50;

/// A computed valuation, before or after it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Valuation {
    pub snapshot: PortfolioSnapshot,
    pub holdings: Vec<HoldingSnapshot>,
    /// Active holdings left out because no NAV was known on or before the date.
    pub unpriced: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchSummary {
    /// Units that produced a stored snapshot.
    pub valued: usize,
    /// Units with nothing to value (no holdings or no prices).
    pub empty: usize,
    /// Units that failed, by client id or date.
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Discrepancy {
    pub instrument_id: String,
    pub ledger_units: f64,
    pub recorded_units: f64,
}

impl Discrepancy {
    pub fn difference(&self) -> f64 {
        (self.ledger_units - self.recorded_units).abs()
    }
}

pub struct ValuationEngine {
    ledger: Arc<dyn TransactionLedger>,
    quotes: Arc<dyn QuoteStore>,
    snapshots: SnapshotRepository,
    holdings_record: Option<Arc<dyn HoldingsRecord>>,
    epsilon: f64,
}

impl ValuationEngine {
    pub fn new(
        ledger: Arc<dyn TransactionLedger>,
        quotes: Arc<dyn QuoteStore>,
        snapshots: SnapshotRepository,
        config: &ValuationConfig,
    ) -> Self {
        Self {
            ledger,
            quotes,
            snapshots,
            holdings_record: None,
            epsilon: config.holding_epsilon,
        }
    }

    pub fn with_holdings_record(mut self, record: Arc<dyn HoldingsRecord>) -> Self {
        self.holdings_record = Some(record);
        self
    }

    pub fn snapshots(&self) -> &SnapshotRepository {
        &self.snapshots
    }

    async fn holdings_on(&self, client_id: &str, date: NaiveDate) -> Result<Vec<Holding>> {
        let transactions = self.ledger.transactions(client_id, Some(date)).await?;
        Ok(holdings::reconstruct_holdings(
            &transactions,
            date,
            self.epsilon,
        ))
    }

    /// Computes the valuation for `client_id` on `date` without storing it.
    ///
    /// Returns `None` when the client holds nothing on `date` or none of the
    /// holdings can be priced.
    pub async fn preview(&self, client_id: &str, date: NaiveDate) -> Result<Option<Valuation>> {
        let holdings = self.holdings_on(client_id, date).await?;
        if holdings.is_empty() {
            debug!("No holdings for {} on {}", client_id, date);
            return Ok(None);
        }

        let mut lines = Vec::new();
        let mut unpriced = Vec::new();
        let mut portfolio_value = 0.0;
        let mut invested = None;
        for holding in &holdings {
            let Some(point) = self
                .quotes
                .nav_on_or_before(&holding.instrument_id, date)
                .await?
            else {
                warn!("No NAV for {} on or before {}", holding.instrument_id, date);
                unpriced.push(holding.instrument_id.clone());
                continue;
            };

            let value = holding.units * point.nav;
            portfolio_value += value;
            if let Some(cost) = holding.avg_cost {
                *invested.get_or_insert(0.0) += holding.units * cost;
            }
            lines.push(HoldingSnapshot {
                client_id: client_id.to_string(),
                date,
                instrument_id: holding.instrument_id.clone(),
                units: holding.units,
                nav: point.nav,
                nav_date: point.date,
                value,
            });
        }

        if lines.is_empty() || portfolio_value == 0.0 {
            debug!("Nothing to value for {} on {}", client_id, date);
            return Ok(None);
        }

        let invested_value = invested.filter(|v: &f64| *v > 0.0);
        let cumulative_return_pct =
            invested_value.map(|inv| (portfolio_value - inv) / inv * 100.0);

        let previous = self.snapshots.previous_snapshot(client_id, date).await?;
        let (day_change, day_change_pct, previous_date) = match &previous {
            Some(prev) => {
                let change = portfolio_value - prev.portfolio_value;
                let pct = if prev.portfolio_value > 0.0 {
                    change / prev.portfolio_value * 100.0
                } else {
                    0.0
                };
                (change, pct, Some(prev.date))
            }
            None => (0.0, 0.0, None),
        };

        Ok(Some(Valuation {
            snapshot: PortfolioSnapshot {
                client_id: client_id.to_string(),
                date,
                portfolio_value,
                invested_value,
                day_change,
                day_change_pct,
                cumulative_return_pct,
                holdings_count: lines.len(),
                previous_date,
            },
            holdings: lines,
            unpriced,
        }))
    }

    /// Values `client_id` on `date` and stores the snapshot with its line
    /// items. Rerunning for the same date replaces the stored result, or
    /// removes it when nothing is left to value.
    pub async fn value_on(&self, client_id: &str, date: NaiveDate) -> Result<Option<Valuation>> {
        let span = info_span!("valuation", client = %client_id, %date);
        self.value_and_store(client_id, date).instrument(span).await
    }

    async fn value_and_store(&self, client_id: &str, date: NaiveDate) -> Result<Option<Valuation>> {
        let Some(valuation) = self.preview(client_id, date).await? else {
            // Drop any result stored by an earlier run
            if self.snapshots.remove(client_id, date).await? {
                info!("Removed stale snapshot for {} on {}", client_id, date);
            }
            return Ok(None);
        };
        self.snapshots
            .upsert(&valuation.snapshot, &valuation.holdings)
            .await?;
        info!(
            "Updated {} on {}: {:.2} ({} holdings)",
            client_id,
            date,
            valuation.snapshot.portfolio_value,
            valuation.snapshot.holdings_count
        );
        Ok(Some(valuation))
    }

    /// Values every client in the ledger on `date`. A failing client is
    /// logged and does not stop the batch.
    pub async fn update_all_clients(
        &self,
        date: NaiveDate,
        progress: &(dyn Fn() + Send + Sync),
    ) -> Result<BatchSummary> {
        let clients = self.ledger.clients().await?;
        info!("Valuing {} clients on {}", clients.len(), date);

        let mut summary = BatchSummary::default();
        for client_id in clients {
            match self.value_on(&client_id, date).await {
                Ok(Some(_)) => summary.valued += 1,
                Ok(None) => summary.empty += 1,
                Err(e) => {
                    error!("Failed to value {} on {}: {:#}", client_id, date, e);
                    summary.failed.push(client_id);
                }
            }
            progress();
        }
        info!(
            "Valued {} clients on {} ({} empty, {} failed)",
            summary.valued,
            date,
            summary.empty,
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Values `client_id` on every NAV date from its first transaction (or
    /// `days_back` days before the latest NAV date, whichever is later)
    /// through the latest NAV date, oldest first so day changes chain.
    ///
    /// `progress` receives the number of dates in the run after each date.
    pub async fn backfill(
        &self,
        client_id: &str,
        days_back: Option<u32>,
        progress: &(dyn Fn(usize) + Send + Sync),
    ) -> Result<BatchSummary> {
        let span = info_span!("backfill", client = %client_id);
        self.backfill_dates(client_id, days_back, progress)
            .instrument(span)
            .await
    }

    async fn backfill_dates(
        &self,
        client_id: &str,
        days_back: Option<u32>,
        progress: &(dyn Fn(usize) + Send + Sync),
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        let Some(first_date) = self.ledger.first_transaction_date(client_id).await? else {
            warn!("No transactions for {}", client_id);
            return Ok(summary);
        };
        let Some(end) = self.quotes.latest_date().await? else {
            warn!("No NAV data available to backfill {}", client_id);
            return Ok(summary);
        };
        let start = match days_back {
            Some(days) => first_date.max(end - Duration::days(i64::from(days))),
            None => first_date,
        };

        let dates = self.quotes.nav_dates(start, end).await?;
        let total = dates.len();
        info!("Backfilling {} from {} to {} ({} dates)", client_id, start, end, total);

        for (i, date) in dates.into_iter().enumerate() {
            match self.value_on(client_id, date).await {
                Ok(Some(_)) => summary.valued += 1,
                Ok(None) => summary.empty += 1,
                Err(e) => {
                    error!("Failed to value {} on {}: {:#}", client_id, date, e);
                    summary.failed.push(date.to_string());
                }
            }
            if (i + 1) % PROGRESS_LOG_EVERY == 0 {
                info!("Progress: {}/{} ({} valued)", i + 1, total, summary.valued);
            }
            progress(total);
        }
        info!("Backfill completed: {}/{} dates", summary.valued, total);
        Ok(summary)
    }

    /// Compares ledger net units against the external holdings record.
    ///
    /// Returns `None` when no holdings record is configured. Instruments that
    /// appear on only one side count as zero on the other.
    pub async fn verify(&self, client_id: &str) -> Result<Option<Vec<Discrepancy>>> {
        let Some(record) = &self.holdings_record else {
            return Ok(None);
        };
        let transactions = self.ledger.transactions(client_id, None).await?;
        let ledger_units = holdings::net_units_by_instrument(&transactions);
        let recorded_units = record.current_units(client_id).await?;

        let instruments: BTreeSet<&String> =
            ledger_units.keys().chain(recorded_units.keys()).collect();
        let discrepancies: Vec<Discrepancy> = instruments
            .into_iter()
            .map(|id| Discrepancy {
                instrument_id: id.clone(),
                ledger_units: ledger_units.get(id).copied().unwrap_or_default(),
                recorded_units: recorded_units.get(id).copied().unwrap_or_default(),
            })
            .filter(|d| d.difference() > self.epsilon)
            .collect();

        if discrepancies.is_empty() {
            info!("Holdings consistent with transactions for {}", client_id);
        } else {
            warn!(
                "Found {} holding discrepancies for {}",
                discrepancies.len(),
                client_id
            );
        }
        Ok(Some(discrepancies))
    }
}
