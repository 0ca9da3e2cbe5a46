//! CSV-backed transaction ledger and current-holdings record.

use crate::core::ledger::{HoldingsRecord, Transaction, TransactionLedger};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, warn};

/// Ledger loaded once from a CSV export with columns `client_code`, `isin`,
/// `folio_no`, `transaction_date`, `transaction_type`, `units`, `nav`,
/// `amount`.
pub struct CsvLedger {
    transactions: Vec<Transaction>,
}

impl CsvLedger {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Transaction ledger not found at {}", path.display());
        }
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to read ledger: {}", path.display()))?;

        let mut transactions = Vec::new();
        for (row, record) in reader.deserialize::<Transaction>().enumerate() {
            match record {
                Ok(tx) if tx.is_valid() => transactions.push(tx),
                Ok(tx) => warn!("Skipping ledger row {} with invalid units/price: {:?}", row + 1, tx),
                Err(e) => warn!("Skipping malformed ledger row {}: {}", row + 1, e),
            }
        }
        debug!("Loaded {} transactions from {}", transactions.len(), path.display());
        Ok(Self::new(transactions))
    }

    pub fn new(mut transactions: Vec<Transaction>) -> Self {
        // Stable sort keeps booking order for same-day rows
        transactions.sort_by_key(|t| t.date);
        Self { transactions }
    }
}

#[async_trait]
impl TransactionLedger for CsvLedger {
    async fn transactions(
        &self,
        client_id: &str,
        up_to: Option<NaiveDate>,
    ) -> Result<Vec<Transaction>> {
        Ok(self
            .transactions
            .iter()
            .filter(|t| t.client_id == client_id)
            .filter(|t| up_to.is_none_or(|d| t.date <= d))
            .cloned()
            .collect())
    }

    async fn clients(&self) -> Result<Vec<String>> {
        let clients: BTreeSet<_> = self.transactions.iter().map(|t| t.client_id.clone()).collect();
        Ok(clients.into_iter().collect())
    }
}

#[derive(Debug, Deserialize)]
struct HoldingRow {
    client_code: String,
    isin: String,
    quantity: f64,
}

/// Current holdings from a CSV with columns `client_code`, `isin`, `quantity`.
pub struct CsvHoldingsRecord {
    units: HashMap<String, HashMap<String, f64>>,
}

impl CsvHoldingsRecord {
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to read holdings: {}", path.display()))?;

        let mut units: HashMap<String, HashMap<String, f64>> = HashMap::new();
        for (row, record) in reader.deserialize::<HoldingRow>().enumerate() {
            match record {
                Ok(r) => {
                    *units
                        .entry(r.client_code)
                        .or_default()
                        .entry(r.isin)
                        .or_default() += r.quantity;
                }
                Err(e) => warn!("Skipping malformed holdings row {}: {}", row + 1, e),
            }
        }
        Ok(Self { units })
    }
}

#[async_trait]
impl HoldingsRecord for CsvHoldingsRecord {
    async fn current_units(&self, client_id: &str) -> Result<HashMap<String, f64>> {
        Ok(self.units.get(client_id).cloned().unwrap_or_default())
    }
}
