//! Transaction ledger contracts.
//!
//! The ledger is append-only from this crate's point of view: transactions are
//! booked elsewhere and only ever read here.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransactionKind {
    Buy,
    Sell,
}

impl TryFrom<String> for TransactionKind {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BUY" | "PURCHASE" => Ok(TransactionKind::Buy),
            "SELL" | "REDEMPTION" => Ok(TransactionKind::Sell),
            other => bail!("Unknown transaction type: {other}"),
        }
    }
}

impl From<TransactionKind> for String {
    fn from(kind: TransactionKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Buy => write!(f, "BUY"),
            TransactionKind::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "client_code")]
    pub client_id: String,
    #[serde(rename = "isin")]
    pub instrument_id: String,
    #[serde(rename = "folio_no", default)]
    pub folio: Option<String>,
    #[serde(rename = "transaction_date")]
    pub date: NaiveDate,
    #[serde(rename = "transaction_type")]
    pub kind: TransactionKind,
    pub units: f64,
    /// Per-unit price paid or received.
    #[serde(rename = "nav")]
    pub price: f64,
    #[serde(default)]
    pub amount: Option<f64>,
}

impl Transaction {
    /// Units with the sign of the transaction: positive for buys.
    pub fn signed_units(&self) -> f64 {
        match self.kind {
            TransactionKind::Buy => self.units,
            TransactionKind::Sell => -self.units,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.units.is_finite() && self.units > 0.0 && self.price.is_finite() && self.price >= 0.0
    }
}

#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Transactions for `client_id` dated on or before `up_to` (all when
    /// `None`), ordered by date.
    async fn transactions(
        &self,
        client_id: &str,
        up_to: Option<NaiveDate>,
    ) -> Result<Vec<Transaction>>;

    /// Distinct client ids with at least one transaction.
    async fn clients(&self) -> Result<Vec<String>>;

    async fn first_transaction_date(&self, client_id: &str) -> Result<Option<NaiveDate>> {
        let transactions = self.transactions(client_id, None).await?;
        Ok(transactions.iter().map(|t| t.date).min())
    }
}

/// Externally maintained current holdings, used only for consistency checks.
#[async_trait]
pub trait HoldingsRecord: Send + Sync {
    /// Recorded units per instrument; empty when the client has no rows.
    async fn current_units(&self, client_id: &str) -> Result<HashMap<String, f64>>;
}
