//! Point-in-time holdings reconstructed from the transaction ledger.

use crate::core::ledger::{Transaction, TransactionKind};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Net position in one instrument as of a date.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub instrument_id: String,
    pub units: f64,
    /// Units-weighted average buy price, when any folio carries a cost basis.
    pub avg_cost: Option<f64>,
}

#[derive(Default)]
struct FolioPosition {
    net_units: f64,
    buy_units: f64,
    buy_cost: f64,
}

impl FolioPosition {
    fn add(&mut self, tx: &Transaction) {
        self.net_units += tx.signed_units();
        if tx.kind == TransactionKind::Buy {
            self.buy_units += tx.units;
            self.buy_cost += tx.units * tx.price;
        }
    }

    fn avg_cost(&self) -> Option<f64> {
        (self.buy_units > 0.0).then(|| self.buy_cost / self.buy_units)
    }
}

/// Reconstructs active holdings from `transactions` dated on or before `as_of`.
///
/// Units are netted per folio first; folios with no positive balance are
/// dropped before summing across folios. Sells never change the cost basis.
/// An instrument whose total is not above `epsilon` is not an active holding.
/// The result is ordered by instrument id.
pub fn reconstruct_holdings(
    transactions: &[Transaction],
    as_of: NaiveDate,
    epsilon: f64,
) -> Vec<Holding> {
    let mut folios: BTreeMap<(&str, &str), FolioPosition> = BTreeMap::new();
    for tx in transactions.iter().filter(|t| t.date <= as_of) {
        let folio = tx.folio.as_deref().unwrap_or_default();
        folios
            .entry((tx.instrument_id.as_str(), folio))
            .or_default()
            .add(tx);
    }

    let mut by_instrument: BTreeMap<&str, Vec<FolioPosition>> = BTreeMap::new();
    for ((instrument_id, _), position) in folios {
        if position.net_units > 0.0 {
            by_instrument.entry(instrument_id).or_default().push(position);
        }
    }

    let mut holdings = Vec::new();
    for (instrument_id, positions) in by_instrument {
        let units: f64 = positions.iter().map(|p| p.net_units).sum();
        if units <= epsilon {
            debug!("Dropping {} with {} residual units", instrument_id, units);
            continue;
        }

        let (costed_units, costed_value) = positions
            .iter()
            .filter_map(|p| p.avg_cost().map(|c| (p.net_units, p.net_units * c)))
            .fold((0.0, 0.0), |(u, v), (pu, pv)| (u + pu, v + pv));
        let avg_cost = (costed_units > 0.0).then(|| costed_value / costed_units);

        holdings.push(Holding {
            instrument_id: instrument_id.to_string(),
            units,
            avg_cost,
        });
    }
    holdings
}

/// Net units per instrument over every transaction, without folio netting or
/// epsilon filtering. Used to cross-check an external holdings record.
pub fn net_units_by_instrument(transactions: &[Transaction]) -> HashMap<String, f64> {
    let mut units: HashMap<String, f64> = HashMap::new();
    for tx in transactions {
        *units.entry(tx.instrument_id.clone()).or_default() += tx.signed_units();
    }
    units
}
