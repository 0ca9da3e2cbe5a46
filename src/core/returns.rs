//! Lookback returns over a fixed panel of periods.

use crate::core::instrument::MasterList;
use crate::core::nav::{self, NavPoint};
use crate::core::quotes::QuoteStore;
use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::{Decimal, prelude::*};
use rust_finprim::rate::cagr;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReturnPeriod {
    OneDay,
    OneMonth,
    ThreeMonths,
    SixMonths,
    YearToDate,
    OneYear,
    TwoYears,
    ThreeYears,
    FiveYears,
    TenYears,
    Inception,
}

impl ReturnPeriod {
    pub const ALL: [ReturnPeriod; 11] = [
        ReturnPeriod::OneDay,
        ReturnPeriod::OneMonth,
        ReturnPeriod::ThreeMonths,
        ReturnPeriod::SixMonths,
        ReturnPeriod::YearToDate,
        ReturnPeriod::OneYear,
        ReturnPeriod::TwoYears,
        ReturnPeriod::ThreeYears,
        ReturnPeriod::FiveYears,
        ReturnPeriod::TenYears,
        ReturnPeriod::Inception,
    ];

    fn lookback_days(&self) -> Option<i64> {
        match self {
            ReturnPeriod::OneDay => Some(1),
            ReturnPeriod::OneMonth => Some(30),
            ReturnPeriod::ThreeMonths => Some(90),
            ReturnPeriod::SixMonths => Some(180),
            ReturnPeriod::OneYear => Some(365),
            ReturnPeriod::TwoYears => Some(365 * 2),
            ReturnPeriod::ThreeYears => Some(365 * 3),
            ReturnPeriod::FiveYears => Some(365 * 5),
            ReturnPeriod::TenYears => Some(365 * 10),
            ReturnPeriod::YearToDate | ReturnPeriod::Inception => None,
        }
    }

    /// Date whose NAV (or the closest earlier one) is the base of the return.
    fn anchor(&self, latest: NaiveDate, first: NaiveDate) -> NaiveDate {
        match self {
            ReturnPeriod::YearToDate => NaiveDate::from_ymd_opt(latest.year() - 1, 12, 31)
                .unwrap_or(first),
            ReturnPeriod::Inception => first,
            _ => latest - Duration::days(self.lookback_days().unwrap_or_default()),
        }
    }

    fn annualizes(&self) -> bool {
        match self {
            ReturnPeriod::Inception => true,
            _ => self.lookback_days().is_some_and(|days| days >= 365),
        }
    }
}

impl fmt::Display for ReturnPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReturnPeriod::OneDay => "1D",
            ReturnPeriod::OneMonth => "1M",
            ReturnPeriod::ThreeMonths => "3M",
            ReturnPeriod::SixMonths => "6M",
            ReturnPeriod::YearToDate => "YTD",
            ReturnPeriod::OneYear => "1Y",
            ReturnPeriod::TwoYears => "2Y",
            ReturnPeriod::ThreeYears => "3Y",
            ReturnPeriod::FiveYears => "5Y",
            ReturnPeriod::TenYears => "10Y",
            ReturnPeriod::Inception => "Inception",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodReturn {
    /// `latest / past - 1`
    pub absolute: f64,
    /// Annualized return, only for spans longer than a year.
    pub cagr: Option<f64>,
}

/// Returns as of the latest point of a series. Periods without a usable base
/// NAV are absent from `returns`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnPanel {
    pub date: NaiveDate,
    pub nav: f64,
    pub returns: BTreeMap<ReturnPeriod, PeriodReturn>,
}

impl ReturnPanel {
    pub fn get(&self, period: ReturnPeriod) -> Option<&PeriodReturn> {
        self.returns.get(&period)
    }
}

fn annualized(past: f64, latest: f64, span_days: i64) -> Option<f64> {
    if latest <= 0.0 || span_days <= 365 {
        return None;
    }
    let begin_bal = Decimal::from_f64(past)?;
    let end_bal = Decimal::from_f64(latest)?;
    let n_years = Decimal::from(span_days) / Decimal::from_f64(365.25)?;
    let rate = cagr(begin_bal, end_bal, n_years);
    debug!("cagr: {begin_bal}, {end_bal}, {n_years} = {rate}");
    rate.to_f64()
}

/// Computes the return panel for a series sorted ascending by date.
pub fn compute(series: &[NavPoint]) -> Option<ReturnPanel> {
    let (first, latest) = (series.first()?, series.last()?);
    let mut returns = BTreeMap::new();

    for period in ReturnPeriod::ALL {
        let anchor = period.anchor(latest.date, first.date);
        let Some(past) = nav::latest_on_or_before(series, anchor) else {
            continue;
        };
        if past.nav <= 0.0 {
            debug!("Skipping {} return: base NAV {} on {}", period, past.nav, past.date);
            continue;
        }

        let absolute = latest.nav / past.nav - 1.0;
        let cagr = if period.annualizes() {
            annualized(past.nav, latest.nav, (latest.date - past.date).num_days())
        } else {
            None
        };
        returns.insert(period, PeriodReturn { absolute, cagr });
    }

    Some(ReturnPanel {
        date: latest.date,
        nav: latest.nav,
        returns,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnsRow {
    pub isin: String,
    pub name: String,
    pub scheme_code: String,
    pub panel: ReturnPanel,
}

/// Computes a row for every instrument in `master` with stored NAV history.
pub async fn build_report(master: &MasterList, store: &dyn QuoteStore) -> Result<Vec<ReturnsRow>> {
    let mut rows = Vec::new();
    for instrument in &master.instruments {
        let Some(code) = instrument.syncable_code() else {
            debug!("Skipping {}: no scheme code", instrument.isin);
            continue;
        };
        let series = match store.load_series(&instrument.isin).await {
            Ok(series) => series,
            Err(e) => {
                warn!("Failed to load NAV history for {}: {:#}", instrument.isin, e);
                continue;
            }
        };
        let Some(panel) = compute(&series) else {
            info!("No NAV history for {} ({})", instrument.name, instrument.isin);
            continue;
        };
        rows.push(ReturnsRow {
            isin: instrument.isin.clone(),
            name: instrument.name.clone(),
            scheme_code: code.to_string(),
            panel,
        });
    }
    Ok(rows)
}

fn header() -> Vec<String> {
    let mut header: Vec<String> = ["ISIN", "Scheme Name", "Scheme Code", "Date", "NAV"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for period in ReturnPeriod::ALL {
        header.push(format!("{period}_Abs"));
        header.push(format!("{period}_CAGR"));
    }
    header
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes the report as CSV. Missing values are empty cells.
pub fn write_report(path: &Path, rows: &[ReturnsRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create returns report: {}", path.display()))?;
    writer.write_record(header())?;

    for row in rows {
        let mut record = vec![
            row.isin.clone(),
            row.name.clone(),
            row.scheme_code.clone(),
            row.panel.date.to_string(),
            row.panel.nav.to_string(),
        ];
        for period in ReturnPeriod::ALL {
            let ret = row.panel.get(period);
            record.push(cell(ret.map(|r| r.absolute)));
            record.push(cell(ret.and_then(|r| r.cagr)));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!("Wrote returns for {} instruments to {}", rows.len(), path.display());
    Ok(())
}
