use super::ui::{self, StyleType};
use crate::core::config::AppConfig;
use crate::core::quotes::QuoteStore;
use crate::core::snapshot::{MonthlyReturn, PortfolioSnapshot, SnapshotRepository};
use crate::core::valuation::{BatchSummary, Valuation, ValuationEngine};
use crate::store::KeyValueStore;
use crate::store::csv_quotes::CsvQuoteStore;
use crate::store::ledger::{CsvHoldingsRecord, CsvLedger};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use comfy_table::Cell;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

const SNAPSHOT_COLLECTION: &str = "portfolio";

struct Portfolio {
    engine: ValuationEngine,
    quotes: Arc<dyn QuoteStore>,
}

fn open(config: &AppConfig) -> Result<Portfolio> {
    let ledger = Arc::new(CsvLedger::from_path(&config.ledger_path()?)?);
    let quotes: Arc<dyn QuoteStore> = Arc::new(CsvQuoteStore::new(config.historical_nav_dir()?)?);
    let store = KeyValueStore::open(&config.snapshots_path()?)?;
    let snapshots = SnapshotRepository::new(store.collection(SNAPSHOT_COLLECTION)?);

    let mut engine = ValuationEngine::new(ledger, quotes.clone(), snapshots, &config.valuation);
    if let Some(path) = &config.holdings {
        let record = CsvHoldingsRecord::from_path(&PathBuf::from(path))?;
        engine = engine.with_holdings_record(Arc::new(record));
    }
    Ok(Portfolio { engine, quotes })
}

/// Explicit date, or the latest date with any stored NAV.
async fn resolve_date(quotes: &dyn QuoteStore, date: Option<NaiveDate>) -> Result<NaiveDate> {
    if let Some(date) = date {
        return Ok(date);
    }
    let latest = quotes
        .latest_date()
        .await?
        .context("No NAV data stored. Run `navtrack sync` first")?;
    debug!("Defaulting to latest NAV date {}", latest);
    Ok(latest)
}

pub async fn value(
    config: &AppConfig,
    client_id: &str,
    date: Option<NaiveDate>,
    dry_run: bool,
) -> Result<()> {
    let portfolio = open(config)?;
    let date = resolve_date(portfolio.quotes.as_ref(), date).await?;

    let valuation = if dry_run {
        portfolio.engine.preview(client_id, date).await?
    } else {
        portfolio.engine.value_on(client_id, date).await?
    };
    match valuation {
        Some(valuation) => {
            display_valuation(&valuation);
            if dry_run {
                println!("{}", ui::style_text("Dry run: nothing stored", StyleType::Subtle));
            }
        }
        None => println!("No priced holdings for {client_id} on {date}"),
    }
    Ok(())
}

pub async fn update_all(config: &AppConfig, date: Option<NaiveDate>) -> Result<()> {
    let portfolio = open(config)?;
    let date = resolve_date(portfolio.quotes.as_ref(), date).await?;

    let pb = ui::new_progress_bar(0, true);
    pb.set_message(format!("Valuing clients on {date}"));
    let summary = portfolio
        .engine
        .update_all_clients(date, &|| {
            pb.inc_length(1);
            pb.inc(1);
        })
        .await?;
    pb.finish_and_clear();

    display_batch_summary("Daily update", &summary);
    let snapshots = portfolio.engine.snapshots().snapshots_on(date).await?;
    if !snapshots.is_empty() {
        display_snapshots_on(date, &snapshots);
    }
    Ok(())
}

pub async fn backfill(config: &AppConfig, client_id: &str, days: Option<u32>) -> Result<()> {
    let portfolio = open(config)?;

    let pb = ui::new_progress_bar(0, true);
    pb.set_message(format!("Backfilling {client_id}"));
    let summary = portfolio
        .engine
        .backfill(client_id, days, &|total| {
            pb.set_length(total as u64);
            pb.inc(1);
        })
        .await?;
    pb.finish_and_clear();

    display_batch_summary(&format!("Backfill for {client_id}"), &summary);
    Ok(())
}

pub async fn verify(config: &AppConfig, client_id: &str) -> Result<()> {
    let portfolio = open(config)?;
    let discrepancies = portfolio
        .engine
        .verify(client_id)
        .await?
        .context("No `holdings` record configured to verify against")?;

    if discrepancies.is_empty() {
        println!(
            "{}",
            ui::style_text(
                &format!("Ledger matches recorded holdings for {client_id}"),
                StyleType::TotalValue
            )
        );
        return Ok(());
    }

    println!(
        "\n{}",
        ui::style_text(&format!("Discrepancies for {client_id}"), StyleType::Title)
    );
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Instrument"),
        ui::header_cell("Ledger Units"),
        ui::header_cell("Recorded Units"),
        ui::header_cell("Difference"),
    ]);
    for d in &discrepancies {
        table.add_row(vec![
            Cell::new(&d.instrument_id),
            ui::number_cell(format!("{:.4}", d.ledger_units)),
            ui::number_cell(format!("{:.4}", d.recorded_units)),
            ui::number_cell(format!("{:.4}", d.difference())).fg(comfy_table::Color::Red),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn history(
    config: &AppConfig,
    client_id: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    monthly: bool,
) -> Result<()> {
    let portfolio = open(config)?;
    if monthly {
        let months = portfolio
            .engine
            .snapshots()
            .monthly_returns(client_id, start, end)
            .await?;
        if months.is_empty() {
            println!("No stored valuations for {client_id}");
        } else {
            display_monthly_returns(client_id, &months);
        }
        return Ok(());
    }

    let series = portfolio
        .engine
        .snapshots()
        .timeseries(client_id, start, end)
        .await?;
    info!("Loaded {} snapshots for {}", series.len(), client_id);

    if series.is_empty() {
        println!("No stored valuations for {client_id}");
        return Ok(());
    }

    println!(
        "\n{}",
        ui::style_text(&format!("Portfolio history for {client_id}"), StyleType::Title)
    );
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("Value"),
        ui::header_cell("Invested"),
        ui::header_cell("Day Change"),
        ui::header_cell("Day %"),
        ui::header_cell("Return %"),
        ui::header_cell("Holdings"),
    ]);
    for snapshot in &series {
        table.add_row(snapshot_row(snapshot));
    }
    println!("{table}");
    Ok(())
}

fn snapshot_row(snapshot: &PortfolioSnapshot) -> Vec<Cell> {
    // No baseline: show N/A rather than a zero change
    let has_baseline = !snapshot.is_first_observation();
    vec![
        Cell::new(snapshot.date),
        ui::number_cell(format!("{:.2}", snapshot.portfolio_value)),
        ui::format_optional_cell(snapshot.invested_value, |v| format!("{v:.2}")),
        ui::format_optional_cell(has_baseline.then_some(snapshot.day_change), |v| {
            format!("{v:+.2}")
        }),
        ui::optional_change_cell(has_baseline.then_some(snapshot.day_change_pct / 100.0)),
        ui::optional_change_cell(snapshot.cumulative_return_pct.map(|p| p / 100.0)),
        ui::number_cell(snapshot.holdings_count),
    ]
}

fn display_monthly_returns(client_id: &str, months: &[MonthlyReturn]) {
    println!(
        "\n{}",
        ui::style_text(&format!("Monthly returns for {client_id}"), StyleType::Title)
    );
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Month"),
        ui::header_cell("Start"),
        ui::header_cell("End"),
        ui::header_cell("Return %"),
        ui::header_cell("Best Day"),
        ui::header_cell("Worst Day"),
        ui::header_cell("Days"),
    ]);
    for month in months {
        table.add_row(vec![
            Cell::new(&month.month),
            ui::number_cell(format!("{:.2}", month.start_value)),
            ui::number_cell(format!("{:.2}", month.end_value)),
            ui::change_cell(month.return_pct / 100.0),
            ui::format_optional_cell(month.best_day, |d| d.to_string()),
            ui::format_optional_cell(month.worst_day, |d| d.to_string()),
            ui::number_cell(month.trading_days),
        ]);
    }
    println!("{table}");
}

fn display_valuation(valuation: &Valuation) {
    let snapshot = &valuation.snapshot;
    println!(
        "\n{} {}",
        ui::style_text(&snapshot.client_id, StyleType::Title),
        ui::style_text(&format!("as of {}", snapshot.date), StyleType::Subtle)
    );

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Instrument"),
        ui::header_cell("Units"),
        ui::header_cell("NAV"),
        ui::header_cell("NAV Date"),
        ui::header_cell("Value"),
    ]);
    for line in &valuation.holdings {
        table.add_row(vec![
            Cell::new(&line.instrument_id),
            ui::number_cell(format!("{:.4}", line.units)),
            ui::number_cell(format!("{:.4}", line.nav)),
            Cell::new(line.nav_date),
            ui::number_cell(format!("{:.2}", line.value)),
        ]);
    }
    println!("{table}");

    println!(
        "{} {}",
        ui::style_text("Portfolio Value:", StyleType::TotalLabel),
        ui::style_text(&format!("{:.2}", snapshot.portfolio_value), StyleType::TotalValue)
    );
    if let Some(invested) = snapshot.invested_value {
        println!(
            "{} {:.2}",
            ui::style_text("Invested:", StyleType::TotalLabel),
            invested
        );
    }
    if let Some(previous) = snapshot.previous_date {
        println!(
            "{} {:+.2} ({:+.2}%) since {}",
            ui::style_text("Day Change:", StyleType::TotalLabel),
            snapshot.day_change,
            snapshot.day_change_pct,
            previous
        );
    }
    if !valuation.unpriced.is_empty() {
        println!(
            "{}",
            ui::style_text(
                &format!("No NAV available for: {}", valuation.unpriced.join(", ")),
                StyleType::Error
            )
        );
    }
}

fn display_batch_summary(title: &str, summary: &BatchSummary) {
    println!("\n{}", ui::style_text(title, StyleType::Title));
    println!(
        "{} {}  Empty: {}  Failed: {}",
        ui::style_text("Valued:", StyleType::TotalLabel),
        ui::style_text(&summary.valued.to_string(), StyleType::TotalValue),
        summary.empty,
        summary.failed.len()
    );
    if !summary.failed.is_empty() {
        println!(
            "{}",
            ui::style_text(&format!("Failed: {}", summary.failed.join(", ")), StyleType::Error)
        );
    }
}

fn display_snapshots_on(date: NaiveDate, snapshots: &[PortfolioSnapshot]) {
    ui::print_separator();
    println!(
        "{}",
        ui::style_text(&format!("Portfolios on {date}"), StyleType::Title)
    );
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Client"),
        ui::header_cell("Value"),
        ui::header_cell("Day Change"),
        ui::header_cell("Day %"),
        ui::header_cell("Return %"),
    ]);
    for snapshot in snapshots {
        table.add_row(vec![
            Cell::new(&snapshot.client_id),
            ui::number_cell(format!("{:.2}", snapshot.portfolio_value)),
            ui::signed_amount_cell(snapshot.day_change),
            ui::change_cell(snapshot.day_change_pct / 100.0),
            ui::optional_change_cell(snapshot.cumulative_return_pct.map(|p| p / 100.0)),
        ]);
    }
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryQuoteStore;
    use crate::core::nav::NavPoint;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_date_defaults_to_latest_nav() {
        let quotes = MemoryQuoteStore::new();
        assert!(resolve_date(&quotes, None).await.is_err());

        quotes
            .save_series("INF1", &[NavPoint::new(d(2024, 3, 1), 10.0)])
            .await
            .unwrap();
        quotes
            .save_series("INF2", &[NavPoint::new(d(2024, 3, 4), 20.0)])
            .await
            .unwrap();

        assert_eq!(resolve_date(&quotes, None).await.unwrap(), d(2024, 3, 4));
        assert_eq!(
            resolve_date(&quotes, Some(d(2024, 1, 2))).await.unwrap(),
            d(2024, 1, 2)
        );
    }

    #[test]
    fn test_first_observation_shows_no_day_change() {
        let snapshot = PortfolioSnapshot {
            client_id: "C1".to_string(),
            date: d(2024, 3, 1),
            portfolio_value: 1000.0,
            invested_value: None,
            day_change: 0.0,
            day_change_pct: 0.0,
            cumulative_return_pct: None,
            holdings_count: 1,
            previous_date: None,
        };
        let row = snapshot_row(&snapshot);
        assert_eq!(row[3].content(), "N/A");
        assert_eq!(row[4].content(), "N/A");
    }
}
