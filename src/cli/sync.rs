use super::ui::{self, StyleType};
use crate::core::config::AppConfig;
use crate::core::instrument::MasterList;
use crate::core::returns;
use crate::core::sync::{NavSynchronizer, SyncSummary};
use crate::providers::amfi_provider::{AmfiProvider, parse_nav_all};
use crate::store::csv_quotes::CsvQuoteStore;
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Downloads the bulk publication, brings every instrument's NAV history up
/// to date and rewrites the returns report.
pub async fn run(config: &AppConfig) -> Result<()> {
    let master_path = config.master_list_path()?;
    let mut master = MasterList::load(&master_path)?;
    info!("Loaded {} instruments", master.instruments.len());

    let provider = Arc::new(AmfiProvider::new(&config.providers.amfi, &config.sync)?);
    let text = provider.fetch_nav_all(&config.nav_all_path()?).await?;
    let nav_all = parse_nav_all(&text);

    let filled = master.fill_missing_codes(&nav_all.isin_codes);
    if filled > 0 {
        master.save(&master_path)?;
    }
    let missing = master.missing_codes();
    if missing > 0 {
        warn!("{} instruments still have no scheme code", missing);
    }

    let store = Arc::new(CsvQuoteStore::new(config.historical_nav_dir()?)?);
    let synchronizer = NavSynchronizer::new(store.clone(), provider, config.sync.clone());

    let pb = ui::new_progress_bar(master.instruments.len() as u64, false);
    let summary = synchronizer
        .sync_all(&master.instruments, &nav_all.latest, &|| pb.inc(1))
        .await;
    pb.finish_and_clear();

    let rows = returns::build_report(&master, store.as_ref()).await?;
    let report_path = config.returns_report_path()?;
    returns::write_report(&report_path, &rows)?;

    display_summary(&summary, filled);
    println!(
        "{}",
        ui::style_text(
            &format!(
                "Returns report with {} rows written to {}",
                rows.len(),
                report_path.display()
            ),
            StyleType::Subtle
        )
    );
    Ok(())
}

fn display_summary(summary: &SyncSummary, codes_filled: usize) {
    println!("\n{}", ui::style_text("NAV Sync", StyleType::Title));

    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("Outcome"), ui::header_cell("Instruments")]);
    let counts = [
        ("Already up to date", summary.up_to_date),
        ("Appended from NAVAll", summary.appended),
        ("Fetched history", summary.fetched),
        ("No new data", summary.no_new_data),
        ("No data", summary.no_data),
        ("Skipped (no scheme code)", summary.skipped),
        ("Failed", summary.failed.len()),
    ];
    for (label, count) in counts {
        table.add_row(vec![comfy_table::Cell::new(label), ui::number_cell(count)]);
    }
    println!("{table}");

    println!(
        "{} {}",
        ui::style_text("Succeeded:", StyleType::TotalLabel),
        ui::style_text(&summary.succeeded().to_string(), StyleType::TotalValue)
    );
    if codes_filled > 0 {
        println!("Filled {codes_filled} scheme codes in the master list");
    }
    if !summary.failed.is_empty() {
        println!(
            "{}",
            ui::style_text(
                &format!("Failed: {}", summary.failed.join(", ")),
                StyleType::Error
            )
        );
    }
}
