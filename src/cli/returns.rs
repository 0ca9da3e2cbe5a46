use super::ui::{self, StyleType};
use crate::core::config::AppConfig;
use crate::core::instrument::MasterList;
use crate::core::returns::{self, PeriodReturn, ReturnPeriod, ReturnsRow};
use crate::store::csv_quotes::CsvQuoteStore;
use anyhow::Result;
use comfy_table::Cell;
use tracing::info;

const DISPLAY_PERIODS: [ReturnPeriod; 7] = [
    ReturnPeriod::OneMonth,
    ReturnPeriod::SixMonths,
    ReturnPeriod::YearToDate,
    ReturnPeriod::OneYear,
    ReturnPeriod::ThreeYears,
    ReturnPeriod::FiveYears,
    ReturnPeriod::Inception,
];

/// Recomputes the returns report from stored NAV history.
pub async fn run(config: &AppConfig) -> Result<()> {
    let master = MasterList::load(&config.master_list_path()?)?;
    let store = CsvQuoteStore::new(config.historical_nav_dir()?)?;

    info!("Calculating returns for {} instruments...", master.instruments.len());
    let rows = returns::build_report(&master, &store).await?;
    let report_path = config.returns_report_path()?;
    returns::write_report(&report_path, &rows)?;

    if rows.is_empty() {
        println!("No NAV history found. Run `navtrack sync` first.");
        return Ok(());
    }
    display_returns(&rows);
    println!(
        "{}",
        ui::style_text(
            &format!("Full report written to {}", report_path.display()),
            StyleType::Subtle
        )
    );
    Ok(())
}

/// Annualized figure when there is one, otherwise the absolute return.
fn headline(ret: Option<&PeriodReturn>) -> Option<f64> {
    ret.map(|r| r.cagr.unwrap_or(r.absolute))
}

fn display_returns(rows: &[ReturnsRow]) {
    println!("\n{}", ui::style_text("NAV Returns", StyleType::Title));

    let mut table = ui::new_styled_table();
    let mut header = vec![
        ui::header_cell("Scheme"),
        ui::header_cell("Date"),
        ui::header_cell("NAV"),
    ];
    for period in DISPLAY_PERIODS {
        header.push(ui::header_cell(&period.to_string()));
    }
    table.set_header(header);

    for row in rows {
        let mut cells = vec![
            Cell::new(&row.name),
            Cell::new(row.panel.date),
            ui::number_cell(format!("{:.4}", row.panel.nav)),
        ];
        for period in DISPLAY_PERIODS {
            cells.push(ui::optional_change_cell(headline(row.panel.get(period))));
        }
        table.add_row(cells);
    }
    println!("{table}");
    println!(
        "{}",
        ui::style_text(
            "Periods longer than a year show CAGR; shorter ones show absolute return.",
            StyleType::Subtle
        )
    );
}
