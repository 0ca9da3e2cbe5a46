use chrono::{Duration, Local, NaiveDate};
use navtrack::core::quotes::QuoteStore;
use std::fs;
use std::path::Path;
use tracing::info;

mod test_utils {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Serves the bulk file at `/NAVAll.txt` and `history_body` for every
    /// history query.
    pub async fn create_amfi_mock_server(nav_all: &str, history_body: &str) -> MockServer {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/NAVAll.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(nav_all))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/nav-history"))
            .respond_with(ResponseTemplate::new(200).set_body_string(history_body))
            .mount(&mock_server)
            .await;

        mock_server
    }

    pub fn write_config(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
        let config_path = dir.join("config.yaml");
        std::fs::write(&config_path, body).expect("Failed to write config file");
        config_path
    }
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn portfolio_config(dir: &Path, with_holdings: bool) -> std::path::PathBuf {
    let holdings = if with_holdings {
        format!("holdings: {}", dir.join("holdings.csv").display())
    } else {
        String::new()
    };
    test_utils::write_config(
        dir,
        &format!(
            r#"
data_path: {data}
ledger: {ledger}
{holdings}
"#,
            data = dir.join("data").display(),
            ledger = dir.join("transactions.csv").display(),
        ),
    )
}

/// Two instruments with NAVs on three trading days and a client holding both.
fn seed_portfolio(dir: &Path) {
    let nav_dir = dir.join("data").join("historical_nav");
    fs::create_dir_all(&nav_dir).unwrap();
    fs::write(
        nav_dir.join("INF100.csv"),
        "Date,NAV\n2024-03-01,10.0\n2024-03-04,10.5\n2024-03-05,10.2\n",
    )
    .unwrap();
    // No NAV on 2024-03-05: valued with the 03-04 price
    fs::write(
        nav_dir.join("INF200.csv"),
        "Date,NAV\n2024-03-01,20.0\n2024-03-04,20.0\n",
    )
    .unwrap();

    fs::write(
        dir.join("transactions.csv"),
        "\
client_code,isin,folio_no,transaction_date,transaction_type,units,nav,amount
C1,INF100,F1,2024-03-01,BUY,100,10,1000
C1,INF200,F2,2024-03-01,PURCHASE,10,20,200
C1,INF200,F2,2024-03-04,REDEMPTION,10,20,200
C2,INF100,F9,2024-03-04,BUY,50,10.5,525
",
    )
    .unwrap();

    fs::write(
        dir.join("holdings.csv"),
        "client_code,isin,quantity\nC1,INF100,100\nC1,INF300,5\n",
    )
    .unwrap();
}

async fn open_snapshots(dir: &Path) -> navtrack::core::SnapshotRepository {
    let store = navtrack::store::KeyValueStore::open(&dir.join("data").join("snapshots")).unwrap();
    navtrack::core::SnapshotRepository::new(store.collection("portfolio").unwrap())
}

#[test_log::test(tokio::test)]
async fn test_sync_flow_with_amfi_mock() {
    let today = Local::now().date_naive();
    let history_body = format!(
        r#"{{"data": {{"nav_groups": [{{"historical_records": [
            {{"date": "{}", "nav": "100.0"}},
            {{"date": "{}", "nav": 110.0}},
            {{"date": "{}", "nav": "121.0"}},
            {{"date": "bad", "nav": "1"}}
        ]}}]}}}}"#,
        today - Duration::days(800),
        today - Duration::days(400),
        today - Duration::days(1),
    );
    let nav_all = "\
Scheme Code;ISIN Div Payout/ ISIN Growth;ISIN Div Reinvestment;Scheme Name;Net Asset Value;Date

Open Ended Schemes(Equity Scheme - Large Cap Fund)

119551;INF209KA12Z1;INF209KA13Z9;Fund Alpha - Direct Growth;121.0;20-Nov-2025
";
    let mock_server = test_utils::create_amfi_mock_server(nav_all, &history_body).await;

    let dir = tempfile::tempdir().unwrap();
    let master_path = dir.path().join("isin_master_list.csv");
    fs::write(
        &master_path,
        "ISIN,Scheme Name,Scheme Code\nINF209KA12Z1,Fund Alpha - Direct Growth,\nINF999ZZ9999,Unlisted Fund,\n",
    )
    .unwrap();

    let data_path = dir.path().join("data");
    let config_path = test_utils::write_config(
        dir.path(),
        &format!(
            r#"
data_path: {data}
master_list: {master}
providers:
  amfi:
    nav_all_url: {uri}/NAVAll.txt
    history_url: {uri}/api/nav-history
sync:
  retry_delay_ms: 10
"#,
            data = data_path.display(),
            master = master_path.display(),
            uri = mock_server.uri(),
        ),
    );

    let result = navtrack::run_command(
        navtrack::AppCommand::Sync,
        Some(config_path.to_str().unwrap()),
    )
    .await;
    assert!(result.is_ok(), "Sync failed with: {:?}", result.err());

    // The missing code was filled from the bulk file and persisted
    let master = fs::read_to_string(&master_path).unwrap();
    info!(%master, "Master list after sync");
    assert!(master.contains("INF209KA12Z1,Fund Alpha - Direct Growth,119551"));

    assert!(data_path.join("NAVAll.txt").exists());

    let store = navtrack::store::csv_quotes::CsvQuoteStore::new(data_path.join("historical_nav"))
        .unwrap();
    let series = store.load_series("INF209KA12Z1").await.unwrap();
    assert_eq!(series.len(), 3);
    assert_eq!(series.last().unwrap().nav, 121.0);
    assert!(store.load_series("INF999ZZ9999").await.unwrap().is_empty());

    let report =
        fs::read_to_string(data_path.join("returns").join("nav_returns_report.csv")).unwrap();
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("ISIN,Scheme Name,Scheme Code,Date,NAV,1D_Abs,1D_CAGR"));
    assert!(lines[1].starts_with("INF209KA12Z1,Fund Alpha - Direct Growth,119551,"));

    // A rerun merges the same records without duplicating them
    let result = navtrack::run_command(
        navtrack::AppCommand::Sync,
        Some(config_path.to_str().unwrap()),
    )
    .await;
    assert!(result.is_ok(), "Second sync failed with: {:?}", result.err());
    assert_eq!(store.load_series("INF209KA12Z1").await.unwrap().len(), 3);
}

#[test_log::test(tokio::test)]
async fn test_returns_command_requires_master_list() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = test_utils::write_config(
        dir.path(),
        &format!("data_path: {}\n", dir.path().join("data").display()),
    );

    let result = navtrack::run_command(
        navtrack::AppCommand::Returns,
        Some(config_path.to_str().unwrap()),
    )
    .await;
    let err = result.unwrap_err();
    assert!(err.to_string().contains("master_list"), "{err:#}");
}

#[test_log::test(tokio::test)]
async fn test_backfill_and_history_flow() {
    let dir = tempfile::tempdir().unwrap();
    seed_portfolio(dir.path());
    let config_path = portfolio_config(dir.path(), false);
    let config = Some(config_path.to_str().unwrap());

    let result = navtrack::run_command(
        navtrack::AppCommand::Backfill {
            client: "C1".to_string(),
            days: None,
        },
        config,
    )
    .await;
    assert!(result.is_ok(), "Backfill failed with: {:?}", result.err());

    let result = navtrack::run_command(
        navtrack::AppCommand::History {
            client: "C1".to_string(),
            start: None,
            end: None,
            monthly: false,
        },
        config,
    )
    .await;
    assert!(result.is_ok(), "History failed with: {:?}", result.err());

    let result = navtrack::run_command(
        navtrack::AppCommand::History {
            client: "C1".to_string(),
            start: None,
            end: None,
            monthly: true,
        },
        config,
    )
    .await;
    assert!(result.is_ok(), "Monthly history failed with: {:?}", result.err());

    let snapshots = open_snapshots(dir.path()).await;
    let series = snapshots.timeseries("C1", None, None).await.unwrap();
    let dates: Vec<NaiveDate> = series.iter().map(|s| s.date).collect();
    assert_eq!(dates, vec![d(2024, 3, 1), d(2024, 3, 4), d(2024, 3, 5)]);

    // 100 * 10 + 10 * 20
    assert_eq!(series[0].portfolio_value, 1200.0);
    assert!(series[0].is_first_observation());
    // INF200 fully redeemed on 03-04
    assert_eq!(series[1].portfolio_value, 1050.0);
    assert_eq!(series[1].holdings_count, 1);
    assert_eq!(series[1].day_change, -150.0);
    assert_eq!(series[1].previous_date, Some(d(2024, 3, 1)));
    assert!((series[2].day_change - (-30.0)).abs() < 1e-9);

    let lines = snapshots.holdings_on("C1", d(2024, 3, 4)).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].instrument_id, "INF100");

    let months = snapshots.monthly_returns("C1", None, None).await.unwrap();
    assert_eq!(months.len(), 1);
    assert_eq!(months[0].month, "2024-03");
    assert_eq!(months[0].trading_days, 3);
    assert_eq!(months[0].best_day, Some(d(2024, 3, 5)));
    assert_eq!(months[0].worst_day, Some(d(2024, 3, 4)));
}

#[test_log::test(tokio::test)]
async fn test_value_dry_run_and_update_all() {
    let dir = tempfile::tempdir().unwrap();
    seed_portfolio(dir.path());
    let config_path = portfolio_config(dir.path(), false);
    let config = Some(config_path.to_str().unwrap());

    // Defaults to the latest NAV date, 2024-03-05
    let result = navtrack::run_command(
        navtrack::AppCommand::Value {
            client: "C1".to_string(),
            date: None,
            dry_run: true,
        },
        config,
    )
    .await;
    assert!(result.is_ok(), "Dry run failed with: {:?}", result.err());
    {
        let snapshots = open_snapshots(dir.path()).await;
        assert!(snapshots.get("C1", d(2024, 3, 5)).await.unwrap().is_none());
    }

    let result = navtrack::run_command(navtrack::AppCommand::UpdateAll { date: None }, config).await;
    assert!(result.is_ok(), "Update failed with: {:?}", result.err());

    let snapshots = open_snapshots(dir.path()).await;
    let on_date = snapshots.snapshots_on(d(2024, 3, 5)).await.unwrap();
    let clients: Vec<&str> = on_date.iter().map(|s| s.client_id.as_str()).collect();
    assert_eq!(clients, vec!["C1", "C2"]);
    assert!((on_date[0].portfolio_value - 1020.0).abs() < 1e-9);
    assert!((on_date[1].portfolio_value - 510.0).abs() < 1e-9);
}

#[test_log::test(tokio::test)]
async fn test_verify_requires_holdings_record() {
    let dir = tempfile::tempdir().unwrap();
    seed_portfolio(dir.path());

    let without = portfolio_config(dir.path(), false);
    let result = navtrack::run_command(
        navtrack::AppCommand::Verify {
            client: "C1".to_string(),
        },
        Some(without.to_str().unwrap()),
    )
    .await;
    assert!(result.is_err());

    let with = portfolio_config(dir.path(), true);
    let result = navtrack::run_command(
        navtrack::AppCommand::Verify {
            client: "C1".to_string(),
        },
        Some(with.to_str().unwrap()),
    )
    .await;
    assert!(result.is_ok(), "Verify failed with: {:?}", result.err());
}
