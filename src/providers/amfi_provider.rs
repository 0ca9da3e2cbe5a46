use crate::core::config::{AmfiProviderConfig, SyncConfig};
use crate::core::nav::NavPoint;
use crate::core::quotes::NavHistorySource;
use crate::providers::util::with_retry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

// The publisher rejects requests without a browser user agent
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36";

pub struct AmfiProvider {
    client: reqwest::Client,
    nav_all_url: String,
    history_url: String,
    attempts: usize,
    retry_delay_ms: u64,
}

impl AmfiProvider {
    pub fn new(config: &AmfiProviderConfig, sync: &SyncConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(sync.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(AmfiProvider {
            client,
            nav_all_url: config.nav_all_url.clone(),
            history_url: config.history_url.clone(),
            attempts: sync.retries,
            retry_delay_ms: sync.retry_delay_ms,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Downloads the bulk NAV publication and keeps a copy at `cache_path`.
    ///
    /// When every attempt fails, the copy from the last successful download is
    /// used instead.
    pub async fn fetch_nav_all(&self, cache_path: &Path) -> Result<String> {
        info!("Downloading bulk NAV file from {}", self.nav_all_url);
        let downloaded = with_retry(
            || self.get_text(&self.nav_all_url),
            self.attempts,
            self.retry_delay_ms * 2,
        )
        .await;

        match downloaded {
            Ok(text) => {
                if let Some(parent) = cache_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(cache_path, &text).with_context(|| {
                    format!("Failed to store bulk NAV file at {}", cache_path.display())
                })?;
                debug!("Stored bulk NAV file at {}", cache_path.display());
                Ok(text)
            }
            Err(e) if cache_path.exists() => {
                warn!(
                    "Bulk NAV download failed ({}), using stored copy at {}",
                    e,
                    cache_path.display()
                );
                std::fs::read_to_string(cache_path).with_context(|| {
                    format!("Failed to read stored bulk NAV file: {}", cache_path.display())
                })
            }
            Err(e) => Err(e.context(format!(
                "Failed to download bulk NAV file from {}",
                self.nav_all_url
            ))),
        }
    }
}

/// Parsed bulk NAV publication.
#[derive(Debug, Default)]
pub struct NavAll {
    /// Latest published quote per scheme code.
    pub latest: HashMap<String, NavPoint>,
    /// Payout and reinvestment ISINs mapped to their scheme code.
    pub isin_codes: HashMap<String, String>,
}

/// Parses `scheme_code;isin_payout;isin_reinvest;scheme_name;nav;date` lines.
///
/// Section headers and blank lines have no `;` and are ignored. A quote of
/// `N.A.` still maps the line's ISINs.
pub fn parse_nav_all(text: &str) -> NavAll {
    let mut parsed = NavAll::default();
    for line in text.lines().map(str::trim) {
        if !line.contains(';') {
            continue;
        }
        let parts: Vec<&str> = line.split(';').map(str::trim).collect();
        if parts.len() < 6 {
            continue;
        }
        let scheme_code = parts[0];
        // Column header row
        if scheme_code.is_empty() || !scheme_code.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        for isin in [parts[1], parts[2]] {
            if !isin.is_empty() && isin != "-" {
                parsed
                    .isin_codes
                    .insert(isin.to_string(), scheme_code.to_string());
            }
        }

        let (nav_str, date_str) = (parts[4], parts[5]);
        if nav_str.is_empty() || nav_str == "N.A." {
            continue;
        }
        let Ok(nav) = nav_str.parse::<f64>() else {
            debug!("Skipping unparseable NAV '{}' for {}", nav_str, scheme_code);
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(date_str, "%d-%b-%Y") else {
            debug!("Skipping unparseable date '{}' for {}", date_str, scheme_code);
            continue;
        };
        let point = NavPoint::new(date, nav);
        if point.is_valid() {
            parsed.latest.insert(scheme_code.to_string(), point);
        }
    }
    parsed
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    data: Option<HistoryData>,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    #[serde(default)]
    nav_groups: Vec<NavGroup>,
}

#[derive(Debug, Deserialize)]
struct NavGroup {
    #[serde(default)]
    historical_records: Vec<HistoryRecord>,
}

#[derive(Debug, Deserialize)]
struct HistoryRecord {
    date: Option<String>,
    nav: Option<RawNav>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNav {
    Number(f64),
    Text(String),
}

impl HistoryRecord {
    fn to_point(&self) -> Option<NavPoint> {
        let date = NaiveDate::parse_from_str(self.date.as_deref()?.trim(), "%Y-%m-%d").ok()?;
        let nav = match self.nav.as_ref()? {
            RawNav::Number(n) => *n,
            RawNav::Text(s) => s.trim().parse().ok()?,
        };
        let point = NavPoint::new(date, nav);
        point.is_valid().then_some(point)
    }
}

#[async_trait]
impl NavHistorySource for AmfiProvider {
    async fn fetch_range(
        &self,
        scheme_code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NavPoint>> {
        let url = format!(
            "{}?query_type=historical_period&from_date={}&to_date={}&sd_id={}",
            self.history_url,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d"),
            scheme_code
        );
        debug!("Requesting NAV history from {}", url);

        let response: HistoryResponse = with_retry(
            || async {
                let response = self.client.get(&url).send().await?.error_for_status()?;
                Ok::<_, anyhow::Error>(response.json::<HistoryResponse>().await?)
            },
            self.attempts,
            self.retry_delay_ms,
        )
        .await
        .with_context(|| {
            format!("Failed to fetch NAV history for {scheme_code} ({from} to {to})")
        })?;

        let records = response
            .data
            .and_then(|d| d.nav_groups.into_iter().next())
            .map(|g| g.historical_records)
            .unwrap_or_default();

        let total = records.len();
        let points: Vec<NavPoint> = records.iter().filter_map(HistoryRecord::to_point).collect();
        if points.len() < total {
            debug!(
                "Dropped {} malformed records for {}",
                total - points.len(),
                scheme_code
            );
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const NAV_ALL: &str = "\
Scheme Code;ISIN Div Payout/ ISIN Growth;ISIN Div Reinvestment;Scheme Name;Net Asset Value;Date

Open Ended Schemes(Debt Scheme - Banking and PSU Fund)

119551;INF209KA12Z1;INF209KA13Z9;Fund Alpha - Direct Growth;101.5;20-Nov-2025
119552;INF209KA14Z7;-;Fund Beta - Direct Growth;N.A.;20-Nov-2025
119553;-;INF209KA15Z4;Fund Gamma;abc;20-Nov-2025
119554;INF209KA16Z2;;Fund Delta;12.25;2025-11-20
";

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn provider(server: &MockServer) -> AmfiProvider {
        let config = AmfiProviderConfig {
            nav_all_url: format!("{}/spages/NAVAll.txt", server.uri()),
            history_url: format!("{}/api/nav-history", server.uri()),
        };
        let sync = SyncConfig {
            retry_delay_ms: 1,
            ..SyncConfig::default()
        };
        AmfiProvider::new(&config, &sync).unwrap()
    }

    #[test]
    fn test_parse_nav_all() {
        let parsed = parse_nav_all(NAV_ALL);

        assert_eq!(parsed.latest.len(), 1);
        assert_eq!(
            parsed.latest.get("119551"),
            Some(&NavPoint::new(d(2025, 11, 20), 101.5))
        );
        assert!(!parsed.latest.contains_key("119552"));
        assert!(!parsed.latest.contains_key("119554"));

        assert_eq!(parsed.isin_codes.len(), 5);
        assert_eq!(parsed.isin_codes["INF209KA13Z9"], "119551");
        assert_eq!(parsed.isin_codes["INF209KA14Z7"], "119552");
        assert_eq!(parsed.isin_codes["INF209KA15Z4"], "119553");
        assert!(!parsed.isin_codes.contains_key("-"));
    }

    #[tokio::test]
    async fn test_fetch_nav_all_stores_copy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spages/NAVAll.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(NAV_ALL))
            .mount(&server)
            .await;
        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("NAVAll.txt");

        let text = provider(&server).fetch_nav_all(&cache_path).await.unwrap();

        assert_eq!(text, NAV_ALL);
        assert_eq!(std::fs::read_to_string(&cache_path).unwrap(), NAV_ALL);
    }

    #[tokio::test]
    async fn test_fetch_nav_all_falls_back_to_stored_copy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spages/NAVAll.txt"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;
        let dir = tempdir().unwrap();
        let cache_path = dir.path().join("NAVAll.txt");
        std::fs::write(&cache_path, "stale").unwrap();

        let text = provider(&server).fetch_nav_all(&cache_path).await.unwrap();

        assert_eq!(text, "stale");
    }

    #[tokio::test]
    async fn test_fetch_nav_all_without_copy_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let dir = tempdir().unwrap();

        let result = provider(&server)
            .fetch_nav_all(&dir.path().join("NAVAll.txt"))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fetch_range_parses_records() {
        let server = MockServer::start().await;
        let body = r#"{"data": {"nav_groups": [{"historical_records": [
            {"date": "2024-01-01", "nav": "10.5"},
            {"date": "2024-01-02", "nav": 10.75},
            {"date": "2024-01-03", "nav": "N.A."},
            {"date": "03-01-2024", "nav": "11.0"},
            {"nav": "11.0"}
        ]}]}}"#;
        Mock::given(method("GET"))
            .and(path("/api/nav-history"))
            .and(query_param("query_type", "historical_period"))
            .and(query_param("from_date", "2024-01-01"))
            .and(query_param("to_date", "2024-01-31"))
            .and(query_param("sd_id", "119551"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let points = provider(&server)
            .fetch_range("119551", d(2024, 1, 1), d(2024, 1, 31))
            .await
            .unwrap();

        assert_eq!(
            points,
            vec![
                NavPoint::new(d(2024, 1, 1), 10.5),
                NavPoint::new(d(2024, 1, 2), 10.75)
            ]
        );
    }

    #[tokio::test]
    async fn test_fetch_range_without_groups_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/nav-history"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data": {"nav_groups": []}}"#))
            .mount(&server)
            .await;

        let points = provider(&server)
            .fetch_range("119551", d(2024, 1, 1), d(2024, 1, 31))
            .await
            .unwrap();

        assert!(points.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_range_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/nav-history"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Server Error"))
            .expect(3)
            .mount(&server)
            .await;

        let result = provider(&server)
            .fetch_range("119551", d(2024, 1, 1), d(2024, 1, 31))
            .await;

        assert!(result.is_err());
    }
}
