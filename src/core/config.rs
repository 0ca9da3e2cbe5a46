use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AmfiProviderConfig {
    #[serde(default = "default_nav_all_url")]
    pub nav_all_url: String,
    #[serde(default = "default_history_url")]
    pub history_url: String,
}

impl Default for AmfiProviderConfig {
    fn default() -> Self {
        AmfiProviderConfig {
            nav_all_url: default_nav_all_url(),
            history_url: default_history_url(),
        }
    }
}

fn default_nav_all_url() -> String {
    "https://www.amfiindia.com/spages/NAVAll.txt".to_string()
}

fn default_history_url() -> String {
    "https://www.amfiindia.com/api/nav-history".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub amfi: AmfiProviderConfig,
}

/// Tunables for the NAV synchronizer.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// History depth fetched for an instrument with no stored NAVs.
    pub years_back: u32,
    /// Largest gap (in calendar days) bridged by appending the bulk quote.
    pub fast_path_max_gap_days: i64,
    /// Largest window (in days) sent to the history endpoint in one request.
    pub max_window_days: i64,
    /// Attempts per request before a sub-range is given up.
    pub retries: usize,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Instruments synced at once. 1 keeps the run strictly sequential.
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            years_back: 10,
            fast_path_max_gap_days: 4,
            max_window_days: 365 * 5 - 7,
            retries: 3,
            retry_delay_ms: 1000,
            request_timeout_secs: 30,
            concurrency: 1,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ValuationConfig {
    /// Net units at or below this are treated as a closed position.
    pub holding_epsilon: f64,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        ValuationConfig {
            holding_epsilon: 1e-4,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    pub data_path: Option<String>,
    pub master_list: Option<String>,
    pub ledger: Option<String>,
    pub holdings: Option<String>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub valuation: ValuationConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("in", "navtrack", "navtrack")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("in", "navtrack", "navtrack")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn historical_nav_dir(&self) -> Result<PathBuf> {
        Ok(self.default_data_path()?.join("historical_nav"))
    }

    pub fn returns_report_path(&self) -> Result<PathBuf> {
        Ok(self
            .default_data_path()?
            .join("returns")
            .join("nav_returns_report.csv"))
    }

    pub fn nav_all_path(&self) -> Result<PathBuf> {
        Ok(self.default_data_path()?.join("NAVAll.txt"))
    }

    pub fn snapshots_path(&self) -> Result<PathBuf> {
        Ok(self.default_data_path()?.join("snapshots"))
    }

    /// Path of the instrument master list; missing configuration is fatal.
    pub fn master_list_path(&self) -> Result<PathBuf> {
        self.master_list
            .as_ref()
            .map(PathBuf::from)
            .context("No `master_list` configured")
    }

    /// Path of the transactions CSV; missing configuration is fatal.
    pub fn ledger_path(&self) -> Result<PathBuf> {
        self.ledger
            .as_ref()
            .map(PathBuf::from)
            .context("No `ledger` configured")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
data_path: "/tmp/navtrack"
master_list: "/tmp/navtrack/isin_master_list.csv"
ledger: "/tmp/navtrack/transactions.csv"
sync:
  years_back: 3
  fast_path_max_gap_days: 2
valuation:
  holding_epsilon: 0.001
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        assert_eq!(config.data_path.as_deref(), Some("/tmp/navtrack"));
        assert_eq!(config.sync.years_back, 3);
        assert_eq!(config.sync.fast_path_max_gap_days, 2);
        // Unspecified keys fall back to defaults
        assert_eq!(config.sync.retries, 3);
        assert_eq!(config.sync.max_window_days, 1818);
        assert_eq!(config.sync.request_timeout_secs, 30);
        assert_eq!(config.valuation.holding_epsilon, 0.001);
        assert!(config.holdings.is_none());
        assert_eq!(
            config.providers.amfi.nav_all_url,
            "https://www.amfiindia.com/spages/NAVAll.txt"
        );
        assert_eq!(
            config.historical_nav_dir().unwrap(),
            PathBuf::from("/tmp/navtrack/historical_nav")
        );
    }

    #[test]
    fn test_provider_urls_can_be_overridden() {
        let yaml_str = r#"
providers:
  amfi:
    nav_all_url: "http://example.com/NAVAll.txt"
    history_url: "http://example.com/api/nav-history"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(
            config.providers.amfi.nav_all_url,
            "http://example.com/NAVAll.txt"
        );
        assert_eq!(
            config.providers.amfi.history_url,
            "http://example.com/api/nav-history"
        );
        assert_eq!(config.sync.fast_path_max_gap_days, 4);
        assert_eq!(config.valuation.holding_epsilon, 1e-4);
    }

    #[test]
    fn test_missing_paths_are_reported() {
        let config = AppConfig::default();
        let err = config.master_list_path().unwrap_err();
        assert!(err.to_string().contains("master_list"));
        assert!(config.ledger_path().is_err());
    }
}
