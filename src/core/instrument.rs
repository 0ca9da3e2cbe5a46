//! Instruments and the master list that names them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    #[serde(rename = "ISIN")]
    pub isin: String,
    #[serde(rename = "Scheme Name")]
    pub name: String,
    /// Numeric scheme code used by the upstream publisher, filled lazily.
    #[serde(rename = "Scheme Code", default, deserialize_with = "empty_as_none")]
    pub scheme_code: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        // Spreadsheet round-trips turn codes into floats like "119551.0"
        .map(|s| s.strip_suffix(".0").map(str::to_string).unwrap_or(s))
        .filter(|s| !s.is_empty() && s != "nan" && s != "None"))
}

impl Instrument {
    pub fn new(isin: &str, name: &str, scheme_code: Option<&str>) -> Self {
        Self {
            isin: isin.to_string(),
            name: name.to_string(),
            scheme_code: scheme_code.map(str::to_string),
        }
    }

    /// Scheme code usable against the history endpoint: non-empty digits only.
    pub fn syncable_code(&self) -> Option<&str> {
        self.scheme_code
            .as_deref()
            .filter(|code| !code.is_empty() && code.chars().all(|c| c.is_ascii_digit()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MasterList {
    pub instruments: Vec<Instrument>,
}

impl MasterList {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Master list not found at {}", path.display());
        }
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to read master list: {}", path.display()))?;

        let mut instruments = Vec::new();
        for (row, record) in reader.deserialize::<Instrument>().enumerate() {
            match record {
                Ok(instrument) if !instrument.isin.trim().is_empty() => instruments.push(instrument),
                Ok(_) => warn!("Skipping master list row {} without ISIN", row + 1),
                Err(e) => warn!("Skipping malformed master list row {}: {}", row + 1, e),
            }
        }
        Ok(Self { instruments })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to write master list: {}", path.display()))?;
        for instrument in &self.instruments {
            writer.serialize(instrument)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Fills empty scheme codes from an ISIN -> code map. Existing codes are
    /// kept. Returns how many codes were filled.
    pub fn fill_missing_codes(&mut self, isin_codes: &HashMap<String, String>) -> usize {
        let mut updated = 0;
        for instrument in &mut self.instruments {
            if instrument.scheme_code.is_some() {
                continue;
            }
            if let Some(code) = isin_codes.get(&instrument.isin) {
                instrument.scheme_code = Some(code.clone());
                updated += 1;
            }
        }
        if updated > 0 {
            info!("Filled {} missing scheme codes", updated);
        }
        updated
    }

    pub fn missing_codes(&self) -> usize {
        self.instruments
            .iter()
            .filter(|i| i.scheme_code.is_none())
            .count()
    }
}
