//! Remote ledger configuration.
//!
//! The scripting endpoint URL and the spreadsheet identifiers for the
//! read-only fallback come from the environment, the one piece of deploy
//! configuration this client has.

use serde::{Deserialize, Serialize};
use std::env;

const ENV_LEDGER_URL: &str = "POS_LEDGER_URL";
const ENV_SHEET_ID: &str = "POS_SHEET_ID";
const ENV_SHEET_NAME: &str = "POS_SHEET_NAME";
const DEFAULT_SHEET_NAME: &str = "Orders";

/// Connection settings for the remote ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Scripting endpoint base URL (GET queries and fire-and-forget POSTs).
    pub endpoint_url: String,
    /// Spreadsheet document ID for the visualization-query fallback; empty
    /// disables the fallback.
    pub sheet_id: String,
    /// Sheet tab name for the fallback query.
    pub sheet_name: String,
}

impl LedgerConfig {
    pub fn new(endpoint_url: &str) -> Self {
        Self {
            endpoint_url: normalize_endpoint_url(endpoint_url),
            sheet_id: String::new(),
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
        }
    }

    /// Read configuration from `POS_LEDGER_URL`, `POS_SHEET_ID`, and
    /// `POS_SHEET_NAME`. The endpoint URL is mandatory.
    pub fn from_env() -> Result<Self, String> {
        let endpoint = env::var(ENV_LEDGER_URL)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("{ENV_LEDGER_URL} is not set"))?;

        Ok(Self {
            endpoint_url: normalize_endpoint_url(&endpoint),
            sheet_id: env::var(ENV_SHEET_ID).unwrap_or_default().trim().to_string(),
            sheet_name: env::var(ENV_SHEET_NAME)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string()),
        })
    }

    pub fn has_sheet_fallback(&self) -> bool {
        !self.sheet_id.is_empty()
    }
}

/// Normalise the endpoint URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_endpoint_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn normalizes_scheme_and_trailing_slashes() {
        assert_eq!(
            normalize_endpoint_url("script.example.com/macros/s/ID/exec//"),
            "https://script.example.com/macros/s/ID/exec"
        );
        assert_eq!(
            normalize_endpoint_url("localhost:8788/exec"),
            "http://localhost:8788/exec"
        );
        assert_eq!(
            normalize_endpoint_url("  https://host/exec "),
            "https://host/exec"
        );
    }

    #[test]
    #[serial]
    fn from_env_requires_endpoint_url() {
        std::env::remove_var(ENV_LEDGER_URL);
        let err = LedgerConfig::from_env().unwrap_err();
        assert!(err.contains(ENV_LEDGER_URL));
    }

    #[test]
    #[serial]
    fn from_env_reads_all_fields() {
        std::env::set_var(ENV_LEDGER_URL, "script.example.com/exec");
        std::env::set_var(ENV_SHEET_ID, "sheet-123");
        std::env::remove_var(ENV_SHEET_NAME);

        let config = LedgerConfig::from_env().unwrap();
        assert_eq!(config.endpoint_url, "https://script.example.com/exec");
        assert_eq!(config.sheet_id, "sheet-123");
        assert_eq!(config.sheet_name, "Orders");
        assert!(config.has_sheet_fallback());

        std::env::remove_var(ENV_LEDGER_URL);
        std::env::remove_var(ENV_SHEET_ID);
    }
}
