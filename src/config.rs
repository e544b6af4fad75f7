//! Loader configuration.

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};

/// Default root url of the task runtime. Relative log artifact paths are
/// resolved against it.
pub const DEFAULT_ROOT_URL: &str = "https://firefox-ci-tc.services.mozilla.com";

/// Log names that are handed to the log parser once stored.
pub const DEFAULT_PARSE_LOG_NAMES: [&str; 2] = ["live_backing_log", "errorsummary_json"];

/// Settings for [`JobLoader`](crate::JobLoader).
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Task runtime root url used when a batch gives no explicit base.
    pub root_url: String,
    /// Maximum stored length (in characters) of names and free text.
    pub max_name_len: usize,
    /// Maximum stored length (in characters) of job and group symbols.
    pub max_symbol_len: usize,
    /// Log names scheduled for parsing after they are stored.
    pub parse_log_names: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root_url: DEFAULT_ROOT_URL.into(),
            max_name_len: 100,
            max_symbol_len: 25,
            parse_log_names: DEFAULT_PARSE_LOG_NAMES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl LoaderConfig {
    /// Parse and validate a TOML configuration.
    pub fn from_toml_str(text: &str) -> IngestResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| IngestError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot work with.
    pub fn validate(&self) -> IngestResult<()> {
        if self.root_url.trim().is_empty() {
            return Err(IngestError::Configuration("root_url is empty".into()));
        }
        if self.max_name_len == 0 || self.max_symbol_len == 0 {
            return Err(IngestError::Configuration(
                "field length limits must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Check if a stored log with this name should be parsed.
    pub fn should_parse(&self, log_name: &str) -> bool {
        self.parse_log_names.iter().any(|n| n == log_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.max_name_len, 100);
        assert!(config.should_parse("live_backing_log"));
        assert!(!config.should_parse("builds-4h"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = LoaderConfig::from_toml_str(
            r#"
            root_url = "https://tc.example.com"
            parse_log_names = ["live_backing_log"]
            "#,
        )
        .unwrap();
        assert_eq!(config.root_url, "https://tc.example.com");
        assert_eq!(config.max_symbol_len, 25);
        assert!(!config.should_parse("errorsummary_json"));
    }

    #[test]
    fn test_from_toml_rejects_zero_len() {
        let err = LoaderConfig::from_toml_str("max_name_len = 0").unwrap_err();
        assert!(matches!(err, IngestError::Configuration(_)));
    }
}
