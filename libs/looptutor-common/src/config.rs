// Validator configuration
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/validator.json";

/// Tunables for the validation engine and its sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Wall-clock ceiling for one sandboxed execution.
    pub timeout_ms: u64,
    /// Minimum score (0-100) for a submission to count as passed.
    pub pass_threshold: u32,
    pub max_output_bytes: usize,
    pub max_source_bytes: usize,
    pub max_call_depth: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            pass_threshold: 70,
            max_output_bytes: 1024 * 1024,
            max_source_bytes: 64 * 1024,
            max_call_depth: 200,
        }
    }
}

impl ValidatorConfig {
    /// Load configuration from a JSON file. Missing keys take defaults.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Validator config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: ValidatorConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validated()
    }

    /// Load `config/validator.json` if present, otherwise defaults,
    /// then apply environment overrides.
    pub fn load_default() -> Result<Self> {
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        let config = if default_path.exists() {
            Self::load(default_path)?
        } else {
            tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
            Self::default()
        };
        config.with_env_overrides()
    }

    /// Apply `LOOPTUTOR_TIMEOUT_MS` and `LOOPTUTOR_PASS_THRESHOLD`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var("LOOPTUTOR_TIMEOUT_MS") {
            self.timeout_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid LOOPTUTOR_TIMEOUT_MS: {}", raw))?;
        }
        if let Ok(raw) = std::env::var("LOOPTUTOR_PASS_THRESHOLD") {
            self.pass_threshold = raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid LOOPTUTOR_PASS_THRESHOLD: {}", raw))?;
        }
        self.validated()
    }

    fn validated(self) -> Result<Self> {
        if self.pass_threshold > 100 {
            bail!("pass_threshold must be between 0 and 100, got {}", self.pass_threshold);
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        if self.max_call_depth == 0 {
            bail!("max_call_depth must be greater than zero");
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ValidatorConfig::default();
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.pass_threshold, 70);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"timeout_ms": 250}}"#).unwrap();

        let config = ValidatorConfig::load(file.path()).unwrap();
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.pass_threshold, 70);
        assert_eq!(config.max_call_depth, 200);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ValidatorConfig::load(Path::new("does/not/exist.json")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_rejects_threshold_above_100() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pass_threshold": 150}}"#).unwrap();

        assert!(ValidatorConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ timeout_ms: ").unwrap();

        let err = ValidatorConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }
}
