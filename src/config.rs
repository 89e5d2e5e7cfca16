//! Runner configuration loaded from JSON.
//!
//! ```
//! use tuplestream::config::RunnerConfig;
//! use tuplestream::ExecMode;
//!
//! # fn main() -> anyhow::Result<()> {
//! let cfg = RunnerConfig::from_json_str(
//!     r#"{ "mode": { "parallel": { "threads": 2, "partitions": null } }, "spill_threshold": 64 }"#,
//! )?;
//! assert_eq!(cfg.mode, ExecMode::Parallel { threads: Some(2), partitions: None });
//! assert_eq!(cfg.spill_threshold, 64);
//! # Ok(())
//! # }
//! ```

use crate::assertion::AssertionLevel;
use crate::grouping::{DEFAULT_SPILL_THRESHOLD, SpillConfig};
use crate::runner::ExecMode;
use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Serializable runner settings; every field is optional in JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub mode: ExecMode,
    /// Tuples one branch buffer holds in memory before spilling.
    pub spill_threshold: usize,
    /// Directory for spill files; the OS temp dir when unset.
    pub spill_dir: Option<PathBuf>,
    pub assertion_level: AssertionLevel,
    /// Attach a fresh metrics collector to the runner.
    pub metrics: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: ExecMode::Parallel {
                threads: None,
                partitions: None,
            },
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            spill_dir: None,
            assertion_level: AssertionLevel::default(),
            metrics: false,
        }
    }
}

impl RunnerConfig {
    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// Malformed JSON, unknown enum values, or a zero spill threshold.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json).context("invalid runner config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    ///
    /// I/O failures plus everything [`RunnerConfig::from_json_str`] rejects.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading runner config {}", path.display()))?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.spill_threshold > 0, "spill_threshold must be positive");
        if let ExecMode::Parallel { threads, partitions } = self.mode {
            ensure!(threads != Some(0), "threads must be positive");
            ensure!(partitions != Some(0), "partitions must be positive");
        }
        Ok(())
    }

    #[must_use]
    pub fn spill(&self) -> SpillConfig {
        SpillConfig {
            threshold: self.spill_threshold,
            dir: self.spill_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() -> Result<()> {
        assert_eq!(RunnerConfig::from_json_str("{}")?, RunnerConfig::default());
        Ok(())
    }

    #[test]
    fn sequential_mode_and_level_parse() -> Result<()> {
        let cfg = RunnerConfig::from_json_str(
            r#"{ "mode": "sequential", "assertion_level": "valid", "metrics": true, "spill_dir": "/tmp/x" }"#,
        )?;
        assert_eq!(cfg.mode, ExecMode::Sequential);
        assert_eq!(cfg.assertion_level, AssertionLevel::Valid);
        assert!(cfg.metrics);
        assert_eq!(cfg.spill().dir, Some(PathBuf::from("/tmp/x")));
        Ok(())
    }

    #[test]
    fn zero_threshold_is_rejected() {
        assert!(RunnerConfig::from_json_str(r#"{ "spill_threshold": 0 }"#).is_err());
        assert!(RunnerConfig::from_json_str(r#"{ "mode": "bogus" }"#).is_err());
    }
}
