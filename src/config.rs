// Configuration for the tracker service
//
// Loaded from TOML or built from defaults. Every tracker owns one config;
// there is no global configuration state.

use crate::error::{Result, TrackError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for a [`crate::tracker::Tracker`]
///
/// # Example
/// ```
/// use tracepads::config::TrackerConfig;
///
/// let config = TrackerConfig::default();
/// assert_eq!(config.default_anchor, "log_call");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Directory under which per-run scratch folders are created
    ///
    /// `end_run` removes `<scratch_root>/<run_id>` after the run is closed.
    pub scratch_root: PathBuf,

    /// Name of the generic anchor used when `track` is given no anchors
    pub default_anchor: String,

    /// Process-cache key holding the consolidated in-memory log
    pub consolidated_log_key: String,

    /// Artifact path the consolidated log is flushed to at `end_run`
    pub consolidated_log_artifact: String,

    /// Experiment name used when a run is started without an experiment id
    pub default_experiment: String,

    /// Mapping catalogues loaded when the tracker is built
    pub mapping_files: Vec<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            scratch_root: std::env::temp_dir().join("tracepads"),
            default_anchor: "log_call".to_string(),
            consolidated_log_key: "consolidated_dict".to_string(),
            consolidated_log_artifact: "consolidated_log.json".to_string(),
            default_experiment: "Default".to_string(),
            mapping_files: Vec::new(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from a TOML file
    ///
    /// Missing keys fall back to their defaults.
    ///
    /// # Example TOML
    /// ```toml
    /// scratch_root = "/var/tmp/tracepads"
    /// default_anchor = "log_call"
    /// mapping_files = ["mappings/sklearn.toml"]
    /// ```
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Scratch folder for a single run
    pub fn scratch_dir(&self, run_id: &str) -> PathBuf {
        self.scratch_root.join(run_id)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_anchor.trim().is_empty() {
            return Err(TrackError::InvalidConfig(
                "default_anchor must not be empty".to_string(),
            ));
        }

        if self.consolidated_log_key.is_empty() {
            return Err(TrackError::InvalidConfig(
                "consolidated_log_key must not be empty".to_string(),
            ));
        }

        if self.consolidated_log_artifact.is_empty() {
            return Err(TrackError::InvalidConfig(
                "consolidated_log_artifact must not be empty".to_string(),
            ));
        }

        if self.default_experiment.is_empty() {
            return Err(TrackError::InvalidConfig(
                "default_experiment must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.default_anchor, "log_call");
        assert_eq!(config.consolidated_log_key, "consolidated_dict");
        assert_eq!(config.default_experiment, "Default");
        assert!(config.mapping_files.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scratch_dir_is_per_run() {
        let config = TrackerConfig::default();
        let dir = config.scratch_dir("abc123");
        assert!(dir.ends_with("tracepads/abc123"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let config = TrackerConfig::from_toml_str(r#"default_anchor = "on_fit""#)?;
        assert_eq!(config.default_anchor, "on_fit");
        assert_eq!(config.consolidated_log_artifact, "consolidated_log.json");
        Ok(())
    }

    #[test]
    fn test_from_toml_file() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(
            file,
            r#"
scratch_root = "/tmp/pads-test"
mapping_files = ["a.toml", "b.toml"]
"#
        )?;
        file.flush()?;

        let config = TrackerConfig::from_toml(file.path())?;
        assert_eq!(config.scratch_root, PathBuf::from("/tmp/pads-test"));
        assert_eq!(config.mapping_files.len(), 2);
        Ok(())
    }

    #[test]
    fn test_invalid_empty_anchor() {
        let result = TrackerConfig::from_toml_str(r#"default_anchor = "  ""#);
        assert!(matches!(result, Err(TrackError::InvalidConfig(_))));
    }

    #[test]
    #[allow(clippy::field_reassign_with_default)]
    fn test_invalid_empty_log_key() {
        let mut config = TrackerConfig::default();
        config.consolidated_log_key = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml() {
        let result = TrackerConfig::from_toml_str("default_anchor = [");
        assert!(matches!(result, Err(TrackError::Toml(_))));
    }
}
