//! Supervisor settings that can be loaded from a TOML file.
//!
//! ```toml
//! name = "worker"
//! expected_exit_code = 0
//! with_prefix = true
//! poll_interval = "100ms"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest accepted poll interval; larger values cannot form a deadline.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Display name; generated automatically when absent
    #[serde(default)]
    pub name: Option<String>,

    /// Exit code that counts as success
    #[serde(default)]
    pub expected_exit_code: i32,

    /// Prepend `"[<name>] "` to every delivered line
    #[serde(default = "default_true")]
    pub with_prefix: bool,

    /// Best-effort minimum delay between termination checks
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            name: None,
            expected_exit_code: 0,
            with_prefix: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SupervisorConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SupervisorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!("Loading supervisor config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval > MAX_POLL_INTERVAL {
            return Err(Error::Config(format!(
                "poll_interval must not exceed {}, got {}",
                humantime_serde::re::humantime::format_duration(MAX_POLL_INTERVAL),
                humantime_serde::re::humantime::format_duration(self.poll_interval)
            )));
        }
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(Error::Config("name must not be blank".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.name, None);
        assert_eq!(config.expected_exit_code, 0);
        assert!(config.with_prefix);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = SupervisorConfig::from_toml_str("").unwrap();
        assert_eq!(config, SupervisorConfig::default());
    }

    #[test]
    fn test_parse_full_toml() {
        let config = SupervisorConfig::from_toml_str(
            r#"
name = "Reader"
expected_exit_code = 124
with_prefix = false
poll_interval = "50ms"
"#,
        )
        .unwrap();

        assert_eq!(config.name.as_deref(), Some("Reader"));
        assert_eq!(config.expected_exit_code, 124);
        assert!(!config.with_prefix);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = SupervisorConfig::from_toml_str(r#"poll_interval = "0s""#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_oversized_poll_interval_rejected() {
        let err =
            SupervisorConfig::from_toml_str(r#"poll_interval = "500000000000years""#).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("must not exceed")));

        let config = SupervisorConfig::from_toml_str(r#"poll_interval = "24h""#).unwrap();
        assert_eq!(config.poll_interval, MAX_POLL_INTERVAL);
    }

    #[test]
    fn test_blank_name_rejected() {
        let err = SupervisorConfig::from_toml_str(r#"name = "  ""#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_duration_is_toml_error() {
        let err = SupervisorConfig::from_toml_str(r#"poll_interval = "soon""#).unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"from-file\"\npoll_interval = \"2s\"").unwrap();

        let config = SupervisorConfig::load(file.path()).unwrap();
        assert_eq!(config.name.as_deref(), Some("from-file"));
        assert_eq!(config.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SupervisorConfig::load(Path::new("/nonexistent/procstream.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
