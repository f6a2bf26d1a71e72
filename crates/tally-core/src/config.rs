//! Configuration loading for `tally.yml`.
//!
//! The file names a suite root, an artifact directory and an ordered list of
//! suite groups. Relative paths are resolved against the directory that holds
//! the config file, so a run behaves the same from any working directory.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tally.yml";

/// Placeholder substituted with the report path in `report_arg`.
pub const REPORT_PATH_PLACEHOLDER: &str = "{path}";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How a suite group is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// In-process, result returned immediately.
    Direct,
    /// In a separate worker process.
    Isolated,
    /// In-process inside a capture scope, then transcoded.
    Capture,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Direct => write!(f, "direct"),
            Strategy::Isolated => write!(f, "isolated"),
            Strategy::Capture => write!(f, "capture"),
        }
    }
}

/// How the suite's entry point receives its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Invocation {
    /// Arguments are passed to the entry point directly.
    #[default]
    Args,
    /// Arguments are installed as the process-wide invocation context and the
    /// entry point is called without any.
    Ambient,
}

/// Top-level `tally.yml` structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TallyConfig {
    /// Base directory for group location globs.
    #[serde(default = "default_suite_root")]
    pub suite_root: PathBuf,

    /// Directory receiving `test_result.<n>.*` artifacts.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// Upper bound on how long an isolated worker may run.
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,

    /// Suite groups, executed in order.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// One suite group in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,

    pub strategy: Strategy,

    /// Wrap an isolated run in a capture scope. Implied for `capture`.
    #[serde(default)]
    pub capture: bool,

    /// Test locations (file globs or module paths) relative to the suite root.
    #[serde(default)]
    pub locations: Vec<String>,

    pub entry: EntryConfig,

    /// Per-group override of `worker_timeout_secs`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// The external program that runs a suite group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfig {
    pub command: String,

    /// Arguments placed before the expanded locations.
    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub invocation: Invocation,

    /// Program name recorded as argv[0] of the ambient context.
    /// Defaults to `command`.
    #[serde(default)]
    pub argv0: Option<String>,

    /// Argument asking the framework to write its own XML report, with
    /// `{path}` standing for `test_result.<n>.xml`.
    #[serde(default)]
    pub report_arg: Option<String>,
}

fn default_suite_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_worker_timeout_secs() -> u64 {
    3600
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            suite_root: default_suite_root(),
            artifact_dir: default_artifact_dir(),
            worker_timeout_secs: default_worker_timeout_secs(),
            groups: Vec::new(),
        }
    }
}

impl TallyConfig {
    /// Parses and validates configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, resolving relative paths against
    /// the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&content)?;

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        config.suite_root = base.join(&config.suite_root);
        config.artifact_dir = base.join(&config.artifact_dir);
        Ok(config)
    }

    /// Checks invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for group in &self.groups {
            if group.name.trim().is_empty() {
                return Err(ConfigError::Invalid("group name must not be empty".into()));
            }
            if !seen.insert(group.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate group name '{}'",
                    group.name
                )));
            }
            if group.entry.command.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "group '{}' has an empty entry command",
                    group.name
                )));
            }
            if let Some(report_arg) = &group.entry.report_arg {
                if !report_arg.contains(REPORT_PATH_PLACEHOLDER) {
                    return Err(ConfigError::Invalid(format!(
                        "group '{}': report_arg must contain {REPORT_PATH_PLACEHOLDER}",
                        group.name
                    )));
                }
                if group.captures() {
                    return Err(ConfigError::Invalid(format!(
                        "group '{}': report_arg cannot be combined with capture, \
                         the transcoded report already uses test_result.<n>.xml",
                        group.name
                    )));
                }
            }
            if group.timeout_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "group '{}': timeout_secs must be positive",
                    group.name
                )));
            }
        }
        if self.worker_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "worker_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Looks up a group by name.
    pub fn group(&self, name: &str) -> Option<&GroupConfig> {
        self.groups.iter().find(|g| g.name == name)
    }
}

impl GroupConfig {
    /// Returns true if the group's output is captured and transcoded.
    pub fn captures(&self) -> bool {
        match self.strategy {
            Strategy::Capture => true,
            Strategy::Isolated => self.capture,
            Strategy::Direct => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
suite_root: tests
artifact_dir: out
worker_timeout_secs: 120
groups:
  - name: unit
    strategy: direct
    locations: ["interface", "model/*.py"]
    entry:
      command: pytest
      args: ["--tb=short"]
      report_arg: "--junitxml={path}"
  - name: twisted
    strategy: capture
    locations: ["interop/test_twisted.py"]
    entry: { command: trial, args: ["--reporter=subunit"], invocation: ambient }
  - name: http
    strategy: isolated
    capture: true
    timeout_secs: 30
    entry: { command: pytest }
"#;

    #[test]
    fn test_parse_sample() {
        let config = TallyConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.suite_root, PathBuf::from("tests"));
        assert_eq!(config.worker_timeout_secs, 120);
        assert_eq!(config.groups.len(), 3);

        let unit = config.group("unit").unwrap();
        assert_eq!(unit.strategy, Strategy::Direct);
        assert_eq!(unit.entry.invocation, Invocation::Args);
        assert_eq!(unit.entry.report_arg.as_deref(), Some("--junitxml={path}"));
        assert!(!unit.captures());

        let twisted = config.group("twisted").unwrap();
        assert_eq!(twisted.entry.invocation, Invocation::Ambient);
        assert!(twisted.captures());

        let http = config.group("http").unwrap();
        assert!(http.captures());
        assert_eq!(http.timeout_secs, Some(30));
        assert!(http.locations.is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = TallyConfig::parse("groups: []").unwrap();
        assert_eq!(config.suite_root, PathBuf::from("."));
        assert_eq!(config.artifact_dir, PathBuf::from("."));
        assert_eq!(config.worker_timeout_secs, 3600);
        assert!(config.groups.is_empty());
    }

    #[test]
    fn test_duplicate_group_names_rejected() {
        let yaml = r#"
groups:
  - { name: a, strategy: direct, entry: { command: "true" } }
  - { name: a, strategy: direct, entry: { command: "true" } }
"#;
        let err = TallyConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate group name"));
    }

    #[test]
    fn test_report_arg_requires_placeholder() {
        let yaml = r#"
groups:
  - { name: a, strategy: direct, entry: { command: pytest, report_arg: "--junitxml" } }
"#;
        assert!(matches!(
            TallyConfig::parse(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_report_arg_conflicts_with_capture() {
        let yaml = r#"
groups:
  - { name: a, strategy: capture, entry: { command: trial, report_arg: "--x={path}" } }
"#;
        let err = TallyConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("cannot be combined with capture"));
    }

    #[test]
    fn test_unknown_strategy_is_a_parse_error() {
        let yaml = r#"
groups:
  - { name: a, strategy: parallel, entry: { command: "true" } }
"#;
        assert!(matches!(TallyConfig::parse(yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_resolves_paths_against_config_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tally.yml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = TallyConfig::load(&path).unwrap();
        assert_eq!(config.suite_root, temp.path().join("tests"));
        assert_eq!(config.artifact_dir, temp.path().join("out"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = TallyConfig::load("/nonexistent/tally.yml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
