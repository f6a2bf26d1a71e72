//! Suite groups: what to run, and how.

use crate::config::{GroupConfig, REPORT_PATH_PLACEHOLDER, Strategy};
use crate::entry::EntryPoint;
use std::path::Path;
use std::time::Duration;

/// A named batch of test locations with its execution strategy.
#[derive(Debug, Clone)]
pub struct SuiteGroup {
    name: String,
    strategy: Strategy,
    capture: bool,
    locations: Vec<String>,
    base_args: Vec<String>,
    report_arg: Option<String>,
    timeout: Duration,
    entry: EntryPoint,
}

impl SuiteGroup {
    /// Default bound on an isolated worker's run time.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

    pub fn new(name: impl Into<String>, strategy: Strategy, entry: EntryPoint) -> Self {
        Self {
            name: name.into(),
            strategy,
            capture: false,
            locations: Vec::new(),
            base_args: Vec::new(),
            report_arg: None,
            timeout: Self::DEFAULT_TIMEOUT,
            entry,
        }
    }

    /// Builds a group from its config entry.
    pub fn from_config(config: &GroupConfig, default_timeout: Duration) -> Self {
        Self {
            name: config.name.clone(),
            strategy: config.strategy,
            capture: config.capture,
            locations: config.locations.clone(),
            base_args: config.entry.args.clone(),
            report_arg: config.entry.report_arg.clone(),
            timeout: config
                .timeout_secs
                .map_or(default_timeout, Duration::from_secs),
            entry: EntryPoint::from_config(&config.entry),
        }
    }

    /// Wraps an isolated run in a capture scope.
    pub fn with_capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.locations = locations.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Asks the suite to write its own XML report; `{path}` in the template
    /// is replaced with the run's `test_result.<n>.xml`.
    pub fn with_report_arg(mut self, template: impl Into<String>) -> Self {
        self.report_arg = Some(template.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn entry(&self) -> &EntryPoint {
        &self.entry
    }

    /// True if the group's output is captured and transcoded.
    pub fn captures(&self) -> bool {
        match self.strategy {
            Strategy::Capture => true,
            Strategy::Isolated => self.capture,
            Strategy::Direct => false,
        }
    }

    /// True if the group hands a report path to the suite itself.
    pub fn wants_native_report(&self) -> bool {
        self.report_arg.is_some() && !self.captures()
    }

    /// True if a run of this group consumes a run number.
    pub fn needs_run_id(&self) -> bool {
        self.strategy != Strategy::Direct || self.wants_native_report()
    }

    /// Builds the argument list for one run: base args, the native report
    /// argument (when `report_path` is given) and the expanded locations.
    ///
    /// Locations containing glob metacharacters are expanded against
    /// `suite_root` in sorted order; a pattern that matches nothing is
    /// dropped with a warning. Plain locations are passed through joined to
    /// the root, since they may name modules rather than files.
    pub fn resolve_args(&self, suite_root: &Path, report_path: Option<&Path>) -> Vec<String> {
        let mut args = self.base_args.clone();

        if let (Some(template), Some(path)) = (&self.report_arg, report_path) {
            args.push(template.replace(REPORT_PATH_PLACEHOLDER, &path.to_string_lossy()));
        }

        for location in &self.locations {
            let joined = suite_root.join(location);
            let joined = joined.to_string_lossy();
            if !is_pattern(location) {
                args.push(joined.into_owned());
                continue;
            }

            match glob::glob(&joined) {
                Ok(paths) => {
                    let mut matched: Vec<String> = paths
                        .filter_map(|entry| match entry {
                            Ok(path) => Some(path.to_string_lossy().into_owned()),
                            Err(e) => {
                                tracing::warn!("Skipping unreadable path: {}", e);
                                None
                            }
                        })
                        .collect();
                    if matched.is_empty() {
                        tracing::warn!(
                            "Location '{}' of group '{}' matched nothing",
                            location,
                            self.name
                        );
                    }
                    matched.sort();
                    args.extend(matched);
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid location pattern '{}' in group '{}': {}",
                        location,
                        self.name,
                        e
                    );
                }
            }
        }

        args
    }
}

fn is_pattern(location: &str) -> bool {
    location.contains(['*', '?', '['])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TallyConfig;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn noop() -> EntryPoint {
        EntryPoint::with_args_fn(|_, _| Ok(0))
    }

    #[test]
    fn test_resolve_expands_globs_sorted() {
        let temp = TempDir::new().unwrap();
        let model = temp.path().join("model");
        std::fs::create_dir(&model).unwrap();
        for name in ["test_b.py", "test_a.py", "helper.txt"] {
            std::fs::write(model.join(name), "").unwrap();
        }

        let group = SuiteGroup::new("unit", Strategy::Direct, noop())
            .with_args(["--tb=short"])
            .with_locations(["model/test_*.py", "interface"]);
        let args = group.resolve_args(temp.path(), None);

        let root = temp.path().to_string_lossy();
        assert_eq!(
            args,
            vec![
                "--tb=short".to_string(),
                format!("{root}/model/test_a.py"),
                format!("{root}/model/test_b.py"),
                format!("{root}/interface"),
            ]
        );
    }

    #[test]
    fn test_resolve_drops_empty_glob() {
        let temp = TempDir::new().unwrap();
        let group =
            SuiteGroup::new("unit", Strategy::Direct, noop()).with_locations(["missing/*.py"]);
        assert!(group.resolve_args(temp.path(), None).is_empty());
    }

    #[test]
    fn test_resolve_inserts_report_arg() {
        let group = SuiteGroup::new("unit", Strategy::Direct, noop())
            .with_args(["--tb=short"])
            .with_report_arg("--junitxml={path}")
            .with_locations(["interface"]);

        let args = group.resolve_args(Path::new("tests"), Some(Path::new("out/test_result.4.xml")));
        assert_eq!(
            args,
            vec!["--tb=short", "--junitxml=out/test_result.4.xml", "tests/interface"]
        );

        let without = group.resolve_args(Path::new("tests"), None);
        assert_eq!(without, vec!["--tb=short", "tests/interface"]);
    }

    #[test]
    fn test_run_id_requirements() {
        let direct = SuiteGroup::new("a", Strategy::Direct, noop());
        assert!(!direct.needs_run_id());
        assert!(direct.clone().with_report_arg("--x={path}").needs_run_id());

        let isolated = SuiteGroup::new("b", Strategy::Isolated, noop());
        assert!(isolated.needs_run_id());
        assert!(!isolated.captures());
        assert!(isolated.clone().with_capture(true).captures());

        let capture = SuiteGroup::new("c", Strategy::Capture, noop()).with_report_arg("--x={path}");
        assert!(capture.captures());
        assert!(!capture.wants_native_report());
    }

    #[test]
    fn test_from_config() {
        let config = TallyConfig::parse(
            r#"
worker_timeout_secs: 90
groups:
  - name: http
    strategy: isolated
    capture: true
    locations: ["interop/test_httprpc.py"]
    entry: { command: pytest, args: ["--tb=line"] }
  - name: slow
    strategy: isolated
    timeout_secs: 5
    entry: { command: trial, invocation: ambient }
"#,
        )
        .unwrap();
        let default_timeout = Duration::from_secs(config.worker_timeout_secs);

        let http = SuiteGroup::from_config(&config.groups[0], default_timeout);
        assert_eq!(http.name(), "http");
        assert!(http.captures());
        assert_eq!(http.timeout(), Duration::from_secs(90));
        assert_eq!(
            http.resolve_args(&PathBuf::from("t"), None),
            vec!["--tb=line", "t/interop/test_httprpc.py"]
        );

        let slow = SuiteGroup::from_config(&config.groups[1], default_timeout);
        assert_eq!(slow.timeout(), Duration::from_secs(5));
        assert!(matches!(slow.entry(), EntryPoint::WithAmbientContext { .. }));
    }
}
