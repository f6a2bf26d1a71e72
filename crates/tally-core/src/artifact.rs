//! Run numbering and capture artifact naming.
//!
//! Every capture-scoped or isolated run takes the next run number from the
//! dispatcher's `RunCounter` and derives its artifact names from it:
//! `test_result.<n>.subunit` for the V1 stream, `test_result.<n>.xml` for the
//! report.

use std::io;
use std::path::{Path, PathBuf};

/// Monotonic run number generator, owned by the dispatcher.
///
/// Starts at 0; the first run is number 1. Values are never reused.
#[derive(Debug, Default)]
pub struct RunCounter {
    current: u64,
}

impl RunCounter {
    /// Creates a counter at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// The value the next run will receive.
    pub fn peek_next(&self) -> u64 {
        self.current + 1
    }

    /// Commits the next value and returns it.
    pub fn advance(&mut self) -> u64 {
        self.current += 1;
        self.current
    }

    /// The most recently committed value (0 before any run).
    pub fn current(&self) -> u64 {
        self.current
    }
}

/// File names for one run's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    run_id: u64,
    subunit: PathBuf,
    xml: PathBuf,
}

impl ArtifactPaths {
    /// Derives the artifact paths for `run_id` inside `dir`.
    pub fn new(dir: impl AsRef<Path>, run_id: u64) -> Self {
        let dir = dir.as_ref();
        Self {
            run_id,
            subunit: dir.join(format!("test_result.{run_id}.subunit")),
            xml: dir.join(format!("test_result.{run_id}.xml")),
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// The V1 capture stream.
    pub fn subunit(&self) -> &Path {
        &self.subunit
    }

    /// The XML report.
    pub fn xml(&self) -> &Path {
        &self.xml
    }

    /// Makes sure the artifact directory exists and no stale artifact with
    /// the same name survives from an earlier process.
    pub fn prepare(&self) -> io::Result<()> {
        if let Some(dir) = self.subunit.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        for path in [&self.subunit, &self.xml] {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!("Removed stale artifact {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
