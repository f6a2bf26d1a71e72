//! Run results and their aggregation.

/// Exit code of one suite group's execution. 0 means every test passed.
pub type RunResult = i32;

/// Run result for a worker that exited without handing back a result.
pub const CRASHED_RESULT: RunResult = 70;

/// Run result for a worker killed after exceeding its timeout.
pub const TIMED_OUT_RESULT: RunResult = 124;

/// Run result for a group whose runner failed before producing a result,
/// or whose report could not be written.
pub const FAULT_RESULT: RunResult = 1;

/// Fold of every group's run result into one pass/fail signal.
///
/// The latest nonzero result wins; zero results never clear it. With no
/// groups folded the status is 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateStatus {
    code: RunResult,
}

impl AggregateStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one group's result into the status.
    pub fn fold(&mut self, result: RunResult) {
        if result != 0 {
            self.code = result;
        }
    }

    pub fn code(self) -> RunResult {
        self.code
    }

    pub fn is_success(self) -> bool {
        self.code == 0
    }

    /// Process exit code for this status: 0 on success, otherwise the
    /// aggregate clamped into `1..=255`.
    pub fn exit_code(self) -> i32 {
        match self.code {
            0 => 0,
            code if (1..=255).contains(&code) => code,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vacuous_success() {
        let status = AggregateStatus::new();
        assert!(status.is_success());
        assert_eq!(status.exit_code(), 0);
    }

    #[test]
    fn test_any_failure_is_sticky() {
        let mut status = AggregateStatus::new();
        status.fold(0);
        status.fold(1);
        status.fold(0);
        assert!(!status.is_success());
        assert_eq!(status.code(), 1);
    }

    #[test]
    fn test_latest_nonzero_wins() {
        let mut status = AggregateStatus::new();
        status.fold(2);
        status.fold(TIMED_OUT_RESULT);
        status.fold(0);
        assert_eq!(status.code(), TIMED_OUT_RESULT);
    }

    #[test]
    fn test_exit_code_clamped() {
        let mut status = AggregateStatus::new();
        status.fold(-9);
        assert_eq!(status.exit_code(), 1);

        let mut status = AggregateStatus::new();
        status.fold(256);
        assert_eq!(status.exit_code(), 1);

        let mut status = AggregateStatus::new();
        status.fold(CRASHED_RESULT);
        assert_eq!(status.exit_code(), CRASHED_RESULT);
    }
}
