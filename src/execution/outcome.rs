//! Execution result types.

use std::time::Duration;

/// Result of one guest run.
///
/// A non-zero exit is a normal outcome, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Captured standard output (lossily decoded).
    pub stdout: String,
    /// Captured standard error (lossily decoded).
    pub stderr: String,
    /// Exit code; `None` when the guest was killed.
    pub exit_code: Option<i32>,
    /// Whether the guest hit the time limit.
    pub timed_out: bool,
    /// Whether either stream was cut at the output cap.
    pub truncated: bool,
    /// Wall-clock run time.
    pub duration: Duration,
}

impl ExecutionOutcome {
    /// Check if the guest exited with status 0.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Check if the guest failed (non-zero exit, killed, or timed out).
    pub fn failed(&self) -> bool {
        !self.success()
    }
}

/// Result of compiling a workspace source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// The compiler succeeded; the binary is at this workspace-relative path.
    Built { output_path: String },
    /// The compiler failed; its output is attached.
    Failed(ExecutionOutcome),
}

impl CompileOutcome {
    /// Check if the build succeeded.
    pub fn success(&self) -> bool {
        matches!(self, CompileOutcome::Built { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_success() {
        let outcome = ExecutionOutcome {
            exit_code: Some(0),
            ..Default::default()
        };
        assert!(outcome.success());
        assert!(!outcome.failed());
    }

    #[test]
    fn test_outcome_nonzero_is_failure_not_error() {
        let outcome = ExecutionOutcome {
            stderr: "Traceback".to_string(),
            exit_code: Some(1),
            ..Default::default()
        };
        assert!(outcome.failed());
    }

    #[test]
    fn test_outcome_timeout() {
        let outcome = ExecutionOutcome {
            timed_out: true,
            duration: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(outcome.failed());
        assert!(outcome.exit_code.is_none());
    }

    #[test]
    fn test_compile_outcome() {
        let built = CompileOutcome::Built {
            output_path: "main".to_string(),
        };
        assert!(built.success());
        assert!(!CompileOutcome::Failed(ExecutionOutcome::default()).success());
    }
}
