//! Test result parsing, flake retries and coverage aggregation (spec.md
//! §4.6). The orchestrator itself doesn't run processes — the scheduler's
//! test tasks call `exec::Executor`, write `RESULTS_FILE` to a staged path,
//! then hand the file contents here to interpret.

pub mod coverage;
pub mod golang;
pub mod junit;

pub use coverage::CoverageAccumulator;

use std::time::Duration;

/// One test method's outcome, the common shape both the junit and golang
/// parsers produce (spec.md §4.6: "aggregates per-case records
/// (passed/failed/skipped/duration/stdout/stderr/traceback)").
#[derive(Debug, Clone, PartialEq)]
pub struct CaseResult {
    pub name: String,
    pub outcome: CaseOutcome,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
    pub traceback: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseOutcome {
    #[default]
    Passed,
    Failed,
    Skipped,
}

/// One execution attempt of a whole test target.
#[derive(Debug, Clone)]
pub struct AttemptResult {
    pub exit_code: Option<i32>,
    pub cases: Vec<CaseResult>,
}

impl AttemptResult {
    /// `no_test_output` targets have no parsed cases — only the exit code
    /// decides pass/fail (spec.md §4.6).
    pub fn exit_code_only(exit_code: Option<i32>) -> Self {
        Self {
            exit_code,
            cases: Vec::new(),
        }
    }

    pub fn passed(&self, no_test_output: bool) -> bool {
        if no_test_output {
            return self.exit_code == Some(0);
        }
        if self.cases.is_empty() {
            return self.exit_code == Some(0);
        }
        self.cases.iter().all(|c| c.outcome != CaseOutcome::Failed)
    }
}

/// A target's merged test outcome across all attempts (spec.md's
/// `TestResults`): pass if at least one attempt passed, plus the attempt
/// count so "Flaky target; made N attempts" can be reported.
#[derive(Debug, Clone)]
pub struct TestResults {
    pub attempts: u32,
    pub passed: bool,
    pub cases: Vec<CaseResult>,
}

impl TestResults {
    pub fn summary(&self) -> (usize, usize, usize) {
        let passed = self.cases.iter().filter(|c| c.outcome == CaseOutcome::Passed).count();
        let failed = self.cases.iter().filter(|c| c.outcome == CaseOutcome::Failed).count();
        let skipped = self.cases.iter().filter(|c| c.outcome == CaseOutcome::Skipped).count();
        (passed, failed, skipped)
    }

    pub fn is_flaky_pass(&self) -> bool {
        self.passed && self.attempts > 1
    }
}

/// Runs up to `max_attempts` attempts of `run_once`, stopping at the first
/// pass — spec.md §4.6: "For targets tagged flaky, run up to `flakes`
/// attempts (default 3), stopping on first success... A target is a pass
/// if at least one attempt passes."
pub async fn run_with_flake_retries<F, Fut>(
    max_attempts: u32,
    no_test_output: bool,
    mut run_once: F,
) -> TestResults
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = AttemptResult>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempts = 0;
    let mut last_cases = Vec::new();
    for attempt in 1..=max_attempts {
        attempts = attempt;
        let result = run_once(attempt).await;
        let passed = result.passed(no_test_output);
        last_cases = result.cases;
        if passed {
            return TestResults {
                attempts,
                passed: true,
                cases: last_cases,
            };
        }
    }
    TestResults {
        attempts,
        passed: false,
        cases: last_cases,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn case(outcome: CaseOutcome) -> CaseResult {
        CaseResult {
            name: "t".to_string(),
            outcome,
            duration: Duration::from_millis(1),
            stdout: String::new(),
            stderr: String::new(),
            traceback: None,
        }
    }

    #[tokio::test]
    async fn flaky_test_passes_on_third_attempt() {
        let call_count = Arc::new(AtomicU32::new(0));
        let results = run_with_flake_retries(3, false, |_attempt| {
            let call_count = Arc::clone(&call_count);
            async move {
                let n = call_count.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    AttemptResult {
                        exit_code: Some(1),
                        cases: vec![case(CaseOutcome::Failed)],
                    }
                } else {
                    AttemptResult {
                        exit_code: Some(0),
                        cases: vec![case(CaseOutcome::Passed)],
                    }
                }
            }
        })
        .await;
        assert!(results.passed);
        assert_eq!(results.attempts, 3);
        assert!(results.is_flaky_pass());
    }

    #[tokio::test]
    async fn all_attempts_failing_is_reported_as_failed() {
        let results = run_with_flake_retries(2, false, |_| async {
            AttemptResult {
                exit_code: Some(1),
                cases: vec![case(CaseOutcome::Failed)],
            }
        })
        .await;
        assert!(!results.passed);
        assert_eq!(results.attempts, 2);
    }

    #[tokio::test]
    async fn no_test_output_uses_exit_code_only() {
        let results = run_with_flake_retries(1, true, |_| async {
            AttemptResult::exit_code_only(Some(0))
        })
        .await;
        assert!(results.passed);
    }
}
