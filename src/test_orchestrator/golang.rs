//! `go test` style text output parsing (spec.md §4.6: "junit/xunit XML or
//! golang-style test text"). Lines look like:
//!
//! ```text
//! === RUN   TestFoo
//! --- PASS: TestFoo (0.00s)
//! --- FAIL: TestBar (0.01s)
//!     bar_test.go:12: expected 1, got 2
//! --- SKIP: TestBaz (0.00s)
//! FAIL
//! ```
//!
//! A line-oriented scan, not a grammar — the indented lines between a
//! `--- FAIL` and the next `---`/`===`/terminal `FAIL`/`ok` line are
//! collected as that case's traceback.

use std::time::Duration;

use super::{CaseOutcome, CaseResult};

pub fn parse(text: &str) -> Vec<CaseResult> {
    let mut cases: Vec<CaseResult> = Vec::new();
    let mut current: Option<CaseResult> = None;

    for line in text.lines() {
        let trimmed = line.trim_end();
        if let Some(rest) = trimmed.trim_start().strip_prefix("--- ") {
            if let Some(case) = current.take() {
                cases.push(case);
            }
            if let Some((status, rest)) = rest.split_once(": ") {
                let outcome = match status {
                    "PASS" => CaseOutcome::Passed,
                    "FAIL" => CaseOutcome::Failed,
                    "SKIP" => CaseOutcome::Skipped,
                    _ => continue,
                };
                let (name, duration) = split_name_and_duration(rest);
                current = Some(CaseResult {
                    name,
                    outcome,
                    duration,
                    stdout: String::new(),
                    stderr: String::new(),
                    traceback: None,
                });
            }
            continue;
        }

        if trimmed.starts_with("=== RUN") || trimmed == "PASS" || trimmed == "FAIL" {
            continue;
        }

        if let Some(case) = current.as_mut() {
            if line.starts_with(' ') || line.starts_with('\t') {
                let buf = case.traceback.get_or_insert_with(String::new);
                if !buf.is_empty() {
                    buf.push('\n');
                }
                buf.push_str(trimmed.trim());
            }
        }
    }
    if let Some(case) = current.take() {
        cases.push(case);
    }
    cases
}

fn split_name_and_duration(rest: &str) -> (String, Duration) {
    match rest.rsplit_once(" (") {
        Some((name, duration_part)) => {
            let seconds = duration_part
                .trim_end_matches(')')
                .trim_end_matches('s')
                .parse::<f64>()
                .unwrap_or(0.0);
            (name.to_string(), Duration::from_secs_f64(seconds.max(0.0)))
        }
        None => (rest.to_string(), Duration::ZERO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "=== RUN   TestFoo\n--- PASS: TestFoo (0.00s)\n--- FAIL: TestBar (0.01s)\n    bar_test.go:12: expected 1, got 2\nFAIL\n";

    #[test]
    fn parses_pass_and_fail_cases_with_traceback() {
        let cases = parse(SAMPLE);
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].name, "TestFoo");
        assert_eq!(cases[0].outcome, CaseOutcome::Passed);
        assert_eq!(cases[1].outcome, CaseOutcome::Failed);
        assert_eq!(cases[1].traceback.as_deref(), Some("bar_test.go:12: expected 1, got 2"));
    }

    #[test]
    fn skip_case_is_recognized() {
        let cases = parse("--- SKIP: TestBaz (0.00s)\n");
        assert_eq!(cases[0].outcome, CaseOutcome::Skipped);
    }
}
