//! junit/xUnit XML result parsing (spec.md §4.6), a streaming
//! `quick_xml::Reader`/`Event` state machine in the same style as
//! `dashflow-arxiv`'s Atom-feed parser: walk start/end/text events, track
//! which element we're inside, and build up records incrementally rather
//! than deserializing into a fixed schema (real-world junit XML varies
//! enough across test runners — nested `<testsuites>`, optional `<system-
//! out>`, `<failure>` vs `<error>` — that a rigid `#[derive(Deserialize)]`
//! struct would reject runners this orchestrator should tolerate).

use std::time::Duration;
use thiserror::Error;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{CaseOutcome, CaseResult};

#[derive(Debug, Error)]
pub enum JunitError {
    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml encoding error: {0}")]
    Encoding(String),
}

#[derive(Default, Clone)]
struct PartialCase {
    name: String,
    classname: String,
    time_secs: f64,
    outcome: CaseOutcome,
    traceback: Option<String>,
    system_out: String,
    system_err: String,
}

/// Parses one or more `<testsuite>` blocks (optionally wrapped in a single
/// `<testsuites>`) into per-case records.
pub fn parse(xml: &str) -> Result<Vec<CaseResult>, JunitError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut cases = Vec::new();
    let mut current: Option<PartialCase> = None;
    let mut in_failure_or_error = false;
    let mut text_buffer = String::new();

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "testcase" => {
                        let mut case = PartialCase::default();
                        for attr in e.attributes().flatten() {
                            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
                            let value = attr
                                .decode_and_unescape_value(reader.decoder())
                                .map_err(|e| JunitError::Encoding(e.to_string()))?
                                .to_string();
                            match key.as_str() {
                                "name" => case.name = value,
                                "classname" => case.classname = value,
                                "time" => case.time_secs = value.parse().unwrap_or(0.0),
                                _ => {}
                            }
                        }
                        current = Some(case);
                    }
                    "failure" | "error" => {
                        in_failure_or_error = true;
                        if let Some(case) = current.as_mut() {
                            case.outcome = CaseOutcome::Failed;
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"message" {
                                    let msg = attr
                                        .decode_and_unescape_value(reader.decoder())
                                        .map_err(|e| JunitError::Encoding(e.to_string()))?
                                        .to_string();
                                    case.traceback = Some(msg);
                                }
                            }
                        }
                    }
                    "skipped" => {
                        if let Some(case) = current.as_mut() {
                            case.outcome = CaseOutcome::Skipped;
                        }
                    }
                    "system-out" | "system-err" => {
                        text_buffer.clear();
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                text_buffer = e.unescape().unwrap_or_default().to_string();
                if in_failure_or_error {
                    if let Some(case) = current.as_mut() {
                        case.traceback.get_or_insert_with(String::new).push_str(&text_buffer);
                    }
                }
            }
            Event::CData(e) => {
                text_buffer = String::from_utf8_lossy(&e.into_inner()).to_string();
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "testcase" => {
                        if let Some(case) = current.take() {
                            cases.push(CaseResult {
                                name: if case.classname.is_empty() {
                                    case.name
                                } else {
                                    format!("{}.{}", case.classname, case.name)
                                },
                                outcome: case.outcome,
                                duration: Duration::from_secs_f64(case.time_secs.max(0.0)),
                                stdout: case.system_out,
                                stderr: case.system_err,
                                traceback: case.traceback,
                            });
                        }
                    }
                    "failure" | "error" => in_failure_or_error = false,
                    "system-out" => {
                        if let Some(case) = current.as_mut() {
                            case.system_out = text_buffer.clone();
                        }
                    }
                    "system-err" => {
                        if let Some(case) = current.as_mut() {
                            case.system_err = text_buffer.clone();
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    Ok(cases)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<testsuite name="suite" tests="2" failures="1">
  <testcase classname="pkg.Foo" name="ok_case" time="0.01"/>
  <testcase classname="pkg.Foo" name="bad_case" time="0.02">
    <failure message="assertion failed">traceback here</failure>
  </testcase>
</testsuite>"#;

    #[test]
    fn parses_passing_and_failing_cases() {
        let cases = parse(SAMPLE).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].name, "pkg.Foo.ok_case");
        assert_eq!(cases[0].outcome, CaseOutcome::Passed);
        assert_eq!(cases[1].outcome, CaseOutcome::Failed);
        assert_eq!(cases[1].traceback.as_deref(), Some("assertion failed"));
    }

    #[test]
    fn skipped_case_is_recognized() {
        let xml = r#"<testsuite><testcase name="x"><skipped/></testcase></testsuite>"#;
        let cases = parse(xml).unwrap();
        assert_eq!(cases[0].outcome, CaseOutcome::Skipped);
    }
}
