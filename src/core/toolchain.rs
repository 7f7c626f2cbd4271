//! Extracts test counts, coverage and resource utilization from tool output.

use crate::config::project_config::{Tool, WorkflowConfig};
use crate::domain::model::{JobState, RunResult, TestSummary};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const LOG_TAIL_LINES: usize = 200;

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

/// Counts `<testcase>` elements of a JUnit/xUnit report.
pub fn parse_junit(xml: &str) -> Option<TestSummary> {
    static TESTCASE: OnceLock<Regex> = OnceLock::new();
    let testcase = regex(
        &TESTCASE,
        r"(?s)<testcase\b[^>]*?(?:/>|>(.*?)</testcase>)",
    );

    let mut summary = TestSummary::default();
    for caps in testcase.captures_iter(xml) {
        summary.total += 1;
        let body = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        if body.contains("<failure") || body.contains("<error") {
            summary.failed += 1;
        } else if body.contains("<skipped") {
            summary.skipped += 1;
        } else {
            summary.passed += 1;
        }
    }

    (summary.total > 0).then_some(summary)
}

/// Last `TESTS=n PASS=p FAIL=f SKIP=s` summary printed by cocotb.
pub fn parse_cocotb_summary(log: &str) -> Option<TestSummary> {
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    let summary = regex(
        &SUMMARY,
        r"TESTS=(\d+)\s+PASS=(\d+)\s+FAIL=(\d+)(?:\s+SKIP=(\d+))?",
    );

    summary.captures_iter(log).last().map(|caps| {
        let num = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        TestSummary {
            total: num(1),
            passed: num(2),
            failed: num(3),
            skipped: num(4),
        }
    })
}

/// Cell/wire totals and per-cell-type counts from a yosys `stat` report.
pub fn parse_yosys_stats(log: &str) -> BTreeMap<String, u64> {
    static CELLS: OnceLock<Regex> = OnceLock::new();
    static WIRES: OnceLock<Regex> = OnceLock::new();
    static CELL_LINE: OnceLock<Regex> = OnceLock::new();
    let cells = regex(&CELLS, r"Number of cells:\s+(\d+)");
    let wires = regex(&WIRES, r"Number of wires:\s+(\d+)");
    let cell_line = regex(&CELL_LINE, r"^\s+(\$?[A-Za-z_][\w$]*)\s+(\d+)\s*$");

    let mut stats = BTreeMap::new();
    if let Some(caps) = cells.captures_iter(log).last() {
        stats.insert("cells".to_string(), caps[1].parse().unwrap_or(0));
    }
    if let Some(caps) = wires.captures_iter(log).last() {
        stats.insert("wires".to_string(), caps[1].parse().unwrap_or(0));
    }

    // The per-type breakdown follows the last "Number of cells" line.
    if let Some(start) = log.rfind("Number of cells:") {
        let section = &log[start..];
        for line in section.lines().skip(1) {
            if line.trim().is_empty() {
                if stats.len() > 2 {
                    break;
                }
                continue;
            }
            match cell_line.captures(line) {
                Some(caps) => {
                    stats.insert(caps[1].to_string(), caps[2].parse().unwrap_or(0));
                }
                None => break,
            }
        }
    }
    stats
}

/// Totals from a Quartus fitter summary.
pub fn parse_quartus_summary(log: &str) -> BTreeMap<String, u64> {
    static ROW: OnceLock<Regex> = OnceLock::new();
    let row = regex(
        &ROW,
        r"(?m)^;?\s*Total (logic elements|registers|memory bits|pins)\s*;?\s*:?\s*;?\s*([\d,]+)",
    );

    let mut stats = BTreeMap::new();
    for caps in row.captures_iter(log) {
        let key = caps[1].replace(' ', "_");
        let value = caps[2].replace(',', "");
        if let Ok(value) = value.parse() {
            stats.insert(key, value);
        }
    }
    stats
}

/// First capture group of `pattern`, as a percentage. Last match wins.
pub fn parse_coverage(log: &str, pattern: &str) -> Option<f64> {
    let re = Regex::new(pattern).ok()?;
    re.captures_iter(log)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().trim().parse().ok())
}

pub fn log_tail(log: &str, lines: usize) -> String {
    let all: Vec<&str> = log.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

pub fn decide_state(exit_code: Option<i32>, tests: Option<&TestSummary>) -> JobState {
    if exit_code != Some(0) {
        return JobState::Failed;
    }
    match tests {
        Some(summary) if summary.failed > 0 => JobState::Failed,
        _ => JobState::Passed,
    }
}

/// Turns the raw output of a workflow run into a result.
pub fn analyze(
    workflow: &WorkflowConfig,
    exit_code: Option<i32>,
    output: &str,
    results_xml: Option<&str>,
    duration_secs: u64,
) -> (JobState, RunResult) {
    let tests = results_xml
        .and_then(parse_junit)
        .or_else(|| parse_cocotb_summary(output));

    let utilization = match workflow.tool {
        Tool::Yosys => parse_yosys_stats(output),
        Tool::Quartus => parse_quartus_summary(output),
        _ => BTreeMap::new(),
    };

    let coverage = workflow
        .coverage_regex
        .as_deref()
        .and_then(|pattern| parse_coverage(output, pattern));

    let state = decide_state(exit_code, tests.as_ref());
    let error = match (state, exit_code) {
        (JobState::Failed, None) => Some("terminated by signal".to_string()),
        (JobState::Failed, Some(code)) if code != 0 => Some(format!("exited with status {}", code)),
        _ => None,
    };

    let result = RunResult {
        exit_code,
        duration_secs,
        tests,
        coverage,
        utilization,
        log_tail: log_tail(output, LOG_TAIL_LINES),
        error,
    };
    (state, result)
}
