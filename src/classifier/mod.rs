//! Outcome classification
//!
//! Maps a finished job (exit codes, timeout flag, log content) onto a
//! [`RunStatus`]. Classification is a pure function of its inputs: no
//! filesystem access, no clock, so the same outcome always lands in the same
//! report bucket. The one `fs::read` lives in [`classify_outcome`], which
//! loads the log and delegates.
//!
//! Statuses are decided in a fixed priority order:
//! 1. the build step did not succeed -> `CompileFailed`
//! 2. the simulation hit its wall-clock limit -> `Timeout`
//! 3. the log carries the pass marker -> `Passed`
//! 4. the log carries a failure marker -> `Failed`
//! 5. anything else -> `Unknown`, which still counts as a failure

use std::fmt;
use std::fs;
use std::io;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::matrix::WorkItem;
use crate::runner::JobOutcome;

/// Marker a testbench prints when every check passed.
pub const PASS_MARKER: &str = "TEST PASSED";

/// Marker a testbench prints when a check failed.
pub const FAIL_MARKER: &str = "TEST FAILED";

/// Marker some flows print when elaboration fails inside the simulation.
pub const COMPILE_FAIL_MARKER: &str = "COMPILE FAILED";

/// Final status of one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Simulation ran and printed the pass marker.
    Passed,
    /// Simulation ran and reported failure.
    Failed,
    /// The build step exited non-zero (or died to a signal).
    CompileFailed,
    /// The simulation was terminated at its wall-clock limit.
    Timeout,
    /// The job resolved but produced no recognizable verdict.
    Unknown,
}

impl RunStatus {
    /// Human-readable label used in reports and console output.
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Passed => "PASSED",
            RunStatus::Failed => "FAILED",
            RunStatus::CompileFailed => "COMPILE FAILED",
            RunStatus::Timeout => "TIMEOUT",
            RunStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, RunStatus::Passed)
    }

    /// Everything that is not a pass counts against the configuration.
    pub fn counts_as_failure(&self) -> bool {
        !self.is_pass()
    }

    /// CSS row class in the HTML reports.
    pub fn css_class(&self) -> &'static str {
        if self.is_pass() {
            "passed"
        } else {
            "failed"
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A work item after classification, ready for aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedResult {
    pub item: WorkItem,
    pub status: RunStatus,
    pub duration_ms: u64,
    /// First toolchain diagnostic from the log, for failed items.
    pub detail: Option<String>,
}

impl ClassifiedResult {
    /// Result for an item that was never claimed before cancellation.
    pub fn not_run(item: WorkItem) -> Self {
        Self {
            item,
            status: RunStatus::Unknown,
            duration_ms: 0,
            detail: Some("not run (cancelled before dispatch)".to_string()),
        }
    }
}

/// Classify a finished job from its outcome and log text.
pub fn classify(outcome: &JobOutcome, log_text: &str) -> RunStatus {
    if outcome.compile_exit_code != Some(0) {
        return RunStatus::CompileFailed;
    }
    if outcome.timed_out {
        return RunStatus::Timeout;
    }
    if log_text.contains(PASS_MARKER) {
        return RunStatus::Passed;
    }
    if log_text.contains(FAIL_MARKER) || log_text.contains(COMPILE_FAIL_MARKER) {
        return RunStatus::Failed;
    }
    RunStatus::Unknown
}

/// Load the job log and classify, attaching a failure detail where one can
/// be extracted. Logs are decoded lossily: a child killed mid-write can
/// truncate a UTF-8 sequence.
pub fn classify_outcome(outcome: &JobOutcome) -> io::Result<ClassifiedResult> {
    let bytes = fs::read(&outcome.log_path)?;
    let log_text = String::from_utf8_lossy(&bytes);
    let status = classify(outcome, &log_text);
    let detail = if status.counts_as_failure() {
        failure_detail(&log_text)
    } else {
        None
    };
    Ok(ClassifiedResult {
        item: outcome.item,
        status,
        duration_ms: outcome.duration_ms,
        detail,
    })
}

/// Maximum characters of a diagnostic line carried into reports.
const DETAIL_MAX_CHARS: usize = 160;

/// First diagnostic line from a job log.
///
/// Pattern: "%Error: file.sv:12:3: message" / "%Fatal: ..." (Verilator), or
/// an assertion message from the testbench.
pub fn failure_detail(log_text: &str) -> Option<String> {
    let diag_re = Regex::new(r"^\s*%(Error|Fatal)").unwrap();
    let assert_re = Regex::new(r"(?i)assert(ion)?\s+(failed|error)").unwrap();

    for line in log_text.lines() {
        if diag_re.is_match(line) || assert_re.is_match(line) || line.contains(FAIL_MARKER) {
            let trimmed = line.trim();
            return Some(trimmed.chars().take(DETAIL_MAX_CHARS).collect());
        }
    }
    None
}
