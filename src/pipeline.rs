//! Run orchestration
//!
//! Drives one full sweep: create the run directory, mark the run RUNNING,
//! drain the matrix through the worker pool, record unresolved items, write
//! the summary and reports, mark the run terminal, and only then swap the
//! latest_results pointer. A cancelled run walks the same artifact path as a
//! completed one, so the partial report is always on disk before the process
//! exits.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;

use crate::aggregate::{AggregateError, Aggregator, RunSummary};
use crate::artifact::{self, new_run_id, ArtifactError, RunLayout, LATEST_POINTER};
use crate::classifier::ClassifiedResult;
use crate::config::{ConfigError, LaneConfig};
use crate::matrix::MatrixError;
use crate::report;
use crate::runner::{JobRunner, RunnerError};
use crate::scheduler::run_pool;
use crate::signal::CancelState;
use crate::state::{RunStateData, StateError};

/// Exit code for a run that completed, whatever the test results.
pub const EXIT_COMPLETED: i32 = 0;
/// Exit code for fatal environment errors.
pub const EXIT_FATAL: i32 = 1;
/// Exit code for invalid configuration.
pub const EXIT_INVALID_CONFIG: i32 = 2;
/// Exit code for a cancelled run with a partial report.
pub const EXIT_CANCELLED: i32 = 3;

const BANNER_RULE: &str =
    "=======================================================================";

/// Top-level errors for the run and report commands.
#[derive(Debug, Error)]
pub enum LaneError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no run summary found in {0}")]
    MissingSummary(PathBuf),
}

impl LaneError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaneError::Config(_) | LaneError::Matrix(_) => EXIT_INVALID_CONFIG,
            _ => EXIT_FATAL,
        }
    }
}

/// What a finished run hands back to the CLI.
pub struct RunOutput {
    pub summary: RunSummary,
    pub run_dir: PathBuf,
}

impl RunOutput {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.summary.partial {
            EXIT_CANCELLED
        } else {
            EXIT_COMPLETED
        }
    }
}

/// Orchestrates one sweep over the matrix.
pub struct Pipeline {
    config: LaneConfig,
}

impl Pipeline {
    pub fn new(config: LaneConfig) -> Self {
        Self { config }
    }

    /// Run the full sweep. Returns `Err` only for fatal environment errors;
    /// cancelled runs come back as a partial [`RunOutput`].
    pub fn execute(&self, cancel: &CancelState) -> Result<RunOutput, LaneError> {
        let started = Instant::now();
        let matrix = &self.config.matrix;

        let run_id = new_run_id(Utc::now());
        let layout = RunLayout::new(&self.config.output_dir, &run_id);
        layout.create(&matrix.configurations())?;

        let mut run_state = RunStateData::new(run_id.clone());
        run_state.write_to_run_dir(&layout.run_dir())?;

        println!("{}", BANNER_RULE);
        println!("Running tests for all {} modules", matrix.module_count());
        println!("Testing {} WIDTH values: {:?}", matrix.widths().len(), matrix.widths());
        println!(
            "Testing {} PIPE_STAGES values: {:?}",
            matrix.pipe_stages().len(),
            matrix.pipe_stages()
        );
        println!("{}", BANNER_RULE);
        println!();

        let aggregator = Aggregator::for_matrix(matrix);
        let runner = JobRunner::new(self.config.runner.clone(), layout.clone());

        let pool = match run_pool(
            matrix.expand(),
            self.config.workers,
            &runner,
            &aggregator,
            cancel,
        ) {
            Ok(pool) => pool,
            Err(e) => {
                // Leave evidence instead of a forever-RUNNING state file.
                let _ = run_state.cancel();
                let _ = run_state.write_to_run_dir(&layout.run_dir());
                return Err(e.into());
            }
        };

        let partial = cancel.is_requested() || !pool.unresolved.is_empty();
        for item in &pool.unresolved {
            aggregator.record(ClassifiedResult::not_run(*item));
        }

        let wall_ms = started.elapsed().as_millis() as u64;
        let summary = aggregator.snapshot(&run_id, partial, wall_ms)?;
        summary.write_to_file(&layout.summary_path())?;
        report::write_reports(&summary, &layout)?;

        if partial {
            run_state.cancel()?;
        } else {
            run_state.complete()?;
        }
        run_state.write_to_run_dir(&layout.run_dir())?;

        if !self.config.runner.keep_scratch {
            // Empty once every job cleaned up after itself.
            let _ = fs::remove_dir(layout.scratch_root());
        }

        // The pointer moves last, once every artifact of this run is final.
        artifact::update_latest_pointer(layout.root(), &run_id)?;

        println!();
        for config in &summary.configs {
            println!("{}", config);
        }
        println!("{}", summary);
        if let Some(reason) = cancel.reason() {
            println!("Cancellation reason: {}", reason.describe());
        }
        println!();
        if partial {
            println!("Test suite cancelled; partial report written.");
        } else {
            println!("Test suite completed!");
        }
        println!(
            "Dashboard HTML report generated: {}",
            layout.dashboard_path().display()
        );
        println!("View the report at: {}/dashboard.html", LATEST_POINTER);

        Ok(RunOutput {
            summary,
            run_dir: layout.run_dir(),
        })
    }
}

/// Re-render the HTML reports of an existing run from its run_summary.json.
pub fn regenerate_reports(run_dir: &Path) -> Result<RunSummary, LaneError> {
    let layout = RunLayout::from_run_dir(run_dir)
        .ok_or_else(|| LaneError::MissingSummary(run_dir.to_path_buf()))?;
    let summary_path = layout.summary_path();
    if !summary_path.exists() {
        return Err(LaneError::MissingSummary(run_dir.to_path_buf()));
    }

    let summary = RunSummary::from_file(&summary_path)?;
    report::write_reports(&summary, &layout)?;
    Ok(summary)
}
