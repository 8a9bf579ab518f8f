//! Run state machine
//!
//! A run is RUNNING from the moment its directory exists and ends either
//! COMPLETED (every work item resolved, pass or fail) or CANCELLED (stopped
//! early, partial results). The state is persisted to `run_state.json` in the
//! run directory with an atomic write-then-rename, so retention pruning can
//! tell a live run from a finished one even across a crash.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schema version for run_state.json
pub const RUN_STATE_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run_state.json
pub const RUN_STATE_SCHEMA_ID: &str = "simlane/run-state@1";

/// File name of the state artifact inside a run directory.
pub const RUN_STATE_FILE: &str = "run_state.json";

/// Global sequence counter for ordering state updates.
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// The run is executing. A test failure does not leave this state; only
    /// finishing or cancellation does.
    Running,
    /// Every work item resolved and reports were written.
    Completed,
    /// Stopped early (interrupt, deadline, or fatal error); results partial.
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Cancelled)
    }

    /// Check whether a transition to `target` is valid.
    pub fn can_transition_to(&self, target: RunState) -> bool {
        matches!(
            (self, target),
            (RunState::Running, RunState::Completed) | (RunState::Running, RunState::Cancelled)
        )
    }
}

/// Errors for run state operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The run_state.json artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStateData {
    pub schema_version: u32,
    pub schema_id: String,
    pub run_id: String,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic sequence counter for ordering updates.
    pub seq: u64,
}

impl RunStateData {
    /// Create a new run in RUNNING state.
    pub fn new(run_id: String) -> Self {
        let now = Utc::now();
        Self {
            schema_version: RUN_STATE_SCHEMA_VERSION,
            schema_id: RUN_STATE_SCHEMA_ID.to_string(),
            run_id,
            state: RunState::Running,
            created_at: now,
            updated_at: now,
            seq: next_seq(),
        }
    }

    /// Transition to a new state.
    pub fn transition(&mut self, new_state: RunState) -> Result<(), StateError> {
        if !self.state.can_transition_to(new_state) {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }
        self.state = new_state;
        self.updated_at = Utc::now();
        self.seq = next_seq();
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), StateError> {
        self.transition(RunState::Completed)
    }

    pub fn cancel(&mut self) -> Result<(), StateError> {
        self.transition(RunState::Cancelled)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write atomically (write to temp, then rename over the final path).
    pub fn write_to_file(&self, path: &Path) -> Result<(), StateError> {
        let json = self.to_json()?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn from_file(path: &Path) -> Result<Self, StateError> {
        let json = fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }

    /// Write into a run directory as `run_state.json`.
    pub fn write_to_run_dir(&self, run_dir: &Path) -> Result<(), StateError> {
        self.write_to_file(&run_dir.join(RUN_STATE_FILE))
    }

    /// Load from a run directory, if the artifact exists and parses.
    pub fn load_from_run_dir(run_dir: &Path) -> Option<Self> {
        let path = run_dir.join(RUN_STATE_FILE);
        if !path.exists() {
            return None;
        }
        Self::from_file(&path).ok()
    }
}
