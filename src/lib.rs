//! simlane - Simulation test-matrix lane
//!
//! This crate implements simlane, a batch lane that sweeps parameterized
//! hardware modules across a WIDTH x PIPE_STAGES matrix, drives each
//! configuration through an external simulator toolchain on a bounded
//! worker pool, and renders per-configuration and dashboard HTML reports.

pub mod aggregate;
pub mod artifact;
pub mod classifier;
pub mod config;
pub mod matrix;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod signal;
pub mod state;

pub use aggregate::{Aggregator, ConfigSummary, ModuleResult, RunSummary};
pub use classifier::{ClassifiedResult, RunStatus};
pub use config::LaneConfig;
pub use matrix::{Configuration, SweepMatrix, WorkItem};
pub use pipeline::{Pipeline, RunOutput};
pub use runner::{JobOutcome, JobRunner, RunnerConfig};
pub use signal::{CancelReason, CancelState};
