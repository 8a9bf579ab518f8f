//! Sweep matrix expansion
//!
//! A run is described by a cross product of data widths, pipeline depths, and
//! module ids. This module validates the axes and expands them into the
//! ordered list of jobs. Expansion order is canonical: width-major, then
//! pipe stages, then module id ascending. Reports and artifact directories
//! follow the same order, so the matrix is the single source of truth for it.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for sweep axes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    #[error("widths list is empty")]
    EmptyWidths,

    #[error("pipe-stages list is empty")]
    EmptyPipeStages,

    #[error("module count must be at least 1")]
    NoModules,

    #[error("width must be at least 1 bit")]
    ZeroWidth,
}

/// One point on the width/pipe-stages plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Configuration {
    /// Data width in bits.
    pub width: u32,
    /// Pipeline register stages. Zero is legal (combinational datapath).
    pub pipe_stages: u32,
}

impl Configuration {
    /// Canonical per-configuration key, used for directory names and report
    /// anchors: `w<width>_p<pipe_stages>`.
    pub fn dir_name(&self) -> String {
        format!("w{}_p{}", self.width, self.pipe_stages)
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}_p{}", self.width, self.pipe_stages)
    }
}

/// One schedulable job: a configuration plus the module under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub config: Configuration,
    /// Module id, 1-based.
    pub module_id: u32,
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} module {}", self.config, self.module_id)
    }
}

/// The validated cross product driving a run.
///
/// Axes are treated as sets: construction sorts them ascending and drops
/// duplicates, so the canonical ordering does not depend on how the values
/// were written on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepMatrix {
    widths: Vec<u32>,
    pipe_stages: Vec<u32>,
    module_count: u32,
}

impl SweepMatrix {
    /// Validate and normalize the axes.
    pub fn new(
        widths: Vec<u32>,
        pipe_stages: Vec<u32>,
        module_count: u32,
    ) -> Result<Self, MatrixError> {
        if widths.is_empty() {
            return Err(MatrixError::EmptyWidths);
        }
        if pipe_stages.is_empty() {
            return Err(MatrixError::EmptyPipeStages);
        }
        if module_count == 0 {
            return Err(MatrixError::NoModules);
        }
        if widths.contains(&0) {
            return Err(MatrixError::ZeroWidth);
        }
        let mut widths = widths;
        widths.sort_unstable();
        widths.dedup();
        let mut pipe_stages = pipe_stages;
        pipe_stages.sort_unstable();
        pipe_stages.dedup();
        Ok(Self {
            widths,
            pipe_stages,
            module_count,
        })
    }

    pub fn widths(&self) -> &[u32] {
        &self.widths
    }

    pub fn pipe_stages(&self) -> &[u32] {
        &self.pipe_stages
    }

    pub fn module_count(&self) -> u32 {
        self.module_count
    }

    /// Number of configurations (heat map cells).
    pub fn config_count(&self) -> usize {
        self.widths.len() * self.pipe_stages.len()
    }

    /// Total number of jobs in the run.
    pub fn item_count(&self) -> usize {
        self.config_count() * self.module_count as usize
    }

    /// Configurations in canonical order: width-major, then pipe stages.
    pub fn configurations(&self) -> Vec<Configuration> {
        let mut out = Vec::with_capacity(self.config_count());
        for &width in &self.widths {
            for &pipe_stages in &self.pipe_stages {
                out.push(Configuration { width, pipe_stages });
            }
        }
        out
    }

    /// Every job in canonical order. Module ids run `1..=module_count`.
    pub fn expand(&self) -> Vec<WorkItem> {
        let mut out = Vec::with_capacity(self.item_count());
        for config in self.configurations() {
            for module_id in 1..=self.module_count {
                out.push(WorkItem { config, module_id });
            }
        }
        out
    }

    /// One-line description for run banners.
    pub fn describe(&self) -> String {
        format!(
            "widths {:?} x pipe stages {:?} x {} modules ({} jobs)",
            self.widths,
            self.pipe_stages,
            self.module_count,
            self.item_count()
        )
    }
}
