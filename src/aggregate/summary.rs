//! Run summary (run_summary.json) and its console rendering

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::RunStatus;
use crate::matrix::Configuration;

/// Schema version for run_summary.json
pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run_summary.json
pub const RUN_SUMMARY_SCHEMA_ID: &str = "simlane/run-summary@1";

const HEAVY_RULE: &str =
    "=======================================================================";
const LIGHT_RULE: &str =
    "-----------------------------------------------------------------------";

/// Final state of one module under one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub module_id: u32,
    pub status: RunStatus,
    pub duration_ms: u64,

    /// First toolchain diagnostic for non-passing modules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregated results for one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub config: Configuration,

    /// Count of modules with status=PASSED
    pub passed: usize,

    /// Count of modules with any other status
    pub failed: usize,

    /// Count of modules with status=COMPILE_FAILED (subset of `failed`)
    pub compile_failed: usize,

    /// Count of modules with status=TIMEOUT (subset of `failed`)
    pub timed_out: usize,

    /// Count of modules with status=UNKNOWN (subset of `failed`)
    pub unknown: usize,

    /// Summed job durations for this configuration in milliseconds
    pub duration_ms: u64,

    /// Per-module results in ascending module id order
    pub modules: Vec<ModuleResult>,
}

impl ConfigSummary {
    /// Build a configuration summary from its module results. Counts are
    /// derived here so they can never drift from the rows.
    pub fn from_modules(config: Configuration, modules: Vec<ModuleResult>) -> Self {
        let mut passed = 0;
        let mut failed = 0;
        let mut compile_failed = 0;
        let mut timed_out = 0;
        let mut unknown = 0;
        let mut duration_ms = 0u64;

        for module in &modules {
            match module.status {
                RunStatus::Passed => passed += 1,
                RunStatus::Failed => failed += 1,
                RunStatus::CompileFailed => {
                    failed += 1;
                    compile_failed += 1;
                }
                RunStatus::Timeout => {
                    failed += 1;
                    timed_out += 1;
                }
                RunStatus::Unknown => {
                    failed += 1;
                    unknown += 1;
                }
            }
            duration_ms += module.duration_ms;
        }

        Self {
            config,
            passed,
            failed,
            compile_failed,
            timed_out,
            unknown,
            duration_ms,
            modules,
        }
    }

    /// Number of modules under this configuration.
    pub fn total(&self) -> usize {
        self.modules.len()
    }

    /// Integer pass rate in percent, truncated. Zero when no modules ran.
    pub fn pass_rate(&self) -> u32 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        ((self.passed * 100) / total) as u32
    }
}

impl fmt::Display for ConfigSummary {
    /// Console summary table for one configuration.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Configuration Summary: WIDTH={}, PIPE_STAGES={}",
            self.config.width, self.config.pipe_stages
        )?;
        writeln!(f, "{}", LIGHT_RULE)?;
        writeln!(f, "{:<8} | {:<15} | {:<10}", "MODULE", "STATUS", "TIME (sec)")?;
        writeln!(f, "{}", LIGHT_RULE)?;
        for module in &self.modules {
            writeln!(
                f,
                "Module {:<2} | {:<15} | {:<10.1}",
                module.module_id,
                module.status.label(),
                module.duration_ms as f64 / 1000.0
            )?;
        }
        writeln!(f, "{}", LIGHT_RULE)?;
        writeln!(
            f,
            "{:<8} | {:<15} | {:<10.1} seconds",
            "TOTAL",
            format!("{} passed, {} failed", self.passed, self.failed),
            self.duration_ms as f64 / 1000.0
        )?;
        writeln!(f, "{}", LIGHT_RULE)?;
        for module in &self.modules {
            if let Some(detail) = &module.detail {
                writeln!(f, "  module {}: {}", module.module_id, detail)?;
            }
        }
        Ok(())
    }
}

/// Run summary (run_summary.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Run identifier (the run directory name)
    pub run_id: String,

    /// When the summary was created
    pub created_at: DateTime<Utc>,

    /// True when the run was cancelled before every item resolved
    pub partial: bool,

    /// Modules tested per configuration
    pub module_count: u32,

    /// Per-configuration summaries in canonical matrix order
    pub configs: Vec<ConfigSummary>,

    /// Count of jobs with status=PASSED across all configurations
    pub total_passed: usize,

    /// Count of jobs with any other status across all configurations
    pub total_failed: usize,

    /// Summed job durations in milliseconds
    pub total_duration_ms: u64,

    /// Wall-clock duration of the entire run in milliseconds
    pub wall_ms: u64,

    /// Human-readable summary
    pub human_summary: String,
}

impl RunSummary {
    /// Assemble a run summary from per-configuration summaries.
    pub fn from_configs(
        run_id: String,
        module_count: u32,
        configs: Vec<ConfigSummary>,
        partial: bool,
        wall_ms: u64,
    ) -> Self {
        let mut total_passed = 0;
        let mut total_failed = 0;
        let mut total_duration_ms = 0u64;
        for config in &configs {
            total_passed += config.passed;
            total_failed += config.failed;
            total_duration_ms += config.duration_ms;
        }

        let total = total_passed + total_failed;
        let human_summary =
            Self::generate_human_summary(partial, total, total_passed, total_failed, configs.len());

        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION,
            schema_id: RUN_SUMMARY_SCHEMA_ID.to_string(),
            run_id,
            created_at: Utc::now(),
            partial,
            module_count,
            configs,
            total_passed,
            total_failed,
            total_duration_ms,
            wall_ms,
            human_summary,
        }
    }

    /// Total number of jobs in the run.
    pub fn total_jobs(&self) -> usize {
        self.total_passed + self.total_failed
    }

    /// Count of UNKNOWN-status jobs across all configurations. In a partial
    /// run this covers every item that was never dispatched.
    pub fn total_unknown(&self) -> usize {
        self.configs.iter().map(|c| c.unknown).sum()
    }

    fn generate_human_summary(
        partial: bool,
        total: usize,
        passed: usize,
        failed: usize,
        config_count: usize,
    ) -> String {
        if partial {
            format!(
                "Partial run: {} passed, {} failed of {} tests across {} configurations",
                passed, failed, total, config_count
            )
        } else if failed == 0 {
            format!("All {} tests passed across {} configurations", total, config_count)
        } else {
            format!(
                "{} of {} tests failed across {} configurations",
                failed, total, config_count
            )
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write to file (write to temp, then rename over the final path).
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, path)
    }

    /// Load from file
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))
    }
}

impl fmt::Display for RunSummary {
    /// Final console summary block.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths: BTreeSet<u32> = self.configs.iter().map(|c| c.config.width).collect();
        let stages: BTreeSet<u32> = self.configs.iter().map(|c| c.config.pipe_stages).collect();

        writeln!(f, "{}", HEAVY_RULE)?;
        writeln!(f, "                    FINAL TEST SUMMARY")?;
        writeln!(f, "{}", HEAVY_RULE)?;
        writeln!(
            f,
            "Total configurations tested: {}x{} = {}",
            widths.len(),
            stages.len(),
            self.configs.len()
        )?;
        writeln!(f, "Total modules tested: {}", self.total_jobs())?;
        writeln!(f, "Total tests passed: {}", self.total_passed)?;
        writeln!(f, "Total tests failed: {}", self.total_failed)?;
        writeln!(f, "Total time: {:.1} seconds", self.wall_ms as f64 / 1000.0)?;
        if self.partial {
            writeln!(
                f,
                "Run cancelled before completion: {} tests unresolved",
                self.total_unknown()
            )?;
        }
        writeln!(f, "{}", HEAVY_RULE)?;
        Ok(())
    }
}
