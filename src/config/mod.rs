//! Layered run configuration
//!
//! Three layers merge into the effective configuration, later layers winning:
//! 1. Built-in defaults
//! 2. Optional TOML file (simlane.toml, or --config <path>)
//! 3. CLI flags

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::matrix::{MatrixError, SweepMatrix};
use crate::runner::{RunnerConfig, DEFAULT_COMPILER, DEFAULT_SIM_TIMEOUT_SECONDS};
use crate::scheduler::DEFAULT_WORKERS;

/// Config file looked up in the working directory when --config is absent.
pub const CONFIG_FILE: &str = "simlane.toml";

/// Upper bound for the overall run timeout.
const MAX_OVERALL_SECONDS: u64 = 86400;

const DEFAULT_WIDTHS: &[u32] = &[8, 16];
const DEFAULT_PIPE_STAGES: &[u32] = &[2, 3, 4];
const DEFAULT_MODULES: u32 = 25;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

/// Raw values from a TOML config file. Every field is optional; absent
/// fields fall through to the defaults.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub widths: Option<Vec<u32>>,
    pub pipe_stages: Option<Vec<u32>>,
    pub modules: Option<u32>,
    pub workers: Option<usize>,
    pub sim_timeout_seconds: Option<u64>,
    pub overall_seconds: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub keep_scratch: Option<bool>,
    pub compiler: Option<PathBuf>,
    pub sources: Option<Vec<PathBuf>>,
    pub top_module: Option<String>,
    pub extra_compile_args: Option<Vec<String>>,
}

impl FileConfig {
    /// Load and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Load the explicit config file, or simlane.toml from the working
    /// directory if present. An explicitly named file must exist.
    pub fn load_layer(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(CONFIG_FILE);
                if default.exists() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Values taken from CLI flags. `None` (or empty for repeatable flags)
/// means the flag was not given.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub widths: Option<Vec<u32>>,
    pub pipe_stages: Option<Vec<u32>>,
    pub modules: Option<u32>,
    pub workers: Option<usize>,
    pub sim_timeout_seconds: Option<u64>,
    pub overall_seconds: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub keep_scratch: bool,
    pub compiler: Option<PathBuf>,
    pub sources: Vec<PathBuf>,
    pub top_module: Option<String>,
}

/// Effective configuration for one run.
#[derive(Debug, Clone)]
pub struct LaneConfig {
    pub matrix: SweepMatrix,
    pub workers: usize,
    pub overall_timeout: Option<Duration>,
    /// Directory run directories are created under.
    pub output_dir: PathBuf,
    pub runner: RunnerConfig,
}

impl LaneConfig {
    /// Merge the layers and validate the result.
    pub fn resolve(file: FileConfig, cli: CliOverrides) -> Result<Self, ConfigError> {
        let widths = cli
            .widths
            .or(file.widths)
            .unwrap_or_else(|| DEFAULT_WIDTHS.to_vec());
        let pipe_stages = cli
            .pipe_stages
            .or(file.pipe_stages)
            .unwrap_or_else(|| DEFAULT_PIPE_STAGES.to_vec());
        let modules = cli.modules.or(file.modules).unwrap_or(DEFAULT_MODULES);
        let matrix = SweepMatrix::new(widths, pipe_stages, modules)?;

        let workers = cli.workers.or(file.workers).unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(ConfigError::ValidationError(
                "workers must be at least 1".to_string(),
            ));
        }

        let sim_timeout_seconds = cli
            .sim_timeout_seconds
            .or(file.sim_timeout_seconds)
            .unwrap_or(DEFAULT_SIM_TIMEOUT_SECONDS);
        if sim_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "sim_timeout_seconds must be at least 1".to_string(),
            ));
        }

        let overall_seconds = cli.overall_seconds.or(file.overall_seconds);
        if let Some(overall) = overall_seconds {
            if overall == 0 || overall > MAX_OVERALL_SECONDS {
                return Err(ConfigError::ValidationError(format!(
                    "overall_seconds must be in (0, {}]",
                    MAX_OVERALL_SECONDS
                )));
            }
        }

        let defaults = RunnerConfig::default();
        let sources = if !cli.sources.is_empty() {
            cli.sources
        } else {
            file.sources.unwrap_or(defaults.sources)
        };
        if sources.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one source file is required".to_string(),
            ));
        }

        let runner = RunnerConfig {
            compiler: cli
                .compiler
                .or(file.compiler)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_COMPILER)),
            sources,
            top_module: cli
                .top_module
                .or(file.top_module)
                .unwrap_or(defaults.top_module),
            extra_compile_args: file.extra_compile_args.unwrap_or_default(),
            sim_timeout: Duration::from_secs(sim_timeout_seconds),
            keep_scratch: cli.keep_scratch || file.keep_scratch.unwrap_or(false),
        };

        Ok(Self {
            matrix,
            workers,
            overall_timeout: overall_seconds.map(Duration::from_secs),
            output_dir: cli
                .output_dir
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            runner,
        })
    }
}
