//! simlane CLI
//!
//! Entry point for the `simlane` command-line tool. `run` sweeps the
//! configured test matrix, `report` re-renders the HTML reports for a
//! stored run, and `clean` prunes old run directories.

use clap::{Parser, Subcommand};
use simlane::artifact::{self, ArtifactError, RetentionPolicy, DASHBOARD_FILE};
use simlane::config::{CliOverrides, FileConfig, LaneConfig};
use simlane::pipeline::{self, Pipeline, EXIT_COMPLETED, EXIT_FATAL, EXIT_INVALID_CONFIG};
use simlane::signal::{CancelState, SignalHandler};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "simlane")]
#[command(about = "Sweep a simulation test matrix and render HTML reports", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every module across the width x pipe-stage matrix
    Run {
        /// WIDTH values to sweep, comma separated
        #[arg(long, value_delimiter = ',')]
        widths: Option<Vec<u32>>,

        /// PIPE_STAGES values to sweep, comma separated
        #[arg(long, value_delimiter = ',')]
        pipe_stages: Option<Vec<u32>>,

        /// Number of modules to test per configuration
        #[arg(long)]
        modules: Option<u32>,

        /// Concurrent simulation jobs
        #[arg(long, short = 'j')]
        workers: Option<usize>,

        /// Per-simulation time limit in seconds
        #[arg(long)]
        sim_timeout: Option<u64>,

        /// Whole-run time limit in seconds; the run is cancelled when it expires
        #[arg(long)]
        overall_timeout: Option<u64>,

        /// Directory run directories are created under
        #[arg(long, short = 'o')]
        output_dir: Option<PathBuf>,

        /// Path to config file (default: simlane.toml if present)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Keep per-job scratch directories for debugging
        #[arg(long)]
        keep_scratch: bool,

        /// Compiler executable to invoke
        #[arg(long)]
        compiler: Option<PathBuf>,

        /// Source file to compile; repeat for multiple files
        #[arg(long)]
        source: Vec<PathBuf>,

        /// Top module passed to the compiler
        #[arg(long)]
        top: Option<String>,
    },

    /// Re-render the HTML reports for an existing run directory
    Report {
        /// The run directory (run_<timestamp>) to re-render
        run_dir: PathBuf,
    },

    /// Delete old completed run directories
    Clean {
        /// Newest completed runs to keep
        #[arg(long, default_value_t = 10)]
        keep: usize,

        /// Also delete completed runs older than this many days
        #[arg(long)]
        max_age_days: Option<u32>,

        /// Directory holding the run directories
        #[arg(long, short = 'o')]
        output_dir: Option<PathBuf>,

        /// Report what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            widths,
            pipe_stages,
            modules,
            workers,
            sim_timeout,
            overall_timeout,
            output_dir,
            config,
            keep_scratch,
            compiler,
            source,
            top,
        } => {
            let overrides = CliOverrides {
                widths,
                pipe_stages,
                modules,
                workers,
                sim_timeout_seconds: sim_timeout,
                overall_seconds: overall_timeout,
                output_dir,
                keep_scratch,
                compiler,
                sources: source,
                top_module: top,
            };
            run_sweep(config.as_deref(), overrides);
        }
        Commands::Report { run_dir } => {
            run_report(&run_dir);
        }
        Commands::Clean {
            keep,
            max_age_days,
            output_dir,
            dry_run,
        } => {
            run_clean(keep, max_age_days, output_dir, dry_run);
        }
    }
}

fn run_sweep(config_path: Option<&Path>, overrides: CliOverrides) {
    let file = match FileConfig::load_layer(config_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(EXIT_INVALID_CONFIG);
        }
    };

    let lane = match LaneConfig::resolve(file, overrides) {
        Ok(lane) => lane,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            process::exit(EXIT_INVALID_CONFIG);
        }
    };

    let deadline = lane.overall_timeout.map(|limit| Instant::now() + limit);
    let cancel = Arc::new(CancelState::with_deadline(deadline));
    let handler = SignalHandler::new(Arc::clone(&cancel));
    if let Err(e) = handler.install() {
        eprintln!("Warning: could not install signal handler: {}", e);
    }

    let pipeline = Pipeline::new(lane);
    match pipeline.execute(&cancel) {
        Ok(output) => {
            process::exit(output.exit_code());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn run_report(run_dir: &Path) {
    match pipeline::regenerate_reports(run_dir) {
        Ok(summary) => {
            println!("Reports regenerated for {}", summary.run_id);
            println!(
                "View the report at: {}",
                run_dir.join(DASHBOARD_FILE).display()
            );
            process::exit(EXIT_COMPLETED);
        }
        Err(e) => {
            eprintln!("Error regenerating reports: {}", e);
            process::exit(e.exit_code());
        }
    }
}

fn run_clean(keep: usize, max_age_days: Option<u32>, output_dir: Option<PathBuf>, dry_run: bool) {
    let policy = RetentionPolicy {
        max_runs: keep,
        max_age_days,
        dry_run,
    };
    let root = output_dir.unwrap_or_else(|| PathBuf::from("."));

    match artifact::prune(&root, &policy) {
        Ok(outcome) => {
            if outcome.dry_run {
                println!(
                    "Dry run: {} of {} run directories would be deleted",
                    outcome.deleted.len(),
                    outcome.examined
                );
            } else {
                println!(
                    "Deleted {} of {} run directories ({} bytes freed)",
                    outcome.deleted.len(),
                    outcome.examined,
                    outcome.bytes_freed
                );
            }
            for run_id in &outcome.deleted {
                println!("  {}", run_id);
            }
            if outcome.skipped_running > 0 {
                println!(
                    "Skipped {} run(s) still marked RUNNING",
                    outcome.skipped_running
                );
            }
            process::exit(EXIT_COMPLETED);
        }
        Err(e) => {
            eprintln!("Error pruning runs: {}", e);
            let code = match e {
                ArtifactError::InvalidPolicy(_) => EXIT_INVALID_CONFIG,
                _ => EXIT_FATAL,
            };
            process::exit(code);
        }
    }
}
