//! External toolchain execution for one work item
//!
//! Runs the two-step flow per job: compile the parameterized design with the
//! configured compiler, then execute the produced simulation binary. Both
//! steps write into the item's single log file; the simulate step is bounded
//! by a wall-clock timeout. Each job works in its own scratch directory, so
//! concurrent jobs never share build outputs.
//!
//! Routine failures (compile error, simulation crash, timeout) come back as
//! an ordinary [`JobOutcome`]. `Err` is reserved for the environment being
//! broken: the scratch area or log cannot be prepared, or the configured
//! compiler cannot be spawned at all.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;

use crate::artifact::RunLayout;
use crate::matrix::WorkItem;
use crate::signal::CancelState;

/// Compiler invoked when none is configured.
pub const DEFAULT_COMPILER: &str = "verilator";

/// Name of the simulation binary the build step produces inside `obj_dir/`.
pub const SIM_BINARY: &str = "simv";

/// Default wall-clock limit for one simulation.
pub const DEFAULT_SIM_TIMEOUT_SECONDS: u64 = 300;

/// Poll interval while waiting on a child process.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period between SIGTERM and SIGKILL.
const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Fatal environment errors. Everything a misbehaving design can cause is a
/// [`JobOutcome`] instead.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Toolchain configuration for the build and simulate steps.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Compiler executable (path or name resolved via PATH).
    pub compiler: PathBuf,
    /// Design and testbench sources, passed to the compiler in order.
    pub sources: Vec<PathBuf>,
    /// Top module for elaboration.
    pub top_module: String,
    /// Extra arguments appended to the compile command line.
    pub extra_compile_args: Vec<String>,
    /// Wall-clock limit for the simulate step.
    pub sim_timeout: Duration,
    /// Keep per-job scratch directories after the job finishes.
    pub keep_scratch: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            compiler: PathBuf::from(DEFAULT_COMPILER),
            sources: vec![
                PathBuf::from("arithmetic_modules.sv"),
                PathBuf::from("pipelined_arithmetic.sv"),
                PathBuf::from("tb_pipelined_arithmetic.sv"),
            ],
            top_module: "tb_pipelined_arithmetic".to_string(),
            extra_compile_args: Vec::new(),
            sim_timeout: Duration::from_secs(DEFAULT_SIM_TIMEOUT_SECONDS),
            keep_scratch: false,
        }
    }
}

/// Raw result of one job, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub item: WorkItem,
    /// Exit code of the build step; `None` when killed by a signal.
    pub compile_exit_code: Option<i32>,
    /// Exit code of the simulate step; `None` when the build failed, the
    /// binary could not start, or the process was killed.
    pub sim_exit_code: Option<i32>,
    pub log_path: PathBuf,
    /// Wall-clock across build plus simulate.
    pub duration_ms: u64,
    /// The simulate step hit its wall-clock limit and was terminated.
    pub timed_out: bool,
}

/// How one waited-on step ended.
struct StepWait {
    exit_code: Option<i32>,
    timed_out: bool,
}

/// Executes work items against the external toolchain.
pub struct JobRunner {
    config: RunnerConfig,
    layout: RunLayout,
}

impl JobRunner {
    pub fn new(config: RunnerConfig, layout: RunLayout) -> Self {
        Self { config, layout }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one work item: prepare scratch and log, compile, simulate.
    pub fn run(&self, item: &WorkItem, cancel: &CancelState) -> Result<JobOutcome, RunnerError> {
        let started = Instant::now();

        let scratch = self.layout.scratch_dir(item);
        fs::create_dir_all(&scratch)?;
        let log_path = self.layout.log_path(item);
        let mut log = File::create(&log_path)?;

        let compile_args = self.compile_args(item);
        writeln!(log, "=== simlane {} ===", item)?;
        writeln!(
            log,
            "command: {} {}",
            self.config.compiler.display(),
            compile_args.join(" ")
        )?;
        writeln!(log, "scratch: {}", scratch.display())?;
        writeln!(log, "started_at: {}", Utc::now().to_rfc3339())?;
        writeln!(log, "--- compile ---")?;

        // The child appends through duplicated handles that share the log's
        // file offset, so step banners and tool output stay in order.
        let mut compile_cmd = Command::new(&self.config.compiler);
        compile_cmd
            .args(&compile_args)
            .current_dir(&scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log.try_clone()?));

        let mut compile_child = compile_cmd.spawn().map_err(|e| RunnerError::Spawn {
            program: self.config.compiler.display().to_string(),
            source: e,
        })?;
        let compile = self.wait_step(&mut compile_child, None, cancel)?;

        if compile.exit_code != Some(0) {
            writeln!(
                log,
                "--- compile step ended with exit {:?} ---",
                compile.exit_code
            )?;
            return self.finish(
                item,
                &mut log,
                &scratch,
                log_path,
                started,
                compile.exit_code,
                None,
                false,
            );
        }

        writeln!(log, "--- simulate ---")?;
        let sim_path = scratch.join("obj_dir").join(SIM_BINARY);
        let mut sim_cmd = Command::new(&sim_path);
        sim_cmd
            .current_dir(&scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log.try_clone()?));

        let (sim_exit_code, timed_out) = match sim_cmd.spawn() {
            Ok(mut sim_child) => {
                let sim = self.wait_step(&mut sim_child, Some(self.config.sim_timeout), cancel)?;
                (sim.exit_code, sim.timed_out)
            }
            Err(e) => {
                // The compiler claimed success but produced no runnable
                // binary. That is the toolchain misbehaving, not a fatal
                // environment error.
                writeln!(
                    log,
                    "%Error: simulation binary {} could not start: {}",
                    sim_path.display(),
                    e
                )?;
                (None, false)
            }
        };

        if timed_out {
            writeln!(
                log,
                "--- simulate step terminated after {}s wall-clock limit ---",
                self.config.sim_timeout.as_secs()
            )?;
        }

        self.finish(
            item,
            &mut log,
            &scratch,
            log_path,
            started,
            compile.exit_code,
            sim_exit_code,
            timed_out,
        )
    }

    /// Compile command line for one item, following the Verilator flow: build
    /// a self-contained binary with the matrix point passed as defines.
    fn compile_args(&self, item: &WorkItem) -> Vec<String> {
        let mut args: Vec<String> = [
            "--binary",
            "--timing",
            "--assert",
            "--autoflush",
            "-j",
            "2",
            "-sv",
            "-Wno-CASEINCOMPLETE",
            "-Wno-REALCVT",
            "-Wno-SELRANGE",
            "-Wno-TIMESCALEMOD",
            "-Wno-UNSIGNED",
            "-Wno-WIDTH",
            "-CFLAGS",
            "-O1",
            "-Wno-fatal",
            "--trace-structs",
            "--trace-params",
            "--trace-fst",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push("-top".to_string());
        args.push(self.config.top_module.clone());
        args.push("-o".to_string());
        args.push(SIM_BINARY.to_string());
        args.push("+define+SIMULATION".to_string());
        args.push(format!("+define+MODULE_ID={}", item.module_id));
        args.push(format!("+define+WIDTH={}", item.config.width));
        args.push(format!("+define+PIPE_STAGES={}", item.config.pipe_stages));
        args.extend(self.config.extra_compile_args.iter().cloned());
        for source in &self.config.sources {
            args.push(absolutize(source).display().to_string());
        }
        args
    }

    /// Wait for a step to finish, honoring the optional wall-clock limit and
    /// the shared cancel state.
    fn wait_step(
        &self,
        child: &mut Child,
        limit: Option<Duration>,
        cancel: &CancelState,
    ) -> io::Result<StepWait> {
        let deadline = limit.map(|d| Instant::now() + d);
        loop {
            if cancel.is_requested() {
                self.terminate_child(child)?;
                let status = child.wait()?;
                return Ok(StepWait {
                    exit_code: status.code(),
                    timed_out: false,
                });
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.terminate_child(child)?;
                    let status = child.wait()?;
                    return Ok(StepWait {
                        exit_code: status.code(),
                        timed_out: true,
                    });
                }
            }
            match child.try_wait()? {
                Some(status) => {
                    return Ok(StepWait {
                        exit_code: status.code(),
                        timed_out: false,
                    })
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        }
    }

    /// Terminate a child gracefully (SIGTERM, grace period), then forcefully.
    fn terminate_child(&self, child: &mut Child) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            let _ = signal::kill(pid, Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = child.kill();
        }

        let start = Instant::now();
        while start.elapsed() < TERMINATION_GRACE {
            match child.try_wait()? {
                Some(_) => return Ok(()),
                None => std::thread::sleep(POLL_INTERVAL),
            }
        }

        let _ = child.kill();
        let _ = child.wait();
        Ok(())
    }

    /// Write the log trailer, drop the scratch dir, assemble the outcome.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        item: &WorkItem,
        log: &mut File,
        scratch: &Path,
        log_path: PathBuf,
        started: Instant,
        compile_exit_code: Option<i32>,
        sim_exit_code: Option<i32>,
        timed_out: bool,
    ) -> Result<JobOutcome, RunnerError> {
        writeln!(log, "ended_at: {}", Utc::now().to_rfc3339())?;

        if !self.config.keep_scratch {
            let _ = fs::remove_dir_all(scratch);
        }

        Ok(JobOutcome {
            item: *item,
            compile_exit_code,
            sim_exit_code,
            log_path,
            duration_ms: started.elapsed().as_millis() as u64,
            timed_out,
        })
    }
}

/// Resolve a possibly-relative source path against the invocation directory.
/// Compile steps run inside the scratch dir, so relative paths from the
/// command line would otherwise dangle.
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
