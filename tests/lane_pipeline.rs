//! End-to-end pipeline tests
//!
//! Drives the full run pipeline against stub toolchain scripts: matrix
//! expansion, the worker pool, classification, aggregation, report
//! rendering, the latest-run pointer, and cancellation.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use simlane::artifact::{self, DASHBOARD_FILE, SUMMARY_FILE};
use simlane::classifier::RunStatus;
use simlane::config::{CliOverrides, FileConfig, LaneConfig};
use simlane::matrix::SweepMatrix;
use simlane::pipeline::{self, Pipeline, EXIT_CANCELLED, EXIT_COMPLETED};
use simlane::runner::RunnerConfig;
use simlane::signal::{CancelReason, CancelState};
use simlane::state::{RunState, RunStateData};
use tempfile::TempDir;

/// Stub compiler: every module builds a simulation that passes.
const PASS_COMPILER: &str = "#!/bin/sh\n\
mkdir -p obj_dir\n\
cat > obj_dir/simv <<'SIM'\n\
#!/bin/sh\n\
echo \"cycle 100\"\n\
echo \"TEST PASSED\"\n\
SIM\n\
chmod +x obj_dir/simv\n\
echo \"compile ok\"\n";

/// Stub compiler: module 2 fails to compile, everything else passes.
const FAIL_M2_COMPILER: &str = "#!/bin/sh\n\
case \"$*\" in\n\
  *\"MODULE_ID=2 \"*)\n\
    echo \"%Error: alu.sv:7:3: syntax error\" >&2\n\
    exit 1\n\
    ;;\n\
esac\n\
mkdir -p obj_dir\n\
cat > obj_dir/simv <<'SIM'\n\
#!/bin/sh\n\
echo \"TEST PASSED\"\n\
SIM\n\
chmod +x obj_dir/simv\n";

/// Stub compiler: module 3's simulation reports failure, the rest pass.
const FAIL_M3_SIM_COMPILER: &str = "#!/bin/sh\n\
marker=\"TEST PASSED\"\n\
case \"$*\" in\n\
  *\"MODULE_ID=3 \"*) marker=\"TEST FAILED\" ;;\n\
esac\n\
mkdir -p obj_dir\n\
printf '#!/bin/sh\\necho \"%s\"\\n' \"$marker\" > obj_dir/simv\n\
chmod +x obj_dir/simv\n";

/// Stub compiler: the simulation hangs until killed.
const HANG_COMPILER: &str = "#!/bin/sh\n\
mkdir -p obj_dir\n\
cat > obj_dir/simv <<'SIM'\n\
#!/bin/sh\n\
echo \"simulation starting\"\n\
exec sleep 30\n\
SIM\n\
chmod +x obj_dir/simv\n";

/// Write an executable stub compiler script into `dir`.
fn write_compiler(dir: &Path, script: &str) -> PathBuf {
    let path = dir.join("stub-verilator");
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// A minimal source file for the stub toolchain to "compile".
fn write_source(dir: &Path) -> PathBuf {
    let path = dir.join("design.sv");
    fs::write(&path, "module design; endmodule\n").unwrap();
    path
}

/// Build a lane config with a stub compiler and a small matrix.
fn make_lane(
    root: &Path,
    compiler: PathBuf,
    widths: Vec<u32>,
    pipe_stages: Vec<u32>,
    modules: u32,
    workers: usize,
) -> LaneConfig {
    let source = write_source(root);
    LaneConfig {
        matrix: SweepMatrix::new(widths, pipe_stages, modules).unwrap(),
        workers,
        overall_timeout: None,
        output_dir: root.to_path_buf(),
        runner: RunnerConfig {
            compiler,
            sources: vec![source],
            top_module: "tb_design".to_string(),
            extra_compile_args: Vec::new(),
            sim_timeout: Duration::from_secs(5),
            keep_scratch: false,
        },
    }
}

/// (width, pipe_stages, module_id, status) for every module in the summary,
/// in the order the summary lists them.
fn result_triples(summary: &simlane::RunSummary) -> Vec<(u32, u32, u32, RunStatus)> {
    summary
        .configs
        .iter()
        .flat_map(|c| {
            c.modules
                .iter()
                .map(move |m| (c.config.width, c.config.pipe_stages, m.module_id, m.status))
        })
        .collect()
}

// =============================================================================
// Full sweep, everything passes
// =============================================================================

#[test]
fn test_full_sweep_all_passed() {
    let dir = TempDir::new().unwrap();
    let compiler = write_compiler(dir.path(), PASS_COMPILER);
    let lane = make_lane(dir.path(), compiler, vec![8, 16], vec![2, 3], 3, 4);

    let output = Pipeline::new(lane).execute(&CancelState::new()).unwrap();
    assert_eq!(output.exit_code(), EXIT_COMPLETED);

    let summary = &output.summary;
    assert!(!summary.partial);
    assert_eq!(summary.configs.len(), 4);
    assert_eq!(summary.total_passed, 12);
    assert_eq!(summary.total_failed, 0);
    for config in &summary.configs {
        assert_eq!(config.passed, 3);
        assert_eq!(config.failed, 0);
        assert_eq!(config.pass_rate(), 100);
    }

    // Artifact layout: per-config logs and reports, run-level files.
    for dir_name in ["w8_p2", "w8_p3", "w16_p2", "w16_p3"] {
        for module_id in 1..=3 {
            let log = output
                .run_dir
                .join(dir_name)
                .join(format!("module_{}.log", module_id));
            assert!(log.exists(), "missing log {}", log.display());
        }
        assert!(output.run_dir.join(dir_name).join("report.html").exists());
    }
    assert!(output.run_dir.join(DASHBOARD_FILE).exists());
    assert!(output.run_dir.join(SUMMARY_FILE).exists());

    // Scratch directories are gone after a clean run.
    assert!(!output.run_dir.join("scratch").exists());

    // Terminal state on disk.
    let state = RunStateData::load_from_run_dir(&output.run_dir).unwrap();
    assert_eq!(state.state, RunState::Completed);
    assert_eq!(state.run_id, summary.run_id);

    // The pointer resolves to this run; the dashboard is reachable through it.
    assert_eq!(
        artifact::read_latest_pointer(dir.path()),
        Some(summary.run_id.clone())
    );
    assert!(dir.path().join("latest_results").join(DASHBOARD_FILE).exists());

    let dashboard = fs::read_to_string(output.run_dir.join(DASHBOARD_FILE)).unwrap();
    assert!(dashboard.contains("ALL TESTS PASSED!"));
    assert!(dashboard.contains("100%"), "heat map should show full rates");

    let json = fs::read_to_string(output.run_dir.join(SUMMARY_FILE)).unwrap();
    assert!(json.contains(r#""schema_id": "simlane/run-summary@1""#));
    assert!(json.contains(r#""schema_version": 1"#));
}

// =============================================================================
// Compile failure is isolated to its module
// =============================================================================

#[test]
fn test_compile_failure_isolated_and_detailed() {
    let dir = TempDir::new().unwrap();
    let compiler = write_compiler(dir.path(), FAIL_M2_COMPILER);
    let lane = make_lane(dir.path(), compiler, vec![8], vec![2, 3], 3, 2);

    let output = Pipeline::new(lane).execute(&CancelState::new()).unwrap();

    // Failures do not change the exit disposition of a completed run.
    assert_eq!(output.exit_code(), EXIT_COMPLETED);

    let summary = &output.summary;
    assert_eq!(summary.total_passed, 4);
    assert_eq!(summary.total_failed, 2);
    for config in &summary.configs {
        assert_eq!(config.compile_failed, 1);
        let module_2 = &config.modules[1];
        assert_eq!(module_2.module_id, 2);
        assert_eq!(module_2.status, RunStatus::CompileFailed);
        assert_eq!(
            module_2.detail.as_deref(),
            Some("%Error: alu.sv:7:3: syntax error")
        );
    }

    // The compiler diagnostic is preserved in the module log.
    let log = fs::read_to_string(output.run_dir.join("w8_p2/module_2.log")).unwrap();
    assert!(log.contains("%Error: alu.sv:7:3: syntax error"));

    // And surfaces in the per-configuration report.
    let report = fs::read_to_string(output.run_dir.join("w8_p2/report.html")).unwrap();
    assert!(report.contains("COMPILE FAILED"));
    assert!(report.contains("%Error: alu.sv:7:3: syntax error"));
}

// =============================================================================
// Simulation timeout
// =============================================================================

#[test]
fn test_hanging_simulation_times_out() {
    let dir = TempDir::new().unwrap();
    let compiler = write_compiler(dir.path(), HANG_COMPILER);
    let mut lane = make_lane(dir.path(), compiler, vec![8], vec![2], 1, 1);
    lane.runner.sim_timeout = Duration::from_secs(1);

    let output = Pipeline::new(lane).execute(&CancelState::new()).unwrap();
    assert_eq!(output.exit_code(), EXIT_COMPLETED);

    let module = &output.summary.configs[0].modules[0];
    assert_eq!(module.status, RunStatus::Timeout);
    assert!(
        module.duration_ms >= 1000,
        "timeout should take at least the limit, got {}ms",
        module.duration_ms
    );

    // Output produced before the kill is retained.
    let log = fs::read_to_string(output.run_dir.join("w8_p2/module_1.log")).unwrap();
    assert!(log.contains("simulation starting"));
}

// =============================================================================
// Failed simulation counts against the configuration
// =============================================================================

#[test]
fn test_failed_marker_counts_against_config() {
    let dir = TempDir::new().unwrap();
    let compiler = write_compiler(dir.path(), FAIL_M3_SIM_COMPILER);
    let lane = make_lane(dir.path(), compiler, vec![8], vec![2], 3, 2);

    let output = Pipeline::new(lane).execute(&CancelState::new()).unwrap();

    let config = &output.summary.configs[0];
    assert_eq!(config.passed, 2);
    assert_eq!(config.failed, 1);
    assert_eq!(config.modules[2].status, RunStatus::Failed);
    assert_eq!(config.pass_rate(), 66);

    let report = fs::read_to_string(output.run_dir.join("w8_p2/report.html")).unwrap();
    assert!(report.contains("SOME TESTS FAILED!"));
    assert!(report.contains("(1 out of 3)"));

    let dashboard = fs::read_to_string(output.run_dir.join(DASHBOARD_FILE)).unwrap();
    assert!(dashboard.contains("66%"), "heat map should show the pass rate");
}

// =============================================================================
// Worker count does not change results
// =============================================================================

#[test]
fn test_results_independent_of_worker_count() {
    let serial_dir = TempDir::new().unwrap();
    let serial_compiler = write_compiler(serial_dir.path(), FAIL_M3_SIM_COMPILER);
    let serial_lane = make_lane(serial_dir.path(), serial_compiler, vec![8, 16], vec![2], 3, 1);
    let serial = Pipeline::new(serial_lane)
        .execute(&CancelState::new())
        .unwrap();

    let parallel_dir = TempDir::new().unwrap();
    let parallel_compiler = write_compiler(parallel_dir.path(), FAIL_M3_SIM_COMPILER);
    let parallel_lane = make_lane(
        parallel_dir.path(),
        parallel_compiler,
        vec![8, 16],
        vec![2],
        3,
        4,
    );
    let parallel = Pipeline::new(parallel_lane)
        .execute(&CancelState::new())
        .unwrap();

    assert_eq!(
        result_triples(&serial.summary),
        result_triples(&parallel.summary),
        "status sequence must not depend on worker count"
    );
    assert_eq!(serial.summary.total_passed, parallel.summary.total_passed);
    assert_eq!(serial.summary.total_failed, parallel.summary.total_failed);
}

// =============================================================================
// Cancellation produces a partial report
// =============================================================================

#[test]
fn test_cancelled_run_writes_partial_report() {
    let dir = TempDir::new().unwrap();
    let compiler = write_compiler(dir.path(), PASS_COMPILER);
    let lane = make_lane(dir.path(), compiler, vec![8, 16], vec![2], 2, 2);

    // Cancel before any work is claimed.
    let cancel = CancelState::new();
    cancel.request(CancelReason::Interrupt);

    let output = Pipeline::new(lane).execute(&cancel).unwrap();
    assert_eq!(output.exit_code(), EXIT_CANCELLED);

    let summary = &output.summary;
    assert!(summary.partial);
    assert_eq!(summary.total_passed, 0);
    assert_eq!(summary.total_failed, 4);
    for config in &summary.configs {
        for module in &config.modules {
            assert_eq!(module.status, RunStatus::Unknown);
            assert_eq!(
                module.detail.as_deref(),
                Some("not run (cancelled before dispatch)")
            );
        }
    }

    // Reports exist and carry the partial banner.
    let dashboard = fs::read_to_string(output.run_dir.join(DASHBOARD_FILE)).unwrap();
    assert!(dashboard.contains("PARTIAL RUN"));
    assert!(output.run_dir.join("w8_p2/report.html").exists());

    let state = RunStateData::load_from_run_dir(&output.run_dir).unwrap();
    assert_eq!(state.state, RunState::Cancelled);
}

// =============================================================================
// Invalid matrix is rejected before any run directory exists
// =============================================================================

#[test]
fn test_empty_widths_rejected_without_run_dir() {
    let dir = TempDir::new().unwrap();

    let overrides = CliOverrides {
        widths: Some(Vec::new()),
        output_dir: Some(dir.path().to_path_buf()),
        ..CliOverrides::default()
    };
    let result = LaneConfig::resolve(FileConfig::default(), overrides);
    assert!(result.is_err());

    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("run_"))
        .collect();
    assert!(leftovers.is_empty(), "no run directory may be created");
}

// =============================================================================
// Report regeneration
// =============================================================================

#[test]
fn test_report_regeneration_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let compiler = write_compiler(dir.path(), FAIL_M2_COMPILER);
    let lane = make_lane(dir.path(), compiler, vec![8], vec![2], 3, 2);

    let output = Pipeline::new(lane).execute(&CancelState::new()).unwrap();

    let dashboard_path = output.run_dir.join(DASHBOARD_FILE);
    let report_path = output.run_dir.join("w8_p2/report.html");
    let dashboard_before = fs::read(&dashboard_path).unwrap();
    let report_before = fs::read(&report_path).unwrap();

    fs::remove_file(&dashboard_path).unwrap();
    fs::remove_file(&report_path).unwrap();

    let summary = pipeline::regenerate_reports(&output.run_dir).unwrap();
    assert_eq!(summary.run_id, output.summary.run_id);

    assert_eq!(fs::read(&dashboard_path).unwrap(), dashboard_before);
    assert_eq!(fs::read(&report_path).unwrap(), report_before);
}

// =============================================================================
// Latest pointer tracks the newest run
// =============================================================================

#[test]
fn test_latest_pointer_tracks_newest_run() {
    let dir = TempDir::new().unwrap();
    let compiler = write_compiler(dir.path(), PASS_COMPILER);

    let first_lane = make_lane(dir.path(), compiler.clone(), vec![8], vec![2], 1, 1);
    let first = Pipeline::new(first_lane).execute(&CancelState::new()).unwrap();

    // Run ids have one-second resolution.
    thread::sleep(Duration::from_millis(1100));

    let second_lane = make_lane(dir.path(), compiler, vec![8], vec![2], 1, 1);
    let second = Pipeline::new(second_lane)
        .execute(&CancelState::new())
        .unwrap();

    assert_ne!(first.summary.run_id, second.summary.run_id);
    assert_eq!(
        artifact::read_latest_pointer(dir.path()),
        Some(second.summary.run_id.clone())
    );

    // Both run directories remain on disk.
    assert!(first.run_dir.exists());
    assert!(second.run_dir.exists());
}
