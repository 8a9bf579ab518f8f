//! Run artifact layout and retention
//!
//! Owns every path under the artifacts root:
//!
//! ```text
//! <root>/
//!     run_<timestamp>/
//!         run_state.json
//!         run_summary.json
//!         dashboard.html
//!         w<width>_p<stages>/
//!             module_<id>.log
//!             report.html
//!         scratch/<w>_<p>_m<id>/     (per-job work dirs)
//!     latest_results                 (pointer to the newest finished run)
//! ```
//!
//! The `latest_results` pointer is replaced with a rename-based swap and only
//! after a run's artifacts are fully written, so readers never observe a
//! half-written run through it. Retention pruning deletes the oldest terminal
//! runs past a keep budget and never touches a RUNNING run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::matrix::{Configuration, WorkItem};
use crate::state::RunStateData;

/// Prefix of every run directory under the artifacts root.
pub const RUN_DIR_PREFIX: &str = "run_";

/// Name of the latest-run pointer under the artifacts root.
pub const LATEST_POINTER: &str = "latest_results";

/// File name of the JSON summary inside a run directory.
pub const SUMMARY_FILE: &str = "run_summary.json";

/// File name of the global dashboard inside a run directory.
pub const DASHBOARD_FILE: &str = "dashboard.html";

/// File name of the per-configuration report inside a config directory.
pub const CONFIG_REPORT_FILE: &str = "report.html";

/// Errors from artifact layout and retention operations.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("run directory already exists: {0}")]
    RunDirExists(PathBuf),

    #[error("invalid retention policy: {0}")]
    InvalidPolicy(String),
}

/// Build a run id from a timestamp: `run_2026-08-23_14-05-09`.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    format!("{}{}", RUN_DIR_PREFIX, now.format("%Y-%m-%d_%H-%M-%S"))
}

/// All paths for one run, derived from the artifacts root and the run id.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
    run_id: String,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            run_id: run_id.into(),
        }
    }

    /// Reconstruct a layout from an existing run directory path.
    pub fn from_run_dir(run_dir: &Path) -> Option<Self> {
        let run_id = run_dir.file_name()?.to_str()?.to_string();
        let root = run_dir.parent().unwrap_or(Path::new(".")).to_path_buf();
        Some(Self { root, run_id })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join(&self.run_id)
    }

    pub fn config_dir(&self, config: &Configuration) -> PathBuf {
        self.run_dir().join(config.dir_name())
    }

    /// Log file name for a module: `module_<id>.log`.
    pub fn log_file_name(module_id: u32) -> String {
        format!("module_{}.log", module_id)
    }

    pub fn log_path(&self, item: &WorkItem) -> PathBuf {
        self.config_dir(&item.config)
            .join(Self::log_file_name(item.module_id))
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.run_dir().join("scratch")
    }

    /// Isolated working directory for one job.
    pub fn scratch_dir(&self, item: &WorkItem) -> PathBuf {
        self.scratch_root()
            .join(format!("{}_m{}", item.config.dir_name(), item.module_id))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.run_dir().join(SUMMARY_FILE)
    }

    pub fn dashboard_path(&self) -> PathBuf {
        self.run_dir().join(DASHBOARD_FILE)
    }

    pub fn config_report_path(&self, config: &Configuration) -> PathBuf {
        self.config_dir(config).join(CONFIG_REPORT_FILE)
    }

    /// Create the run directory tree. The run directory itself must not
    /// already exist; reusing one would silently mix two runs' artifacts.
    pub fn create(&self, configs: &[Configuration]) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.root)?;
        let run_dir = self.run_dir();
        if let Err(e) = fs::create_dir(&run_dir) {
            if e.kind() == io::ErrorKind::AlreadyExists {
                return Err(ArtifactError::RunDirExists(run_dir));
            }
            return Err(e.into());
        }
        for config in configs {
            fs::create_dir(self.config_dir(config))?;
        }
        fs::create_dir(self.scratch_root())?;
        Ok(())
    }
}

/// Atomically point `latest_results` at a run directory.
///
/// Unix uses a symlink created at a temp name and renamed over the pointer;
/// elsewhere a small pointer file gets the same write-then-rename treatment.
pub fn update_latest_pointer(root: &Path, run_id: &str) -> io::Result<()> {
    let pointer = root.join(LATEST_POINTER);
    let temp = root.join(format!(".{}.tmp", LATEST_POINTER));
    if temp.exists() {
        // Leftover from a crashed swap.
        let _ = fs::remove_file(&temp);
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(run_id, &temp)?;
    #[cfg(not(unix))]
    fs::write(&temp, format!("{}\n", run_id))?;

    fs::rename(&temp, &pointer)?;
    Ok(())
}

/// Resolve the latest-run pointer to a run id, if one exists.
pub fn read_latest_pointer(root: &Path) -> Option<String> {
    let pointer = root.join(LATEST_POINTER);

    #[cfg(unix)]
    {
        let target = fs::read_link(&pointer).ok()?;
        Some(target.file_name()?.to_str()?.to_string())
    }
    #[cfg(not(unix))]
    {
        let text = fs::read_to_string(&pointer).ok()?;
        let name = text.trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

/// Remove the latest-run pointer.
fn remove_latest_pointer(root: &Path) -> io::Result<()> {
    let pointer = root.join(LATEST_POINTER);
    match fs::remove_file(&pointer) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Retention policy for `simlane clean`.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Keep at most this many terminal runs (newest first).
    pub max_runs: usize,
    /// Additionally delete terminal runs older than this many days.
    pub max_age_days: Option<u32>,
    /// Report what would be deleted without deleting it.
    pub dry_run: bool,
}

impl RetentionPolicy {
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.max_runs == 0 {
            return Err(ArtifactError::InvalidPolicy(
                "max_runs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_runs: 10,
            max_age_days: None,
            dry_run: false,
        }
    }
}

/// What a prune pass did (or would do, under dry-run).
#[derive(Debug, Default)]
pub struct PruneOutcome {
    /// Run directories examined.
    pub examined: usize,
    /// Run ids deleted (or that would be, under dry-run).
    pub deleted: Vec<String>,
    /// Terminal runs kept.
    pub kept: usize,
    /// Non-terminal runs left alone.
    pub skipped_running: usize,
    /// Bytes freed by the deletions.
    pub bytes_freed: u64,
    pub dry_run: bool,
}

struct DiscoveredRun {
    run_id: String,
    path: PathBuf,
    created_at: DateTime<Utc>,
    terminal: bool,
}

/// Apply a retention policy to every run directory under the root.
pub fn prune(root: &Path, policy: &RetentionPolicy) -> Result<PruneOutcome, ArtifactError> {
    policy.validate()?;

    let mut runs = discover_runs(root)?;
    let mut outcome = PruneOutcome {
        examined: runs.len(),
        dry_run: policy.dry_run,
        ..PruneOutcome::default()
    };

    outcome.skipped_running = runs.iter().filter(|r| !r.terminal).count();
    runs.retain(|r| r.terminal);

    // Newest first; run ids are timestamps, so they tiebreak identically.
    runs.sort_by(|a, b| (b.created_at, &b.run_id).cmp(&(a.created_at, &a.run_id)));

    let now = Utc::now();
    for (index, run) in runs.iter().enumerate() {
        let over_budget = index >= policy.max_runs;
        let too_old = policy
            .max_age_days
            .map(|days| now - run.created_at > chrono::Duration::days(i64::from(days)))
            .unwrap_or(false);

        if over_budget || too_old {
            outcome.bytes_freed += dir_size(&run.path)?;
            if !policy.dry_run {
                fs::remove_dir_all(&run.path)?;
            }
            outcome.deleted.push(run.run_id.clone());
        } else {
            outcome.kept += 1;
        }
    }

    // A deleted run may have been the pointer target.
    if !policy.dry_run {
        if let Some(target) = read_latest_pointer(root) {
            if outcome.deleted.contains(&target) {
                remove_latest_pointer(root)?;
            }
        }
    }

    Ok(outcome)
}

fn discover_runs(root: &Path) -> Result<Vec<DiscoveredRun>, ArtifactError> {
    let mut runs = Vec::new();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(runs),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(RUN_DIR_PREFIX) {
            continue;
        }

        // Without a readable state artifact the run is treated as terminal
        // with its directory mtime as the age; an abandoned half-written dir
        // should still age out.
        let (created_at, terminal) = match RunStateData::load_from_run_dir(&path) {
            Some(state) => (state.created_at, state.state.is_terminal()),
            None => (dir_mtime(&path)?, true),
        };

        runs.push(DiscoveredRun {
            run_id: name.to_string(),
            path,
            created_at,
            terminal,
        });
    }
    Ok(runs)
}

fn dir_mtime(path: &Path) -> io::Result<DateTime<Utc>> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Recursive directory size.
fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunState;
    use tempfile::TempDir;

    fn make_item() -> WorkItem {
        WorkItem {
            config: Configuration {
                width: 8,
                pipe_stages: 2,
            },
            module_id: 3,
        }
    }

    fn write_run(root: &Path, run_id: &str, state: RunState, age_days: i64) {
        let run_dir = root.join(run_id);
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join("payload.bin"), vec![0u8; 128]).unwrap();

        let created = Utc::now() - chrono::Duration::days(age_days);
        let data = RunStateData {
            schema_version: crate::state::RUN_STATE_SCHEMA_VERSION,
            schema_id: crate::state::RUN_STATE_SCHEMA_ID.to_string(),
            run_id: run_id.to_string(),
            state,
            created_at: created,
            updated_at: created,
            seq: 0,
        };
        data.write_to_run_dir(&run_dir).unwrap();
    }

    #[test]
    fn test_layout_paths() {
        let layout = RunLayout::new("/data", "run_2026-01-02_03-04-05");
        let item = make_item();

        assert_eq!(
            layout.run_dir(),
            PathBuf::from("/data/run_2026-01-02_03-04-05")
        );
        assert_eq!(
            layout.log_path(&item),
            PathBuf::from("/data/run_2026-01-02_03-04-05/w8_p2/module_3.log")
        );
        assert_eq!(
            layout.scratch_dir(&item),
            PathBuf::from("/data/run_2026-01-02_03-04-05/scratch/w8_p2_m3")
        );
        assert_eq!(
            layout.config_report_path(&item.config),
            PathBuf::from("/data/run_2026-01-02_03-04-05/w8_p2/report.html")
        );
    }

    #[test]
    fn test_new_run_id_format() {
        let ts = chrono::DateTime::parse_from_rfc3339("2026-08-23T14:05:09Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(new_run_id(ts), "run_2026-08-23_14-05-09");
    }

    #[test]
    fn test_create_builds_tree() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::new(temp.path(), "run_x");
        let configs = vec![
            Configuration {
                width: 8,
                pipe_stages: 2,
            },
            Configuration {
                width: 16,
                pipe_stages: 2,
            },
        ];
        layout.create(&configs).unwrap();

        assert!(layout.run_dir().is_dir());
        assert!(layout.config_dir(&configs[0]).is_dir());
        assert!(layout.config_dir(&configs[1]).is_dir());
        assert!(layout.scratch_root().is_dir());
    }

    #[test]
    fn test_create_rejects_existing_run_dir() {
        let temp = TempDir::new().unwrap();
        let layout = RunLayout::new(temp.path(), "run_x");
        layout.create(&[]).unwrap();

        let err = layout.create(&[]).unwrap_err();
        assert!(matches!(err, ArtifactError::RunDirExists(_)));
    }

    #[test]
    fn test_from_run_dir() {
        let layout = RunLayout::from_run_dir(Path::new("/data/run_abc")).unwrap();
        assert_eq!(layout.run_id(), "run_abc");
        assert_eq!(layout.root(), Path::new("/data"));
    }

    #[test]
    fn test_latest_pointer_swap() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("run_a")).unwrap();
        fs::create_dir(temp.path().join("run_b")).unwrap();

        update_latest_pointer(temp.path(), "run_a").unwrap();
        assert_eq!(read_latest_pointer(temp.path()), Some("run_a".to_string()));

        // Swap over an existing pointer.
        update_latest_pointer(temp.path(), "run_b").unwrap();
        assert_eq!(read_latest_pointer(temp.path()), Some("run_b".to_string()));

        // No temp debris.
        assert!(!temp.path().join(".latest_results.tmp").exists());
    }

    #[test]
    fn test_read_latest_pointer_missing() {
        let temp = TempDir::new().unwrap();
        assert_eq!(read_latest_pointer(temp.path()), None);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let temp = TempDir::new().unwrap();
        write_run(temp.path(), "run_old", RunState::Completed, 5);
        write_run(temp.path(), "run_mid", RunState::Completed, 3);
        write_run(temp.path(), "run_new", RunState::Completed, 1);

        let policy = RetentionPolicy {
            max_runs: 2,
            max_age_days: None,
            dry_run: false,
        };
        let outcome = prune(temp.path(), &policy).unwrap();

        assert_eq!(outcome.examined, 3);
        assert_eq!(outcome.deleted, vec!["run_old".to_string()]);
        assert_eq!(outcome.kept, 2);
        assert!(outcome.bytes_freed >= 128);
        assert!(!temp.path().join("run_old").exists());
        assert!(temp.path().join("run_new").exists());
    }

    #[test]
    fn test_prune_never_deletes_running() {
        let temp = TempDir::new().unwrap();
        write_run(temp.path(), "run_live", RunState::Running, 30);
        write_run(temp.path(), "run_done", RunState::Completed, 1);

        let policy = RetentionPolicy {
            max_runs: 1,
            max_age_days: Some(7),
            dry_run: false,
        };
        let outcome = prune(temp.path(), &policy).unwrap();

        assert_eq!(outcome.skipped_running, 1);
        assert!(outcome.deleted.is_empty());
        assert!(temp.path().join("run_live").exists());
    }

    #[test]
    fn test_prune_age_rule() {
        let temp = TempDir::new().unwrap();
        write_run(temp.path(), "run_stale", RunState::Cancelled, 40);
        write_run(temp.path(), "run_fresh", RunState::Completed, 1);

        let policy = RetentionPolicy {
            max_runs: 10,
            max_age_days: Some(30),
            dry_run: false,
        };
        let outcome = prune(temp.path(), &policy).unwrap();

        assert_eq!(outcome.deleted, vec!["run_stale".to_string()]);
        assert!(temp.path().join("run_fresh").exists());
    }

    #[test]
    fn test_prune_dry_run_deletes_nothing() {
        let temp = TempDir::new().unwrap();
        write_run(temp.path(), "run_old", RunState::Completed, 5);
        write_run(temp.path(), "run_new", RunState::Completed, 1);

        let policy = RetentionPolicy {
            max_runs: 1,
            max_age_days: None,
            dry_run: true,
        };
        let outcome = prune(temp.path(), &policy).unwrap();

        assert_eq!(outcome.deleted, vec!["run_old".to_string()]);
        assert!(outcome.dry_run);
        assert!(temp.path().join("run_old").exists(), "dry run must not delete");
    }

    #[test]
    fn test_prune_drops_dangling_pointer() {
        let temp = TempDir::new().unwrap();
        write_run(temp.path(), "run_old", RunState::Completed, 5);
        write_run(temp.path(), "run_new", RunState::Completed, 1);
        update_latest_pointer(temp.path(), "run_old").unwrap();

        let policy = RetentionPolicy {
            max_runs: 1,
            max_age_days: None,
            dry_run: false,
        };
        prune(temp.path(), &policy).unwrap();

        assert_eq!(read_latest_pointer(temp.path()), None);
    }

    #[test]
    fn test_prune_rejects_zero_keep() {
        let temp = TempDir::new().unwrap();
        let policy = RetentionPolicy {
            max_runs: 0,
            max_age_days: None,
            dry_run: false,
        };
        assert!(matches!(
            prune(temp.path(), &policy),
            Err(ArtifactError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_prune_ignores_foreign_dirs() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("not_a_run")).unwrap();
        write_run(temp.path(), "run_a", RunState::Completed, 1);

        let outcome = prune(temp.path(), &RetentionPolicy::default()).unwrap();
        assert_eq!(outcome.examined, 1);
        assert!(temp.path().join("not_a_run").exists());
    }
}
