//! Real/dry-run boundary for every side-effecting operation (component M).
//!
//! The group executor depends only on these traits; `runner-cli` picks
//! which implementation to construct based on `--dry-run`. Risk gates and
//! verification still run identically in both modes — only the spawn,
//! workdir creation/removal, and privilege escalation are abstracted here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    pub argv: &'a [String],
    pub env: &'a BTreeMap<String, String>,
    pub cwd: &'a Path,
    pub run_as_uid: Option<u32>,
    pub run_as_gid: Option<u32>,
    pub timeout: Option<Duration>,
    pub output_file: Option<&'a Path>,
    pub output_cap: u64,
}

#[derive(Debug, Clone)]
pub struct SpawnOutcome {
    pub exit_code: i32,
    pub elapsed: Duration,
    pub stdout_bytes_captured: u64,
    pub truncated: bool,
    pub timed_out: bool,
}

/// Abstracts `fork+exec+wait` so the executor can run for real or simulate.
pub trait Spawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest<'_>) -> Result<SpawnOutcome>;
}

/// Abstracts temp-workdir creation/removal.
pub trait FileSystem: Send + Sync {
    fn create_workdir(&self, group_name: &str) -> Result<PathBuf>;
    fn remove_workdir(&self, path: &Path, keep: bool);
}

/// Abstracts wall-clock reads so duration reporting is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> std::time::Instant;
}

// ---------------------------------------------------------------------------
// Real implementations
// ---------------------------------------------------------------------------

pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }
}

pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn create_workdir(&self, group_name: &str) -> Result<PathBuf> {
        crate::workdir::create_for(group_name)
    }

    fn remove_workdir(&self, path: &Path, keep: bool) {
        crate::workdir::cleanup(path, keep);
    }
}

pub struct RealSpawner;

impl Spawner for RealSpawner {
    fn spawn(&self, request: &SpawnRequest<'_>) -> Result<SpawnOutcome> {
        crate::spawn::spawn_real(request)
    }
}

// ---------------------------------------------------------------------------
// Dry-run implementations
// ---------------------------------------------------------------------------

pub struct DryRunClock;

impl Clock for DryRunClock {
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }
}

pub struct DryRunFileSystem;

impl FileSystem for DryRunFileSystem {
    fn create_workdir(&self, group_name: &str) -> Result<PathBuf> {
        // A plausible path is returned so `%{__runner_workdir}` still
        // expands to something, but nothing is created on disk.
        let base = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
        Ok(PathBuf::from(base).join(format!("scr-{group_name}-dryrun")))
    }

    fn remove_workdir(&self, path: &Path, keep: bool) {
        tracing::info!(target: "runner_core::exec", path = %path.display(), keep, "dry-run: would remove workdir");
    }
}

pub struct DryRunSpawner;

impl Spawner for DryRunSpawner {
    fn spawn(&self, request: &SpawnRequest<'_>) -> Result<SpawnOutcome> {
        tracing::info!(
            target: "runner_core::exec",
            argv = ?request.argv,
            cwd = %request.cwd.display(),
            "dry-run: would spawn"
        );
        Ok(SpawnOutcome {
            exit_code: 0,
            elapsed: Duration::from_secs(0),
            stdout_bytes_captured: 0,
            truncated: false,
            timed_out: false,
        })
    }
}
