//! Pre-execution integrity verification over every declared path
//! (component J).
//!
//! Verification is an all-or-nothing gate: the caller is expected to call
//! [`VerificationManager::verify_all`] once, after every path the run needs
//! has been registered, and abort the whole run on any failure before
//! spawning a single command (spec §4.J, "pre-execution").

use std::path::{Path, PathBuf};

use crate::error::{Result, RunnerError};
use crate::hash_store::HashStore;
use crate::privilege::PrivilegeManager;
use crate::priv_read::open_for_verification;

/// Paths under these prefixes may be skipped when
/// `verify_standard_paths=false` — package-manager-owned system binaries
/// that change on every OS update and are the primary reason the toggle
/// exists.
const STANDARD_PATH_PREFIXES: &[&str] = &[
    "/usr/bin",
    "/bin",
    "/usr/sbin",
    "/sbin",
    "/usr/local/bin",
    "/usr/local/sbin",
];

fn is_standard_path(path: &Path) -> bool {
    STANDARD_PATH_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

pub struct VerificationManager {
    store: HashStore,
    verify_standard_paths: bool,
    paths: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

impl VerificationManager {
    pub fn new(hash_dir: impl Into<PathBuf>, verify_standard_paths: bool) -> Self {
        Self {
            store: HashStore::new(hash_dir),
            verify_standard_paths,
            paths: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Register a path for verification, deduplicating on the already
    /// absolute, symlink-resolved form the caller provides.
    pub fn add(&mut self, path: PathBuf) {
        if !self.verify_standard_paths && is_standard_path(&path) {
            if !self.skipped.contains(&path) {
                self.skipped.push(path);
            }
            return;
        }
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Run verification over every registered path, accumulating failures
    /// rather than stopping at the first one so the caller can report the
    /// full set.
    pub fn verify_all(&self, mgr: &PrivilegeManager) -> Result<()> {
        let mut failures = Vec::new();
        for path in &self.paths {
            if let Err(e) = self.verify_one(mgr, path) {
                tracing::error!(target: "runner_core::verify", path = %path.display(), error = %e, "verification failed");
                failures.push(e);
            }
        }
        if let Some(first) = failures.into_iter().next() {
            return Err(first);
        }
        Ok(())
    }

    fn verify_one(&self, mgr: &PrivilegeManager, path: &Path) -> Result<()> {
        let handle = match open_for_verification(mgr, path, false) {
            Ok(h) => h,
            Err(RunnerError::PermissionDenied { .. }) if mgr.can_escalate() => {
                open_for_verification(mgr, path, true)?
            }
            Err(e) => return Err(e),
        };
        self.store.verify_from_handle(path, &handle)
    }

    /// Record (compute + persist) hashes for every registered path. Used
    /// by the `record` subcommand, never during a normal `run`.
    pub fn record_all(&self, mgr: &PrivilegeManager) -> Result<()> {
        for path in &self.paths {
            let handle = match open_for_verification(mgr, path, false) {
                Ok(h) => h,
                Err(RunnerError::PermissionDenied { .. }) if mgr.can_escalate() => {
                    open_for_verification(mgr, path, true)?
                }
                Err(e) => return Err(e),
            };
            self.store.record_from_handle(path, &handle)?;
        }
        Ok(())
    }
}
