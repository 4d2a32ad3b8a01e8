//! Per-group temporary workdir lifecycle (component K).

use std::path::{Path, PathBuf};

use crate::error::{Result, RunnerError};

/// Sanitize a group name for use inside a path component: the name is
/// already validated against `[A-Za-z0-9_-]+` at config-load time, but this
/// defends the temp-dir prefix even if called with an unvalidated name.
fn safe_group_segment(group_name: &str) -> String {
    group_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Create a fresh `scr-<group>-XXXXXX` directory under `TMPDIR` (or `/tmp`),
/// mode 0700, and return its absolute path.
pub fn create_for(group_name: &str) -> Result<PathBuf> {
    let base = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
    let prefix = format!("scr-{}-", safe_group_segment(group_name));

    let dir = tempfile::Builder::new()
        .prefix(&prefix)
        .rand_bytes(6)
        .tempdir_in(&base)
        .map_err(|e| RunnerError::Io {
            path: PathBuf::from(&base),
            source: e,
        })?;

    let path = dir.into_path();
    set_mode_0700(&path)?;
    Ok(path)
}

#[cfg(unix)]
fn set_mode_0700(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).map_err(|e| {
        RunnerError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

#[cfg(not(unix))]
fn set_mode_0700(_path: &Path) -> Result<()> {
    Ok(())
}

/// Remove a temp workdir, or leave it in place if `keep` is set. Removal
/// failure is logged but never propagated — cleanup must never be the
/// reason a run reports failure.
pub fn cleanup(path: &Path, keep: bool) {
    if keep {
        tracing::info!(target: "runner_core::workdir", path = %path.display(), "keeping temp workdir");
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(path) {
        tracing::error!(target: "runner_core::workdir", path = %path.display(), error = %e, "failed to remove temp workdir");
        eprintln!("ERROR: failed to remove temp workdir {}: {e}", path.display());
    }
}
