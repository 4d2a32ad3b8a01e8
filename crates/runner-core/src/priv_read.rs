//! Privileged-read adapter (component D).
//!
//! Bridges the privilege manager (C) and the safe-open primitive (A): the
//! effective UID is raised only for the duration of the symlink-safe open
//! itself, and dropped again before a single byte is read or hashed. This
//! keeps the privileged window as small as the spec requires and means
//! every downstream consumer (hash store, ELF analyzer) only ever sees an
//! already-unprivileged handle.

use std::path::Path;

use crate::error::Result;
use crate::privilege::PrivilegeManager;
use crate::safe_open::{safe_open_readonly, SafeFile};

/// Open `path` read-only and symlink-safe, escalating privileges for the
/// open call only if `privileged` is set and the process is capable of it.
///
/// When `privileged` is false, this is exactly [`safe_open_readonly`] — no
/// privilege manager interaction at all.
pub fn open_for_verification(
    mgr: &PrivilegeManager,
    path: &Path,
    privileged: bool,
) -> Result<SafeFile> {
    if !privileged {
        return safe_open_readonly(path);
    }
    mgr.with_privileges("verify_open", || safe_open_readonly(path))
}
