//! Serialized, panic-safe effective-UID transitions with fail-stop on
//! restore failure (component C).
//!
//! Exactly one [`PrivilegeManager::with_privileges`] section may be in
//! flight per process at a time; a process-wide lock enforces that even
//! across threads. The closure passed in must do the minimum privileged
//! work (typically: open one file) and must not itself call
//! `with_privileges` — re-entrance is rejected at runtime rather than
//! deadlocking.

use std::cell::Cell;
use std::sync::Mutex;

use crate::audit::critical;
use crate::error::{Result, RunnerError};

static PRIV_LOCK: Mutex<()> = Mutex::new(());

thread_local! {
    static IN_SECTION: Cell<bool> = const { Cell::new(false) };
}

/// How this process is positioned to gain root privileges, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeMode {
    /// Real UID is 0: already root, escalation is a no-op.
    NativeRoot,
    /// Real UID != 0 but effective UID is 0 (classic setuid-root binary).
    Setuid,
    /// Neither: `with_privileges` always fails with `EscalationUnsupported`.
    Unprivileged,
}

pub struct PrivilegeManager {
    original_real_uid: u32,
    original_effective_uid: u32,
    original_gid: u32,
    mode: PrivilegeMode,
}

impl PrivilegeManager {
    /// Capture the process's privilege posture. Must be called once, early,
    /// before any `seteuid` calls have altered the effective UID.
    pub fn capture() -> Self {
        let real_uid = nix::unistd::getuid().as_raw();
        let effective_uid = nix::unistd::geteuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();

        let mode = if real_uid == 0 {
            PrivilegeMode::NativeRoot
        } else if effective_uid == 0 {
            PrivilegeMode::Setuid
        } else {
            PrivilegeMode::Unprivileged
        };

        Self {
            original_real_uid: real_uid,
            original_effective_uid: effective_uid,
            original_gid: gid,
            mode,
        }
    }

    pub fn mode(&self) -> PrivilegeMode {
        self.mode
    }

    pub fn original_real_uid(&self) -> u32 {
        self.original_real_uid
    }

    pub fn original_gid(&self) -> u32 {
        self.original_gid
    }

    pub fn can_escalate(&self) -> bool {
        !matches!(self.mode, PrivilegeMode::Unprivileged)
    }

    /// Run `f` with the effective UID raised to 0, then unconditionally
    /// attempt to restore it. `reason` is recorded in the audit trail.
    ///
    /// Restoration failure is fatal: the process exits with code 3 and never
    /// returns from this function. A panic inside `f` is caught, restoration
    /// is attempted, and (if restoration succeeded) the panic is resumed —
    /// it is never silently swallowed.
    pub fn with_privileges<T>(
        &self,
        reason: &str,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        if IN_SECTION.with(Cell::get) {
            return Err(RunnerError::EscalationFailed {
                detail: "re-entrant with_privileges call".to_string(),
            });
        }
        if !self.can_escalate() {
            return Err(RunnerError::EscalationUnsupported);
        }

        let _lock = PRIV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        self.escalate().map_err(|detail| RunnerError::EscalationFailed { detail })?;
        tracing::warn!(target: "runner_core::privilege", reason, "escalated");
        IN_SECTION.with(|c| c.set(true));

        struct RestoreGuard<'a> {
            mgr: &'a PrivilegeManager,
        }
        impl Drop for RestoreGuard<'_> {
            fn drop(&mut self) {
                IN_SECTION.with(|c| c.set(false));
                match self.mgr.restore() {
                    Ok(()) => {
                        tracing::info!(target: "runner_core::privilege", "restored");
                    }
                    Err(()) => {
                        let current = nix::unistd::geteuid().as_raw();
                        critical(
                            "restore_failed",
                            &[
                                ("original_uid", &self.mgr.original_real_uid.to_string()),
                                ("current_euid", &current.to_string()),
                            ],
                        );
                        std::process::exit(crate::error::exit_code::FATAL);
                    }
                }
            }
        }

        let guard = RestoreGuard { mgr: self };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        drop(guard);

        match result {
            Ok(r) => r,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    fn escalate(&self) -> std::result::Result<(), String> {
        match self.mode {
            PrivilegeMode::NativeRoot => Ok(()),
            PrivilegeMode::Setuid => {
                nix::unistd::seteuid(nix::unistd::Uid::from_raw(0))
                    .map_err(|e| format!("seteuid(0) failed: {e}"))
            }
            PrivilegeMode::Unprivileged => Err("process cannot escalate".to_string()),
        }
    }

    fn restore(&self) -> std::result::Result<(), ()> {
        match self.mode {
            PrivilegeMode::NativeRoot => Ok(()),
            PrivilegeMode::Setuid => {
                nix::unistd::seteuid(nix::unistd::Uid::from_raw(self.original_real_uid)).map_err(|_| ())
            }
            PrivilegeMode::Unprivileged => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn unprivileged_process_cannot_escalate() {
        // This test process is not setuid-root and (in CI) not real-root,
        // so the captured mode should be Unprivileged or NativeRoot
        // depending on the test runner's uid. Either way with_privileges
        // must not leave the effective uid altered.
        let mgr = PrivilegeManager::capture();
        let before = nix::unistd::geteuid().as_raw();

        if mgr.can_escalate() {
            let r = mgr.with_privileges("test", || Ok(42));
            assert_eq!(r.unwrap(), 42);
        } else {
            let r: Result<i32> = mgr.with_privileges("test", || Ok(1));
            assert!(matches!(r, Err(RunnerError::EscalationUnsupported)));
        }

        let after = nix::unistd::geteuid().as_raw();
        assert_eq!(before, after, "effective uid must be restored");
    }

    #[test]
    #[serial]
    fn reentrant_call_is_rejected() {
        let mgr = PrivilegeManager::capture();
        if !mgr.can_escalate() {
            return;
        }
        let outcome: Result<i32> = mgr.with_privileges("outer", || {
            mgr.with_privileges("inner", || Ok(1))
        });
        assert!(matches!(outcome, Err(RunnerError::EscalationFailed { .. })));
    }

    #[test]
    #[serial]
    fn panic_inside_closure_still_restores_before_propagating() {
        let mgr = PrivilegeManager::capture();
        if !mgr.can_escalate() {
            return;
        }
        let before = nix::unistd::geteuid().as_raw();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<i32> = mgr.with_privileges("panicking", || {
                panic!("boom");
            });
        }));
        assert!(result.is_err());
        let after = nix::unistd::geteuid().as_raw();
        assert_eq!(before, after);
    }
}
