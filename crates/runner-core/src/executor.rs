//! Per-group orchestration: workdir → expand → allow-check → risk-check →
//! spawn (component L).

use std::time::Duration;

use crate::config::CommandSpec;
use crate::env_filter::SystemEnvSnapshot;
use crate::error::RunnerError;
use crate::privilege::PrivilegeManager;
use crate::risk::{self, RiskLevel};
use crate::runtime::{expand_command, GroupExpansionContext, RuntimeGlobal};
use crate::sideeffect::{FileSystem, SpawnRequest, Spawner};

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub name: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub bytes_captured: u64,
    pub truncated: bool,
    pub risk_decision: Option<RiskLevel>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub group_name: String,
    pub commands: Vec<CommandOutcome>,
    pub workdir: std::path::PathBuf,
    pub kept_workdir: bool,
}

/// Executes one group end to end. Workdir cleanup always runs, even if a
/// command inside the group panics or an earlier step errors, because the
/// cleanup call is issued from a scope guard rather than at the end of the
/// happy path.
pub struct GroupExecutor<'a> {
    pub global: &'a RuntimeGlobal,
    pub privilege: &'a PrivilegeManager,
    pub filesystem: &'a dyn FileSystem,
    pub spawner: &'a dyn Spawner,
    pub system_env: &'a SystemEnvSnapshot,
    pub keep_temp_dirs: bool,
}

impl GroupExecutor<'_> {
    pub fn run_group(
        &self,
        ctx: &GroupExpansionContext,
        command_specs: &[CommandSpec],
    ) -> GroupOutcome {
        let (workdir, is_temp_dir) = match &ctx.explicit_workdir {
            Some(w) => (w.clone(), false),
            None => match self.filesystem.create_workdir(&ctx.group_name) {
                Ok(w) => (w, true),
                Err(e) => {
                    return GroupOutcome {
                        group_name: ctx.group_name.clone(),
                        commands: vec![CommandOutcome {
                            name: "<workdir>".to_string(),
                            exit_code: None,
                            duration: Duration::ZERO,
                            bytes_captured: 0,
                            truncated: false,
                            risk_decision: None,
                            error: Some(e.to_string()),
                        }],
                        workdir: std::path::PathBuf::new(),
                        kept_workdir: false,
                    }
                }
            },
        };

        struct CleanupGuard<'g> {
            filesystem: &'g dyn FileSystem,
            path: std::path::PathBuf,
            is_temp_dir: bool,
            keep: bool,
        }
        impl Drop for CleanupGuard<'_> {
            fn drop(&mut self) {
                if self.is_temp_dir {
                    self.filesystem.remove_workdir(&self.path, self.keep);
                }
            }
        }
        let _cleanup = CleanupGuard {
            filesystem: self.filesystem,
            path: workdir.clone(),
            is_temp_dir,
            keep: self.keep_temp_dirs,
        };

        let mut outcomes = Vec::new();
        for spec in command_specs {
            outcomes.push(self.run_command(ctx, spec, &workdir));
        }

        GroupOutcome {
            group_name: ctx.group_name.clone(),
            commands: outcomes,
            workdir,
            kept_workdir: is_temp_dir && self.keep_temp_dirs,
        }
    }

    fn run_command(
        &self,
        ctx: &GroupExpansionContext,
        spec: &CommandSpec,
        workdir: &std::path::Path,
    ) -> CommandOutcome {
        let name = spec.name.clone();

        let runtime_command = match expand_command(ctx, spec, workdir, self.system_env) {
            Ok(c) => c,
            Err(e) => return failed_outcome(name, e),
        };

        if let Err(e) = self.check_allowed(ctx, &runtime_command) {
            return failed_outcome(name, e);
        }

        let decision = match risk::classify(&runtime_command) {
            Ok(d) => d,
            Err(e) => return failed_outcome(name, e),
        };
        tracing::info!(
            target: "runner_core::risk",
            command = %runtime_command.name,
            risk = %decision.level,
            rationale = %decision.rationale,
            "risk classified"
        );

        if let Err(e) = risk::enforce_ceiling(&runtime_command.name, &decision, runtime_command.risk_level) {
            let mut outcome = failed_outcome(name, e);
            outcome.risk_decision = Some(decision.level);
            return outcome;
        }

        if let Err(e) = check_not_world_writable(&runtime_command.expanded_cmd) {
            let mut outcome = failed_outcome(runtime_command.name, e);
            outcome.risk_decision = Some(decision.level);
            return outcome;
        }

        let (run_as_uid, run_as_gid) = match resolve_run_as(&runtime_command) {
            Ok(ids) => ids,
            Err(e) => {
                let mut outcome = failed_outcome(runtime_command.name, e);
                outcome.risk_decision = Some(decision.level);
                return outcome;
            }
        };

        let request = SpawnRequest {
            argv: &build_argv(&runtime_command),
            env: &runtime_command.expanded_env,
            cwd: &runtime_command.expanded_workdir,
            run_as_uid,
            run_as_gid,
            timeout: runtime_command
                .timeout_seconds
                .or(if self.global.timeout_seconds > 0 {
                    Some(self.global.timeout_seconds)
                } else {
                    None
                })
                .map(Duration::from_secs),
            output_file: runtime_command.output_file.as_deref(),
            output_cap: if self.global.output_size_limit == 0 {
                10 * 1024 * 1024
            } else {
                self.global.output_size_limit
            },
        };

        // `run_as_user`/`run_as_group` only changes who the *child* runs
        // as; the parent still needs effective root to set that identity
        // at fork time (spec §4.L step 4d), so the spawn call itself goes
        // through the same bracket the privileged open does.
        let spawn_result = if run_as_uid.is_some() || run_as_gid.is_some() {
            self.privilege
                .with_privileges("run_as", || self.spawner.spawn(&request))
        } else {
            self.spawner.spawn(&request)
        };

        match spawn_result {
            Ok(outcome) => CommandOutcome {
                name: runtime_command.name,
                exit_code: Some(outcome.exit_code),
                duration: outcome.elapsed,
                bytes_captured: outcome.stdout_bytes_captured,
                truncated: outcome.truncated,
                risk_decision: Some(decision.level),
                error: if outcome.timed_out {
                    Some("timed out".to_string())
                } else {
                    None
                },
            },
            Err(e) => {
                let mut outcome = failed_outcome(runtime_command.name, e);
                outcome.risk_decision = Some(decision.level);
                outcome
            }
        }
    }

    fn check_allowed(
        &self,
        ctx: &GroupExpansionContext,
        command: &crate::runtime::RuntimeCommand,
    ) -> crate::error::Result<()> {
        if ctx.expanded_cmd_allowed.is_empty() && self.global.allowed_commands.is_empty() {
            return Ok(());
        }
        let in_cmd_allowed = ctx.expanded_cmd_allowed.contains(&command.expanded_cmd);
        let cmd_str = command.expanded_cmd.display().to_string();
        let matches_regex = self
            .global
            .allowed_commands
            .iter()
            .any(|re| re.is_match(&cmd_str));

        if in_cmd_allowed || matches_regex {
            Ok(())
        } else {
            Err(RunnerError::CommandNotAllowed {
                cmd: command.expanded_cmd.clone(),
            })
        }
    }
}

/// Refuse to spawn a world-writable binary (spec §4.L step 4c): anyone on
/// the box could have swapped its contents between verification and spawn.
#[cfg(unix)]
fn check_not_world_writable(path: &std::path::Path) -> crate::error::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(path).map_err(|e| RunnerError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if metadata.permissions().mode() & 0o002 != 0 {
        return Err(RunnerError::InsecurePermissions {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_not_world_writable(_path: &std::path::Path) -> crate::error::Result<()> {
    Ok(())
}

/// Resolve `run_as_user`/`run_as_group` principal names to numeric ids.
#[cfg(unix)]
fn resolve_run_as(
    command: &crate::runtime::RuntimeCommand,
) -> crate::error::Result<(Option<u32>, Option<u32>)> {
    let uid = command
        .run_as_user
        .as_deref()
        .map(|name| {
            nix::unistd::User::from_name(name)
                .map_err(|e| lookup_error(name, e))?
                .ok_or_else(|| lookup_missing(name))
                .map(|u| u.uid.as_raw())
        })
        .transpose()?;
    let gid = command
        .run_as_group
        .as_deref()
        .map(|name| {
            nix::unistd::Group::from_name(name)
                .map_err(|e| lookup_error(name, e))?
                .ok_or_else(|| lookup_missing(name))
                .map(|g| g.gid.as_raw())
        })
        .transpose()?;
    Ok((uid, gid))
}

#[cfg(not(unix))]
fn resolve_run_as(
    _command: &crate::runtime::RuntimeCommand,
) -> crate::error::Result<(Option<u32>, Option<u32>)> {
    Ok((None, None))
}

#[cfg(unix)]
fn lookup_error(name: &str, source: nix::errno::Errno) -> RunnerError {
    RunnerError::SpawnFailed {
        cmd: name.into(),
        detail: format!("looking up principal `{name}`: {source}"),
    }
}

#[cfg(unix)]
fn lookup_missing(name: &str) -> RunnerError {
    RunnerError::SpawnFailed {
        cmd: name.into(),
        detail: format!("no such user/group: `{name}`"),
    }
}

fn build_argv(command: &crate::runtime::RuntimeCommand) -> Vec<String> {
    let mut argv = Vec::with_capacity(1 + command.expanded_args.len());
    argv.push(command.expanded_cmd.display().to_string());
    argv.extend(command.expanded_args.iter().cloned());
    argv
}

fn failed_outcome(name: String, error: RunnerError) -> CommandOutcome {
    CommandOutcome {
        name,
        exit_code: None,
        duration: Duration::ZERO,
        bytes_captured: 0,
        truncated: false,
        risk_decision: None,
        error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlobalSpec, GroupSpec};
    use crate::runtime::expand_group_context;
    use crate::sideeffect::{DryRunFileSystem, DryRunSpawner};

    fn env() -> SystemEnvSnapshot {
        SystemEnvSnapshot::from_map(std::collections::BTreeMap::from([(
            "PATH".to_string(),
            "/bin:/usr/bin".to_string(),
        )]))
    }

    fn global_runtime() -> RuntimeGlobal {
        RuntimeGlobal {
            timeout_seconds: 0,
            log_level: "info".to_string(),
            expanded_verify_files: vec![],
            verify_standard_paths: true,
            output_size_limit: 0,
            allowed_commands: vec![],
            env_allowed: vec!["PATH".to_string()],
        }
    }

    #[test]
    fn dry_run_happy_path_reports_success() {
        let system_env = env();
        let global = GlobalSpec {
            timeout_seconds: 0,
            log_level: "info".to_string(),
            verify_files: vec![],
            verify_standard_paths: None,
            env_vars: vec![],
            env_allowed: vec!["PATH".to_string()],
            env_import: vec![],
            output_size_limit: 0,
            allowed_commands: vec![],
        };
        let group = GroupSpec {
            name: "g".to_string(),
            priority: 0,
            workdir: None,
            verify_files: vec![],
            env_vars: vec![],
            env_allowed: vec![],
            env_import: vec![],
            cmd_allowed: vec![],
            commands: vec![CommandSpec {
                name: "echo_hi".to_string(),
                cmd: "/bin/echo".to_string(),
                args: vec!["hi".to_string()],
                workdir: None,
                env_vars: vec![],
                env_import: vec![],
                run_as_user: None,
                run_as_group: None,
                risk_level: "low".to_string(),
                output_file: None,
                timeout_seconds: None,
            }],
        };
        let global_env = std::collections::BTreeMap::from([(
            "PATH".to_string(),
            "/bin:/usr/bin".to_string(),
        )]);
        let ctx = expand_group_context(&group, &global, &global_env, &system_env).unwrap();

        let privilege = PrivilegeManager::capture();
        let filesystem = DryRunFileSystem;
        let spawner = DryRunSpawner;
        let global_runtime = global_runtime();

        let executor = GroupExecutor {
            global: &global_runtime,
            privilege: &privilege,
            filesystem: &filesystem,
            spawner: &spawner,
            system_env: &system_env,
            keep_temp_dirs: false,
        };

        let outcome = executor.run_group(&ctx, &group.commands);
        assert_eq!(outcome.commands.len(), 1);
        assert_eq!(outcome.commands[0].exit_code, Some(0));
        assert!(outcome.commands[0].error.is_none());
    }

    #[test]
    fn command_not_in_cmd_allowed_is_refused() {
        let system_env = env();
        let global = GlobalSpec {
            timeout_seconds: 0,
            log_level: "info".to_string(),
            verify_files: vec![],
            verify_standard_paths: None,
            env_vars: vec![],
            env_allowed: vec!["PATH".to_string()],
            env_import: vec![],
            output_size_limit: 0,
            allowed_commands: vec![],
        };
        let group = GroupSpec {
            name: "g".to_string(),
            priority: 0,
            workdir: None,
            verify_files: vec![],
            env_vars: vec![],
            env_allowed: vec![],
            env_import: vec![],
            cmd_allowed: vec!["/bin/true".to_string()],
            commands: vec![CommandSpec {
                name: "echo_hi".to_string(),
                cmd: "/bin/echo".to_string(),
                args: vec!["hi".to_string()],
                workdir: None,
                env_vars: vec![],
                env_import: vec![],
                run_as_user: None,
                run_as_group: None,
                risk_level: "low".to_string(),
                output_file: None,
                timeout_seconds: None,
            }],
        };
        let global_env = std::collections::BTreeMap::from([(
            "PATH".to_string(),
            "/bin:/usr/bin".to_string(),
        )]);
        let ctx = expand_group_context(&group, &global, &global_env, &system_env).unwrap();

        let privilege = PrivilegeManager::capture();
        let filesystem = DryRunFileSystem;
        let spawner = DryRunSpawner;
        let global_runtime = global_runtime();

        let executor = GroupExecutor {
            global: &global_runtime,
            privilege: &privilege,
            filesystem: &filesystem,
            spawner: &spawner,
            system_env: &system_env,
            keep_temp_dirs: false,
        };

        let outcome = executor.run_group(&ctx, &group.commands);
        assert!(outcome.commands[0].error.is_some());
        assert!(outcome.commands[0]
            .error
            .as_ref()
            .unwrap()
            .contains("not in cmd_allowed"));
    }

    #[test]
    fn world_writable_binary_is_refused() {
        use std::os::unix::fs::PermissionsExt;

        let bin_dir = tempfile::tempdir().unwrap();
        let tool = bin_dir.path().join("tool");
        std::fs::write(&tool, b"#!/bin/sh\necho hi\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o777)).unwrap();

        let system_env = env();
        let global = GlobalSpec {
            timeout_seconds: 0,
            log_level: "info".to_string(),
            verify_files: vec![],
            verify_standard_paths: None,
            env_vars: vec![],
            env_allowed: vec!["PATH".to_string()],
            env_import: vec![],
            output_size_limit: 0,
            allowed_commands: vec![],
        };
        let group = GroupSpec {
            name: "g".to_string(),
            priority: 0,
            workdir: None,
            verify_files: vec![],
            env_vars: vec![],
            env_allowed: vec![],
            env_import: vec![],
            cmd_allowed: vec![],
            commands: vec![CommandSpec {
                name: "run_tool".to_string(),
                cmd: tool.to_str().unwrap().to_string(),
                args: vec![],
                workdir: None,
                env_vars: vec![],
                env_import: vec![],
                run_as_user: None,
                run_as_group: None,
                risk_level: "low".to_string(),
                output_file: None,
                timeout_seconds: None,
            }],
        };
        let global_env = std::collections::BTreeMap::from([(
            "PATH".to_string(),
            "/bin:/usr/bin".to_string(),
        )]);
        let ctx = expand_group_context(&group, &global, &global_env, &system_env).unwrap();

        let privilege = PrivilegeManager::capture();
        let filesystem = DryRunFileSystem;
        let spawner = DryRunSpawner;
        let global_runtime = global_runtime();

        let executor = GroupExecutor {
            global: &global_runtime,
            privilege: &privilege,
            filesystem: &filesystem,
            spawner: &spawner,
            system_env: &system_env,
            keep_temp_dirs: false,
        };

        let outcome = executor.run_group(&ctx, &group.commands);
        assert!(outcome.commands[0].error.is_some());
        assert!(outcome.commands[0]
            .error
            .as_ref()
            .unwrap()
            .contains("world-writable"));
    }
}
