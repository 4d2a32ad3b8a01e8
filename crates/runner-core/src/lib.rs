//! Core engine for a security-focused, privilege-aware batch command
//! runner: hardened privilege escalation, integrity-verified binaries,
//! symlink-safe file I/O, risk-classified command gating, and
//! allowlist-filtered environment variables.
//!
//! `runner-cli` is the only intended caller of [`execute_config`],
//! [`verify_config`], and [`record_config`]; everything else in this crate
//! is public so it can be tested and composed directly, but the three
//! entry points are the stable surface.

pub mod audit;
pub mod config;
pub mod elf_analyze;
pub mod env_filter;
pub mod error;
pub mod executor;
pub mod expand;
pub mod hash_store;
pub mod priv_read;
pub mod privilege;
pub mod risk;
pub mod runtime;
pub mod safe_open;
pub mod sideeffect;
pub mod spawn;
pub mod verify_manager;
pub mod workdir;

use std::path::PathBuf;

use config::ConfigSpec;
use env_filter::{build_effective_env, SystemEnvSnapshot};
use error::{Result, RunnerError};
use executor::{CommandOutcome, GroupExecutor, GroupOutcome};
use privilege::PrivilegeManager;
use runtime::{expand_command, expand_global, expand_group_context, ordered_groups};
use sideeffect::{DryRunFileSystem, DryRunSpawner, FileSystem, RealFileSystem, RealSpawner, Spawner};
use verify_manager::VerificationManager;

/// Production hash directory. Fixed at compile time, per spec §3/§6: the
/// location is never configurable outside test builds.
#[cfg(not(test))]
pub const HASH_DIRECTORY: &str = "/usr/local/etc/runner/hashes";

/// Re-exported so `runner-cli` can build a `RunOptions` without reaching
/// into submodules for every collaborator type.
pub struct RunOptions<'a> {
    pub config_path: &'a std::path::Path,
    pub dry_run: bool,
    pub keep_temp_dirs: bool,
    pub hash_dir: Option<&'a std::path::Path>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub groups: Vec<GroupOutcome>,
    pub skipped_standard_paths: Vec<PathBuf>,
}

impl RunReport {
    /// Overall exit code per spec §6: 0 success, 2 if any command failed or
    /// was refused. Pre-execution failures (config/verification) never
    /// reach this point — they return `Err` from `execute_config` instead.
    pub fn exit_code(&self) -> i32 {
        let any_failed = self
            .groups
            .iter()
            .flat_map(|g| &g.commands)
            .any(|c| c.error.is_some() || c.exit_code.map(|code| code != 0).unwrap_or(false));
        if any_failed {
            error::exit_code::EXECUTION
        } else {
            0
        }
    }

    pub fn all_outcomes(&self) -> impl Iterator<Item = &CommandOutcome> {
        self.groups.iter().flat_map(|g| &g.commands)
    }
}

fn hash_dir_for(options: &RunOptions<'_>) -> PathBuf {
    if let Some(dir) = options.hash_dir {
        return dir.to_path_buf();
    }
    #[cfg(not(test))]
    {
        PathBuf::from(HASH_DIRECTORY)
    }
    #[cfg(test)]
    {
        PathBuf::from("/tmp/runner-test-hashes")
    }
}

fn build_verification_manager(
    config: &ConfigSpec,
    system_env: &SystemEnvSnapshot,
    hash_dir: PathBuf,
) -> Result<(VerificationManager, Vec<(config::GroupSpec, runtime::GroupExpansionContext)>)> {
    let global_runtime = expand_global(&config.global, system_env)?;

    let global_explicit = config::parse_kv_pairs(&config.global.env_vars, "global.env_vars")?;
    let global_imports = config::parse_import_pairs(&config.global.env_import, "global.env_import")?;
    let global_effective_env = build_effective_env(
        system_env,
        &config.global.env_allowed,
        &global_explicit,
        &global_imports,
    )?;

    let mut vm = VerificationManager::new(hash_dir, global_runtime.verify_standard_paths);
    for path in &global_runtime.expanded_verify_files {
        vm.add(path.clone());
    }

    let mut group_contexts = Vec::new();
    for group in ordered_groups(config) {
        let ctx = expand_group_context(group, &config.global, &global_effective_env, system_env)?;
        for path in &ctx.expanded_verify_files {
            vm.add(path.clone());
        }
        for path in &ctx.expanded_cmd_allowed {
            vm.add(path.clone());
        }
        // Every command's resolved binary must be hash-verified before the
        // run may spawn anything (spec §4.I step 3, §4.J). The real workdir
        // doesn't exist yet at this point (K.create_for runs inside L), so
        // a placeholder stands in for `%{__runner_workdir}`; a `cmd` that
        // itself depends on the workdir can't be pre-verified meaningfully
        // anyway, since that directory is freshly created and empty on
        // every run.
        let workdir_placeholder = ctx
            .explicit_workdir
            .clone()
            .unwrap_or_else(|| PathBuf::from("/nonexistent-runner-workdir-placeholder"));
        for spec in &group.commands {
            let runtime_command = expand_command(&ctx, spec, &workdir_placeholder, system_env)?;
            vm.add(runtime_command.expanded_cmd);
        }
        group_contexts.push((group.clone(), ctx));
    }

    Ok((vm, group_contexts))
}

/// Verify every declared path without executing anything (the `verify`
/// subcommand, and the pre-execution gate inside `run`).
pub fn verify_config(options: &RunOptions<'_>) -> Result<()> {
    let config = config::load_config(options.config_path)?;
    let system_env = SystemEnvSnapshot::capture();
    let hash_dir = hash_dir_for(options);
    let (vm, _) = build_verification_manager(&config, &system_env, hash_dir)?;

    let privilege = PrivilegeManager::capture();
    vm.verify_all(&privilege)
}

/// Record hashes for every path the config declares (the `record`
/// subcommand).
pub fn record_config(options: &RunOptions<'_>) -> Result<()> {
    let config = config::load_config(options.config_path)?;
    let system_env = SystemEnvSnapshot::capture();
    let hash_dir = hash_dir_for(options);
    let (vm, _) = build_verification_manager(&config, &system_env, hash_dir)?;

    let privilege = PrivilegeManager::capture();
    vm.record_all(&privilege)
}

/// Verify, then execute every group in priority order (the `run`
/// subcommand). Returns `Err` only for pre-execution failures (config,
/// verification); per-command failures are captured in the returned
/// [`RunReport`] instead, per spec §7's propagation policy.
pub fn execute_config(options: &RunOptions<'_>) -> Result<RunReport> {
    let config = config::load_config(options.config_path)?;
    let system_env = SystemEnvSnapshot::capture();
    let hash_dir = hash_dir_for(options);
    let (vm, group_contexts) = build_verification_manager(&config, &system_env, hash_dir)?;

    let privilege = PrivilegeManager::capture();
    vm.verify_all(&privilege)?;

    let global_runtime = expand_global(&config.global, &system_env)?;

    let filesystem: Box<dyn FileSystem> = if options.dry_run {
        Box::new(DryRunFileSystem)
    } else {
        Box::new(RealFileSystem)
    };
    let spawner: Box<dyn Spawner> = if options.dry_run {
        Box::new(DryRunSpawner)
    } else {
        Box::new(RealSpawner)
    };

    let executor = GroupExecutor {
        global: &global_runtime,
        privilege: &privilege,
        filesystem: filesystem.as_ref(),
        spawner: spawner.as_ref(),
        system_env: &system_env,
        keep_temp_dirs: options.keep_temp_dirs,
    };

    let mut groups = Vec::new();
    for (spec, ctx) in &group_contexts {
        groups.push(executor.run_group(ctx, &spec.commands));
    }

    Ok(RunReport {
        groups,
        skipped_standard_paths: vm.skipped,
    })
}

/// Convenience re-export for callers that only need the risk enum.
pub use risk::{RiskDecision, RiskLevel};
