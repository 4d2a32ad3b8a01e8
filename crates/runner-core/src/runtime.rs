//! `Spec` → `Runtime` expansion pipeline (component I) and the resulting
//! post-expansion data model (spec §3's `Runtime*` entities).
//!
//! Expansion happens in two phases because the reserved `%{__runner_workdir}`
//! variable isn't known until the group executor (component L) has created
//! or selected the group's workdir:
//!
//! 1. [`expand_global`] and [`expand_group_context`] run at config-load time:
//!    they resolve `verify_files`/`cmd_allowed` and the group's effective
//!    environment allowlist, none of which reference the workdir.
//! 2. [`expand_command`] runs once per group, after the workdir is known,
//!    and expands each command's `cmd`/`args`/`workdir` against the
//!    effective env plus `__runner_workdir`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::{parse_import_pairs, parse_kv_pairs, CommandSpec, ConfigSpec, GlobalSpec, GroupSpec};
use crate::env_filter::{build_effective_env, SystemEnvSnapshot};
use crate::error::{Result, RunnerError};
use crate::expand::{expand, ExpansionContext, WORKDIR_VAR};
use crate::risk::RiskLevel;

#[derive(Debug, Clone)]
pub struct RuntimeGlobal {
    pub timeout_seconds: u64,
    pub log_level: String,
    pub expanded_verify_files: Vec<PathBuf>,
    pub verify_standard_paths: bool,
    pub output_size_limit: u64,
    pub allowed_commands: Vec<Regex>,
    pub env_allowed: Vec<String>,
}

/// Everything known about a group before its workdir is established.
#[derive(Debug, Clone)]
pub struct GroupExpansionContext {
    pub group_name: String,
    pub priority: i64,
    pub explicit_workdir: Option<PathBuf>,
    pub expanded_verify_files: Vec<PathBuf>,
    pub expanded_cmd_allowed: Vec<PathBuf>,
    pub effective_env: BTreeMap<String, String>,
    pub effective_allowed: Vec<String>,
    pub commands: Vec<CommandSpec>,
}

#[derive(Debug, Clone)]
pub struct RuntimeCommand {
    pub name: String,
    pub expanded_cmd: PathBuf,
    pub expanded_args: Vec<String>,
    pub expanded_workdir: PathBuf,
    pub expanded_env: BTreeMap<String, String>,
    pub run_as_user: Option<String>,
    pub run_as_group: Option<String>,
    pub risk_level: RiskLevel,
    pub output_file: Option<PathBuf>,
    pub timeout_seconds: Option<u64>,
}

fn resolve_path_string(raw: &str) -> Result<PathBuf> {
    let path = PathBuf::from(raw);
    if !path.is_absolute() {
        return Err(RunnerError::NotAbsolute { path });
    }
    match std::fs::canonicalize(&path) {
        Ok(resolved) => Ok(resolved),
        Err(e) => Err(RunnerError::Io { path, source: e }),
    }
}

pub fn expand_global(global: &GlobalSpec, system_env: &SystemEnvSnapshot) -> Result<RuntimeGlobal> {
    let explicit_vars = parse_kv_pairs(&global.env_vars, "global.env_vars")?;
    let imports = parse_import_pairs(&global.env_import, "global.env_import")?;
    let effective_env = build_effective_env(system_env, &global.env_allowed, &explicit_vars, &imports)?;

    let ctx = ExpansionContext {
        runner_vars: &effective_env,
        system_env,
        allowed: &global.env_allowed,
    };

    let expanded_verify_files = global
        .verify_files
        .iter()
        .map(|raw| {
            let expanded = expand(raw, &ctx, "global.verify_files")?;
            resolve_path_string(&expanded)
        })
        .collect::<Result<Vec<_>>>()?;

    let allowed_commands = global
        .allowed_commands
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| RunnerError::InvalidRegex {
                pattern: pattern.clone(),
                detail: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RuntimeGlobal {
        timeout_seconds: global.timeout_seconds,
        log_level: global.log_level.clone(),
        expanded_verify_files,
        verify_standard_paths: global.verify_standard_paths.unwrap_or(true),
        output_size_limit: global.output_size_limit,
        allowed_commands,
        env_allowed: global.env_allowed.clone(),
    })
}

pub fn expand_group_context(
    group: &GroupSpec,
    global: &GlobalSpec,
    global_effective_env: &BTreeMap<String, String>,
    system_env: &SystemEnvSnapshot,
) -> Result<GroupExpansionContext> {
    let effective_allowed = if group.env_allowed.is_empty() {
        global.env_allowed.clone()
    } else {
        group.env_allowed.clone()
    };

    let explicit_vars = parse_kv_pairs(&group.env_vars, "group.env_vars")?;
    let imports = parse_import_pairs(&group.env_import, "group.env_import")?;
    let group_own_env = build_effective_env(system_env, &effective_allowed, &explicit_vars, &imports)?;

    let mut effective_env = global_effective_env.clone();
    effective_env.extend(group_own_env);

    let ctx = ExpansionContext {
        runner_vars: &effective_env,
        system_env,
        allowed: &effective_allowed,
    };

    let expanded_verify_files = group
        .verify_files
        .iter()
        .map(|raw| {
            let expanded = expand(raw, &ctx, "group.verify_files")?;
            resolve_path_string(&expanded)
        })
        .collect::<Result<Vec<_>>>()?;

    let expanded_cmd_allowed = group
        .cmd_allowed
        .iter()
        .map(|raw| {
            let expanded = expand(raw, &ctx, "group.cmd_allowed")?;
            resolve_path_string(&expanded)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(GroupExpansionContext {
        group_name: group.name.clone(),
        priority: group.priority,
        explicit_workdir: group.workdir.clone(),
        expanded_verify_files,
        expanded_cmd_allowed,
        effective_env,
        effective_allowed,
        commands: group.commands.clone(),
    })
}

/// Expand one command against its group's context plus the now-known
/// workdir. Called by the group executor once per command, in declared
/// order.
pub fn expand_command(
    group_ctx: &GroupExpansionContext,
    command: &CommandSpec,
    workdir: &Path,
    system_env: &SystemEnvSnapshot,
) -> Result<RuntimeCommand> {
    let cmd_explicit = parse_kv_pairs(&command.env_vars, "command.env_vars")?;
    let cmd_imports = parse_import_pairs(&command.env_import, "command.env_import")?;
    let cmd_own_env = build_effective_env(
        system_env,
        &group_ctx.effective_allowed,
        &cmd_explicit,
        &cmd_imports,
    )?;

    let mut effective_env = group_ctx.effective_env.clone();
    effective_env.extend(cmd_own_env);

    let mut runner_vars = effective_env.clone();
    runner_vars.insert(WORKDIR_VAR.to_string(), workdir.display().to_string());

    let ctx = ExpansionContext {
        runner_vars: &runner_vars,
        system_env,
        allowed: &group_ctx.effective_allowed,
    };

    let expanded_cmd_raw = expand(&command.cmd, &ctx, "command.cmd")?;
    let expanded_cmd = resolve_command_path(&expanded_cmd_raw, &effective_env)?;

    let expanded_args = command
        .args
        .iter()
        .map(|raw| expand(raw, &ctx, "command.args"))
        .collect::<Result<Vec<_>>>()?;

    let expanded_workdir = match &command.workdir {
        Some(raw) => {
            let expanded = expand(raw, &ctx, "command.workdir")?;
            PathBuf::from(expanded)
        }
        None => workdir.to_path_buf(),
    };

    Ok(RuntimeCommand {
        name: command.name.clone(),
        expanded_cmd,
        expanded_args,
        expanded_workdir,
        expanded_env: effective_env,
        run_as_user: command.run_as_user.clone(),
        run_as_group: command.run_as_group.clone(),
        risk_level: command.risk_ceiling()?,
        output_file: command.output_file.clone(),
        timeout_seconds: command.timeout_seconds,
    })
}

/// Resolve `cmd` to an absolute path: used as-is if already absolute,
/// otherwise searched on `PATH` from the filtered env (spec §4.I step 2).
fn resolve_command_path(raw: &str, effective_env: &BTreeMap<String, String>) -> Result<PathBuf> {
    let candidate = PathBuf::from(raw);
    if candidate.is_absolute() {
        return resolve_path_string(raw);
    }

    let path_var = effective_env.get("PATH").ok_or_else(|| RunnerError::InvalidPath {
        path: raw.to_string(),
    })?;

    for dir in path_var.split(':') {
        let full = PathBuf::from(dir).join(&candidate);
        if full.is_file() {
            return resolve_path_string(&full.display().to_string());
        }
    }

    Err(RunnerError::InvalidPath {
        path: format!("`{raw}` not found on PATH"),
    })
}

/// Collect the full set of paths that must be hash-verified for a config:
/// global verify_files, every group's verify_files, and every expanded
/// command path (spec §4.I step 3). Command paths require the group's
/// workdir to already be resolved, so this is assembled incrementally by
/// the executor rather than computed in one pass here.
pub fn dedup_paths(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for path in paths {
        if seen.insert(path.clone()) {
            out.push(path);
        }
    }
    out
}

/// Order groups by ascending priority, stable w.r.t. declaration order for
/// ties (spec §3 `GroupSpec.priority`).
pub fn ordered_groups(config: &ConfigSpec) -> Vec<&GroupSpec> {
    let mut groups: Vec<&GroupSpec> = config.groups.iter().collect();
    groups.sort_by_key(|g| g.priority);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn system_env() -> SystemEnvSnapshot {
        SystemEnvSnapshot::from_map(Map::from([(
            "PATH".to_string(),
            "/usr/bin:/bin".to_string(),
        )]))
    }

    #[test]
    fn global_expansion_is_deterministic() {
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
        let env = system_env();
        let a = expand_global(&global, &env).unwrap();
        let b = expand_global(&global, &env).unwrap();
        assert_eq!(a.env_allowed, b.env_allowed);
        assert!(a.verify_standard_paths);
    }

    #[test]
    fn command_path_resolves_via_path_search() {
        // /bin/sh is present on virtually every Unix test runner.
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
        let env = SystemEnvSnapshot::from_map(Map::from([(
            "PATH".to_string(),
            "/bin:/usr/bin".to_string(),
        )]));
        let global_rt = expand_global(&global, &env).unwrap();
        let global_effective_env = {
            let mut m = Map::new();
            m.insert("PATH".to_string(), "/bin:/usr/bin".to_string());
            m
        };
        let group = GroupSpec {
            name: "g".to_string(),
            priority: 0,
            workdir: None,
            verify_files: vec![],
            env_vars: vec![],
            env_allowed: vec!["PATH".to_string()],
            env_import: vec![],
            cmd_allowed: vec![],
            commands: vec![],
        };
        let group_ctx = expand_group_context(&group, &global, &global_effective_env, &env).unwrap();
        let command = CommandSpec {
            name: "c".to_string(),
            cmd: "sh".to_string(),
            args: vec![],
            workdir: None,
            env_vars: vec![],
            env_import: vec![],
            run_as_user: None,
            run_as_group: None,
            risk_level: "low".to_string(),
            output_file: None,
            timeout_seconds: None,
        };
        let workdir = PathBuf::from("/tmp");
        let runtime_cmd = expand_command(&group_ctx, &command, &workdir, &env).unwrap();
        assert!(runtime_cmd.expanded_cmd.is_absolute());
        assert!(runtime_cmd.expanded_cmd.ends_with("sh"));
        let _ = global_rt;
    }

    #[test]
    fn dedup_paths_preserves_first_occurrence_order() {
        let paths = vec![
            PathBuf::from("/a"),
            PathBuf::from("/b"),
            PathBuf::from("/a"),
        ];
        assert_eq!(dedup_paths(paths), vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }
}
