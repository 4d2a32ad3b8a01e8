//! Structural and cross-reference validation for a loaded [`super::ConfigSpec`]
//! (spec §4.H steps 3-4).

use std::collections::BTreeSet;

use regex::Regex;

use crate::error::{Result, RunnerError};
use crate::expand::reject_reserved_definition;

use super::{group_name_is_valid, parse_kv_pairs, ConfigSpec};

pub fn validate(config: &ConfigSpec) -> Result<()> {
    validate_groups_unique(config)?;
    validate_allowed_commands_regexes(config)?;
    validate_commands(config)?;
    validate_reserved_vars(config)?;
    Ok(())
}

fn validate_groups_unique(config: &ConfigSpec) -> Result<()> {
    let mut seen = BTreeSet::new();
    for group in &config.groups {
        if !group_name_is_valid(&group.name) {
            return Err(RunnerError::InvalidPath {
                path: format!("group name `{}`", group.name),
            });
        }
        if !seen.insert(group.name.clone()) {
            return Err(RunnerError::DuplicateName {
                kind: "group",
                name: group.name.clone(),
            });
        }
    }
    Ok(())
}

fn validate_allowed_commands_regexes(config: &ConfigSpec) -> Result<()> {
    for pattern in &config.global.allowed_commands {
        Regex::new(pattern).map_err(|e| RunnerError::InvalidRegex {
            pattern: pattern.clone(),
            detail: e.to_string(),
        })?;
    }
    Ok(())
}

fn validate_commands(config: &ConfigSpec) -> Result<()> {
    for group in &config.groups {
        let mut seen = BTreeSet::new();
        for command in &group.commands {
            if command.name.is_empty() {
                return Err(RunnerError::InvalidPath {
                    path: "command name must be non-empty".to_string(),
                });
            }
            if !seen.insert(command.name.clone()) {
                return Err(RunnerError::DuplicateName {
                    kind: "command",
                    name: command.name.clone(),
                });
            }
            // risk_level must parse; this also validates command_templates
            // entries since they share the same struct.
            command.risk_ceiling()?;

            if let Some(workdir) = &group.workdir {
                if !workdir.is_absolute() {
                    return Err(RunnerError::InvalidPath {
                        path: workdir.display().to_string(),
                    });
                }
            }
        }
    }
    for (name, template) in &config.command_templates {
        if name.is_empty() {
            return Err(RunnerError::InvalidPath {
                path: "command_templates key must be non-empty".to_string(),
            });
        }
        template.risk_ceiling()?;
    }
    Ok(())
}

fn validate_reserved_vars(config: &ConfigSpec) -> Result<()> {
    for entry in &config.global.env_vars {
        let (name, _) = split_kv(entry)?;
        reject_reserved_definition(&name)?;
    }
    for group in &config.groups {
        for entry in &group.env_vars {
            let (name, _) = split_kv(entry)?;
            reject_reserved_definition(&name)?;
        }
        for command in &group.commands {
            for entry in &command.env_vars {
                let (name, _) = split_kv(entry)?;
                reject_reserved_definition(&name)?;
            }
        }
    }
    Ok(())
}

fn split_kv(entry: &str) -> Result<(String, String)> {
    parse_kv_pairs(std::slice::from_ref(&entry.to_string()), "env_vars")
        .map(|mut v| v.remove(0))
}
