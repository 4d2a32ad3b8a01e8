//! Environment allowlisting and import (component G, filter half).
//!
//! Produces the effective environment map for a scope (global or group):
//! only names on that scope's allowlist survive, dangerous names are
//! rejected outright even if allowlisted explicitly under a different
//! name, and `env_import` copies named system variables under a new
//! (allowlisted) internal name.

use std::collections::BTreeMap;

use crate::error::{Result, RunnerError};

/// Variable name prefixes/names that are never allowed into a spawned
/// child's environment, even if present in an allowlist — these are the
/// classic dynamic-linker and loader hijack vectors.
const DANGEROUS_NAMES: &[&str] = &["LD_PRELOAD", "LD_LIBRARY_PATH", "LD_AUDIT"];
const DANGEROUS_PREFIXES: &[&str] = &["DYLD_"];

fn is_dangerous(name: &str) -> bool {
    DANGEROUS_NAMES.contains(&name) || DANGEROUS_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// A snapshot of the real process environment, taken once at startup so
/// later filtering is a pure function of this map.
#[derive(Debug, Clone, Default)]
pub struct SystemEnvSnapshot(BTreeMap<String, String>);

impl SystemEnvSnapshot {
    pub fn capture() -> Self {
        Self(std::env::vars().collect())
    }

    #[cfg(test)]
    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Build the effective environment map for one scope.
///
/// `allowed`: the scope's effective allowlist (already resolved by the
/// caller across global/group inheritance). `explicit_vars`: `K=V` pairs
/// from `env_vars`; the *name* must still be on the allowlist (spec §3:
/// "`expanded_env` contains only variables whose name is in the effective
/// allowlist" — declaring a value directly doesn't exempt it from that
/// invariant, only from needing a matching system var). `imports`:
/// `internal_name=SYSTEM_VAR` pairs; the *internal* name must be
/// allowlisted, and the *system* name must exist in `system_env`.
pub fn build_effective_env(
    system_env: &SystemEnvSnapshot,
    allowed: &[String],
    explicit_vars: &[(String, String)],
    imports: &[(String, String)],
) -> Result<BTreeMap<String, String>> {
    let allowed_set: std::collections::BTreeSet<&str> =
        allowed.iter().map(String::as_str).collect();

    let mut effective = BTreeMap::new();

    for (name, value) in explicit_vars {
        if !allowed_set.contains(name.as_str()) {
            return Err(RunnerError::EnvNotAllowed { name: name.clone() });
        }
        reject_dangerous(name, value)?;
        effective.insert(name.clone(), value.clone());
    }

    for (internal_name, system_name) in imports {
        if !allowed_set.contains(internal_name.as_str()) {
            return Err(RunnerError::EnvNotAllowed {
                name: internal_name.clone(),
            });
        }
        let Some(value) = system_env.get(system_name) else {
            return Err(RunnerError::EnvNotAllowed {
                name: system_name.clone(),
            });
        };
        reject_dangerous(internal_name, value)?;
        effective.insert(internal_name.clone(), value.to_string());
    }

    Ok(effective)
}

fn reject_dangerous(name: &str, value: &str) -> Result<()> {
    if is_dangerous(name) {
        return Err(RunnerError::DangerousEnvVar {
            name: name.to_string(),
        });
    }
    if value.contains('\0') {
        return Err(RunnerError::DangerousEnvVar {
            name: name.to_string(),
        });
    }
    Ok(())
}
