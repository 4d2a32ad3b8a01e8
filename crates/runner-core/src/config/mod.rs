//! TOML config schema and structural validation (component H).
//!
//! Deserialization is strict: `serde(deny_unknown_fields)` everywhere, so a
//! typo'd or stale field in the config fails fast with a field name rather
//! than being silently ignored.

mod validate;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, RunnerError};
use crate::risk::RiskLevel;

/// `verify_standard_paths` is tri-state: absent from TOML means "use the
/// default (true)", which is applied by the verification manager, not here.
fn default_verify_standard_paths() -> Option<bool> {
    None
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSpec {
    pub version: String,
    pub global: GlobalSpec,
    #[serde(default, rename = "groups")]
    pub groups: Vec<GroupSpec>,
    #[serde(default)]
    pub command_templates: BTreeMap<String, CommandSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSpec {
    #[serde(default)]
    pub timeout_seconds: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub verify_files: Vec<String>,
    #[serde(default = "default_verify_standard_paths")]
    pub verify_standard_paths: Option<bool>,
    #[serde(default)]
    pub env_vars: Vec<String>,
    #[serde(default)]
    pub env_allowed: Vec<String>,
    #[serde(default)]
    pub env_import: Vec<String>,
    #[serde(default)]
    pub output_size_limit: u64,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    pub name: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub verify_files: Vec<String>,
    #[serde(default)]
    pub env_vars: Vec<String>,
    #[serde(default)]
    pub env_allowed: Vec<String>,
    #[serde(default)]
    pub env_import: Vec<String>,
    #[serde(default)]
    pub cmd_allowed: Vec<String>,
    #[serde(default, rename = "commands")]
    pub commands: Vec<CommandSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub name: String,
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub env_vars: Vec<String>,
    #[serde(default)]
    pub env_import: Vec<String>,
    #[serde(default)]
    pub run_as_user: Option<String>,
    #[serde(default)]
    pub run_as_group: Option<String>,
    #[serde(default = "default_risk_level")]
    pub risk_level: String,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_risk_level() -> String {
    "low".to_string()
}

impl CommandSpec {
    pub fn risk_ceiling(&self) -> Result<RiskLevel> {
        self.risk_level.parse()
    }
}

const GROUP_NAME_PATTERN_CHARS: fn(char) -> bool =
    |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';

/// Parse `K=V` pairs used by `env_vars`.
pub fn parse_kv_pairs(entries: &[String], field: &str) -> Result<Vec<(String, String)>> {
    entries
        .iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| RunnerError::InvalidFormat {
                    path: PathBuf::from(field),
                    detail: format!("expected `K=V`, got `{entry}`"),
                })
        })
        .collect()
}

/// Parse `internal_name=SYSTEM_VAR` pairs used by `env_import`.
pub fn parse_import_pairs(entries: &[String], field: &str) -> Result<Vec<(String, String)>> {
    parse_kv_pairs(entries, field)
}

/// Load and validate a config file end-to-end: parse TOML strictly, then
/// run structural/cross-reference validation (§4.H steps 1-4).
pub fn load_config(path: &Path) -> Result<ConfigSpec> {
    let content = std::fs::read_to_string(path).map_err(|e| RunnerError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: ConfigSpec = toml::from_str(&content).map_err(|e| RunnerError::InvalidFormat {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    validate::validate(&config)?;
    Ok(config)
}

pub fn group_name_is_valid(name: &str) -> bool {
    !name.is_empty() && name.chars().all(GROUP_NAME_PATTERN_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let toml_src = r#"
version = "1.0"
[global]
env_allowed = ["PATH"]

[[groups]]
name = "g"
[[groups.commands]]
name = "c"
cmd = "/bin/echo"
args = ["hi"]
"#;
        let config: ConfigSpec = toml::from_str(toml_src).unwrap();
        assert_eq!(config.groups.len(), 1);
        assert_eq!(config.groups[0].commands[0].cmd, "/bin/echo");
    }

    #[test]
    fn unknown_field_is_rejected() {
        let toml_src = r#"
version = "1.0"
[global]
not_a_real_field = true
"#;
        let result: std::result::Result<ConfigSpec, _> = toml::from_str(toml_src);
        assert!(result.is_err());
    }

    #[test]
    fn kv_pair_parsing_rejects_missing_equals() {
        let err = parse_kv_pairs(&["NOEQUALS".to_string()], "env_vars").unwrap_err();
        assert!(matches!(err, RunnerError::InvalidFormat { .. }));
    }

    #[test]
    fn group_name_validation() {
        assert!(group_name_is_valid("backup-01"));
        assert!(!group_name_is_valid(""));
        assert!(!group_name_is_valid("has space"));
    }
}
