//! `%{var}`/`${VAR}` string expansion with cycle detection (component G,
//! expander half).
//!
//! `%{name}` resolves against the scope's filtered runner-variable map
//! (which includes the reserved `__runner_workdir`); `${VAR}` resolves
//! against the system environment, subject to the same allowlist. Both
//! forms may nest (a variable's value may itself contain further
//! references), which is why cycle detection is needed.

use std::collections::BTreeMap;

use crate::env_filter::SystemEnvSnapshot;
use crate::error::{Result, RunnerError};

pub const RESERVED_PREFIX: &str = "__runner_";
pub const WORKDIR_VAR: &str = "__runner_workdir";

/// Everything `expand` needs to resolve one string.
pub struct ExpansionContext<'a> {
    pub runner_vars: &'a BTreeMap<String, String>,
    pub system_env: &'a SystemEnvSnapshot,
    pub allowed: &'a [String],
}

impl ExpansionContext<'_> {
    fn is_allowed(&self, name: &str) -> bool {
        name == WORKDIR_VAR || self.allowed.iter().any(|a| a == name)
    }
}

/// Expand all `%{...}` and `${...}` occurrences in `input`, plus `\$`/`\\`
/// escapes. `context_label` is used only to annotate errors (e.g. the
/// field being expanded).
pub fn expand(input: &str, ctx: &ExpansionContext<'_>, context_label: &str) -> Result<String> {
    let mut visited = Vec::new();
    expand_inner(input, ctx, context_label, &mut visited)
}

fn expand_inner(
    input: &str,
    ctx: &ExpansionContext<'_>,
    context_label: &str,
    visited: &mut Vec<String>,
) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                let Some(&next) = chars.get(i + 1) else {
                    return Err(RunnerError::InvalidEscape {
                        ch: '\0',
                        context: context_label.to_string(),
                    });
                };
                match next {
                    '$' => out.push('$'),
                    '\\' => out.push('\\'),
                    other => {
                        return Err(RunnerError::InvalidEscape {
                            ch: other,
                            context: context_label.to_string(),
                        })
                    }
                }
                i += 2;
            }
            '%' if chars.get(i + 1) == Some(&'{') => {
                let (name, consumed) = read_braced(&chars[i + 2..])?;
                i += 2 + consumed;
                let value = resolve_runner_var(&name, ctx, context_label, visited)?;
                out.push_str(&value);
            }
            '$' if chars.get(i + 1) == Some(&'{') => {
                let (name, consumed) = read_braced(&chars[i + 2..])?;
                i += 2 + consumed;
                let value = resolve_system_var(&name, ctx, context_label)?;
                out.push_str(&value);
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    Ok(out)
}

fn read_braced(rest: &[char]) -> Result<(String, usize)> {
    let mut name = String::new();
    for (idx, &c) in rest.iter().enumerate() {
        if c == '}' {
            return Ok((name, idx + 1));
        }
        name.push(c);
    }
    Err(RunnerError::UndefinedVariable {
        name,
        context: "unterminated variable reference".to_string(),
    })
}

fn resolve_runner_var(
    name: &str,
    ctx: &ExpansionContext<'_>,
    context_label: &str,
    visited: &mut Vec<String>,
) -> Result<String> {
    if !ctx.is_allowed(name) {
        return Err(RunnerError::VariableNotAllowed {
            name: name.to_string(),
        });
    }
    if visited.iter().any(|v| v == name) {
        return Err(RunnerError::CircularReference {
            name: name.to_string(),
        });
    }
    let Some(raw) = ctx.runner_vars.get(name) else {
        return Err(RunnerError::UndefinedVariable {
            name: name.to_string(),
            context: context_label.to_string(),
        });
    };

    visited.push(name.to_string());
    let resolved = expand_inner(raw, ctx, context_label, visited)?;
    visited.pop();
    Ok(resolved)
}

fn resolve_system_var(name: &str, ctx: &ExpansionContext<'_>, context_label: &str) -> Result<String> {
    if !ctx.is_allowed(name) {
        return Err(RunnerError::VariableNotAllowed {
            name: name.to_string(),
        });
    }
    ctx.system_env
        .get(name)
        .map(str::to_string)
        .ok_or_else(|| RunnerError::UndefinedVariable {
            name: name.to_string(),
            context: context_label.to_string(),
        })
}

/// Reject a config that tries to *define* a `__runner_`-prefixed runner
/// variable; configs may only reference the reserved names, never set them.
pub fn reject_reserved_definition(name: &str) -> Result<()> {
    if name.starts_with(RESERVED_PREFIX) {
        return Err(RunnerError::ReservedVariableDefined {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(
        runner_vars: &'a BTreeMap<String, String>,
        system_env: &'a SystemEnvSnapshot,
        allowed: &'a [String],
    ) -> ExpansionContext<'a> {
        ExpansionContext {
            runner_vars,
            system_env,
            allowed,
        }
    }

    #[test]
    fn identity_when_no_metacharacters() {
        let vars = BTreeMap::new();
        let env = SystemEnvSnapshot::default();
        let allowed = vec![];
        let c = ctx(&vars, &env, &allowed);
        assert_eq!(expand("plain text", &c, "test").unwrap(), "plain text");
    }

    #[test]
    fn runner_var_substitution() {
        let mut vars = BTreeMap::new();
        vars.insert("db".to_string(), "mydb".to_string());
        let env = SystemEnvSnapshot::default();
        let allowed = vec!["db".to_string()];
        let c = ctx(&vars, &env, &allowed);
        assert_eq!(expand("dump_%{db}.sql", &c, "test").unwrap(), "dump_mydb.sql");
    }

    #[test]
    fn workdir_is_implicitly_allowed() {
        let mut vars = BTreeMap::new();
        vars.insert(WORKDIR_VAR.to_string(), "/tmp/scr-g-abc123".to_string());
        let env = SystemEnvSnapshot::default();
        let allowed: Vec<String> = vec![];
        let c = ctx(&vars, &env, &allowed);
        assert_eq!(
            expand("%{__runner_workdir}/dump.sql", &c, "test").unwrap(),
            "/tmp/scr-g-abc123/dump.sql"
        );
    }

    #[test]
    fn escapes_are_literal() {
        let vars = BTreeMap::new();
        let env = SystemEnvSnapshot::default();
        let allowed = vec![];
        let c = ctx(&vars, &env, &allowed);
        assert_eq!(expand(r"price: \$5 path: C:\\x", &c, "test").unwrap(), r"price: $5 path: C:\x");
    }

    #[test]
    fn invalid_escape_errors() {
        let vars = BTreeMap::new();
        let env = SystemEnvSnapshot::default();
        let allowed = vec![];
        let c = ctx(&vars, &env, &allowed);
        let err = expand(r"\q", &c, "test").unwrap_err();
        assert!(matches!(err, RunnerError::InvalidEscape { .. }));
    }

    #[test]
    fn undefined_variable_errors() {
        let vars = BTreeMap::new();
        let env = SystemEnvSnapshot::default();
        let allowed = vec!["db".to_string()];
        let c = ctx(&vars, &env, &allowed);
        let err = expand("%{db}", &c, "test").unwrap_err();
        assert!(matches!(err, RunnerError::UndefinedVariable { .. }));
    }

    #[test]
    fn not_allowed_variable_errors() {
        let mut vars = BTreeMap::new();
        vars.insert("secret".to_string(), "x".to_string());
        let env = SystemEnvSnapshot::default();
        let allowed: Vec<String> = vec![];
        let c = ctx(&vars, &env, &allowed);
        let err = expand("%{secret}", &c, "test").unwrap_err();
        assert!(matches!(err, RunnerError::VariableNotAllowed { .. }));
    }

    #[test]
    fn direct_cycle_is_detected() {
        let mut vars = BTreeMap::new();
        vars.insert("a".to_string(), "%{b}".to_string());
        vars.insert("b".to_string(), "%{a}".to_string());
        let env = SystemEnvSnapshot::default();
        let allowed = vec!["a".to_string(), "b".to_string()];
        let c = ctx(&vars, &env, &allowed);
        let err = expand("%{a}", &c, "test").unwrap_err();
        assert!(matches!(err, RunnerError::CircularReference { .. }));
    }

    #[test]
    fn reserved_prefix_cannot_be_defined_by_config() {
        assert!(reject_reserved_definition("__runner_workdir").is_err());
        assert!(reject_reserved_definition("normal_name").is_ok());
    }
}
