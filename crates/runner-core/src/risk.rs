//! Static risk classification and the risk gate (component F).
//!
//! Classification runs a fixed, ordered list of checks and stops at the
//! first match — later rules exist precisely to cover what earlier ones
//! didn't, not to be merged or re-ordered.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::elf_analyze::{analyze, NetworkVerdict};
use crate::error::{Result, RunnerError};
use crate::runtime::RuntimeCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(RunnerError::InvalidRiskLevel {
                value: other.to_string(),
            }),
        }
    }
}

/// Binaries that grant privilege escalation outright.
const PRIVILEGE_ESCALATION_BINARIES: &[&str] = &["sudo", "su", "doas", "pkexec"];

/// `(program, destructive-if-any-arg-matches)` pairs for rule 2.
const DESTRUCTIVE_RULES: &[(&str, &[&str])] = &[
    ("rm", &["-rf /", "-rf/", "--no-preserve-root"]),
    ("dd", &["of=/dev/sd", "of=/dev/nvme", "of=/dev/hd"]),
    ("mkfs", &[]),
    ("mkfs.ext4", &[]),
    ("mkfs.xfs", &[]),
];

/// Programs always classified `high` regardless of arguments.
const ALWAYS_NETWORK: &[&str] = &["curl", "wget", "ssh", "scp", "rsync", "nc", "ncat", "telnet"];

/// Programs that are network-capable only for certain subcommands/args.
const CONDITIONAL_NETWORK: &[&str] = &["git"];

const GIT_NETWORK_SUBCOMMANDS: &[&str] = &["fetch", "push", "clone", "pull"];

#[derive(Debug, Clone)]
pub struct RiskDecision {
    pub level: RiskLevel,
    pub rationale: String,
}

fn program_name(cmd: &Path) -> String {
    cmd.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Classify `cmd` per spec §4.F's ordered rule list. `dynamically_linked`
/// and the already-opened handle for ELF analysis are supplied by the
/// caller (the group executor), which has exclusive access to the
/// privileged-read adapter.
pub fn classify(command: &RuntimeCommand) -> Result<RiskDecision> {
    let program = program_name(&command.expanded_cmd);

    if PRIVILEGE_ESCALATION_BINARIES.contains(&program.as_str()) {
        return Ok(RiskDecision {
            level: RiskLevel::Critical,
            rationale: format!("`{program}` is a privilege-escalation binary"),
        });
    }

    if let Some((_, patterns)) = DESTRUCTIVE_RULES
        .iter()
        .find(|(name, _)| *name == program.as_str())
    {
        let joined_args = command.expanded_args.join(" ");
        let matches_destructive = patterns.is_empty()
            || patterns
                .iter()
                .any(|pattern| joined_args.contains(pattern));
        if matches_destructive {
            return Ok(RiskDecision {
                level: RiskLevel::High,
                rationale: format!("`{program}` matches a destructive file operation rule"),
            });
        }
    }

    if ALWAYS_NETWORK.contains(&program.as_str()) {
        return Ok(RiskDecision {
            level: RiskLevel::High,
            rationale: format!("`{program}` is always-network per profile"),
        });
    }

    if CONDITIONAL_NETWORK.contains(&program.as_str()) {
        let network_shaped = looks_network_shaped(&program, &command.expanded_args);
        if network_shaped {
            return Ok(RiskDecision {
                level: RiskLevel::High,
                rationale: format!("`{program}` invoked with network-shaped arguments"),
            });
        }
    }

    let known_profile = PRIVILEGE_ESCALATION_BINARIES.contains(&program.as_str())
        || DESTRUCTIVE_RULES.iter().any(|(n, _)| *n == program.as_str())
        || ALWAYS_NETWORK.contains(&program.as_str())
        || CONDITIONAL_NETWORK.contains(&program.as_str());

    if !known_profile {
        match analyze(&command.expanded_cmd)? {
            NetworkVerdict::NetworkDetected => {
                return Ok(RiskDecision {
                    level: RiskLevel::High,
                    rationale: "ELF analysis found network-capable imports".to_string(),
                })
            }
            NetworkVerdict::AnalysisError | NetworkVerdict::StaticBinaryUnknown => {
                return Ok(RiskDecision {
                    level: RiskLevel::Medium,
                    rationale: "ELF analysis inconclusive; defaulting to medium (safety-first)"
                        .to_string(),
                })
            }
            NetworkVerdict::NoNetworkSymbols | NetworkVerdict::NotElf => {
                // fall through to rule 6
            }
        }
    }

    Ok(RiskDecision {
        level: RiskLevel::Low,
        rationale: "no matching higher-risk rule".to_string(),
    })
}

fn looks_network_shaped(program: &str, args: &[String]) -> bool {
    if program == "git" {
        if let Some(subcommand) = args.first() {
            if GIT_NETWORK_SUBCOMMANDS.contains(&subcommand.as_str()) {
                return true;
            }
        }
    }
    args.iter().any(|a| a.contains("://") || looks_like_ssh_target(a))
}

fn looks_like_ssh_target(arg: &str) -> bool {
    // user@host:path — must have an '@' before a ':' and no whitespace.
    if arg.contains(' ') {
        return false;
    }
    let Some(at) = arg.find('@') else { return false };
    arg[at..].contains(':')
}

/// Compare a computed decision against the command's declared ceiling.
pub fn enforce_ceiling(name: &str, decision: &RiskDecision, ceiling: RiskLevel) -> Result<()> {
    if decision.level > ceiling {
        return Err(RunnerError::RiskExceeded {
            name: name.to_string(),
            ceiling,
            computed: decision.level,
        });
    }
    Ok(())
}
