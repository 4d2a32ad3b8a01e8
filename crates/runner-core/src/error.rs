//! Error taxonomy for the runner core.
//!
//! Every fallible operation in this crate returns a [`RunnerError`]. The
//! variant groups mirror the categories in the design spec (Config,
//! Expansion, Env, Io, Integrity, Risk, Privilege, Execution, Analysis) so
//! callers can match on category without enumerating every leaf variant.

use std::path::PathBuf;

use thiserror::Error;

/// The coarse exit codes the CLI maps every [`RunnerError`] onto.
pub mod exit_code {
    /// Pre-execution error: config, verification, or permission failure.
    pub const PRE_EXECUTION: i32 = 1;
    /// At least one command failed or a gate refused to run it.
    pub const EXECUTION: i32 = 2;
    /// Invariant break: privilege-restore failure or similar fail-stop case.
    pub const FATAL: i32 = 3;
}

#[derive(Debug, Error)]
pub enum RunnerError {
    // ---- Config --------------------------------------------------------
    #[error("invalid TOML in {path}: {detail}")]
    InvalidFormat { path: PathBuf, detail: String },

    #[error("unknown field `{field}` in {path}")]
    UnknownField { path: PathBuf, field: String },

    #[error("duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("path is not valid: {path}")]
    InvalidPath { path: String },

    #[error("invalid risk level: {value}")]
    InvalidRiskLevel { value: String },

    #[error("invalid regex `{pattern}`: {detail}")]
    InvalidRegex { pattern: String, detail: String },

    // ---- Expansion ------------------------------------------------------
    #[error("undefined variable `{name}` in `{context}`")]
    UndefinedVariable { name: String, context: String },

    #[error("variable `{name}` is not in the allowlist for this scope")]
    VariableNotAllowed { name: String },

    #[error("circular variable reference involving `{name}`")]
    CircularReference { name: String },

    #[error("config defines reserved variable `{name}`")]
    ReservedVariableDefined { name: String },

    #[error("invalid escape sequence `\\{ch}` in `{context}`")]
    InvalidEscape { ch: char, context: String },

    // ---- Env / allowlist -------------------------------------------------
    #[error("environment variable `{name}` is not allowed in this scope")]
    EnvNotAllowed { name: String },

    #[error("environment variable `{name}` is dangerous and was not explicitly allowed")]
    DangerousEnvVar { name: String },

    // ---- Path / I-O -------------------------------------------------------
    #[error("symlink rejected at `{component}` while opening `{path}`")]
    SymlinkRejected { path: PathBuf, component: PathBuf },

    #[error("path is not absolute: {path}")]
    NotAbsolute { path: PathBuf },

    #[error("file exceeds size cap ({size} > {cap} bytes): {path}")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        cap: u64,
    },

    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ---- Integrity --------------------------------------------------------
    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("no hash record for {path}")]
    HashRecordMissing { path: PathBuf },

    #[error("hash record corrupt or hash directory unreadable: {detail}")]
    HashRecordCorrupt { detail: String },

    // ---- Risk / allow -------------------------------------------------------
    #[error("command `{cmd}` is not in cmd_allowed or allowed_commands")]
    CommandNotAllowed { cmd: PathBuf },

    #[error("risk exceeded for `{name}`: ceiling={ceiling:?} computed={computed:?}")]
    RiskExceeded {
        name: String,
        ceiling: crate::risk::RiskLevel,
        computed: crate::risk::RiskLevel,
    },

    #[error("refusing to run world-writable binary: {path}")]
    InsecurePermissions { path: PathBuf },

    // ---- Privilege -------------------------------------------------------
    #[error("privilege escalation unsupported in this process mode")]
    EscalationUnsupported,

    #[error("failed to escalate privileges: {detail}")]
    EscalationFailed { detail: String },

    /// Never returned through normal control flow: the privilege manager
    /// terminates the process immediately after emitting the CRITICAL audit
    /// line (see [`crate::privilege`]). The variant exists so tests can
    /// construct and assert on its shape without forking a process.
    #[error("failed to restore effective uid to {original}, currently {current}")]
    RestoreFailed { original: u32, current: u32 },

    // ---- Execution ---------------------------------------------------------
    #[error("failed to spawn `{cmd}`: {detail}")]
    SpawnFailed { cmd: PathBuf, detail: String },

    #[error("command `{name}` timed out after {secs}s")]
    Timeout { name: String, secs: u64 },

    #[error("output of `{name}` exceeded the {cap}-byte cap; truncated")]
    OutputLimitExceeded { name: String, cap: u64 },

    // ---- Analysis ------------------------------------------------------------
    #[error("ELF analysis failed for {path}: {detail}")]
    ElfAnalysisError { path: PathBuf, detail: String },
}

impl RunnerError {
    /// Map this error to one of the four coarse CLI exit codes.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        use RunnerError::*;
        match self {
            RestoreFailed { .. } => exit_code::FATAL,

            RiskExceeded { .. }
            | CommandNotAllowed { .. }
            | InsecurePermissions { .. }
            | SpawnFailed { .. }
            | Timeout { .. }
            | OutputLimitExceeded { .. } => exit_code::EXECUTION,

            _ => exit_code::PRE_EXECUTION,
        }
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
