//! Structured audit events (component N).
//!
//! The core never talks to a concrete logging backend directly; it emits
//! ordinary `tracing` events tagged with a stable `target` per component, and
//! the CLI installs whatever subscriber it likes (see `runner-cli`'s
//! `logging` module). This module only adds the one thing the core must
//! guarantee on its own: CRITICAL lines are never lost, even if the
//! subscriber failed to initialize, and variable *values* never end up in a
//! log line unredacted.

/// Mask a variable's value before it is ever formatted into a log field.
/// Names, paths, and command strings are not redacted (spec §7); only the
/// resolved *value* of an environment/runner variable is.
pub fn redact_value(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let visible: String = value.chars().take(2).collect();
    format!("{visible}***({} chars)", value.chars().count())
}

/// Emit a CRITICAL audit line through `tracing`, and mirror it to stderr so
/// it is visible even without a subscriber installed. Used exclusively by
/// the privilege manager's fail-stop path.
pub fn critical(event: &str, fields: &[(&str, &str)]) {
    let joined = fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    tracing::error!(target: "runner_core::audit", event, "{joined}");
    eprintln!("CRITICAL {event} {joined}");
}
