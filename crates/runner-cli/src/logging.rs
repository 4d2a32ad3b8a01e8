//! Tracing subscriber setup (component N, CLI half).
//!
//! Precedence for the effective filter: `--log-level` flag, then
//! `RUST_LOG`, then a hardcoded `info` default. The core never sets this up
//! itself — it only emits events.

use tracing_subscriber::EnvFilter;

pub fn init(flag_level: Option<&str>) {
    let filter = match flag_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
