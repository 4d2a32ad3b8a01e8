pub mod record;
pub mod run;
pub mod verify;

use crate::cli::{Cli, Commands};

/// Route the parsed CLI to the matching subcommand and return the process
/// exit code (spec §4.O, §6).
pub fn dispatch(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Run(args) => run::dispatch(args),
        Commands::Record(args) => record::dispatch(args),
        Commands::Verify(args) => verify::dispatch(args),
    }
}
