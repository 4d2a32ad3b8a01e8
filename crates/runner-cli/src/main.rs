mod cli;
mod commands;
mod logging;

use clap::Parser;

fn main() {
    let cli = cli::Cli::parse();
    logging::init(cli.log_level());

    let code = commands::dispatch(&cli);
    std::process::exit(code);
}
