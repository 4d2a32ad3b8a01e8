use runner_core::error::exit_code;
use runner_core::{execute_config, RunOptions};

use crate::cli::RunArgs;

pub fn dispatch(args: &RunArgs) -> i32 {
    let options = RunOptions {
        config_path: &args.config,
        dry_run: args.dry_run,
        keep_temp_dirs: args.keep_temp_dirs,
        hash_dir: None,
    };

    match execute_config(&options) {
        Ok(report) => {
            for group in &report.groups {
                for command in &group.commands {
                    let status = match (&command.exit_code, &command.error) {
                        (_, Some(err)) => format!("FAILED ({err})"),
                        (Some(0), None) => "ok".to_string(),
                        (Some(code), None) => format!("exit {code}"),
                        (None, None) => "not run".to_string(),
                    };
                    println!("[{}] {}: {status}", group.group_name, command.name);
                }
            }
            if !report.skipped_standard_paths.is_empty() {
                println!(
                    "skipped verification of {} standard-path file(s) (verify_standard_paths=false)",
                    report.skipped_standard_paths.len()
                );
            }
            report.exit_code()
        }
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
    .clamp(0, exit_code::FATAL)
}
