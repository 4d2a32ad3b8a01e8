use runner_core::{record_config, RunOptions};

use crate::cli::RecordArgs;

pub fn dispatch(args: &RecordArgs) -> i32 {
    let options = RunOptions {
        config_path: &args.config,
        dry_run: false,
        keep_temp_dirs: false,
        hash_dir: None,
    };

    match record_config(&options) {
        Ok(()) => {
            println!("recorded hashes for all declared paths");
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}
