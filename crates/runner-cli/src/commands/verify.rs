use runner_core::{verify_config, RunOptions};

use crate::cli::VerifyArgs;

pub fn dispatch(args: &VerifyArgs) -> i32 {
    let options = RunOptions {
        config_path: &args.config,
        dry_run: true,
        keep_temp_dirs: false,
        hash_dir: None,
    };

    match verify_config(&options) {
        Ok(()) => {
            println!("all declared paths verified");
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}
