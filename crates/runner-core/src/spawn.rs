//! Real process spawning: argv/env/cwd, optional uid/gid switch, a
//! byte-capped stdout capture, and timeout enforcement via
//! SIGTERM-then-SIGKILL (spec §4.L step 4d, §9 "background/coroutine-style
//! output capture").

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{Result, RunnerError};
use crate::sideeffect::{SpawnOutcome, SpawnRequest};

/// How long to wait after SIGTERM before escalating to SIGKILL.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub fn spawn_real(request: &SpawnRequest<'_>) -> Result<SpawnOutcome> {
    let Some((program, args)) = request.argv.split_first() else {
        return Err(RunnerError::SpawnFailed {
            cmd: request.cwd.to_path_buf(),
            detail: "empty argv".to_string(),
        });
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(request.cwd)
        .env_clear()
        .envs(request.env.iter())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    apply_identity(&mut command, request.run_as_uid, request.run_as_gid);

    let start = Instant::now();
    let mut child = command.spawn().map_err(|e| RunnerError::SpawnFailed {
        cmd: program.clone().into(),
        detail: e.to_string(),
    })?;

    let cap = if request.output_cap == 0 {
        u64::MAX
    } else {
        request.output_cap
    };

    // A child that writes more than the pipe buffer (~64KB) without being
    // read blocks in `write()`, so stdout must be drained on its own
    // thread rather than after `wait_with_timeout` returns — otherwise a
    // child just waiting on backpressure looks indistinguishable from a
    // genuinely hung one and gets killed for it.
    let reader_thread = child.stdout.take().map(|mut reader| {
        std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
            let mut captured = Vec::new();
            let mut truncated = false;
            let mut buf = [0u8; 8192];
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                let remaining = cap.saturating_sub(captured.len() as u64);
                if remaining == 0 {
                    truncated = true;
                    continue;
                }
                let take = (n as u64).min(remaining) as usize;
                captured.extend_from_slice(&buf[..take]);
                if take < n {
                    truncated = true;
                }
            }
            Ok((captured, truncated))
        })
    });

    let timed_out = wait_with_timeout(&mut child, request.timeout)?;

    let (captured, truncated) = match reader_thread {
        Some(handle) => handle
            .join()
            .map_err(|_| RunnerError::SpawnFailed {
                cmd: program.clone().into(),
                detail: "stdout reader thread panicked".to_string(),
            })?
            .map_err(|e| RunnerError::SpawnFailed {
                cmd: program.clone().into(),
                detail: e.to_string(),
            })?,
        None => (Vec::new(), false),
    };

    if let Some(path) = request.output_file {
        std::fs::write(path, &captured).map_err(|e| RunnerError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let exit_code = if timed_out {
        -1
    } else {
        child
            .wait()
            .map_err(|e| RunnerError::SpawnFailed {
                cmd: program.clone().into(),
                detail: e.to_string(),
            })?
            .code()
            .unwrap_or(-1)
    };

    Ok(SpawnOutcome {
        exit_code,
        elapsed: start.elapsed(),
        stdout_bytes_captured: captured.len() as u64,
        truncated,
        timed_out,
    })
}

#[cfg(unix)]
fn apply_identity(command: &mut Command, uid: Option<u32>, gid: Option<u32>) {
    use std::os::unix::process::CommandExt;
    if let Some(gid) = gid {
        command.gid(gid);
    }
    if let Some(uid) = uid {
        command.uid(uid);
    }
}

#[cfg(not(unix))]
fn apply_identity(_command: &mut Command, _uid: Option<u32>, _gid: Option<u32>) {}

/// Wait for the child, honoring an optional timeout. Returns `Ok(true)` if
/// the timeout fired and the child had to be killed.
fn wait_with_timeout(child: &mut std::process::Child, timeout: Option<Duration>) -> Result<bool> {
    let Some(timeout) = timeout else {
        return Ok(false);
    };

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return Ok(false),
            Ok(None) => {
                if Instant::now() >= deadline {
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                return Err(RunnerError::SpawnFailed {
                    cmd: std::path::PathBuf::new(),
                    detail: e.to_string(),
                })
            }
        }
    }

    terminate_then_kill(child)?;
    Ok(true)
}

#[cfg(unix)]
fn terminate_then_kill(child: &mut std::process::Child) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(child.id() as i32);
    let _ = kill(pid, Signal::SIGTERM);

    let grace_deadline = Instant::now() + KILL_GRACE_PERIOD;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {
                if Instant::now() >= grace_deadline {
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => break,
        }
    }

    let _ = kill(pid, Signal::SIGKILL);
    let _ = child.wait();
    Ok(())
}

#[cfg(not(unix))]
fn terminate_then_kill(child: &mut std::process::Child) -> Result<()> {
    let _ = child.kill();
    let _ = child.wait();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::Path;

    fn env_with_path() -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        m
    }

    #[test]
    fn captures_stdout_up_to_cap() {
        let env = env_with_path();
        let argv = vec!["/bin/echo".to_string(), "hello world".to_string()];
        let request = SpawnRequest {
            argv: &argv,
            env: &env,
            cwd: Path::new("/tmp"),
            run_as_uid: None,
            run_as_gid: None,
            timeout: None,
            output_file: None,
            output_cap: 5,
        };
        let outcome = spawn_real(&request).unwrap();
        assert_eq!(outcome.stdout_bytes_captured, 5);
        assert!(outcome.truncated);
        assert_eq!(outcome.exit_code, 0);
    }

    #[test]
    fn exit_code_is_propagated() {
        let env = env_with_path();
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), "exit 7".to_string()];
        let request = SpawnRequest {
            argv: &argv,
            env: &env,
            cwd: Path::new("/tmp"),
            run_as_uid: None,
            run_as_gid: None,
            timeout: None,
            output_file: None,
            output_cap: 0,
        };
        let outcome = spawn_real(&request).unwrap();
        assert_eq!(outcome.exit_code, 7);
    }

    #[test]
    fn timeout_kills_a_sleeping_child() {
        let env = env_with_path();
        let argv = vec!["/bin/sleep".to_string(), "30".to_string()];
        let request = SpawnRequest {
            argv: &argv,
            env: &env,
            cwd: Path::new("/tmp"),
            run_as_uid: None,
            run_as_gid: None,
            timeout: Some(Duration::from_millis(100)),
            output_file: None,
            output_cap: 0,
        };
        let outcome = spawn_real(&request).unwrap();
        assert!(outcome.timed_out);
    }

    #[test]
    fn large_output_does_not_spuriously_trip_the_timeout() {
        // Writes well past a pipe's ~64KB buffer, then exits quickly. If
        // stdout weren't drained until after the wait loop, the child would
        // block on backpressure and `try_wait` would never see it exit,
        // so a generous but finite timeout would fire for the wrong reason.
        let env = env_with_path();
        let argv = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "yes | head -c 1000000".to_string(),
        ];
        let request = SpawnRequest {
            argv: &argv,
            env: &env,
            cwd: Path::new("/tmp"),
            run_as_uid: None,
            run_as_gid: None,
            timeout: Some(Duration::from_secs(10)),
            output_file: None,
            output_cap: 0,
        };
        let outcome = spawn_real(&request).unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.stdout_bytes_captured, 1_000_000);
    }
}
