use std::process::Stdio;
use std::time;

use tokio::process::Command;

/// Outcome of running a job's command through the shell.
#[derive(Debug)]
pub enum ExecOutcome {
    /// The child exited 0 before the deadline.
    Completed { stdout: String, stderr: String },
    /// The child exited with a non-zero status (None when killed by a signal).
    Failed {
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The deadline elapsed; the child was killed.
    TimedOut { after: time::Duration },
    /// The command could not be spawned or awaited.
    SpawnError(String),
}

/// Run `command` under `sh -c`, capturing stdout and stderr as text, with a
/// hard wall-clock deadline. The child is always reaped: on timeout the
/// dropped future kills it (`kill_on_drop`).
pub async fn run_command(command: &str, deadline: time::Duration) -> ExecOutcome {
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(err) => return ExecOutcome::SpawnError(err.to_string()),
    };

    match tokio::time::timeout(deadline, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if output.status.success() {
                ExecOutcome::Completed { stdout, stderr }
            } else {
                ExecOutcome::Failed {
                    status: output.status.code(),
                    stdout,
                    stderr,
                }
            }
        }
        Ok(Err(err)) => ExecOutcome::SpawnError(err.to_string()),
        Err(_) => ExecOutcome::TimedOut { after: deadline },
    }
}
