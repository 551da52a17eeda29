use std::fs;
use std::io::{self, Write};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{info, warn};

use queue_common::DataDir;

use crate::error::WorkerError;

/// Spawn `count` worker processes running `<current_exe> worker run`, each
/// in its own process group so terminal signals aimed at the CLI do not
/// reach them. Returns the new pids, which are also appended to the
/// registry. The supervisor does not wait on the children; they outlive
/// this invocation.
pub fn start_workers(data_dir: &DataDir, count: u32) -> Result<Vec<u32>, WorkerError> {
    let exe = std::env::current_exe().map_err(WorkerError::Spawn)?;
    let registry = data_dir.pid_path();

    let mut pids = read_registry(&registry)?;
    let mut started = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let child = Command::new(&exe)
            .args(["worker", "run"])
            .process_group(0)
            .spawn()
            .map_err(WorkerError::Spawn)?;
        let pid = child.id();
        info!(pid, "started worker");
        pids.push(pid);
        started.push(pid);
    }

    write_registry(&registry, &pids)?;

    Ok(started)
}

/// Send SIGTERM to every registered worker and remove the registry.
/// Best-effort: already-exited workers are tolerated, and nothing blocks on
/// drain. Returns the number of workers signalled.
pub fn stop_workers(data_dir: &DataDir) -> Result<usize, WorkerError> {
    let registry = data_dir.pid_path();
    if !registry.exists() {
        info!("no workers seem to be running (pid registry not found)");
        return Ok(0);
    }

    let pids = read_registry(&registry)?;
    let mut signalled = 0;
    for pid in &pids {
        match kill(Pid::from_raw(*pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                info!(pid, "sent SIGTERM");
                signalled += 1;
            }
            Err(nix::errno::Errno::ESRCH) => info!(pid, "worker already exited"),
            Err(err) => warn!(pid, "could not signal worker: {err}"),
        }
    }

    match fs::remove_file(&registry) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    Ok(signalled)
}

/// Count live workers by probing each registered pid with the null signal,
/// pruning dead entries from the registry as a side effect.
pub fn active_count(data_dir: &DataDir) -> Result<usize, WorkerError> {
    let registry = data_dir.pid_path();
    if !registry.exists() {
        return Ok(0);
    }

    let pids = read_registry(&registry)?;
    let live: Vec<u32> = pids
        .into_iter()
        .filter(|pid| kill(Pid::from_raw(*pid as i32), None).is_ok())
        .collect();

    write_registry(&registry, &live)?;

    Ok(live.len())
}

fn read_registry(path: &Path) -> Result<Vec<u32>, WorkerError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    Ok(raw
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect())
}

/// Rewrite via a temp file in the same directory plus rename, so concurrent
/// readers never observe a torn registry.
fn write_registry(path: &Path, pids: &[u32]) -> Result<(), WorkerError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    for pid in pids {
        writeln!(tmp, "{pid}")?;
    }
    tmp.persist(path).map_err(|err| WorkerError::Io(err.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_dir() -> (tempfile::TempDir, DataDir) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let data_dir = DataDir::at(dir.path()).expect("failed to init data dir");
        (dir, data_dir)
    }

    /// Spawn and reap a short-lived child to obtain a pid that is certainly
    /// no longer running.
    fn dead_pid() -> u32 {
        let mut child = Command::new("true").spawn().expect("spawn should succeed");
        let pid = child.id();
        child.wait().expect("wait should succeed");
        pid
    }

    #[test]
    fn test_registry_round_trip() {
        let (_guard, data_dir) = data_dir();
        let path = data_dir.pid_path();

        write_registry(&path, &[101, 202, 303]).expect("write should succeed");

        assert_eq!(
            read_registry(&path).expect("read should succeed"),
            vec![101, 202, 303]
        );
    }

    #[test]
    fn test_registry_tolerates_junk_lines() {
        let (_guard, data_dir) = data_dir();
        let path = data_dir.pid_path();
        fs::write(&path, "101\nnot-a-pid\n\n202\n").expect("write should succeed");

        assert_eq!(
            read_registry(&path).expect("read should succeed"),
            vec![101, 202]
        );
    }

    #[test]
    fn test_missing_registry_reads_empty() {
        let (_guard, data_dir) = data_dir();

        assert!(read_registry(&data_dir.pid_path())
            .expect("read should succeed")
            .is_empty());
    }

    #[test]
    fn test_active_count_prunes_dead_pids() {
        let (_guard, data_dir) = data_dir();
        let me = std::process::id();
        let gone = dead_pid();
        write_registry(&data_dir.pid_path(), &[me, gone]).expect("write should succeed");

        let live = active_count(&data_dir).expect("count should succeed");

        assert_eq!(live, 1);
        assert_eq!(
            read_registry(&data_dir.pid_path()).expect("read should succeed"),
            vec![me]
        );
    }

    #[test]
    fn test_active_count_without_registry_is_zero() {
        let (_guard, data_dir) = data_dir();

        assert_eq!(active_count(&data_dir).expect("count should succeed"), 0);
        assert!(!data_dir.pid_path().exists());
    }

    #[test]
    fn test_stop_without_registry_reports_no_workers() {
        let (_guard, data_dir) = data_dir();

        assert_eq!(stop_workers(&data_dir).expect("stop should succeed"), 0);
    }

    #[test]
    fn test_stop_tolerates_exited_workers_and_removes_the_registry() {
        let (_guard, data_dir) = data_dir();
        write_registry(&data_dir.pid_path(), &[dead_pid()]).expect("write should succeed");

        let signalled = stop_workers(&data_dir).expect("stop should succeed");

        assert_eq!(signalled, 0);
        assert!(!data_dir.pid_path().exists());
    }
}
