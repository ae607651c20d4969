// MOLT PROCESS CONTROL
// LAUNCH WITH OUTPUT REDIRECTION, SIGKILL TERMINATION, DEADLINE-BOUNDED
// WAITS. A HANDLE IS A CAPABILITY: TERMINATION CONSUMES IT, SO A DEAD
// HANDLE CANNOT BE REUSED.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::error::{BenchError, Result};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    // IMAGE REACHED ITS CURRENT VERSION BY IN-PLACE UPDATE
    LiveUpdated,
    FreshStart,
}

#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    pub version: usize,
    pub mode: LaunchMode,
    // KEPT FOR REAPING. THE ENGINE SIGNALS BY PID ONLY.
    child: Child,
}

impl ProcessHandle {
    // IN-PLACE UPGRADE: SAME PID, NEW VERSION
    pub fn promote(&mut self, version: usize) {
        self.version = version;
        self.mode = LaunchMode::LiveUpdated;
    }

    // TRUE WHILE THE CHILD HAS NOT EXITED. SIGNAL 0 CANNOT BE USED HERE:
    // AN UNREAPED CHILD IS A ZOMBIE AND STILL ACCEPTS SIGNALS. try_wait
    // CACHES THE EXIT STATUS, SO A LATER terminate STILL SEES IT.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

// APPEND-MODE SINK FOR REDIRECTED CHILD STDOUT
pub fn output_sink(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn ensure_executable(exe: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let meta = fs::metadata(exe).map_err(|e| BenchError::Launch {
        exe: exe.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
        return Err(BenchError::Launch {
            exe: exe.to_path_buf(),
            reason: "not an executable file".to_string(),
        });
    }
    Ok(())
}

// NON-BLOCKING LAUNCH: RETURNS AS SOON AS THE PROCESS IMAGE EXISTS, NOT
// WHEN IT FINISHES INITIALIZING. READINESS IS THE CALLER'S PROBLEM.
// THE CHILD GETS THE SINK AS STDOUT AND NOTHING ELSE.
pub fn launch(
    exe: &Path,
    args: &[String],
    sink: File,
    version: usize,
    mode: LaunchMode,
) -> Result<ProcessHandle> {
    ensure_executable(exe)?;
    let child = Command::new(exe)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(sink))
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| BenchError::Launch {
            exe: exe.to_path_buf(),
            reason: e.to_string(),
        })?;
    let pid = child.id();
    Ok(ProcessHandle {
        pid,
        version,
        mode,
        child,
    })
}

// SIGKILL BY PID, THEN REAP. AN ALREADY-EXITED TARGET IS SURFACED AS
// TerminationError, NOT SWALLOWED. THE CHILD IS REAPED ON EVERY PATH.
pub fn terminate(mut handle: ProcessHandle) -> Result<()> {
    let pid = handle.pid;
    match handle.child.try_wait() {
        // EXITED ON ITS OWN BEFORE WE GOT HERE. try_wait REAPED IT.
        Ok(Some(status)) => {
            return Err(BenchError::Termination {
                pid,
                reason: format!("already exited with {}", status),
            })
        }
        Ok(None) => {}
        Err(e) => {
            return Err(BenchError::Termination {
                pid,
                reason: e.to_string(),
            })
        }
    }
    let rc = unsafe { libc::kill(pid as i32, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        let _ = handle.child.wait();
        return Err(BenchError::Termination {
            pid,
            reason: err.to_string(),
        });
    }
    handle.child.wait().map_err(|e| BenchError::Termination {
        pid,
        reason: format!("reap failed: {}", e),
    })?;
    Ok(())
}

// SIGNAL 0 LIVENESS PROBE, USED FOR THE PID-IDENTITY POSTCONDITION
pub fn is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

// BLOCKING RUN UNDER A DEADLINE. THE CHILD IS KILLED AND REAPED IF THE
// DEADLINE PASSES; Timeout IS DISTINCT FROM THE OTHER FATAL KINDS.
pub fn run_to_completion(
    exe: &Path,
    args: &[String],
    cwd: Option<&Path>,
    sink: File,
    deadline: Duration,
    what: &str,
) -> Result<ExitStatus> {
    ensure_executable(exe)?;
    let mut cmd = Command::new(exe);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(sink))
        .stderr(Stdio::null());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let mut child = cmd.spawn().map_err(|e| BenchError::Launch {
        exe: exe.to_path_buf(),
        reason: e.to_string(),
    })?;
    wait_with_deadline(&mut child, deadline, what)
}

fn wait_with_deadline(child: &mut Child, deadline: Duration, what: &str) -> Result<ExitStatus> {
    let end = Instant::now() + deadline;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= end => break,
            Ok(None) => std::thread::sleep(EXIT_POLL_INTERVAL),
            Err(e) => return Err(BenchError::Io(e)),
        }
    }
    let _ = child.kill();
    let _ = child.wait();
    Err(BenchError::Timeout {
        what: what.to_string(),
        secs: deadline.as_secs(),
    })
}

// RESOLVED EXECUTABLE CHECK FOR PREFLIGHT (SHARED WITH cli/check)
pub fn is_executable(exe: &Path) -> bool {
    ensure_executable(exe).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn sink() -> File {
        tempfile::tempfile().unwrap()
    }

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{}", body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn launch_missing_executable_fails() {
        let err = launch(
            Path::new("/no/such/binary"),
            &[],
            sink(),
            0,
            LaunchMode::FreshStart,
        )
        .unwrap_err();
        assert!(matches!(err, BenchError::Launch { .. }));
    }

    #[test]
    fn launch_non_executable_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        fs::write(&path, "not a program").unwrap();
        let err = launch(&path, &[], sink(), 0, LaunchMode::FreshStart).unwrap_err();
        assert!(matches!(err, BenchError::Launch { .. }));
    }

    #[test]
    fn launch_and_terminate_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "hold.sh", "sleep 30");
        let handle = launch(&exe, &[], sink(), 0, LaunchMode::FreshStart).unwrap();
        let pid = handle.pid;
        assert!(is_alive(pid));
        terminate(handle).unwrap();
    }

    #[test]
    fn terminate_exited_process_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "quick.sh", "exit 0");
        let handle = launch(&exe, &[], sink(), 0, LaunchMode::FreshStart).unwrap();
        // LET IT FINISH
        std::thread::sleep(Duration::from_millis(200));
        let err = terminate(handle).unwrap_err();
        assert!(matches!(err, BenchError::Termination { .. }));
    }

    #[test]
    fn run_to_completion_reports_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "rc3.sh", "exit 3");
        let status = run_to_completion(&exe, &[], None, sink(), Duration::from_secs(5), "rc3")
            .unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn run_to_completion_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "hang.sh", "sleep 30");
        let err = run_to_completion(
            &exe,
            &[],
            None,
            sink(),
            Duration::from_millis(100),
            "hang",
        )
        .unwrap_err();
        assert!(matches!(err, BenchError::Timeout { .. }));
    }

    #[test]
    fn run_to_completion_honors_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "mark.sh", "touch marker");
        let status = run_to_completion(
            &exe,
            &[],
            Some(dir.path()),
            sink(),
            Duration::from_secs(5),
            "mark",
        )
        .unwrap();
        assert!(status.success());
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn promote_keeps_pid() {
        let dir = tempfile::tempdir().unwrap();
        let exe = script(dir.path(), "hold.sh", "sleep 30");
        let mut handle = launch(&exe, &[], sink(), 0, LaunchMode::FreshStart).unwrap();
        let pid = handle.pid;
        handle.promote(1);
        assert_eq!(handle.pid, pid);
        assert_eq!(handle.version, 1);
        assert_eq!(handle.mode, LaunchMode::LiveUpdated);
        terminate(handle).unwrap();
    }
}
