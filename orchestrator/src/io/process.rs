//! Shell commands with a wall-clock limit and capped output capture.
//!
//! On unix every command gets its own process group. A timeout kills the
//! group, so grandchildren of `sh -c` cannot keep the pipes open. Pipe readers
//! are still joined with a grace period in case a descendant left the group.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::CommandReport;

/// Upper bound on waiting for pipe readers after the child has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 8192;

/// Bytes kept from one output stream, plus how many were dropped.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
    /// The reader did not finish within the grace period.
    pub abandoned: bool,
}

impl Captured {
    fn render(&self, stream: &str, buf: &mut String) {
        buf.push_str(&String::from_utf8_lossy(&self.bytes));
        if self.dropped > 0 {
            buf.push_str(&format!("\n[{stream} truncated {} bytes]\n", self.dropped));
        }
        if self.abandoned {
            buf.push_str(&format!("\n[{stream} still open after exit]\n"));
        }
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn combined(&self) -> String {
        let mut buf = String::new();
        self.stdout.render("stdout", &mut buf);
        buf.push('\n');
        self.stderr.render("stderr", &mut buf);
        buf
    }

    pub fn into_report(self) -> CommandReport {
        CommandReport {
            exit_code: if self.timed_out { None } else { self.status.code() },
            output: self.combined(),
            timed_out: self.timed_out,
        }
    }
}

/// `sh -c <command>` (or `cmd /C` on windows) in `cwd`.
pub fn shell_command(command: &str, cwd: &Path) -> Command {
    let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
    let mut cmd = Command::new(shell);
    cmd.arg(flag).arg(command).current_dir(cwd);
    cmd
}

/// Run `command` through the shell; spawn and wait errors become a report
/// with no exit code and the error text as output.
pub fn run_shell(command: &str, cwd: &Path, timeout: Duration, limit: usize) -> CommandReport {
    run_command_with_timeout(shell_command(command, cwd), timeout, limit)
        .map(CommandOutput::into_report)
        .unwrap_or_else(|err| CommandReport {
            exit_code: None,
            output: format!("{err:#}"),
            timed_out: false,
        })
}

/// Run `cmd` with stdin closed, killing its process group after `timeout`.
///
/// Both pipes are drained on threads while the child runs. At most `limit`
/// bytes per stream are kept.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, limit))]
pub fn run_command_with_timeout(mut cmd: Command, timeout: Duration, limit: usize) -> Result<CommandOutput> {
    isolate_group(&mut cmd);
    let started = Instant::now();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawn command")?;

    let stdout = drain(child.stdout.take().ok_or_else(|| anyhow!("stdout not piped"))?, limit);
    let stderr = drain(child.stderr.take().ok_or_else(|| anyhow!("stderr not piped"))?, limit);

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(pid = child.id(), "command timed out; killing its process group");
            terminate(&mut child)?;
            (child.wait().context("reap killed command")?, true)
        }
    };

    let deadline = Instant::now() + DRAIN_GRACE;
    let stdout = collect(stdout, deadline)?;
    let stderr = collect(stderr, deadline)?;
    if stdout.dropped > 0 || stderr.dropped > 0 || stdout.abandoned || stderr.abandoned {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            abandoned = stdout.abandoned || stderr.abandoned,
            "command output incomplete"
        );
    }

    let elapsed = started.elapsed();
    debug!(exit_code = ?status.code(), timed_out, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
        elapsed,
    })
}

/// The program itself could not be found, as opposed to failing once started.
pub fn is_program_missing(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
    })
}

#[cfg(unix)]
fn isolate_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn terminate(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    if let Err(errno) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        debug!(%errno, "killpg failed; killing the direct child only");
        child.kill().context("kill command")?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

type Drained = Result<(Vec<u8>, usize)>;

fn drain<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<Drained> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // receiver gone means the caller gave up on this stream
        let _ = tx.send(read_capped(reader, limit));
    });
    rx
}

fn collect(rx: Receiver<Drained>, deadline: Instant) -> Result<Captured> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(drained) => {
            let (bytes, dropped) = drained?;
            Ok(Captured {
                bytes,
                dropped,
                abandoned: false,
            })
        }
        Err(RecvTimeoutError::Timeout) => Ok(Captured {
            abandoned: true,
            ..Captured::default()
        }),
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_capped<R: Read>(mut reader: R, limit: usize) -> Drained {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok((kept, dropped));
        }
        let keep = n.min(limit.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_exit_code_and_both_streams() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = run_shell(
            "echo out; echo err 1>&2; exit 3",
            temp.path(),
            Duration::from_secs(10),
            1024,
        );
        assert_eq!(report.exit_code, Some(3));
        assert!(report.output.contains("out"));
        assert!(report.output.contains("err"));
        assert!(!report.timed_out);
    }

    #[test]
    fn timeout_reports_no_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = run_shell(
            "echo started; sleep 2",
            temp.path(),
            Duration::from_millis(200),
            1024,
        );
        assert!(report.timed_out);
        assert_eq!(report.exit_code, None);
    }

    #[test]
    fn timeout_returns_promptly_when_grandchild_holds_pipes() {
        let temp = tempfile::tempdir().expect("tempdir");
        // `sleep` runs as a child of `sh` and inherits both pipes
        let output = run_command_with_timeout(
            shell_command("echo started; sleep 6; echo finished", temp.path()),
            Duration::from_millis(300),
            1024,
        )
        .expect("run");

        assert!(output.timed_out);
        assert!(
            output.elapsed < Duration::from_secs(3),
            "took {:?}",
            output.elapsed
        );
        assert!(!output.combined().contains("finished"));
    }

    #[test]
    fn background_descendant_does_not_stall_a_finished_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let started = Instant::now();
        let output = run_command_with_timeout(
            shell_command("sleep 6 & echo done", temp.path()),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");

        assert!(!output.timed_out);
        assert!(output.status.success());
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(output.stdout.abandoned || String::from_utf8_lossy(&output.stdout.bytes).contains("done"));
    }

    #[test]
    fn missing_program_is_distinguished_from_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cmd = Command::new("orchestrator-no-such-program");
        cmd.current_dir(temp.path());
        let err = run_command_with_timeout(cmd, Duration::from_secs(5), 64).expect_err("spawn fails");
        assert!(is_program_missing(&err));

        let failed = run_command_with_timeout(
            shell_command("exit 1", temp.path()),
            Duration::from_secs(5),
            64,
        );
        assert!(failed.is_ok());
    }

    #[test]
    fn output_is_truncated_at_limit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let output = run_command_with_timeout(
            shell_command("printf 'abcdefghij'", temp.path()),
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout.bytes, b"abcd");
        assert_eq!(output.stdout.dropped, 6);
    }
}
