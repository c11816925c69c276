/// Process Supervisor (C2).
///
/// Spawns the GDB child with the MI interpreter enabled and exposes its
/// stdio handles to the router (C3), which owns the actual MI read loop —
/// see `router.rs`. What lives here is spawn/lifecycle/signal concerns:
/// starting the child, forwarding its stderr as `output` events, sending an
/// OS-level interrupt, killing it, and waiting for exit so a supervisor can
/// cross-terminate the target server (§4.2).
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};

use crate::types::{ChildKind, GdbEvent, OutputCategory};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to start process '{0}': {1}")]
    StartError(String, std::io::Error),
    #[error("process terminated unexpectedly")]
    Terminated,
    #[error("signal error: {0}")]
    SignalError(String),
    #[error("could not acquire stdio handle for '{0}'")]
    MissingStdio(&'static str),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// A running child process (GDB or the target server) with its stdio
/// handles available to be taken exactly once. The `Child` itself lives
/// behind a shared lock so `kill`/`wait` and a background exit watcher
/// (`spawn_exit_watcher`) can both reach it without Session having to give
/// up ownership to run one.
pub struct SupervisedChild {
    child: Arc<Mutex<Child>>,
    id: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl SupervisedChild {
    pub async fn spawn(program: &str, args: &[String]) -> Result<Self> {
        log::debug!("spawning '{program}' {args:?}");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| ProcessError::StartError(program.to_string(), e))?;

        let id = child.id();
        log::debug!("'{program}' started with pid {id:?}");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        Ok(SupervisedChild {
            child: Arc::new(Mutex::new(child)),
            id,
            stdin,
            stdout,
            stderr,
        })
    }

    /// Spawns GDB specifically, with the MI3 interpreter flag prepended.
    pub async fn spawn_gdb(gdb_path: &str, extra_args: &[String]) -> Result<Self> {
        let mut args = vec!["--interpreter=mi3".to_string()];
        args.extend(extra_args.iter().cloned());
        Self::spawn(gdb_path, &args).await
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Issues a pause request on a running target via an OS-level
    /// interrupt signal. Normal pause-if-needed (§4.4) goes through
    /// `-exec-interrupt` on the MI channel instead; this is the fallback
    /// used when GDB itself must be force-stopped (session teardown of a
    /// wedged process).
    pub fn send_interrupt(&self) -> Result<()> {
        let pid = self.id().ok_or(ProcessError::Terminated)?;
        send_interrupt_signal(pid)
    }

    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.lock().await.kill().await
    }

    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.lock().await.wait().await
    }

    /// Spawns a background task that polls for this child's exit and
    /// reports it as a `ChildExited` event, so the session loop can run
    /// §4.2's cross-termination without an explicit wait call. Polls
    /// `try_wait` rather than blocking on `wait` so the lock is only ever
    /// held briefly — `kill`/`wait` called from elsewhere (session
    /// teardown) are never stuck behind this task holding it for the
    /// process's entire lifetime.
    pub fn spawn_exit_watcher(&self, which: ChildKind, event_tx: mpsc::UnboundedSender<GdbEvent>) {
        let child = self.child.clone();
        tokio::spawn(async move {
            let code = loop {
                {
                    let mut guard = child.lock().await;
                    if let Ok(Some(status)) = guard.try_wait() {
                        break status.code();
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            };
            let _ = event_tx.send(GdbEvent::ChildExited { which, code });
        });
    }
}

/// Forwards every line on `stderr` as an `output`-shaped event tagged with
/// `category`, matching §4.2's "stderr is forwarded as `output` events".
pub fn spawn_stderr_forwarder(
    stderr: ChildStderr,
    category: OutputCategory,
    event_tx: mpsc::UnboundedSender<GdbEvent>,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        let _ = event_tx.send(GdbEvent::ProcessOutput {
                            category,
                            text: trimmed.to_string(),
                        });
                    }
                }
                Err(_) => break,
            }
        }
    });
}

#[cfg(windows)]
fn send_interrupt_signal(pid: u32) -> Result<()> {
    unsafe {
        use winapi::shared::minwindef::TRUE;
        use winapi::um::wincon::{GenerateConsoleCtrlEvent, CTRL_C_EVENT};

        if GenerateConsoleCtrlEvent(CTRL_C_EVENT, pid) == TRUE as u32 {
            Ok(())
        } else {
            Err(ProcessError::SignalError(
                "GenerateConsoleCtrlEvent failed".into(),
            ))
        }
    }
}

#[cfg(unix)]
fn send_interrupt_signal(pid: u32) -> Result<()> {
    let result = unsafe { libc::kill(pid as i32, libc::SIGINT) };
    if result == 0 {
        Ok(())
    } else {
        Err(ProcessError::SignalError("SIGINT delivery failed".into()))
    }
}

#[cfg(not(any(windows, unix)))]
fn send_interrupt_signal(_pid: u32) -> Result<()> {
    Err(ProcessError::SignalError(
        "interrupt not supported on this platform".into(),
    ))
}

/// Installs a platform handler so that signalling the GDB child (Windows:
/// `GenerateConsoleCtrlEvent`, which targets the whole console process
/// group) does not also terminate this adapter process.
#[cfg(windows)]
pub fn install_signal_protection() {
    unsafe {
        use winapi::shared::minwindef::{BOOL, DWORD, TRUE};
        use winapi::um::consoleapi::SetConsoleCtrlHandler;

        unsafe extern "system" fn ctrl_handler(ctrl_type: DWORD) -> BOOL {
            use winapi::um::wincon::{CTRL_BREAK_EVENT, CTRL_C_EVENT};
            match ctrl_type {
                CTRL_C_EVENT | CTRL_BREAK_EVENT => TRUE,
                _ => 0,
            }
        }

        if SetConsoleCtrlHandler(Some(ctrl_handler), TRUE) == 0 {
            log::warn!("failed to install console ctrl handler");
        }
    }
}

#[cfg(not(windows))]
pub fn install_signal_protection() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_reports_error_for_missing_executable() {
        let result = SupervisedChild::spawn_gdb("definitely-not-a-real-gdb-binary", &[]).await;
        assert!(result.is_err());
    }
}
