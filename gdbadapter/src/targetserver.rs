/// Target server lifecycle (§4.2 Process Supervisor, remote-target half).
///
/// The target server is a separate executable (e.g. `gdbserver`) launched
/// with user-provided argv. Readiness is detected by scanning its combined
/// stdout/stderr against a regular expression that captures the listening
/// port, since remote targets frequently bind an ephemeral port (`:0`) and
/// announce the real one only after binding.
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::process::{ProcessError, SupervisedChild};
use crate::types::{ChildKind, GdbEvent};

#[derive(Error, Debug)]
pub enum TargetServerError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("target server exited before announcing readiness, stderr/stdout so far: {0}")]
    ExitedBeforeReady(String),
    #[error("readiness regex is invalid: {0}")]
    BadRegex(#[from] regex::Error),
}

pub const DEFAULT_PORT_REGEXP: &str = "Listening on port ([0-9]+)";

/// Builds the default argv for a target server launch when the caller
/// hasn't overridden it: `["--once", ":0", <program>]` (§6).
pub fn default_argv(program: &str) -> Vec<String> {
    vec!["--once".to_string(), ":0".to_string(), program.to_string()]
}

pub struct TargetServer {
    child: SupervisedChild,
    pub port: Option<u16>,
}

impl TargetServer {
    /// Spawns the server and waits for either the readiness regex to match
    /// on its combined output or `startup_timeout` to elapse — whichever
    /// comes first the server is considered ready (a server that never
    /// prints the marker but also never exits is assumed to already be
    /// listening once the timeout passes, since some servers are silent).
    pub async fn spawn(
        server_path: &str,
        args: &[String],
        port_regexp: &str,
        startup_timeout: Duration,
        post_match_delay: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<String>), TargetServerError> {
        let regex = Regex::new(port_regexp)?;
        let mut child = SupervisedChild::spawn(server_path, args).await?;

        let stdout = child
            .take_stdout()
            .ok_or(ProcessError::MissingStdio("stdout"))?;
        let stderr = child
            .take_stderr()
            .ok_or(ProcessError::MissingStdio("stderr"))?;

        let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
        let (ready_tx, ready_rx) = oneshot::channel::<Option<u16>>();

        spawn_readiness_scanner(stdout, regex.clone(), line_tx.clone(), ready_tx);
        spawn_passthrough_reader(stderr, line_tx);

        let port = match timeout(startup_timeout, ready_rx).await {
            Ok(Ok(port)) => port,
            // Scanner task dropped the sender without matching, or the
            // startup timeout elapsed first: treat the server as ready
            // anyway per the "silent server" allowance.
            Ok(Err(_)) | Err(_) => None,
        };

        if !post_match_delay.is_zero() {
            tokio::time::sleep(post_match_delay).await;
        }

        Ok((TargetServer { child, port }, line_rx))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    pub fn spawn_exit_watcher(&self, event_tx: mpsc::UnboundedSender<GdbEvent>) {
        self.child.spawn_exit_watcher(ChildKind::TargetServer, event_tx);
    }
}

fn spawn_readiness_scanner<R>(
    stream: R,
    regex: Regex,
    line_tx: mpsc::UnboundedSender<String>,
    ready_tx: oneshot::Sender<Option<u16>>,
) where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let mut ready_tx = Some(ready_tx);
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim().to_string();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Some(tx) = ready_tx.take() {
                        if let Some(captures) = regex.captures(&trimmed) {
                            let port = captures.get(1).and_then(|m| m.as_str().parse().ok());
                            let _ = tx.send(port);
                        } else {
                            ready_tx = Some(tx);
                        }
                    }
                    let _ = line_tx.send(trimmed);
                }
                Err(_) => break,
            }
        }
    });
}

fn spawn_passthrough_reader<R>(stream: R, line_tx: mpsc::UnboundedSender<String>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        let _ = line_tx.send(trimmed.to_string());
                    }
                }
                Err(_) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_argv_matches_spec() {
        assert_eq!(
            default_argv("/bin/firmware"),
            vec!["--once", ":0", "/bin/firmware"]
        );
    }

    #[test]
    fn default_regexp_captures_port() {
        let regex = Regex::new(DEFAULT_PORT_REGEXP).unwrap();
        let captures = regex.captures("Listening on port 51000").unwrap();
        assert_eq!(&captures[1], "51000");
    }

    #[tokio::test]
    async fn spawn_reports_error_for_missing_executable() {
        let result = TargetServer::spawn(
            "definitely-not-a-real-server-binary",
            &[],
            DEFAULT_PORT_REGEXP,
            Duration::from_millis(50),
            Duration::ZERO,
        )
        .await;
        assert!(result.is_err());
    }
}
