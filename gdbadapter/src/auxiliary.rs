/// Auxiliary Connection (C7).
///
/// A second GDB instance attached to the same remote target, used to
/// service read-only inspection commands while the primary target is
/// running, so the translator doesn't have to pause-then-resume the
/// primary connection for every `evaluate` the user types while the
/// firmware is executing (§4.7). Only valid in remote + async + all-stop
/// configurations — non-stop sessions already get per-thread independence
/// from the primary connection and don't need a second one.
use thiserror::Error;

use crate::error::sentinel;
use crate::process::{ProcessError, SupervisedChild};
use crate::router::{Router, RouterError};
use crate::types::{GdbEvent, MIResult, OutputCategory};

#[derive(Error, Debug)]
pub enum AuxiliaryError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error("{0}")]
    Config(String),
}

/// Commands serviceable on the auxiliary connection (§4.7's routing rule).
/// The translator tags the commands it issues for these operations so the
/// session loop can decide whether to route them here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxiliaryEligible {
    Evaluate,
    VarobjOp,
    MemoryReadWrite,
}

pub struct AuxiliaryConnection {
    child: SupervisedChild,
    router: Router,
    healthy: bool,
}

impl AuxiliaryConnection {
    /// Validates the launch config combination this requires before
    /// spawning anything, per §7's ConfigError sentinels.
    pub fn validate_config(gdb_async: bool, non_stop: bool) -> Result<(), String> {
        if non_stop {
            return Err(sentinel::AUXILIARY_FORBIDS_NON_STOP.to_string());
        }
        if !gdb_async {
            return Err(sentinel::AUXILIARY_REQUIRES_ASYNC.to_string());
        }
        Ok(())
    }

    /// Spawns the second GDB instance and replays enough of the connection
    /// sequence to reach the same target (`target-select`/`target-attach`),
    /// but never touches breakpoints or execution state — this connection
    /// only ever reads.
    pub async fn connect(
        gdb_path: &str,
        extra_args: &[String],
        event_category: OutputCategory,
        event_tx: tokio::sync::mpsc::UnboundedSender<GdbEvent>,
        connect_commands: &[String],
    ) -> Result<Self, AuxiliaryError> {
        let mut child = SupervisedChild::spawn_gdb(gdb_path, extra_args).await?;
        let stdin = child
            .take_stdin()
            .ok_or(ProcessError::MissingStdio("stdin"))?;
        let stdout = child
            .take_stdout()
            .ok_or(ProcessError::MissingStdio("stdout"))?;
        let stderr = child
            .take_stderr()
            .ok_or(ProcessError::MissingStdio("stderr"))?;

        let router = Router::attach(stdin, stdout, stderr, event_category, event_tx);

        for cmd in connect_commands {
            router.submit(cmd).await?;
        }

        Ok(AuxiliaryConnection {
            child,
            router,
            healthy: true,
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy && self.router.is_alive()
    }

    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    pub async fn submit(&self, text: &str) -> Result<MIResult, AuxiliaryError> {
        Ok(self.router.submit(text).await?)
    }

    /// Tears down this connection without affecting the primary one.
    pub async fn shutdown(&mut self) {
        let _ = self.child.kill().await;
    }
}

/// §4.7's routing decision: route on the auxiliary only when all four
/// conditions hold. `target_running` and `auxiliary` are supplied by the
/// caller (session/queue) since this function must not reach back into
/// global state — it's a pure policy check.
pub fn should_route_to_auxiliary(
    eligible: Option<AuxiliaryEligible>,
    target_running: bool,
    auxiliary: Option<&AuxiliaryConnection>,
) -> bool {
    eligible.is_some() && target_running && auxiliary.is_some_and(|aux| aux.is_healthy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_stop_configs_are_rejected() {
        assert!(AuxiliaryConnection::validate_config(true, true).is_err());
    }

    #[test]
    fn sync_configs_are_rejected() {
        assert!(AuxiliaryConnection::validate_config(false, false).is_err());
    }

    #[test]
    fn async_all_stop_is_accepted() {
        assert!(AuxiliaryConnection::validate_config(true, false).is_ok());
    }

    #[test]
    fn routing_requires_target_running_and_healthy_auxiliary() {
        assert!(!should_route_to_auxiliary(
            Some(AuxiliaryEligible::Evaluate),
            false,
            None
        ));
        assert!(!should_route_to_auxiliary(None, true, None));
    }
}
