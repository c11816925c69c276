/// Command Queue & Run-State Coordinator (C4).
///
/// Classifies submitted commands, tracks target run-state (per-thread in
/// non-stop mode, process-global in all-stop), and implements the
/// pause-if-needed policy of §4.4: when a `needs-stopped` command arrives
/// while the target is running, interrupt, wait for the resulting stop
/// (flagged transient so it is never forwarded to the front-end as a
/// `stopped` event), run the command, then resume.
///
/// This module owns *policy*; `router::Router` owns the actual stdin
/// writes. The coordinator's run-state is updated by the session loop as
/// `*running`/`*stopped` async records arrive (see `session.rs`), not by
/// the queue itself — the queue only reacts to those transitions.
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::Notify;

use crate::router::Router;

pub type ThreadId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeClass {
    Resume,
    NonResume,
}

/// The queue's internal state machine (§9 Design Notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    CommandInFlight,
    PausingForInspection,
    InspectingWhilePaused,
    ResumingAfterInspection,
    TargetRunning,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("a resume command is already in flight")]
    AlreadyRunning,
    #[error(transparent)]
    Router(#[from] crate::router::RouterError),
}

/// Fixed set of resume verbs, MI and CLI forms, per §4.4.
const RESUME_VERBS: &[&str] = &[
    "-exec-continue",
    "-exec-step",
    "-exec-next",
    "-exec-finish",
    "-exec-run",
    "-exec-return",
    "-exec-jump",
    "-exec-until",
    "continue",
    "c",
    "step",
    "s",
    "stepi",
    "si",
    "next",
    "n",
    "nexti",
    "ni",
    "finish",
    "fin",
    "run",
    "r",
    "start",
    "starti",
    "advance",
    "until",
    "u",
    "jump",
    "j",
    "fg",
];

/// Classifies MI/CLI command text as resume or non-resume, per §4.4. Only
/// the leading verb matters; arguments are ignored.
pub fn classify(text: &str) -> ResumeClass {
    let verb = text.trim().split_whitespace().next().unwrap_or("");
    // CLI pass-through arrives prefixed with `>`; strip it before matching.
    let verb = verb.trim_start_matches('>');
    if RESUME_VERBS.contains(&verb) {
        ResumeClass::Resume
    } else {
        ResumeClass::NonResume
    }
}

/// One MI command awaiting scheduling, owned by the queue until resolved.
#[derive(Debug, Clone)]
pub struct Command {
    pub text: String,
    pub resume_class: ResumeClass,
    pub needs_stopped: bool,
    pub thread: Option<ThreadId>,
}

impl Command {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let resume_class = classify(&text);
        Command {
            text,
            resume_class,
            needs_stopped: false,
            thread: None,
        }
    }

    pub fn needing_stopped(mut self) -> Self {
        self.needs_stopped = true;
        self
    }

    pub fn for_thread(mut self, thread: ThreadId) -> Self {
        self.thread = Some(thread);
        self
    }
}

/// All-stop sentinel key used in the per-thread maps when non-stop mode is
/// off, so the two code paths can share the same bookkeeping structures.
const ALL_STOP_KEY: ThreadId = 0;

pub struct RunStateCoordinator {
    gdb_async: bool,
    non_stop: bool,
    states: Mutex<HashMap<ThreadId, RunState>>,
    resuming: Mutex<HashSet<ThreadId>>,
    queue_state: Mutex<QueueState>,
    stop_notify: Notify,
    /// Set just before issuing an interrupt for pause-if-needed; consumed
    /// by the next stop observed for that thread, which is then reported
    /// back to the caller as transient instead of forwarded as `stopped`.
    expecting_transient: Mutex<HashSet<ThreadId>>,
}

impl RunStateCoordinator {
    pub fn new(gdb_async: bool, non_stop: bool) -> Self {
        let mut states = HashMap::new();
        states.insert(ALL_STOP_KEY, RunState::Stopped);
        RunStateCoordinator {
            gdb_async,
            non_stop,
            states: Mutex::new(states),
            resuming: Mutex::new(HashSet::new()),
            queue_state: Mutex::new(QueueState::Idle),
            stop_notify: Notify::new(),
            expecting_transient: Mutex::new(HashSet::new()),
        }
    }

    fn key(&self, thread: Option<ThreadId>) -> ThreadId {
        if self.non_stop {
            thread.unwrap_or(ALL_STOP_KEY)
        } else {
            ALL_STOP_KEY
        }
    }

    pub fn is_running(&self, thread: Option<ThreadId>) -> bool {
        let key = self.key(thread);
        matches!(
            self.states.lock().unwrap().get(&key),
            Some(RunState::Running)
        )
    }

    pub fn queue_state(&self) -> QueueState {
        *self.queue_state.lock().unwrap()
    }

    fn set_queue_state(&self, state: QueueState) {
        *self.queue_state.lock().unwrap() = state;
    }

    /// Called by the session loop on a `*running` async record. Returns
    /// whether this transition should be surfaced to the front-end as a
    /// `continued` event (always true — running transitions are never
    /// transient in this design, only stops are).
    pub fn on_running(&self, thread: Option<ThreadId>) {
        let key = self.key(thread);
        self.states.lock().unwrap().insert(key, RunState::Running);
        self.resuming.lock().unwrap().remove(&key);
        self.set_queue_state(QueueState::TargetRunning);
    }

    /// Called by the session loop on a `*stopped` async record. Returns
    /// `true` if this stop was induced by pause-if-needed and must be
    /// suppressed (not forwarded to the front-end as `stopped`).
    pub fn on_stopped(&self, thread: Option<ThreadId>) -> bool {
        let key = self.key(thread);
        self.states.lock().unwrap().insert(key, RunState::Stopped);
        self.resuming.lock().unwrap().remove(&key);
        let transient = self.expecting_transient.lock().unwrap().remove(&key);
        self.set_queue_state(if transient {
            QueueState::ResumingAfterInspection
        } else {
            QueueState::Idle
        });
        self.stop_notify.notify_waiters();
        transient
    }

    /// All-stop: reject locally if a resume is already outstanding, per
    /// "a resume command is not queued behind a pending resume".
    /// Non-stop: resume of thread T never blocks commands to thread U.
    fn begin_resume(&self, thread: Option<ThreadId>) -> Result<(), QueueError> {
        let key = self.key(thread);
        let mut resuming = self.resuming.lock().unwrap();
        if resuming.contains(&key) {
            return Err(QueueError::AlreadyRunning);
        }
        resuming.insert(key);
        Ok(())
    }

    /// Executes one command against the queue's scheduling rules. Resume
    /// commands go straight to the router (subject to the in-flight gate);
    /// needs-stopped commands trigger pause-if-needed when the target (or
    /// thread) is currently running.
    pub async fn execute(
        &self,
        router: &Router,
        cmd: Command,
    ) -> Result<crate::types::MIResult, QueueError> {
        match cmd.resume_class {
            ResumeClass::Resume => {
                self.begin_resume(cmd.thread)?;
                self.set_queue_state(QueueState::CommandInFlight);
                let result = router.submit(&cmd.text).await;
                if result.is_err() {
                    // GDB rejected the resume outright; it never started
                    // running, so clear the in-flight marker immediately
                    // rather than waiting for a `*running` record that
                    // will never come.
                    self.resuming.lock().unwrap().remove(&self.key(cmd.thread));
                }
                Ok(result?)
            }
            ResumeClass::NonResume if cmd.needs_stopped && self.is_running(cmd.thread) => {
                self.pause_execute_resume(router, cmd).await
            }
            ResumeClass::NonResume => {
                self.set_queue_state(QueueState::CommandInFlight);
                let result = router.submit(&cmd.text).await?;
                self.set_queue_state(QueueState::Idle);
                Ok(result)
            }
        }
    }

    /// Implements §4.4 step 2–4 directly against the primary connection:
    /// interrupt, wait for the (transient) stop, run the command, resume.
    /// Auxiliary routing (step 1) is decided by the caller before this is
    /// reached — see `auxiliary.rs`.
    async fn pause_execute_resume(
        &self,
        router: &Router,
        cmd: Command,
    ) -> Result<crate::types::MIResult, QueueError> {
        let key = self.key(cmd.thread);
        self.set_queue_state(QueueState::PausingForInspection);
        self.expecting_transient.lock().unwrap().insert(key);

        let notified = self.stop_notify.notified();
        // `-exec-interrupt` is the MI-level pause request (§4.2 ambient
        // note): it stops the target without the adapter having to reach
        // for an OS signal on the common path.
        let interrupt_text = if self.non_stop {
            format!("-exec-interrupt --thread {}", key)
        } else {
            "-exec-interrupt".to_string()
        };
        router.submit(&interrupt_text).await?;
        notified.await;

        self.set_queue_state(QueueState::InspectingWhilePaused);
        let result = router.submit(&cmd.text).await;

        self.set_queue_state(QueueState::ResumingAfterInspection);
        let resume_text = if self.non_stop {
            format!("-exec-continue --thread {}", key)
        } else {
            "-exec-continue".to_string()
        };
        self.begin_resume(cmd.thread).ok();
        router.submit(&resume_text).await?;

        Ok(result?)
    }

    pub fn gdb_async(&self) -> bool {
        self.gdb_async
    }

    pub fn non_stop(&self) -> bool {
        self.non_stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_mi_and_cli_resume_verbs() {
        assert_eq!(classify("-exec-continue"), ResumeClass::Resume);
        assert_eq!(classify("-exec-step --thread 1"), ResumeClass::Resume);
        assert_eq!(classify("c"), ResumeClass::Resume);
        assert_eq!(classify("continue 2"), ResumeClass::Resume);
        assert_eq!(classify("-var-create - * x"), ResumeClass::NonResume);
        assert_eq!(classify("-stack-list-frames"), ResumeClass::NonResume);
    }

    #[test]
    fn all_stop_rejects_overlapping_resume() {
        let coord = RunStateCoordinator::new(true, false);
        assert!(coord.begin_resume(None).is_ok());
        assert!(matches!(
            coord.begin_resume(None),
            Err(QueueError::AlreadyRunning)
        ));
    }

    #[test]
    fn non_stop_allows_independent_threads() {
        let coord = RunStateCoordinator::new(true, true);
        assert!(coord.begin_resume(Some(1)).is_ok());
        assert!(coord.begin_resume(Some(2)).is_ok());
    }

    #[test]
    fn on_stopped_reports_transient_only_when_expected() {
        let coord = RunStateCoordinator::new(true, false);
        assert!(!coord.on_stopped(None));
        coord.expecting_transient.lock().unwrap().insert(ALL_STOP_KEY);
        assert!(coord.on_stopped(None));
    }

    #[test]
    fn running_state_tracks_per_thread_in_non_stop_mode() {
        let coord = RunStateCoordinator::new(true, true);
        coord.on_running(Some(1));
        assert!(coord.is_running(Some(1)));
        assert!(!coord.is_running(Some(2)));
    }
}
