/// GDB/MI debug adapter core.
///
/// Wires the seven components together: C1 (`parser`) produces typed MI
/// records; C2 (`process`/`targetserver`) supervises the child processes;
/// C3 (`router`) multiplexes stdin/stdout over correlation tokens; C4
/// (`queue`) enforces run-state scheduling; C5 (`session`) holds state
/// that outlives one request; C6 (`translator`) turns front-end requests
/// into MI sequences; C7 (`auxiliary`) is the optional second connection.
/// `protocol` is the upstream wire framing, `config` the launch/attach
/// arguments, `error` the crate-wide error type.
pub mod auxiliary;
pub mod config;
pub mod error;
pub mod parser;
pub mod protocol;
pub mod queue;
pub mod router;
pub mod process;
pub mod session;
pub mod targetserver;
pub mod translator;
pub mod types;

use std::sync::Arc;

use tokio::sync::mpsc;

use auxiliary::AuxiliaryConnection;
use config::LaunchConfig;
use error::{AdapterError, Result};
use process::{ProcessError, SupervisedChild};
use queue::RunStateCoordinator;
use router::Router;
use session::DebugState;
use targetserver::TargetServer;
use translator::Translator;
use types::{ChildKind, GdbEvent, OutputCategory};

/// One debug session: everything spawned and wired up for a single
/// `launch`/`attach` request until `disconnect` or an unexpected exit.
pub struct Session {
    gdb: SupervisedChild,
    target_server: Option<TargetServer>,
    auxiliary: Option<AuxiliaryConnection>,
    pub coordinator: Arc<RunStateCoordinator>,
    pub translator: Translator,
    pub events: mpsc::UnboundedReceiver<GdbEvent>,
}

impl Session {
    /// §4.5 Initialize/Launch/Attach steps 1-6, minus the protocol
    /// `initialized`/`configurationDone` handshake (that's `main.rs`'s
    /// job, since it owns the framed connection to the front-end).
    pub async fn launch(config: LaunchConfig) -> Result<Self> {
        config
            .validate()
            .map_err(AdapterError::Config)?;

        process::install_signal_protection();

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let target_server = if let Some(server_path) = config.target.server.clone() {
            let argv = config
                .target
                .server_parameters
                .clone()
                .unwrap_or_else(|| {
                    targetserver::default_argv(config.program.as_deref().unwrap_or(""))
                });
            let startup_delay = config
                .target
                .server_startup_delay
                .map(std::time::Duration::from_millis)
                .unwrap_or(std::time::Duration::from_millis(0));

            let (server, mut lines) = TargetServer::spawn(
                &server_path,
                &argv,
                &config.target.server_port_regexp,
                std::time::Duration::from_secs(10),
                startup_delay,
            )
            .await
            .map_err(|e| AdapterError::Spawn(format!("target server: {e}")))?;

            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                while let Some(line) = lines.recv().await {
                    let _ = event_tx.send(GdbEvent::ProcessOutput {
                        category: OutputCategory::Server,
                        text: line,
                    });
                }
            });

            server.spawn_exit_watcher(event_tx.clone());
            Some(server)
        } else {
            None
        };

        let mut gdb = SupervisedChild::spawn_gdb(&config.gdb, &[]).await?;
        gdb.spawn_exit_watcher(ChildKind::Gdb, event_tx.clone());
        let stdin = gdb
            .take_stdin()
            .ok_or(ProcessError::MissingStdio("stdin"))?;
        let stdout = gdb
            .take_stdout()
            .ok_or(ProcessError::MissingStdio("stdout"))?;
        let stderr = gdb
            .take_stderr()
            .ok_or(ProcessError::MissingStdio("stderr"))?;

        let router = Arc::new(Router::attach(
            stdin,
            stdout,
            stderr,
            OutputCategory::Stderr,
            event_tx.clone(),
        ));
        let coordinator = Arc::new(RunStateCoordinator::new(config.gdb_async, config.gdb_non_stop));

        let translator = Translator::new(router.clone(), coordinator.clone(), config.clone(), event_tx.clone());
        translator.launch_sequence(config.process_id).await?;

        if let Some(target) = &target_server {
            let host = config.target.host.clone().unwrap_or_else(|| "localhost".to_string());
            let port = target.port.or(config.target.port);
            if let Some(connect_commands) = &config.target.connect_commands {
                translator.run_command_batch(connect_commands).await?;
            } else if let Some(port) = port {
                translator
                    .run_command_batch(&[format!("-target-select remote {host}:{port}")])
                    .await?;
            }
        }

        translator.run_command_batch(&config.pre_connect_commands).await?;
        translator.run_command_batch(&config.init_commands).await?;

        if let Some(images) = &config.image_and_symbols {
            if let Some(file) = &images.symbol_file_name {
                let offset = images.symbol_offset.clone().unwrap_or_default();
                translator
                    .run_command_batch(&[format!("-file-symbol-file \"{file}\" {offset}")])
                    .await?;
            }
        }

        translator.run_command_batch(&config.pre_run_commands).await?;

        let auxiliary = if config.auxiliary_gdb {
            AuxiliaryConnection::validate_config(config.gdb_async, config.gdb_non_stop)
                .map_err(AdapterError::Config)?;
            match AuxiliaryConnection::connect(
                &config.gdb,
                &[],
                OutputCategory::Stderr,
                event_tx.clone(),
                config.target.connect_commands.as_deref().unwrap_or(&[]),
            )
            .await
            {
                Ok(conn) => Some(conn),
                Err(e) => {
                    log::warn!("auxiliary GDB connection failed, continuing without it: {e}");
                    None
                }
            }
        } else {
            None
        };

        if let Err(e) = translator.refresh_thread_groups().await {
            log::warn!("initial thread-group listing failed: {e}");
        }

        translator.state().await.debug_state = DebugState::Initializing;

        Ok(Session {
            gdb,
            target_server,
            auxiliary,
            coordinator,
            translator,
            events: event_rx,
        })
    }

    pub fn auxiliary(&self) -> Option<&AuxiliaryConnection> {
        self.auxiliary.as_ref()
    }

    /// Processes one event from the GDB reader task, updating run-state
    /// and session state; returns a translated front-end event when one
    /// should be forwarded (`None` for events that are fully internal,
    /// e.g. a transient pause-if-needed stop).
    pub async fn handle_event(&mut self, event: GdbEvent) -> Option<FrontEndEvent> {
        match event {
            GdbEvent::Async(async_record) => self.handle_async(async_record).await,
            GdbEvent::Stream(stream) => Some(FrontEndEvent::Output {
                category: match stream.channel {
                    types::StreamChannel::Console => OutputCategory::Console,
                    types::StreamChannel::Target => OutputCategory::Target,
                    types::StreamChannel::Log => OutputCategory::Log,
                },
                text: stream.text,
            }),
            GdbEvent::ProcessOutput { category, text } => {
                Some(FrontEndEvent::Output { category, text })
            }
            GdbEvent::UntokenizedResult(_) => None,
            GdbEvent::ChildExited { which, code } => {
                self.translator.state().await.debug_state = DebugState::Exited(code.unwrap_or(-1));
                self.coordinator_teardown_cross_termination(which).await;
                Some(FrontEndEvent::Terminated)
            }
        }
    }

    async fn handle_async(&mut self, async_record: types::MIAsync) -> Option<FrontEndEvent> {
        use types::AsyncClass;

        let thread_id = async_record
            .results
            .get("thread-id")
            .and_then(|v| v.as_string())
            .and_then(|s| s.parse().ok());

        match async_record.class {
            AsyncClass::Running => {
                self.coordinator.on_running(thread_id);
                Some(FrontEndEvent::Continued { thread_id })
            }
            AsyncClass::Stopped => {
                let transient = self.coordinator.on_stopped(thread_id);
                if transient {
                    return None;
                }
                self.translator.state().await.invalidate_on_stop();
                let reason = async_record
                    .results
                    .get("reason")
                    .and_then(|v| v.as_string())
                    .unwrap_or("unknown");
                let signal_name = async_record
                    .results
                    .get("signal-name")
                    .and_then(|v| v.as_string());
                match translator::map_stop_reason(reason, signal_name) {
                    Some(mapped) => Some(FrontEndEvent::Stopped {
                        reason: mapped,
                        thread_id,
                    }),
                    None => Some(FrontEndEvent::Terminated),
                }
            }
            AsyncClass::ThreadCreated => {
                if let Some(id) = thread_id {
                    self.translator.state().await.thread_created(id);
                }
                thread_id.map(|id| FrontEndEvent::Thread { thread_id: id, started: true })
            }
            AsyncClass::ThreadExited => {
                if let Some(id) = thread_id {
                    self.translator.state().await.thread_exited(id);
                }
                thread_id.map(|id| FrontEndEvent::Thread { thread_id: id, started: false })
            }
            AsyncClass::BreakpointModified | AsyncClass::BreakpointCreated | AsyncClass::BreakpointDeleted => {
                Some(FrontEndEvent::BreakpointChanged)
            }
            AsyncClass::ThreadGroupAdded => {
                if let Some(id) = async_record.results.get("id").and_then(|v| v.as_string()) {
                    self.translator.state().await.thread_group_added(id);
                }
                None
            }
            AsyncClass::ThreadGroupStarted => {
                if let Some(id) = async_record.results.get("id").and_then(|v| v.as_string()) {
                    let pid = async_record
                        .results
                        .get("pid")
                        .and_then(|v| v.as_string())
                        .and_then(|s| s.parse().ok());
                    self.translator.state().await.thread_group_started(id, pid);
                }
                None
            }
            AsyncClass::ThreadGroupExited => {
                if let Some(id) = async_record.results.get("id").and_then(|v| v.as_string()) {
                    let exit_code = async_record
                        .results
                        .get("exit-code")
                        .and_then(|v| v.as_string())
                        .and_then(|s| s.parse().ok());
                    self.translator.state().await.thread_group_exited(id, exit_code);
                }
                None
            }
            AsyncClass::ThreadGroupRemoved => {
                if let Some(id) = async_record.results.get("id").and_then(|v| v.as_string()) {
                    self.translator.state().await.thread_group_removed(id);
                }
                None
            }
            _ => None,
        }
    }

    async fn coordinator_teardown_cross_termination(&mut self, which: ChildKind) {
        // §4.2 cross-termination: an unexpected GDB exit takes the target
        // server down with it, and vice versa.
        match which {
            ChildKind::Gdb => {
                if let Some(server) = &mut self.target_server {
                    let _ = server.kill().await;
                }
            }
            ChildKind::TargetServer => {
                let _ = self.gdb.kill().await;
            }
        }
    }

    /// Graceful teardown on `disconnect`.
    pub async fn shutdown(&mut self) {
        if let Some(aux) = &mut self.auxiliary {
            aux.shutdown().await;
        }
        let _ = self.gdb.kill().await;
        if let Some(server) = &mut self.target_server {
            let _ = server.kill().await;
        }
    }
}

/// Front-end-shaped events the session loop (`main.rs`) forwards as DAP
/// `event` messages (§6).
#[derive(Debug, Clone)]
pub enum FrontEndEvent {
    Stopped { reason: String, thread_id: Option<u32> },
    Continued { thread_id: Option<u32> },
    Terminated,
    Thread { thread_id: u32, started: bool },
    BreakpointChanged,
    Output { category: OutputCategory, text: String },
}
