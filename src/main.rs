use gdbadapter::config::LaunchConfig;
use gdbadapter::protocol::{FramedReader, FramedWriter, Request};
use gdbadapter::{FrontEndEvent, Session};

/// Adapter binary entry point (§6 External Interfaces). Reads
/// Content-Length framed JSON requests on stdin, dispatches them against
/// a `Session`, and writes framed responses/events to stdout. Exits 0 on
/// graceful disconnect, non-zero otherwise (§6).
#[tokio::main]
async fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .with_module_level("gdbadapter", log::LevelFilter::Debug)
        .init()
        .unwrap();

    log::info!("gdb-mi-adapter starting");

    let exit_code = run().await;
    log::info!("gdb-mi-adapter exiting with code {exit_code}");
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let mut reader = FramedReader::new(stdin);
    let mut writer = FramedWriter::new(stdout);

    let mut session = match wait_for_launch(&mut reader, &mut writer).await {
        Ok(Some(session)) => session,
        Ok(None) => return 0,
        Err(e) => {
            log::error!("launch failed: {e}");
            return 1;
        }
    };

    if let Err(e) = writer.send_event("initialized", None).await {
        log::error!("failed to send initialized event: {e}");
        return 1;
    }

    loop {
        tokio::select! {
            event = session.events.recv() => {
                match event {
                    Some(event) => {
                        if let Some(front_end_event) = session.handle_event(event).await {
                            if emit(&mut writer, front_end_event).await.is_err() {
                                return 1;
                            }
                        }
                    }
                    None => {
                        // The router's event channel only closes when both
                        // reader tasks have shut down, which only happens
                        // after a `ChildExited` was already forwarded.
                        break;
                    }
                }
            }
            request = reader.read_request() => {
                match request {
                    Ok(request) => {
                        let command = request.command.clone();
                        if command == "disconnect" {
                            session.shutdown().await;
                            let _ = writer.send_response(&request, Ok(None)).await;
                            return 0;
                        }
                        let result = dispatch(&mut session, &request).await;
                        if writer.send_response(&request, result).await.is_err() {
                            return 1;
                        }
                    }
                    Err(_) => {
                        session.shutdown().await;
                        return 0;
                    }
                }
            }
        }
    }

    0
}

/// Handles requests before a session exists: `initialize` gets an
/// immediate empty-capabilities response, `launch`/`attach` spawn the
/// session. Any other request arriving first is rejected.
async fn wait_for_launch(
    reader: &mut FramedReader<tokio::io::Stdin>,
    writer: &mut FramedWriter<tokio::io::Stdout>,
) -> Result<Option<Session>, gdbadapter::error::AdapterError> {
    loop {
        let request = match reader.read_request().await {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };

        match request.command.as_str() {
            "initialize" => {
                let _ = writer
                    .send_response(&request, Ok(Some(serde_json::json!({}))))
                    .await;
            }
            "launch" | "attach" => {
                let config: LaunchConfig = match serde_json::from_value(request.arguments.clone()) {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = writer
                            .send_response(&request, Err(format!("malformed launch arguments: {e}")))
                            .await;
                        continue;
                    }
                };
                match Session::launch(config).await {
                    Ok(session) => {
                        let _ = writer.send_response(&request, Ok(None)).await;
                        return Ok(Some(session));
                    }
                    Err(e) => {
                        let _ = writer.send_response(&request, Err(e.to_string())).await;
                        return Err(e);
                    }
                }
            }
            other => {
                let _ = writer
                    .send_response(
                        &request,
                        Err(format!("'{other}' received before launch/attach")),
                    )
                    .await;
            }
        }
    }
}

async fn emit(
    writer: &mut FramedWriter<tokio::io::Stdout>,
    event: FrontEndEvent,
) -> Result<(), gdbadapter::protocol::ProtocolError> {
    match event {
        FrontEndEvent::Stopped { reason, thread_id } => {
            writer
                .send_event(
                    "stopped",
                    Some(serde_json::json!({"reason": reason, "threadId": thread_id})),
                )
                .await
        }
        FrontEndEvent::Continued { thread_id } => {
            writer
                .send_event("continued", Some(serde_json::json!({"threadId": thread_id})))
                .await
        }
        FrontEndEvent::Terminated => writer.send_event("terminated", None).await,
        FrontEndEvent::Thread { thread_id, started } => {
            writer
                .send_event(
                    "thread",
                    Some(serde_json::json!({
                        "reason": if started { "started" } else { "exited" },
                        "threadId": thread_id,
                    })),
                )
                .await
        }
        FrontEndEvent::BreakpointChanged => writer.send_event("breakpoint", None).await,
        FrontEndEvent::Output { category, text } => {
            let category = match category {
                gdbadapter::types::OutputCategory::Stdout => "stdout",
                gdbadapter::types::OutputCategory::Stderr => "stderr",
                gdbadapter::types::OutputCategory::Console => "console",
                gdbadapter::types::OutputCategory::Log => "log",
                gdbadapter::types::OutputCategory::Server => "server",
                gdbadapter::types::OutputCategory::Target => "target",
            };
            writer
                .send_event(
                    "output",
                    Some(serde_json::json!({"category": category, "output": text})),
                )
                .await
        }
    }
}

/// Dispatches one request against the live session's translator. Request
/// bodies are read loosely (`serde_json::Value` field access) since the
/// full DAP argument schema is out of scope here (§6) — this binary only
/// needs enough shape to drive the core.
async fn dispatch(
    session: &mut Session,
    request: &Request,
) -> Result<Option<serde_json::Value>, String> {
    let args = &request.arguments;
    match request.command.as_str() {
        "configurationDone" => Ok(None),
        "threads" => {
            let state = session.translator.state().await;
            let threads: Vec<_> = state
                .threads()
                .map(|t| serde_json::json!({"id": t.id, "name": t.name.clone().unwrap_or_default()}))
                .collect();
            Ok(Some(serde_json::json!({"threads": threads})))
        }
        "continue" => {
            let cmd = gdbadapter::queue::Command::new("-exec-continue");
            session
                .coordinator
                .execute(&session_router(session), cmd)
                .await
                .map_err(|e| e.to_string())?;
            Ok(Some(serde_json::json!({"allThreadsContinued": true})))
        }
        "next" => run_timed_step(session, "nextRequest", "-exec-next").await,
        "stepIn" => run_timed_step(session, "stepInRequest", "-exec-step").await,
        "stepOut" => run_timed_step(session, "stepOutRequest", "-exec-finish").await,
        "pause" => run_resume(session, "-exec-interrupt").await,
        "evaluate" => {
            let expression = args.get("expression").and_then(|v| v.as_str()).unwrap_or("");
            let frame_key = gdbadapter::session::VarobjKey {
                thread_id: args.get("threadId").and_then(|v| v.as_u64()).unwrap_or(1) as u32,
                frame_level: args.get("frameId").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                stack_depth: 0,
                expression: expression.to_string(),
            };
            let result = session
                .translator
                .evaluate(expression, frame_key, 0)
                .await
                .map_err(|e| e.to_string())?;
            Ok(Some(serde_json::json!({"result": result, "variablesReference": 0})))
        }
        "readMemory" => {
            let address = args.get("memoryReference").and_then(|v| v.as_str()).unwrap_or("0");
            let count = args.get("count").and_then(|v| v.as_u64()).unwrap_or(0);
            let data = session
                .translator
                .read_memory(address, count)
                .await
                .map_err(|e| e.to_string())?;
            Ok(Some(serde_json::json!({"address": address, "data": data})))
        }
        "writeMemory" => {
            let address = args.get("memoryReference").and_then(|v| v.as_str()).unwrap_or("0");
            let data = args.get("data").and_then(|v| v.as_str()).unwrap_or("");
            session
                .translator
                .write_memory(address, data)
                .await
                .map_err(|e| e.to_string())?;
            Ok(None)
        }
        "disassemble" => {
            let memory_reference = args.get("memoryReference").and_then(|v| v.as_str()).unwrap_or("0x0");
            let instruction_offset = args.get("instructionOffset").and_then(|v| v.as_i64()).unwrap_or(0);
            let instruction_count = args.get("instructionCount").and_then(|v| v.as_i64()).unwrap_or(0);
            let instructions = session
                .translator
                .disassemble(memory_reference, instruction_offset, instruction_count)
                .await
                .map_err(|e| e.to_string())?;
            let instructions: Vec<_> = instructions
                .into_iter()
                .map(|instruction| {
                    let mut json = serde_json::json!({
                        "address": instruction.address,
                        "instruction": instruction.instruction,
                    });
                    if instruction.invalid {
                        json["presentationHint"] = serde_json::json!("invalid");
                    }
                    json
                })
                .collect();
            Ok(Some(serde_json::json!({"instructions": instructions})))
        }
        "setFunctionBreakpoints" => {
            let requested = parse_named_breakpoints(args, "name");
            let breakpoints = session.translator.set_function_breakpoints(&requested).await;
            Ok(Some(serde_json::json!({"breakpoints": breakpoints_to_json(&breakpoints)})))
        }
        "setInstructionBreakpoints" => {
            let requested = parse_named_breakpoints(args, "instructionReference");
            let breakpoints = session.translator.set_instruction_breakpoints(&requested).await;
            Ok(Some(serde_json::json!({"breakpoints": breakpoints_to_json(&breakpoints)})))
        }
        other => Err(format!("unsupported request '{other}'")),
    }
}

async fn run_resume(session: &mut Session, text: &str) -> Result<Option<serde_json::Value>, String> {
    let cmd = gdbadapter::queue::Command::new(text);
    session
        .coordinator
        .execute(&session_router(session), cmd)
        .await
        .map_err(|e| e.to_string())?;
    Ok(None)
}

/// `next`/`stepIn`/`stepOut` race their MI command against
/// `steppingResponseTimeout` (§4.4): a late failure is reported through
/// the event stream instead of a second response to this call.
async fn run_timed_step(
    session: &mut Session,
    request_label: &str,
    mi_text: &str,
) -> Result<Option<serde_json::Value>, String> {
    session
        .translator
        .step_with_timeout(request_label, mi_text)
        .await
        .map_err(|e| e.to_string())?;
    Ok(None)
}

fn session_router(session: &Session) -> &gdbadapter::router::Router {
    session.translator.router()
}

/// Reads `args.breakpoints[].{name_key, condition}` for
/// `setFunctionBreakpoints`/`setInstructionBreakpoints`, whose name field
/// differs (`name` vs `instructionReference`) but share the same shape
/// otherwise.
fn parse_named_breakpoints(
    args: &serde_json::Value,
    name_key: &str,
) -> Vec<gdbadapter::translator::RequestedFunctionBreakpoint> {
    args.get("breakpoints")
        .and_then(|v| v.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let name = entry.get(name_key)?.as_str()?.to_string();
                    let condition = entry.get("condition").and_then(|v| v.as_str()).map(String::from);
                    Some(gdbadapter::translator::RequestedFunctionBreakpoint { name, condition })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn breakpoints_to_json(breakpoints: &[gdbadapter::session::Breakpoint]) -> Vec<serde_json::Value> {
    breakpoints
        .iter()
        .map(|bp| {
            serde_json::json!({
                "id": bp.client_id,
                "verified": bp.verified,
                "line": bp.last_line,
            })
        })
        .collect()
}
