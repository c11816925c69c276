/// Request Translator (C6).
///
/// The biggest component: turns one front-end request into an MI command
/// sequence, updates session state (C5) from the results, and assembles
/// the front-end response. Pure computations (stop-reason mapping,
/// breakpoint-diff planning, disassemble range math, access-scope
/// descent) are split out as free functions so they're testable without a
/// live GDB; the `Translator` methods wrap them with the actual MI round
/// trips.
use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use tokio::sync::{mpsc, Mutex};

use crate::config::LaunchConfig;
use crate::error::{AdapterError, Result};
use crate::queue::{Command, RunStateCoordinator};
use crate::router::Router;
use crate::session::{Breakpoint, BreakpointKind, SessionState, Varobj, VarobjKey};
use crate::types::{GdbEvent, MIValue, OutputCategory};

/// One line requested by `setBreakpoints` for a single source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedBreakpoint {
    pub line: u32,
    pub condition: Option<String>,
}

/// One line requested by `setFunctionBreakpoints`/`setInstructionBreakpoints`:
/// identity is the function name / instruction reference itself, not a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedFunctionBreakpoint {
    pub name: String,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedBreakpointPlan {
    pub keep: Vec<(u32, String)>,
    pub delete: Vec<u32>,
    pub insert: Vec<String>,
}

/// Diff plan for `setFunctionBreakpoints`/`setInstructionBreakpoints`
/// (§4.5 "analogous diff"): a breakpoint survives if its name is still
/// requested, by name rather than by relocated line.
pub fn plan_named_breakpoint_diff(existing: &[&Breakpoint], requested_names: &[String]) -> NamedBreakpointPlan {
    let mut keep = Vec::new();
    let mut delete = Vec::new();
    let mut matched: Vec<String> = Vec::new();

    for bp in existing {
        if requested_names.contains(&bp.location) && !matched.contains(&bp.location) {
            keep.push((bp.client_id, bp.location.clone()));
            matched.push(bp.location.clone());
        } else {
            delete.push(bp.client_id);
        }
    }

    let insert = requested_names
        .iter()
        .filter(|name| !matched.contains(name))
        .cloned()
        .collect();

    NamedBreakpointPlan { keep, delete, insert }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointPlan {
    /// (client_id, still-requested-line) for survivors whose gdb-number
    /// must not change.
    pub keep: Vec<(u32, u32)>,
    pub delete: Vec<u32>,
    pub insert: Vec<u32>,
}

/// Computes the diff plan for `setBreakpoints(source, ...)` (§4.5 step 2).
/// A breakpoint survives if its last-reported line is still present in the
/// requested set; everything else requested gets freshly inserted, and
/// everything no longer requested gets deleted. The caller is responsible
/// for re-assembling the response in the *requested* order (step 3).
pub fn plan_breakpoint_diff(
    existing: &[&Breakpoint],
    requested_lines: &[u32],
) -> BreakpointPlan {
    let mut keep = Vec::new();
    let mut delete = Vec::new();
    let mut matched_lines: Vec<u32> = Vec::new();

    for bp in existing {
        match bp.last_line {
            Some(line) if requested_lines.contains(&line) && !matched_lines.contains(&line) => {
                keep.push((bp.client_id, line));
                matched_lines.push(line);
            }
            _ => delete.push(bp.client_id),
        }
    }

    let insert = requested_lines
        .iter()
        .filter(|line| !matched_lines.contains(line))
        .copied()
        .collect();

    BreakpointPlan {
        keep,
        delete,
        insert,
    }
}

/// Extracts the `bkpt={...}` tuples out of a `-break-list` reply's
/// `BreakpointTable.body` (§4.5 set-breakpoints step 1).
pub fn break_list_tuples(result: &crate::types::MIResult) -> Vec<&HashMap<String, MIValue>> {
    result
        .results
        .get("BreakpointTable")
        .and_then(|v| v.as_tuple())
        .and_then(|t| t.get("body"))
        .and_then(|v| v.as_named_list())
        .map(|entries| {
            entries
                .iter()
                .filter(|(name, _)| name == "bkpt")
                .filter_map(|(_, value)| value.as_tuple())
                .collect()
        })
        .unwrap_or_default()
}

/// Reconciles the cached breakpoint table against GDB's authoritative
/// `-break-list` view (§4.5 step 1): a cached breakpoint whose `gdb-number`
/// no longer appears in the table was deleted out from under the cache
/// (CLI pass-through, the auxiliary connection, …) and must be dropped;
/// one that's still present gets its `last_line` refreshed in case GDB
/// relocated it.
pub fn reconcile_breakpoint_cache(
    existing: &[&Breakpoint],
    table: &[&HashMap<String, MIValue>],
) -> (Vec<(u32, u32)>, Vec<u32>) {
    let mut relocations = Vec::new();
    let mut dropped = Vec::new();

    for bp in existing {
        let Some(number) = bp.gdb_number else { continue };
        let found = table
            .iter()
            .find(|tuple| tuple.get("number").and_then(|v| v.as_string()) == Some(number.to_string().as_str()));

        match found {
            Some(tuple) => {
                if let Some(line) = tuple.get("line").and_then(|v| v.as_u64()).map(|n| n as u32) {
                    if bp.last_line != Some(line) {
                        relocations.push((bp.client_id, line));
                    }
                }
            }
            None => dropped.push(bp.client_id),
        }
    }

    (relocations, dropped)
}

/// Maps an MI `*stopped` reason to the front-end's `stopped` event reason
/// (§4.5). Returns `None` for `exited-normally`, which the caller must
/// translate into a `terminated` event instead of a `stopped` one.
pub fn map_stop_reason(mi_reason: &str, signal_name: Option<&str>) -> Option<String> {
    match mi_reason {
        "breakpoint-hit" => Some("breakpoint".to_string()),
        "end-stepping-range" => Some("step".to_string()),
        "function-finished" => Some("step".to_string()),
        "watchpoint-trigger" => Some("data breakpoint".to_string()),
        "signal-received" => Some(signal_name.unwrap_or("signal").to_string()),
        "exited-normally" => None,
        other => Some(other.to_string()),
    }
}

/// A child with `exp` of `public`/`protected`/`private` and no `type` is a
/// compiler-generated access-scope grouping, not a real member (§4.5).
pub fn is_access_scope_pseudo_child(exp: &str, has_type: bool) -> bool {
    !has_type && matches!(exp, "public" | "protected" | "private")
}

/// Array element display name and its evaluate-name composition (§4.5:
/// "Array elements display with `[i]` names and compose evaluate-names
/// with bracket syntax").
pub fn array_element_names(parent_evaluate_name: &str, index: usize) -> (String, String) {
    (
        format!("[{index}]"),
        format!("{parent_evaluate_name}[{index}]"),
    )
}

/// `start + count * mean-instruction-size` end-address computation for
/// `disassemble` (§4.5), returned as the two expressions to hand to
/// `-data-disassemble`.
pub fn disassemble_range(start_addr: &str, count: i64, mean_instruction_size: u32) -> (String, String) {
    let span = count * mean_instruction_size as i64;
    (start_addr.to_string(), format!("{start_addr}+{span}"))
}

/// Error-filled placeholder instructions for a negative disassemble
/// offset: addresses step by 2 starting at `start_addr` (§4.5).
pub fn invalid_disassembly_padding(start_addr: u64, count: usize) -> Vec<(u64, &'static str)> {
    (0..count)
        .map(|i| (start_addr + (i as u64) * 2, "invalid"))
        .collect()
}

/// Default mean-instruction-size assumed by `disassemble_range` (§4.5).
pub const MEAN_INSTRUCTION_SIZE: u32 = 4;

/// One instruction resolved by `disassemble` (§4.5): either a real
/// `-data-disassemble` line or one of the invalid placeholders produced
/// for a negative `instructionOffset`.
#[derive(Debug, Clone)]
pub struct DisassembledInstruction {
    pub address: String,
    pub instruction: String,
    pub invalid: bool,
}

/// One entry of a resolved `variables(reference)` call.
#[derive(Debug, Clone)]
pub struct VariableEntry {
    pub name: String,
    pub value: String,
    pub var_type: Option<String>,
    pub evaluate_name: String,
    pub variables_reference: u64,
}

pub struct Translator {
    router: Arc<Router>,
    coordinator: Arc<RunStateCoordinator>,
    state: Mutex<SessionState>,
    config: LaunchConfig,
    event_tx: mpsc::UnboundedSender<GdbEvent>,
}

impl Translator {
    pub fn new(
        router: Arc<Router>,
        coordinator: Arc<RunStateCoordinator>,
        config: LaunchConfig,
        event_tx: mpsc::UnboundedSender<GdbEvent>,
    ) -> Self {
        Translator {
            router,
            coordinator,
            state: Mutex::new(SessionState::new()),
            config,
            event_tx,
        }
    }

    pub async fn state(&self) -> tokio::sync::MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    async fn submit_needs_stopped(&self, text: &str) -> Result<crate::types::MIResult> {
        let cmd = Command::new(text).needing_stopped();
        Ok(self.coordinator.execute(&self.router, cmd).await?)
    }

    async fn submit(&self, text: &str) -> Result<crate::types::MIResult> {
        let cmd = Command::new(text);
        Ok(self.coordinator.execute(&self.router, cmd).await?)
    }

    /// §4.5 Initialize/Launch/Attach, steps 1-2 (spawn already done by the
    /// caller; this issues the `-gdb-set`/file/attach sequence against an
    /// already-attached router).
    pub async fn launch_sequence(&self, pid_to_attach: Option<u32>) -> Result<()> {
        if self.config.gdb_async {
            self.submit("-gdb-set mi-async on").await?;
        }
        if self.config.gdb_non_stop {
            self.submit("-gdb-set non-stop on").await?;
        }
        for (key, value) in &self.config.environment {
            match value {
                Some(v) => {
                    self.submit(&format!("-gdb-set environment {key}={v}")).await?;
                }
                None => {
                    self.submit(&format!("-gdb-set unset environment {key}")).await?;
                }
            }
        }

        if let Some(program) = &self.config.program {
            self.submit(&format!("-file-exec-and-symbols \"{program}\"")).await?;
        }
        if !self.config.arguments.is_empty() {
            self.submit(&format!("-exec-arguments {}", self.config.arguments.join(" ")))
                .await?;
        }

        if let Some(pid) = pid_to_attach {
            self.submit(&format!("-target-attach {pid}")).await?;
        }

        Ok(())
    }

    /// Seeds/refreshes the thread-group table via `-list-thread-groups`
    /// (§2 ambient supplement); ongoing updates come from `=thread-group-*`
    /// notifications handled in `lib.rs::handle_async`.
    pub async fn refresh_thread_groups(&self) -> Result<()> {
        let result = self.submit("-list-thread-groups").await?;
        let groups = result
            .results
            .get("groups")
            .and_then(|v| v.as_list())
            .map(|list| list.to_vec())
            .unwrap_or_default();

        let mut state = self.state.lock().await;
        for group in groups.iter().filter_map(|v| v.as_tuple()) {
            let Some(id) = group.get("id").and_then(|v| v.as_string()) else { continue };
            state.thread_group_added(id);
            let pid = group.get("pid").and_then(|v| v.as_string()).and_then(|s| s.parse().ok());
            if pid.is_some() {
                state.thread_group_started(id, pid);
            }
        }
        Ok(())
    }

    pub async fn run_command_batch(&self, commands: &[String]) -> Result<()> {
        for cmd in commands {
            if let Some(cli) = cmd.strip_prefix('>') {
                self.submit(&format!("-interpreter-exec console \"{cli}\"")).await?;
            } else {
                self.submit(cmd).await?;
            }
        }
        Ok(())
    }

    /// §4.5 `set-breakpoints(source, breakpoints[])`. Each requested line
    /// that fails to set gets `verified=false` with a message instead of
    /// failing the whole request.
    pub async fn set_breakpoints(
        &self,
        source: &str,
        requested: &[RequestedBreakpoint],
    ) -> Vec<Breakpoint> {
        let requested_lines: Vec<u32> = requested.iter().map(|r| r.line).collect();

        let break_list = self.submit("-break-list").await.ok();
        let table = break_list.as_ref().map(break_list_tuples).unwrap_or_default();

        let plan = {
            let mut state = self.state.lock().await;
            let (relocations, dropped) = {
                let existing = state.breakpoints_for_location_prefix(source);
                reconcile_breakpoint_cache(&existing, &table)
            };
            for (client_id, line) in relocations {
                if let Some(bp) = state.breakpoint_mut(client_id) {
                    bp.last_line = Some(line);
                }
            }
            for client_id in dropped {
                state.remove_breakpoint(client_id);
            }

            let existing = state.breakpoints_for_location_prefix(source);
            plan_breakpoint_diff(&existing, &requested_lines)
        };

        for client_id in &plan.delete {
            let gdb_number = {
                let state = self.state.lock().await;
                state.breakpoint(*client_id).and_then(|bp| bp.gdb_number)
            };
            if let Some(number) = gdb_number {
                let _ = self.submit(&format!("-break-delete {number}")).await;
            }
            self.state.lock().await.remove_breakpoint(*client_id);
        }

        let mut by_line: HashMap<u32, Breakpoint> = HashMap::new();

        for (client_id, line) in &plan.keep {
            if let Some(bp) = self.state.lock().await.breakpoint(*client_id).cloned() {
                by_line.insert(*line, bp);
            }
        }

        for line in &plan.insert {
            let condition = requested
                .iter()
                .find(|r| r.line == *line)
                .and_then(|r| r.condition.clone());
            let location = format!("{source}:{line}");
            let mut cmd = format!("-break-insert {location}");
            if let Some(cond) = &condition {
                cmd = format!("-break-insert -c \"{cond}\" {location}");
            }

            let result = self.submit(&cmd).await;
            let mut state = self.state.lock().await;
            let client_id = state.next_client_id();

            match result {
                Ok(mi) => {
                    if let Some(MIValue::Tuple(tuple)) = mi.results.get("bkpt") {
                        let mut bp =
                            Breakpoint::from_tuple(client_id, BreakpointKind::Source, location.clone(), tuple);
                        bp.condition = condition;
                        state.set_breakpoint(bp.clone());
                        by_line.insert(*line, bp);
                    } else {
                        let bp = Breakpoint {
                            client_id,
                            gdb_number: None,
                            kind: BreakpointKind::Source,
                            location,
                            condition,
                            hit_count: None,
                            log_message: None,
                            hardware: false,
                            verified: false,
                            last_line: Some(*line),
                        };
                        state.set_breakpoint(bp.clone());
                        by_line.insert(*line, bp);
                    }
                }
                Err(e) => {
                    let bp = Breakpoint {
                        client_id,
                        gdb_number: None,
                        kind: BreakpointKind::Source,
                        location,
                        condition,
                        hit_count: None,
                        log_message: None,
                        hardware: false,
                        verified: false,
                        last_line: Some(*line),
                    };
                    log::warn!("break-insert failed for line {line}: {e}");
                    by_line.insert(*line, bp);
                }
            }
        }

        // Preserve the requested order in the response (step 3).
        requested_lines
            .iter()
            .filter_map(|line| by_line.get(line).cloned())
            .collect()
    }

    /// §4.5 `setFunctionBreakpoints`: the analogous diff to `set_breakpoints`,
    /// keyed by function name rather than line.
    pub async fn set_function_breakpoints(&self, requested: &[RequestedFunctionBreakpoint]) -> Vec<Breakpoint> {
        self.set_named_breakpoints(BreakpointKind::Function, requested).await
    }

    /// §4.5 `setInstructionBreakpoints`: same diff, keyed by instruction
    /// reference; `-break-insert` takes it address-qualified (`*addr`).
    pub async fn set_instruction_breakpoints(&self, requested: &[RequestedFunctionBreakpoint]) -> Vec<Breakpoint> {
        self.set_named_breakpoints(BreakpointKind::Instruction, requested).await
    }

    async fn set_named_breakpoints(
        &self,
        kind: BreakpointKind,
        requested: &[RequestedFunctionBreakpoint],
    ) -> Vec<Breakpoint> {
        let requested_names: Vec<String> = requested.iter().map(|r| r.name.clone()).collect();

        let plan = {
            let state = self.state.lock().await;
            let existing = state.breakpoints_by_kind(kind);
            plan_named_breakpoint_diff(&existing, &requested_names)
        };

        for client_id in &plan.delete {
            let gdb_number = {
                let state = self.state.lock().await;
                state.breakpoint(*client_id).and_then(|bp| bp.gdb_number)
            };
            if let Some(number) = gdb_number {
                let _ = self.submit(&format!("-break-delete {number}")).await;
            }
            self.state.lock().await.remove_breakpoint(*client_id);
        }

        let mut by_name: HashMap<String, Breakpoint> = HashMap::new();

        for (client_id, name) in &plan.keep {
            if let Some(bp) = self.state.lock().await.breakpoint(*client_id).cloned() {
                by_name.insert(name.clone(), bp);
            }
        }

        for name in &plan.insert {
            let condition = requested.iter().find(|r| &r.name == name).and_then(|r| r.condition.clone());
            let location = match kind {
                BreakpointKind::Instruction => format!("*{name}"),
                _ => name.clone(),
            };
            let mut cmd = format!("-break-insert {location}");
            if let Some(cond) = &condition {
                cmd = format!("-break-insert -c \"{cond}\" {location}");
            }

            let result = self.submit(&cmd).await;
            let mut state = self.state.lock().await;
            let client_id = state.next_client_id();

            match result {
                Ok(mi) => {
                    if let Some(MIValue::Tuple(tuple)) = mi.results.get("bkpt") {
                        // GDB's own sub-numbering for `<MULTIPLE>` locations
                        // (e.g. "1.1", "1.2") is discarded here: only the
                        // top-level `bkpt` tuple becomes the client-visible
                        // identity, per §4.5's flattening rule.
                        let mut bp = Breakpoint::from_tuple(client_id, kind, name.clone(), tuple);
                        bp.condition = condition;
                        state.set_breakpoint(bp.clone());
                        by_name.insert(name.clone(), bp);
                    } else {
                        let bp = Breakpoint {
                            client_id,
                            gdb_number: None,
                            kind,
                            location: name.clone(),
                            condition,
                            hit_count: None,
                            log_message: None,
                            hardware: false,
                            verified: false,
                            last_line: None,
                        };
                        state.set_breakpoint(bp.clone());
                        by_name.insert(name.clone(), bp);
                    }
                }
                Err(e) => {
                    let bp = Breakpoint {
                        client_id,
                        gdb_number: None,
                        kind,
                        location: name.clone(),
                        condition,
                        hit_count: None,
                        log_message: None,
                        hardware: false,
                        verified: false,
                        last_line: None,
                    };
                    log::warn!("break-insert failed for '{name}': {e}");
                    by_name.insert(name.clone(), bp);
                }
            }
        }

        requested_names.iter().filter_map(|name| by_name.get(name).cloned()).collect()
    }

    /// §4.5 `evaluate`. `frame_key` identifies the (thread, frame-level,
    /// stack-depth) tuple the expression should be evaluated in.
    pub async fn evaluate(
        &self,
        expression: &str,
        frame_key: VarobjKey,
        current_stack_depth: u32,
    ) -> Result<String> {
        if let Some(cli) = expression.strip_prefix(">-") {
            let result = self.submit(cli).await?;
            return Ok(format!("{:?}", result.results));
        }
        if let Some(cli) = expression.strip_prefix('>') {
            let result = self
                .submit(&format!("-interpreter-exec console \"{cli}\""))
                .await?;
            return Ok(format!("{:?}", result.results));
        }

        let cached = self.state.lock().await.lookup_varobj(&frame_key).cloned();

        let internal_name = match cached {
            Some(varobj) if !SessionState::varobj_is_stale(&varobj, current_stack_depth) => {
                self.submit(&format!("-var-update {}", varobj.internal_name)).await?;
                varobj.internal_name
            }
            Some(varobj) => {
                let _ = self.submit(&format!("-var-delete {}", varobj.internal_name)).await;
                self.state.lock().await.remove_varobj(&frame_key);
                self.create_varobj(expression, &frame_key, current_stack_depth).await?
            }
            None => self.create_varobj(expression, &frame_key, current_stack_depth).await?,
        };

        let result = self.submit(&format!("-var-evaluate-expression {internal_name}")).await?;
        Ok(result
            .results
            .get("value")
            .and_then(|v| v.as_string())
            .unwrap_or_default()
            .to_string())
    }

    async fn create_varobj(
        &self,
        expression: &str,
        frame_key: &VarobjKey,
        current_stack_depth: u32,
    ) -> Result<String> {
        let result = self
            .submit(&format!("-var-create - * \"{expression}\""))
            .await?;
        let internal_name = result
            .results
            .get("name")
            .and_then(|v| v.as_string())
            .ok_or_else(|| AdapterError::Mi("var-create reply missing 'name'".to_string()))?
            .to_string();
        let var_type = result.results.get("type").and_then(|v| v.as_string()).map(String::from);

        self.state.lock().await.insert_varobj(
            frame_key.clone(),
            Varobj {
                internal_name: internal_name.clone(),
                expression: expression.to_string(),
                var_type,
                depth_at_creation: current_stack_depth,
            },
        );
        Ok(internal_name)
    }

    /// §4.5 `variables(reference)`, frame branch: lists locals via
    /// `-stack-list-variables`, creating (or reconciling with cached)
    /// varobjs at `frame_key`, and drops any varobj previously cached at
    /// this frame tuple that's no longer among the locals.
    pub async fn variables_for_frame(
        &self,
        frame_key: VarobjKey,
        current_stack_depth: u32,
    ) -> Result<Vec<VariableEntry>> {
        let result = self
            .submit("-stack-list-variables --simple-values")
            .await?;
        let locals = result
            .results
            .get("variables")
            .and_then(|v| v.as_list())
            .map(|list| list.to_vec())
            .unwrap_or_default();

        let mut entries = Vec::new();
        for local in &locals {
            let Some(tuple) = local.as_tuple() else { continue };
            let Some(name) = tuple.get("name").and_then(|v| v.as_string()) else { continue };
            let value = tuple.get("value").and_then(|v| v.as_string()).unwrap_or("").to_string();
            let var_type = tuple.get("type").and_then(|v| v.as_string()).map(String::from);

            let mut key = frame_key.clone();
            key.expression = name.to_string();

            let cached = self.state.lock().await.lookup_varobj(&key).cloned();
            match cached {
                Some(varobj) if SessionState::varobj_is_stale(&varobj, current_stack_depth) => {
                    let _ = self.submit(&format!("-var-delete {}", varobj.internal_name)).await;
                    self.state.lock().await.remove_varobj(&key);
                    self.create_varobj(name, &key, current_stack_depth).await?;
                }
                Some(_) => {}
                None => {
                    self.create_varobj(name, &key, current_stack_depth).await?;
                }
            }

            entries.push(VariableEntry {
                name: name.to_string(),
                value,
                var_type,
                evaluate_name: name.to_string(),
                variables_reference: 0,
            });
        }

        // Drop cached varobjs at this frame tuple that are no longer
        // among the locals (out-of-scope per §4.5's reconciliation rule).
        let live_names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        let cached_keys = self.state.lock().await.varobj_keys_for_frame(
            frame_key.thread_id,
            frame_key.frame_level,
            frame_key.stack_depth,
        );
        for key in cached_keys {
            if !live_names.contains(&key.expression.as_str()) {
                self.state.lock().await.remove_varobj(&key);
            }
        }

        Ok(entries)
    }

    /// §4.5 `variables(reference)`, object branch: `-var-list-children`,
    /// transparently descending one level through access-scope pseudo-
    /// children (a C++ access specifier group never nests another one, so
    /// a single extra round trip is enough). `parent_evaluate_name` is the
    /// already-resolved evaluate-name of `internal_name`'s own varobj, used
    /// to compose bracketed array-element evaluate-names.
    pub async fn variables_for_object(
        &self,
        internal_name: &str,
        parent_evaluate_name: &str,
    ) -> Result<Vec<VariableEntry>> {
        let children = self.list_children(internal_name).await?;

        let mut entries = Vec::new();
        for (exp, has_type, gdb_name, value, var_type) in children {
            if is_access_scope_pseudo_child(&exp, has_type) {
                entries.extend(self.list_children(&gdb_name).await?.into_iter().map(
                    |(exp, _, _, value, var_type)| VariableEntry {
                        name: exp.clone(),
                        value,
                        var_type,
                        evaluate_name: exp,
                        variables_reference: 0,
                    },
                ));
                continue;
            }

            // GDB names array-element children with their bare numeric
            // index (§4.5: "Array elements display with `[i]` names and
            // compose evaluate-names with bracket syntax").
            if let Ok(index) = exp.parse::<usize>() {
                let (name, evaluate_name) = array_element_names(parent_evaluate_name, index);
                entries.push(VariableEntry {
                    name,
                    value,
                    var_type,
                    evaluate_name,
                    variables_reference: 0,
                });
                continue;
            }

            entries.push(VariableEntry {
                name: exp.clone(),
                value,
                var_type,
                evaluate_name: exp,
                variables_reference: 0,
            });
        }
        Ok(entries)
    }

    /// Raw `-var-list-children` call, returning `(exp, has_type, gdb_name,
    /// value, type)` tuples for each child.
    async fn list_children(
        &self,
        internal_name: &str,
    ) -> Result<Vec<(String, bool, String, String, Option<String>)>> {
        let result = self
            .submit(&format!("-var-list-children --all-values {internal_name}"))
            .await?;
        let children = result
            .results
            .get("children")
            .and_then(|v| v.as_list())
            .map(|list| list.to_vec())
            .unwrap_or_default();

        Ok(children
            .iter()
            .filter_map(|child| child.as_tuple())
            .map(|tuple| {
                let exp = tuple.get("exp").and_then(|v| v.as_string()).unwrap_or("").to_string();
                let has_type = tuple.get("type").is_some();
                let gdb_name = tuple.get("name").and_then(|v| v.as_string()).unwrap_or("").to_string();
                let value = tuple.get("value").and_then(|v| v.as_string()).unwrap_or("").to_string();
                let var_type = tuple.get("type").and_then(|v| v.as_string()).map(String::from);
                (exp, has_type, gdb_name, value, var_type)
            })
            .collect())
    }

    /// §4.5 `set-variable` / `set-expression` via `-var-assign`, retrying
    /// through access-scope children on failure.
    pub async fn set_variable(&self, internal_name: &str, value: &str) -> Result<()> {
        match self
            .submit(&format!("-var-assign {internal_name} \"{value}\""))
            .await
        {
            Ok(_) => Ok(()),
            Err(_) => {
                for scope in ["public", "protected", "private"] {
                    let scoped = format!("{internal_name}.{scope}");
                    if self
                        .submit(&format!("-var-assign {scoped} \"{value}\""))
                        .await
                        .is_ok()
                    {
                        return Ok(());
                    }
                }
                Err(AdapterError::Mi(format!(
                    "could not assign '{value}' to '{internal_name}' directly or via access-scope children"
                )))
            }
        }
    }

    /// §4.5 `read-memory`: clamps `count` to the requested length and
    /// base64-encodes the wire payload.
    pub async fn read_memory(&self, address: &str, count: u64) -> Result<String> {
        let result = self
            .submit_needs_stopped(&format!("-data-read-memory-bytes {address} {count}"))
            .await?;
        let contents = result
            .results
            .get("memory")
            .and_then(|v| v.as_list())
            .and_then(|list| list.first())
            .and_then(|v| v.as_tuple())
            .and_then(|t| t.get("contents"))
            .and_then(|v| v.as_string())
            .ok_or_else(|| AdapterError::Mi("data-read-memory-bytes reply missing contents".to_string()))?;

        let bytes = hex_to_bytes(contents)
            .ok_or_else(|| AdapterError::Mi("unexpected memory contents encoding".to_string()))?;
        let clamped = &bytes[..bytes.len().min(count as usize)];
        Ok(base64::engine::general_purpose::STANDARD.encode(clamped))
    }

    pub async fn write_memory(&self, address: &str, base64_data: &str) -> Result<()> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(base64_data)
            .map_err(|e| AdapterError::Protocol(format!("invalid base64 payload: {e}")))?;
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        self.submit_needs_stopped(&format!("-data-write-memory-bytes {address} {hex}"))
            .await?;
        Ok(())
    }

    /// §4.5 `customReset`: pause-if-needed around the configured command
    /// batch if the target is currently running.
    pub async fn custom_reset(&self) -> Result<()> {
        if self.config.custom_reset_commands.is_empty() {
            return Ok(());
        }
        for cmd in self.config.custom_reset_commands.clone() {
            let needs_stopped = Command::new(&cmd).needing_stopped();
            self.coordinator.execute(&self.router, needs_stopped).await?;
        }
        Ok(())
    }

    /// §4.5 `disassemble`: `-data-disassemble` over `[start, start + count *
    /// mean-instruction-size)`. A negative `instruction_offset` has no
    /// valid address to start from, so that many leading entries are
    /// synthesized as `invalid` placeholders instead of queried from GDB.
    pub async fn disassemble(
        &self,
        memory_reference: &str,
        instruction_offset: i64,
        instruction_count: i64,
    ) -> Result<Vec<DisassembledInstruction>> {
        let base_addr = u64::from_str_radix(memory_reference.trim_start_matches("0x"), 16)
            .map_err(|_| AdapterError::Protocol(format!("invalid memoryReference '{memory_reference}'")))?;

        let mut instructions = Vec::new();
        let mut remaining = instruction_count;
        let mut address = base_addr;

        if instruction_offset < 0 {
            let invalid_count = (-instruction_offset).min(instruction_count.max(0)) as usize;
            for (addr, hint) in invalid_disassembly_padding(address, invalid_count) {
                instructions.push(DisassembledInstruction {
                    address: format!("0x{addr:x}"),
                    instruction: hint.to_string(),
                    invalid: true,
                });
            }
            remaining -= invalid_count as i64;
            address += invalid_count as u64 * 2;
        }

        if remaining > 0 {
            let start_addr = format!("0x{address:x}");
            let (start, end) = disassemble_range(&start_addr, remaining, MEAN_INSTRUCTION_SIZE);
            let result = self
                .submit(&format!("-data-disassemble -s {start} -e {end} -- 0"))
                .await?;
            let asm = result
                .results
                .get("asm_insns")
                .and_then(|v| v.as_list())
                .map(|list| list.to_vec())
                .unwrap_or_default();

            for insn in asm.iter().filter_map(|v| v.as_tuple()) {
                let addr = insn.get("address").and_then(|v| v.as_string()).unwrap_or("0x0").to_string();
                let text = insn.get("inst").and_then(|v| v.as_string()).unwrap_or("").to_string();
                instructions.push(DisassembledInstruction {
                    address: addr,
                    instruction: text,
                    invalid: false,
                });
            }
        }

        Ok(instructions)
    }

    /// §4.4's timeout wrapper for `next`/`stepIn`/`stepOut`: the MI command
    /// runs on its own task so it keeps going whichever way the race goes.
    /// If it settles before the timer, its own result is returned; if the
    /// timer fires first, the caller gets an immediate success and any
    /// later failure is reported as `output{category=console}` instead of
    /// a second response (§8 scenario 7).
    pub async fn step_with_timeout(&self, request_label: &str, mi_text: &str) -> Result<()> {
        let cmd = Command::new(mi_text);
        let router = self.router.clone();
        let coordinator = self.coordinator.clone();
        let mut handle = tokio::spawn(async move { coordinator.execute(&router, cmd).await });

        let Some(duration) = self.config.stepping_timeout() else {
            return (&mut handle)
                .await
                .map_err(|_| AdapterError::SessionEnded)?
                .map(|_| ())
                .map_err(Into::into);
        };

        tokio::select! {
            joined = &mut handle => {
                joined.map_err(|_| AdapterError::SessionEnded)?.map(|_| ()).map_err(Into::into)
            }
            _ = tokio::time::sleep(duration) => {
                let label = request_label.to_string();
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    if let Ok(Err(e)) = handle.await {
                        log::warn!("late MI error after stepping timeout for {label}: {e}");
                        let _ = event_tx.send(GdbEvent::ProcessOutput {
                            category: OutputCategory::Console,
                            text: format!("Error occurred during the {label}"),
                        });
                    }
                });
                Ok(())
            }
        }
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }
}

/// GDB's memory-bytes `contents` field is a hex string, not base64; this
/// bridges it to the base64 wire format the front-end expects (§6).
fn hex_to_bytes(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bp(client_id: u32, last_line: Option<u32>) -> Breakpoint {
        Breakpoint {
            client_id,
            gdb_number: Some(client_id),
            kind: BreakpointKind::Source,
            location: "main.c".to_string(),
            condition: None,
            hit_count: None,
            log_message: None,
            hardware: false,
            verified: true,
            last_line,
        }
    }

    #[test]
    fn breakpoint_diff_keeps_matching_lines() {
        let a = bp(1, Some(10));
        let b = bp(2, Some(20));
        let existing = vec![&a, &b];
        let plan = plan_breakpoint_diff(&existing, &[10, 30]);
        assert_eq!(plan.keep, vec![(1, 10)]);
        assert_eq!(plan.delete, vec![2]);
        assert_eq!(plan.insert, vec![30]);
    }

    #[test]
    fn breakpoint_diff_handles_full_overlap() {
        let a = bp(1, Some(10));
        let existing = vec![&a];
        let plan = plan_breakpoint_diff(&existing, &[10]);
        assert_eq!(plan.keep, vec![(1, 10)]);
        assert!(plan.delete.is_empty());
        assert!(plan.insert.is_empty());
    }

    #[test]
    fn breakpoint_diff_handles_empty_request() {
        let a = bp(1, Some(10));
        let existing = vec![&a];
        let plan = plan_breakpoint_diff(&existing, &[]);
        assert_eq!(plan.delete, vec![1]);
        assert!(plan.keep.is_empty());
        assert!(plan.insert.is_empty());
    }

    #[test]
    fn named_breakpoint_diff_matches_by_name_not_line() {
        let mut a = bp(1, None);
        a.location = "main".to_string();
        let mut b = bp(2, None);
        b.location = "helper".to_string();
        let existing = vec![&a, &b];
        let plan = plan_named_breakpoint_diff(&existing, &["main".to_string(), "new_fn".to_string()]);
        assert_eq!(plan.keep, vec![(1, "main".to_string())]);
        assert_eq!(plan.delete, vec![2]);
        assert_eq!(plan.insert, vec!["new_fn".to_string()]);
    }

    #[test]
    fn break_list_tuples_extracts_bkpt_entries() {
        use crate::types::{MIResult, ResultClass};

        let mut bkpt = HashMap::new();
        bkpt.insert("number".to_string(), MIValue::String("1".to_string()));
        bkpt.insert("line".to_string(), MIValue::String("44".to_string()));

        let mut table = HashMap::new();
        table.insert(
            "body".to_string(),
            MIValue::NamedList(vec![("bkpt".to_string(), MIValue::Tuple(bkpt))]),
        );

        let mut results = HashMap::new();
        results.insert("BreakpointTable".to_string(), MIValue::Tuple(table));

        let result = MIResult {
            token: None,
            class: ResultClass::Done,
            results,
        };

        let tuples = break_list_tuples(&result);
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].get("number").and_then(|v| v.as_string()), Some("1"));
    }

    #[test]
    fn reconcile_drops_breakpoints_missing_from_break_list_and_updates_relocated_lines() {
        let a = bp(1, Some(10));
        let b = bp(2, Some(20));
        let existing = vec![&a, &b];

        let mut relocated = HashMap::new();
        relocated.insert("number".to_string(), MIValue::String("1".to_string()));
        relocated.insert("line".to_string(), MIValue::String("11".to_string()));
        let table = vec![&relocated];

        let (relocations, dropped) = reconcile_breakpoint_cache(&existing, &table);
        assert_eq!(relocations, vec![(1, 11)]);
        assert_eq!(dropped, vec![2]);
    }

    #[test]
    fn stop_reason_mapping_matches_spec_table() {
        assert_eq!(map_stop_reason("breakpoint-hit", None).as_deref(), Some("breakpoint"));
        assert_eq!(map_stop_reason("end-stepping-range", None).as_deref(), Some("step"));
        assert_eq!(map_stop_reason("function-finished", None).as_deref(), Some("step"));
        assert_eq!(
            map_stop_reason("watchpoint-trigger", None).as_deref(),
            Some("data breakpoint")
        );
        assert_eq!(
            map_stop_reason("signal-received", Some("SIGSEGV")).as_deref(),
            Some("SIGSEGV")
        );
        assert_eq!(map_stop_reason("exited-normally", None), None);
    }

    #[test]
    fn access_scope_pseudo_children_are_detected() {
        assert!(is_access_scope_pseudo_child("public", false));
        assert!(!is_access_scope_pseudo_child("public", true));
        assert!(!is_access_scope_pseudo_child("m_value", false));
    }

    #[test]
    fn array_element_naming_composes_brackets() {
        let (name, eval_name) = array_element_names("arr", 3);
        assert_eq!(name, "[3]");
        assert_eq!(eval_name, "arr[3]");
    }

    #[test]
    fn disassemble_range_applies_mean_instruction_size() {
        let (start, end) = disassemble_range("0x1000", 4, 4);
        assert_eq!(start, "0x1000");
        assert_eq!(end, "0x1000+16");
    }

    #[test]
    fn invalid_padding_steps_addresses_by_two() {
        let padding = invalid_disassembly_padding(0x2000, 3);
        assert_eq!(padding[0].0, 0x2000);
        assert_eq!(padding[1].0, 0x2002);
        assert_eq!(padding[2].0, 0x2004);
        assert!(padding.iter().all(|(_, hint)| *hint == "invalid"));
    }

    #[test]
    fn hex_to_bytes_roundtrips() {
        assert_eq!(hex_to_bytes("48656c6c6f"), Some(b"Hello".to_vec()));
        assert_eq!(hex_to_bytes("abc"), None);
    }
}
