/// Session State (C5).
///
/// Holds everything the translator (C6) needs that outlives a single MI
/// request/response pair: the thread table, the frame/variable handle
/// allocators (both reset on every non-transient stop), the varobj cache,
/// and the breakpoint table. Mutated only by the translator, in response to
/// MI events or request handlers (§5).
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Coarse session state, mirrors the teacher's event-driven `DebugState`
/// but widened with the transitions this adapter actually needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DebugState {
    NotStarted,
    Initializing,
    Running,
    Stopped,
    Exited(i32),
    Error(String),
}

#[derive(Debug, Clone, Default)]
pub struct Thread {
    pub id: u32,
    pub name: Option<String>,
    pub running: bool,
}

/// One `i1`-style inferior/thread-group, tracked from `=thread-group-*`
/// notifications (§4.1 async classes). `pid` is only known once GDB
/// reports the group as started (i.e. the inferior actually ran).
#[derive(Debug, Clone, Default)]
pub struct ThreadGroup {
    pub id: String,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
}

/// A frame or variable handle, opaque to the front-end. Allocation is
/// monotonic and reset wholesale on every non-transient stop (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

#[derive(Debug, Default)]
struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    fn alloc(&mut self) -> Handle {
        self.next += 1;
        Handle(self.next)
    }

    fn reset(&mut self) {
        self.next = 0;
    }
}

/// Key a varobj is cached under: thread/frame/stack-depth identify *which*
/// live frame it belongs to, and the expression (or GDB-internal name)
/// identifies *what* within that frame. The stack-depth component is what
/// lets the translator tell "same frame level, different call" apart after
/// a stop (§3's liveness invariant).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarobjKey {
    pub thread_id: u32,
    pub frame_level: u32,
    pub stack_depth: u32,
    pub expression: String,
}

#[derive(Debug, Clone)]
pub struct Varobj {
    pub internal_name: String,
    pub expression: String,
    pub var_type: Option<String>,
    pub depth_at_creation: u32,
}

/// `{client-id, gdb-number, kind, location, options, verified, last-line,
/// mode?}` per §3.
#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub client_id: u32,
    pub gdb_number: Option<u32>,
    pub kind: BreakpointKind,
    pub location: String,
    pub condition: Option<String>,
    pub hit_count: Option<u32>,
    pub log_message: Option<String>,
    pub hardware: bool,
    pub verified: bool,
    pub last_line: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Source,
    Function,
    Instruction,
    Watch,
}

impl Breakpoint {
    pub fn from_tuple(
        client_id: u32,
        kind: BreakpointKind,
        location: String,
        tuple: &HashMap<String, crate::types::MIValue>,
    ) -> Self {
        let gdb_number = tuple.get("number").and_then(|v| v.as_string()).and_then(|s| s.parse().ok());
        let line = tuple.get("line").and_then(|v| v.as_u64()).map(|n| n as u32);
        Breakpoint {
            client_id,
            gdb_number,
            kind,
            location,
            condition: None,
            hit_count: None,
            log_message: None,
            hardware: false,
            verified: gdb_number.is_some(),
            last_line: line,
        }
    }
}

/// The C5 component proper: everything that outlives one request.
#[derive(Default)]
pub struct SessionState {
    pub debug_state: DebugState,
    threads: HashMap<u32, Thread>,
    thread_groups: HashMap<String, ThreadGroup>,
    frame_handles: HandleAllocator,
    variable_handles: HandleAllocator,
    varobjs: HashMap<VarobjKey, Varobj>,
    /// Keyed by `client-id`, which stays stable across `set-breakpoints`
    /// calls for the same source (§3).
    breakpoints: HashMap<u32, Breakpoint>,
    next_client_id: u32,
}

impl Default for DebugState {
    fn default() -> Self {
        DebugState::NotStarted
    }
}

impl SessionState {
    pub fn new() -> Self {
        SessionState {
            debug_state: DebugState::NotStarted,
            ..Default::default()
        }
    }

    // -- threads --------------------------------------------------------

    pub fn thread_created(&mut self, id: u32) {
        self.threads.entry(id).or_insert(Thread {
            id,
            name: None,
            running: false,
        });
    }

    pub fn thread_exited(&mut self, id: u32) {
        self.threads.remove(&id);
    }

    pub fn thread(&self, id: u32) -> Option<&Thread> {
        self.threads.get(&id)
    }

    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    pub fn set_thread_running(&mut self, id: u32, running: bool) {
        if let Some(t) = self.threads.get_mut(&id) {
            t.running = running;
        }
    }

    // -- thread groups ------------------------------------------------------

    pub fn thread_group_added(&mut self, id: &str) {
        self.thread_groups.entry(id.to_string()).or_insert_with(|| ThreadGroup {
            id: id.to_string(),
            ..Default::default()
        });
    }

    pub fn thread_group_started(&mut self, id: &str, pid: Option<u32>) {
        let group = self
            .thread_groups
            .entry(id.to_string())
            .or_insert_with(|| ThreadGroup { id: id.to_string(), ..Default::default() });
        group.pid = pid;
        group.exit_code = None;
    }

    pub fn thread_group_exited(&mut self, id: &str, exit_code: Option<i32>) {
        if let Some(group) = self.thread_groups.get_mut(id) {
            group.exit_code = exit_code;
        }
    }

    pub fn thread_group_removed(&mut self, id: &str) {
        self.thread_groups.remove(id);
    }

    pub fn thread_group(&self, id: &str) -> Option<&ThreadGroup> {
        self.thread_groups.get(id)
    }

    pub fn thread_groups(&self) -> impl Iterator<Item = &ThreadGroup> {
        self.thread_groups.values()
    }

    // -- handles ----------------------------------------------------------

    pub fn alloc_frame_handle(&mut self) -> Handle {
        self.frame_handles.alloc()
    }

    pub fn alloc_variable_handle(&mut self) -> Handle {
        self.variable_handles.alloc()
    }

    /// Called on every non-transient stop (§4.5 "Invalidate frame handles
    /// and variable handles on every non-transient stop"). Varobjs are not
    /// dropped here — they're re-validated lazily on the next `evaluate`/
    /// `variables` call against the new stack depth (§3).
    pub fn invalidate_on_stop(&mut self) {
        self.frame_handles.reset();
        self.variable_handles.reset();
    }

    // -- varobjs ----------------------------------------------------------

    pub fn lookup_varobj(&self, key: &VarobjKey) -> Option<&Varobj> {
        self.varobjs.get(key)
    }

    pub fn insert_varobj(&mut self, key: VarobjKey, varobj: Varobj) {
        self.varobjs.insert(key, varobj);
    }

    pub fn remove_varobj(&mut self, key: &VarobjKey) -> Option<Varobj> {
        self.varobjs.remove(key)
    }

    /// All varobj keys cached for one frame tuple, for reconciling against
    /// a freshly-listed set of locals (§4.5 variables/frame branch).
    pub fn varobj_keys_for_frame(&self, thread_id: u32, frame_level: u32, stack_depth: u32) -> Vec<VarobjKey> {
        self.varobjs
            .keys()
            .filter(|k| k.thread_id == thread_id && k.frame_level == frame_level && k.stack_depth == stack_depth)
            .cloned()
            .collect()
    }

    /// A varobj is stale if it was created at a stack depth other than the
    /// frame's current depth (§3's liveness invariant over `depth-at-creation`).
    pub fn varobj_is_stale(varobj: &Varobj, current_stack_depth: u32) -> bool {
        varobj.depth_at_creation != current_stack_depth
    }

    // -- breakpoints --------------------------------------------------------

    pub fn next_client_id(&mut self) -> u32 {
        self.next_client_id += 1;
        self.next_client_id
    }

    pub fn set_breakpoint(&mut self, bp: Breakpoint) {
        self.breakpoints.insert(bp.client_id, bp);
    }

    pub fn breakpoint(&self, client_id: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(&client_id)
    }

    pub fn breakpoint_mut(&mut self, client_id: u32) -> Option<&mut Breakpoint> {
        self.breakpoints.get_mut(&client_id)
    }

    pub fn remove_breakpoint(&mut self, client_id: u32) -> Option<Breakpoint> {
        self.breakpoints.remove(&client_id)
    }

    /// Breakpoints for one source file, in client-id order, for diffing
    /// against an incoming `set-breakpoints` request (§4.5).
    pub fn breakpoints_for_location_prefix(&self, location_prefix: &str) -> Vec<&Breakpoint> {
        let mut matches: Vec<&Breakpoint> = self
            .breakpoints
            .values()
            .filter(|bp| bp.location.starts_with(location_prefix))
            .collect();
        matches.sort_by_key(|bp| bp.client_id);
        matches
    }

    /// Breakpoints of one kind, for diffing `setFunctionBreakpoints`/
    /// `setInstructionBreakpoints` against the incoming request (§4.5).
    pub fn breakpoints_by_kind(&self, kind: BreakpointKind) -> Vec<&Breakpoint> {
        let mut matches: Vec<&Breakpoint> = self.breakpoints.values().filter(|bp| bp.kind == kind).collect();
        matches.sort_by_key(|bp| bp.client_id);
        matches
    }

    pub fn gdb_number_by_gdb_number(&self, number: u32) -> Option<u32> {
        self.breakpoints
            .values()
            .find(|bp| bp.gdb_number == Some(number))
            .map(|bp| bp.client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MIValue;

    #[test]
    fn handle_allocator_is_monotonic_and_resets() {
        let mut state = SessionState::new();
        let a = state.alloc_frame_handle();
        let b = state.alloc_frame_handle();
        assert!(b.0 > a.0);
        state.invalidate_on_stop();
        let c = state.alloc_frame_handle();
        assert_eq!(c.0, 1);
    }

    #[test]
    fn varobj_staleness_follows_stack_depth() {
        let varobj = Varobj {
            internal_name: "var1".into(),
            expression: "x".into(),
            var_type: Some("int".into()),
            depth_at_creation: 3,
        };
        assert!(!SessionState::varobj_is_stale(&varobj, 3));
        assert!(SessionState::varobj_is_stale(&varobj, 4));
    }

    #[test]
    fn breakpoint_table_preserves_client_id_order() {
        let mut state = SessionState::new();
        let mut tuple = HashMap::new();
        tuple.insert("number".to_string(), MIValue::String("1".to_string()));
        tuple.insert("line".to_string(), MIValue::String("42".to_string()));

        let id1 = state.next_client_id();
        state.set_breakpoint(Breakpoint::from_tuple(
            id1,
            BreakpointKind::Source,
            "main.c:42".to_string(),
            &tuple,
        ));
        let id2 = state.next_client_id();
        state.set_breakpoint(Breakpoint::from_tuple(
            id2,
            BreakpointKind::Source,
            "main.c:50".to_string(),
            &tuple,
        ));

        let ordered = state.breakpoints_for_location_prefix("main.c");
        assert_eq!(ordered.len(), 2);
        assert!(ordered[0].client_id < ordered[1].client_id);
    }

    #[test]
    fn thread_group_lifecycle_tracks_pid_and_exit_code() {
        let mut state = SessionState::new();
        state.thread_group_added("i1");
        assert!(state.thread_group("i1").unwrap().pid.is_none());
        state.thread_group_started("i1", Some(4242));
        assert_eq!(state.thread_group("i1").unwrap().pid, Some(4242));
        state.thread_group_exited("i1", Some(0));
        assert_eq!(state.thread_group("i1").unwrap().exit_code, Some(0));
        state.thread_group_removed("i1");
        assert!(state.thread_group("i1").is_none());
    }

    #[test]
    fn thread_lifecycle() {
        let mut state = SessionState::new();
        state.thread_created(1);
        assert!(state.thread(1).is_some());
        state.thread_exited(1);
        assert!(state.thread(1).is_none());
    }
}
