/// GDB/MI wire types.
///
/// These are the tagged records the parser (`parser.rs`) produces and the
/// router/queue/translator consume. Everything here models §3 "Command"
/// less the scheduling metadata (that lives on `queue::Command`) and §4.1's
/// grammar.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One parsed line of GDB/MI output.
#[derive(Debug, Clone, PartialEq)]
pub enum GdbOutput {
    Result(MIResult),
    Async(MIAsync),
    Stream(MIStream),
}

/// A `^`-prefixed result record, optionally correlated to a command token.
#[derive(Debug, Clone, PartialEq)]
pub struct MIResult {
    pub token: Option<u32>,
    pub class: ResultClass,
    pub results: HashMap<String, MIValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

/// A `*`/`+`/`=`-prefixed async record. Arrives unsolicited.
#[derive(Debug, Clone, PartialEq)]
pub struct MIAsync {
    pub kind: AsyncKind,
    pub class: AsyncClass,
    pub results: HashMap<String, MIValue>,
}

/// The three async record prefixes distinguished by the MI grammar. Most
/// consumers only care about the class, but `+status` records are
/// distinguished from `*exec` ones for completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    Exec,
    Status,
    Notify,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AsyncClass {
    Running,
    Stopped,
    ThreadGroupAdded,
    ThreadGroupRemoved,
    ThreadGroupStarted,
    ThreadGroupExited,
    ThreadCreated,
    ThreadExited,
    ThreadSelected,
    LibraryLoaded,
    LibraryUnloaded,
    TraceframeChanged,
    TsvCreated,
    TsvDeleted,
    TsvModified,
    BreakpointCreated,
    BreakpointModified,
    BreakpointDeleted,
    RecordStarted,
    RecordStopped,
    CmdParamChanged,
    MemoryChanged,
    /// Unrecognized async class, preserved verbatim rather than rejected
    /// (§4.1: "Unknown names are preserved").
    Other(String),
}

/// A `~`/`@`/`&`-prefixed stream record (console/target/log text).
#[derive(Debug, Clone, PartialEq)]
pub struct MIStream {
    pub channel: StreamChannel,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamChannel {
    Console,
    Target,
    Log,
}

/// A tagged MI attribute value: `String | Tuple | List | NamedList`.
///
/// `NamedList` exists because the grammar allows a list to be written
/// either as `[value, value, ...]` or as `[name=value, name=value, ...]`
/// (e.g. register-values lists); collapsing the latter into a plain `List`
/// would silently drop the names, so it gets its own variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MIValue {
    String(String),
    Tuple(HashMap<String, MIValue>),
    List(Vec<MIValue>),
    NamedList(Vec<(String, MIValue)>),
}

impl MIValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            MIValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MIValue]> {
        match self {
            MIValue::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&HashMap<String, MIValue>> {
        match self {
            MIValue::Tuple(tuple) => Some(tuple),
            _ => None,
        }
    }

    pub fn as_named_list(&self) -> Option<&[(String, MIValue)]> {
        match self {
            MIValue::NamedList(list) => Some(list),
            _ => None,
        }
    }

    /// Convenience accessor: GDB frequently emits numeric attributes as
    /// quoted decimal strings (`line="68"`); this parses through that.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_string().and_then(|s| s.parse().ok())
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_string().and_then(|s| s.parse().ok())
    }
}

/// Events delivered from the GDB reader task to the session loop.
#[derive(Debug, Clone)]
pub enum GdbEvent {
    Async(MIAsync),
    Stream(MIStream),
    /// A result record with no token: an out-of-band response to a command
    /// issued via `-interpreter-exec console` or similar pass-through.
    UntokenizedResult(MIResult),
    /// A line of raw output not on the MI stdout channel (GDB stderr, or
    /// the target server's stdout/stderr), tagged with the category the
    /// front-end `output` event uses (§6).
    ProcessOutput {
        category: OutputCategory,
        text: String,
    },
    /// The supervised child (GDB or the target server) exited.
    ChildExited { which: ChildKind, code: Option<i32> },
}

/// Front-end `output{category}` values (§6 External Interfaces).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCategory {
    Stdout,
    Stderr,
    Console,
    Log,
    Server,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Gdb,
    TargetServer,
}
