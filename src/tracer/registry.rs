use std::collections::HashMap;
use std::path::PathBuf;

use crate::tracer::raw::RawString;
use crate::tracer::sink::ProcessId;

/// OS-level task identifier (what the kernel calls a pid for a thread).
pub type Tid = i32;

/// Number of raw syscall arguments captured at syscall entry.
pub const PROCESS_ARGS : usize = 6;

/// The ABI a task is currently running under. A process may switch modes
/// when it execs a binary of the other width.
#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum Mode {
    I386,
    X86_64
}

impl Mode {
    /// Width of a machine word (and pointer) in the tracee's address space.
    pub fn word_size(self) -> usize {
        match self {
            Mode::I386 => { 4 }
            Mode::X86_64 => { 8 }
        }
    }
}

/// A raw register-sized syscall argument.
///
/// Arguments are captured without interpretation; the handler that consumes
/// one decides whether it is a signed integer, an unsigned integer, or a
/// pointer into the tracee's address space. Values captured from a 32-bit
/// task are already sign-extended to the full width.
#[derive(Debug,Clone,Copy,Default,PartialEq,Eq)]
pub struct Arg(pub u64);

impl Arg {
    pub fn signed(self) -> i64 {
        self.0 as i64
    }

    pub fn unsigned(self) -> u64 {
        self.0
    }

    pub fn ptr(self) -> u64 {
        self.0
    }
}

#[derive(Debug,Clone,Copy,PartialEq,Eq)]
pub enum ProcessStatus {
    /// Seen by the stop loop before its creator's fork/clone returned.
    Unknown,
    /// Created by a fork/clone return before its first stop was seen.
    Allocated,
    /// Fully adopted: the task is stopped-or-running under our control.
    Attached
}

/// Scratch carried on a task between the entry and exit of an execve.
///
/// The argument vectors are copied out at entry because the kernel replaces
/// the address space before the exit stop is delivered.
#[derive(Debug,Clone)]
pub struct ExecveScratch {
    pub binary : PathBuf,
    pub argv : Vec<RawString>,
    pub envp : Vec<RawString>
}

/// One live traced task.
#[derive(Debug)]
pub struct Process {
    pub tid : Tid,
    /// Thread-group leader's tid; equals `tid` for a process. Immutable once
    /// assigned by the fork/clone handler.
    pub tgid : Tid,
    /// Sink handle; assigned before the task is first resumed.
    pub identifier : Option<ProcessId>,
    pub status : ProcessStatus,
    pub mode : Mode,
    /// Working directory as last observed. May lag the kernel between a
    /// chdir exit and the next stop.
    pub wd : PathBuf,
    /// Toggled on every syscall boundary crossing; distinguishes the entry
    /// stop from the exit stop.
    pub in_syscall : bool,
    /// Syscall number captured at the most recent entry; -1 outside a call.
    pub current_syscall : i64,
    pub params : [Arg; PROCESS_ARGS],
    pub retvalue : i64,
    pub scratch : Option<ExecveScratch>
}

impl Process {
    fn new(tid : Tid, status : ProcessStatus) -> Process {
        Process {
            tid,
            tgid : 0,
            identifier : None,
            status,
            mode : Mode::X86_64,
            wd : PathBuf::new(),
            in_syscall : false,
            current_syscall : -1,
            params : [Arg(0); PROCESS_ARGS],
            retvalue : 0,
            scratch : None
        }
    }

    pub fn unknown(tid : Tid) -> Process {
        Process::new(tid, ProcessStatus::Unknown)
    }

    pub fn allocated(tid : Tid) -> Process {
        Process::new(tid, ProcessStatus::Allocated)
    }

    pub fn attached(tid : Tid, wd : PathBuf) -> Process {
        let mut process = Process::new(tid, ProcessStatus::Attached);
        process.tgid = tid;
        process.wd = wd;
        process
    }
}

/// The set of currently traced tasks, keyed by tid.
///
/// The registry owns every record. A task that exits (or whose identity is
/// absorbed by its thread-group leader during an exec) is removed outright.
#[derive(Debug,Default)]
pub struct Registry {
    tasks : HashMap<Tid, Process>
}

impl Registry {
    pub fn new() -> Registry {
        Registry { tasks : HashMap::new() }
    }

    pub fn get(&self, tid : Tid) -> Option<&Process> {
        self.tasks.get(&tid)
    }

    pub fn get_mut(&mut self, tid : Tid) -> Option<&mut Process> {
        self.tasks.get_mut(&tid)
    }

    pub fn contains(&self, tid : Tid) -> bool {
        self.tasks.contains_key(&tid)
    }

    pub fn insert(&mut self, process : Process) {
        self.tasks.insert(process.tid, process);
    }

    pub fn remove(&mut self, tid : Tid) -> Option<Process> {
        self.tasks.remove(&tid)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Process> {
        self.tasks.values()
    }

    /// Find the task that issued an execve whose exit was reported on
    /// another tid of the same thread group.
    ///
    /// At most one task per tgid can be inside an execve with scratch
    /// attached, so the first match is the only match.
    pub fn find_execve_originator(&self, tgid : Tid, execve_syscall : i64) -> Option<Tid> {
        self.tasks.values()
            .find(|p| p.status == ProcessStatus::Attached
                  && p.tgid == tgid
                  && p.in_syscall
                  && p.current_syscall == execve_syscall
                  && p.scratch.is_some())
            .map(|p| p.tid)
    }

    /// Any task of the given thread group currently holding execve scratch.
    pub fn execve_scratch_holder(&self, tgid : Tid) -> Option<Tid> {
        self.tasks.values()
            .find(|p| p.tgid == tgid && p.scratch.is_some())
            .map(|p| p.tid)
    }
}
