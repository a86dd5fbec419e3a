use std::path::Path;

use tracing::{debug,error,info,trace,warn};

use crate::tracer::registry::{Arg,Process,ProcessStatus,Registry,Tid};
use crate::tracer::sink::{EventSink,ProcessId,SinkError};
use crate::tracer::syscalls::{Abi,EntryAction,ExitAction,SyscallTables,
                              EXECVE_I386,EXECVE_X86_64,SYSCALL_LIMIT,X32_SYSCALL_BIT};
use crate::tracer::tracee::{TraceeIo,TraceeIoError};

#[derive(thiserror::Error,Debug)]
pub enum TraceError {
    #[error("event sink failure")]
    Sink(#[from] SinkError),
    #[error("tracee I/O failure")]
    TraceeIo(#[from] TraceeIoError),
    #[error("tracer invariant violated: {0}")]
    Invariant(String)
}

/// The syscall dispatch engine.
///
/// Serves stop events one at a time: looks the stopped task up in the
/// registry, decodes which call it is entering or leaving, runs the matching
/// handler, and resumes the task. All registry mutation happens here and in
/// the handlers it invokes; nothing runs concurrently with a handler.
pub struct Tracer<T, S> {
    pub(crate) io : T,
    pub(crate) sink : S,
    pub(crate) tables : SyscallTables,
    pub(crate) registry : Registry
}

impl<T : TraceeIo, S : EventSink> Tracer<T, S> {
    pub fn new(io : T, sink : S, tables : SyscallTables) -> Tracer<T, S> {
        Tracer { io, sink, tables, registry : Registry::new() }
    }

    pub fn io_mut(&mut self) -> &mut T {
        &mut self.io
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn into_parts(self) -> (T, S) {
        (self.io, self.sink)
    }

    /// Record the root of the traced tree and adopt its task.
    pub fn register_root(&mut self, tid : Tid, wd : &Path) -> Result<ProcessId, TraceError> {
        let identifier = self.sink.add_process(None, wd)?;
        let mut process = Process::attached(tid, wd.to_path_buf());
        process.identifier = Some(identifier);
        self.registry.insert(process);
        info!(tid, "tracing root process (working directory: {})", wd.display());
        Ok(identifier)
    }

    /// Serve one syscall-boundary stop for `tid` and resume it.
    ///
    /// Whether this is the entry or the exit of a call is decided by the
    /// task's own toggle, not by anything in the event: for any one task the
    /// kernel strictly alternates the two.
    pub fn handle_syscall_stop(&mut self, tid : Tid) -> Result<(), TraceError> {
        let regs = self.io.registers(tid)?;

        let (in_syscall, raw_syscall, mode, tgid) = match self.registry.get_mut(tid) {
            None => {
                error!(tid, "syscall stop for a task the registry does not know");
                return Err(TraceError::Invariant(format!("no record for task {}", tid)));
            }
            Some(process) => {
                process.mode = regs.mode;
                if !process.in_syscall {
                    process.current_syscall = regs.syscall;
                    for (slot, value) in process.params.iter_mut().zip(regs.params.iter()) {
                        *slot = Arg(*value);
                    }
                } else {
                    process.retvalue = regs.retvalue;
                }
                (process.in_syscall, process.current_syscall, process.mode, process.tgid)
            }
        };

        let syscall = raw_syscall & !X32_SYSCALL_BIT;
        if syscall < 0 || syscall >= SYSCALL_LIMIT {
            warn!(tid, "invalid syscall number {}", syscall);
        } else {
            let abi = Abi::of_task(mode, raw_syscall);
            trace!(tid, "syscall {} ({:?})", syscall, abi);

            // A process may switch ABI at exec. The number recorded at the
            // entry of such an execve does not index the table its exit mode
            // selects, so when a task of this thread group is mid-execve
            // with scratch attached, route the exit through the table the
            // call entered under.
            let mut slot = None;
            if in_syscall {
                if syscall == EXECVE_X86_64
                   && self.registry.find_execve_originator(tgid, EXECVE_X86_64).is_some() {
                    slot = self.tables.lookup(Abi::X86_64, EXECVE_X86_64);
                } else if syscall == EXECVE_I386
                          && self.registry.find_execve_originator(tgid, EXECVE_I386).is_some() {
                    slot = self.tables.lookup(Abi::I386, EXECVE_I386);
                }
            }
            if slot.is_none() {
                slot = self.tables.lookup(abi, syscall);
            }

            if let Some(entry) = slot {
                if !in_syscall {
                    if let Some(action) = entry.entry {
                        debug!(tid, "{}()", entry.name);
                        self.run_entry_action(entry.name, tid, action)?;
                    }
                } else if let Some(action) = entry.exit {
                    debug!(tid, "{}()", entry.name);
                    self.run_exit_action(entry.name, tid, action)?;
                }
            }
        }

        match self.registry.get_mut(tid) {
            Some(process) => {
                if process.in_syscall {
                    process.in_syscall = false;
                    process.current_syscall = -1;
                    process.scratch = None;
                } else {
                    process.in_syscall = true;
                }
            }
            None => {
                return Err(TraceError::Invariant(format!("record for task {} vanished mid-stop", tid)));
            }
        }

        self.io.resume(tid)?;
        Ok(())
    }

    pub(crate) fn run_entry_action(&mut self, name : &'static str, tid : Tid, action : EntryAction) -> Result<(), TraceError> {
        match action {
            EntryAction::ExecveEnter => { self.syscall_execve_in(name, tid) }
        }
    }

    pub(crate) fn run_exit_action(&mut self, name : &'static str, tid : Tid, action : ExitAction) -> Result<(), TraceError> {
        match action {
            ExitAction::FileOpen(kind) => { self.syscall_fileopening(name, tid, kind) }
            ExitAction::FileStat => { self.syscall_filestat(name, tid) }
            ExitAction::Readlink => { self.syscall_readlink(name, tid) }
            ExitAction::Mkdir => { self.syscall_mkdir(name, tid) }
            ExitAction::Symlink { at } => { self.syscall_symlink(name, tid, at) }
            ExitAction::Chdir => { self.syscall_chdir(name, tid) }
            ExitAction::ExecveExit { execve_syscall } => { self.syscall_execve_out(name, tid, execve_syscall) }
            ExitAction::Fork(kind) => { self.syscall_forking(name, tid, kind) }
            ExitAction::Socketcall => { self.syscall_socketcall(name, tid) }
            ExitAction::Accept => { self.syscall_accept(name, tid) }
            ExitAction::Connect => { self.syscall_connect(name, tid) }
            ExitAction::AtAdapter { real_syscall } => { self.syscall_xxx_at(name, tid, real_syscall) }
            ExitAction::UnhandledPath1 => { self.syscall_unhandled_path1(name, tid) }
            ExitAction::UnhandledOther => { self.syscall_unhandled_other(name, tid) }
        }
    }

    /// Serve the first stop of a task we did not start ourselves.
    ///
    /// Creation races both ways: the child's first stop can arrive before or
    /// after its creator's fork/clone exit. A child seen first is parked as
    /// `Unknown` until the fork handler adopts it; a child allocated first
    /// is attached and released here.
    pub fn handle_attach_stop(&mut self, tid : Tid) -> Result<(), TraceError> {
        let known = self.registry.get(tid).map(|p| (p.status, p.identifier));
        match known {
            None => {
                debug!(tid, "new task stopped before its creator's fork returned");
                self.registry.insert(Process::unknown(tid));
                Ok(())
            }
            Some((ProcessStatus::Allocated, identifier)) => {
                if identifier.is_none() {
                    error!(tid, "allocated task has no sink identifier");
                    return Err(TraceError::Invariant(format!("task {} allocated without identifier", tid)));
                }
                if let Some(process) = self.registry.get_mut(tid) {
                    process.status = ProcessStatus::Attached;
                }
                debug!(tid, "task attached");
                self.io.resume(tid)?;
                Ok(())
            }
            Some((ProcessStatus::Attached, _)) => {
                // The root task's own attach-stop; nothing to adopt.
                self.io.resume(tid)?;
                Ok(())
            }
            Some((ProcessStatus::Unknown, _)) => {
                error!(tid, "repeated attach stop for a task never adopted");
                Err(TraceError::Invariant(format!("task {} attached twice", tid)))
            }
        }
    }

    /// Serve a program-replacement event.
    ///
    /// When a non-leader thread execs, the kernel reports the rest of the
    /// call under the leader's tid. Arrange for the leader's next syscall
    /// stop to be treated as the exit of the call the originator entered;
    /// the scratch stays on the originator's record until the exit handler
    /// collects it.
    pub fn handle_exec_event(&mut self, old_tid : Tid, new_tid : Tid) -> Result<(), TraceError> {
        if old_tid == new_tid {
            return Ok(());
        }
        let current_syscall = match self.registry.get(old_tid) {
            Some(origin) => { origin.current_syscall }
            None => {
                warn!(tid = new_tid, "exec event names unknown task {}", old_tid);
                return Ok(());
            }
        };
        match self.registry.get_mut(new_tid) {
            Some(leader) => {
                leader.in_syscall = true;
                leader.current_syscall = current_syscall;
                debug!(tid = new_tid, "adopting execve in flight from thread {}", old_tid);
                Ok(())
            }
            None => {
                Err(TraceError::Invariant(format!("exec reported on unknown task {}", new_tid)))
            }
        }
    }

    /// Serve a task-termination event.
    pub fn handle_exit_stop(&mut self, tid : Tid, status : i32) -> Result<(), TraceError> {
        match self.registry.remove(tid) {
            Some(process) => {
                match process.identifier {
                    Some(identifier) => {
                        info!(tid, "process exited with status {}", status);
                        self.sink.add_exit(identifier, status)?;
                    }
                    None => {
                        debug!(tid, "task exited before it was adopted");
                    }
                }
            }
            None => {
                debug!(tid, "exit event for unknown task");
            }
        }
        Ok(())
    }
}
