use std::process::{Child,Command};

use pete::{Pid,Ptracer,Registers,Restart,Stop,Tracee};

use crate::tracer::memory::TraceeMemoryError;
use crate::tracer::registry::{Mode,Tid,PROCESS_ARGS};

/// Register state of a stopped task, decoded for its ABI.
#[derive(Debug,Clone,Copy)]
pub struct TaskRegisters {
    pub syscall : i64,
    pub params : [u64; PROCESS_ARGS],
    pub retvalue : i64,
    pub mode : Mode
}

#[derive(thiserror::Error,Debug)]
pub enum TraceeIoError {
    #[error("ptrace operation failed for task {tid}")]
    Ptrace { tid : Tid, #[source] source : pete::Error },
    #[error("failed waiting for a tracee to stop")]
    Wait { #[source] source : pete::Error },
    #[error("task {tid} is not traced")]
    UnknownTask { tid : Tid }
}

/// The low-level tracing operations the engine consumes.
///
/// Everything the engine knows about a tracee comes through this interface,
/// which keeps the syscall interpretation machinery independent of the
/// ptrace plumbing that feeds it.
pub trait TraceeIo {
    /// Begin tracing an already-running task.
    fn attach(&mut self, tid : Tid) -> Result<(), TraceeIoError>;

    /// Capture the register state of a stopped task.
    fn registers(&mut self, tid : Tid) -> Result<TaskRegisters, TraceeIoError>;

    /// Read exactly `len` bytes of the task's memory. A short read is an
    /// error, never a truncated buffer.
    fn read(&mut self, tid : Tid, addr : u64, len : usize) -> Result<Vec<u8>, TraceeMemoryError>;

    /// Restart a stopped task, running it to its next syscall boundary.
    fn resume(&mut self, tid : Tid) -> Result<(), TraceeIoError>;
}

// Code segment selectors on x86-64 Linux; a 32-bit task runs under the
// compatibility segment.
const CS_I386 : u64 = 0x23;

/// Production tracee I/O, backed by ptrace.
///
/// Child tasks created by fork/clone/vfork are picked up automatically; the
/// stop loop sees them first as attach-stops.
pub struct PtraceIo {
    ptracer : Ptracer
}

impl PtraceIo {
    pub fn new() -> PtraceIo {
        PtraceIo { ptracer : Ptracer::new() }
    }

    /// Spawn `cmd` with tracing requested before its exec.
    pub fn spawn(&mut self, cmd : Command) -> Result<Child, pete::Error> {
        self.ptracer.spawn(cmd)
    }

    /// Wait for any tracee to stop.
    pub fn wait(&mut self) -> Result<Option<Tracee>, pete::Error> {
        self.ptracer.wait()
    }

    /// Restart a stopped tracee to its next syscall boundary, delivering any
    /// pending signal it was stopped with.
    pub fn restart(&mut self, tracee : Tracee) -> Result<(), pete::Error> {
        self.ptracer.restart(tracee, Restart::Syscall)
    }

    // A handle for ptrace requests against an arbitrary stopped task. The
    // stop kind recorded on the handle is irrelevant for the requests we
    // make through it.
    fn tracee(&self, tid : Tid) -> Tracee {
        Tracee::new(Pid::from_raw(tid), None, Stop::SyscallEnter)
    }

    fn decode(regs : &Registers) -> TaskRegisters {
        if regs.cs == CS_I386 {
            // 32-bit tasks keep their six argument registers in
            // ebx/ecx/edx/esi/edi/ebp; only the low halves are meaningful,
            // and negative values must be sign-extended by hand.
            let sext = |v : u64| (v as u32) as i32 as i64;
            TaskRegisters {
                syscall : sext(regs.orig_rax),
                params : [
                    sext(regs.rbx) as u64,
                    sext(regs.rcx) as u64,
                    sext(regs.rdx) as u64,
                    sext(regs.rsi) as u64,
                    sext(regs.rdi) as u64,
                    sext(regs.rbp) as u64
                ],
                retvalue : sext(regs.rax),
                mode : Mode::I386
            }
        } else {
            TaskRegisters {
                syscall : regs.orig_rax as i64,
                params : [regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8, regs.r9],
                retvalue : regs.rax as i64,
                mode : Mode::X86_64
            }
        }
    }
}

impl TraceeIo for PtraceIo {
    fn attach(&mut self, tid : Tid) -> Result<(), TraceeIoError> {
        let pid = Pid::from_raw(tid);
        self.ptracer.attach(pid)
            .map_err(|source| TraceeIoError::Ptrace { tid, source })?;

        // The attach delivers a SIGSTOP; consume the stop, enable tracing of
        // the task's future children, and run it to its first syscall.
        match self.ptracer.wait().map_err(|source| TraceeIoError::Wait { source })? {
            Some(mut tracee) => {
                tracee.set_options(pete::ptracer::Options::all())
                    .map_err(|source| TraceeIoError::Ptrace { tid, source })?;
                self.ptracer.restart(tracee, Restart::Syscall)
                    .map_err(|source| TraceeIoError::Ptrace { tid, source })?;
                Ok(())
            }
            None => { Err(TraceeIoError::UnknownTask { tid }) }
        }
    }

    fn registers(&mut self, tid : Tid) -> Result<TaskRegisters, TraceeIoError> {
        let regs = self.tracee(tid).registers()
            .map_err(|source| TraceeIoError::Ptrace { tid, source })?;
        Ok(PtraceIo::decode(&regs))
    }

    fn read(&mut self, tid : Tid, addr : u64, len : usize) -> Result<Vec<u8>, TraceeMemoryError> {
        let mut tracee = self.tracee(tid);
        let bytes = tracee.read_memory(addr, len)
            .map_err(|_| TraceeMemoryError::Unreadable { tid, addr, len })?;
        if bytes.len() != len {
            return Err(TraceeMemoryError::ShortRead { tid, addr, want : len, got : bytes.len() });
        }
        Ok(bytes)
    }

    fn resume(&mut self, tid : Tid) -> Result<(), TraceeIoError> {
        let tracee = self.tracee(tid);
        self.ptracer.restart(tracee, Restart::Syscall)
            .map_err(|source| TraceeIoError::Ptrace { tid, source })
    }
}
