use std::process::Command;

use pete::{Stop,Tracee};
use tracing::debug;

use crate::tracer::engine::{TraceError,Tracer};
use crate::tracer::options::TraceOptions;
use crate::tracer::registry::Tid;
use crate::tracer::sink::EventSink;
use crate::tracer::store::JsonlStore;
use crate::tracer::syscalls::SyscallTables;
use crate::tracer::tracee::{PtraceIo,TraceeIo,TraceeIoError};

/// The command-line entry point for tracing.
///
/// Spawns (or attaches to) the root target, then serves stop events until
/// every traced task is gone, and finally flushes the store.
pub fn trace_entrypoint(trace_opts : &TraceOptions) -> anyhow::Result<()> {
    let store = JsonlStore::create(&trace_opts.output)?;
    let tables = SyscallTables::build();
    let mut io = PtraceIo::new();

    let (root_tid, root_wd, child) = match trace_opts.pid {
        Some(pid) => {
            // The attached task keeps whatever directory it already had.
            let wd = std::fs::read_link(format!("/proc/{}/cwd", pid))?;
            (pid as Tid, wd, None)
        }
        None => {
            if trace_opts.command.is_empty() {
                anyhow::bail!("nothing to trace: pass a command after `--` or use --pid");
            }
            let mut cmd = Command::new(&trace_opts.command[0]);
            cmd.args(&trace_opts.command[1..]);
            let child = io.spawn(cmd)?;
            (child.id() as Tid, std::env::current_dir()?, Some(child))
        }
    };

    let mut tracer = Tracer::new(io, store, tables);
    tracer.register_root(root_tid, &root_wd)?;

    match trace_opts.pid {
        Some(_) => {
            tracer.io_mut().attach(root_tid)?;
        }
        None => {
            // The spawned tracee is stopped just past its initial exec.
            // Consume that stop outside the dispatch loop so the entry/exit
            // toggle starts aligned on the first real syscall.
            match tracer.io_mut().wait()? {
                Some(first) => { tracer.io_mut().restart(first)?; }
                None => { anyhow::bail!("traced command vanished before its first stop"); }
            }
        }
    }

    tracer.run()?;

    let (_io, store) = tracer.into_parts();
    store.finish()?;

    // The root was detached as it exited; reap it so no zombie outlives us.
    if let Some(mut child) = child {
        let _ = child.wait();
    }
    Ok(())
}

impl<S : EventSink> Tracer<PtraceIo, S> {
    /// Serve stop events until no tracee is left.
    pub fn run(&mut self) -> Result<(), TraceError> {
        loop {
            let tracee = match self.io_mut().wait() {
                Ok(Some(tracee)) => { tracee }
                Ok(None) => { return Ok(()); }
                Err(source) => { return Err(TraceError::TraceeIo(TraceeIoError::Wait { source })); }
            };
            let tid = tracee.pid.as_raw() as Tid;
            match tracee.stop {
                Stop::SyscallEnter | Stop::SyscallExit => {
                    self.handle_syscall_stop(tid)?;
                }
                Stop::Attach => {
                    self.handle_attach_stop(tid)?;
                }
                Stop::Exec { old } => {
                    self.handle_exec_event(old.as_raw() as Tid, tid)?;
                    self.restart(tracee)?;
                }
                Stop::Exiting { exit_code } => {
                    self.handle_exit_stop(tid, exit_code)?;
                    self.restart(tracee)?;
                }
                Stop::Signaling { signal, .. } => {
                    self.handle_exit_stop(tid, 128 + signal as i32)?;
                    self.restart(tracee)?;
                }
                Stop::Clone { new } | Stop::Fork { new } | Stop::Vfork { new } => {
                    // The creating call's exit carries the same tid; process
                    // bookkeeping happens there.
                    debug!(tid, "kernel reports new task {}", new.as_raw());
                    self.restart(tracee)?;
                }
                _ => {
                    // Signal deliveries, group stops and the like pass
                    // through untouched, pending signal included.
                    self.restart(tracee)?;
                }
            }
        }
    }

    fn restart(&mut self, tracee : Tracee) -> Result<(), TraceError> {
        let tid = tracee.pid.as_raw() as Tid;
        self.io_mut().restart(tracee)
            .map_err(|source| TraceError::TraceeIo(TraceeIoError::Ptrace { tid, source }))
    }
}
