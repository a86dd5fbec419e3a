use std::net::{Ipv4Addr,Ipv6Addr};
use std::path::{Path,PathBuf};

use byteorder::{BigEndian,ByteOrder,NativeEndian};
use tracing::{debug,error,info,warn};

use crate::tracer::engine::{TraceError,Tracer};
use crate::tracer::memory;
use crate::tracer::memory::TraceeMemoryError;
use crate::tracer::paths;
use crate::tracer::registry::{ExecveScratch,Process,ProcessStatus,Tid,PROCESS_ARGS};
use crate::tracer::sink::{EventSink,FileMode,ProcessId};
use crate::tracer::syscalls::{Abi,ExitAction,ForkKind,OpenKind};
use crate::tracer::tracee::TraceeIo;

/// Derive the access-mode bits from open(2) flags.
pub fn flags2mode(flags : u32) -> FileMode {
    match flags & libc::O_ACCMODE as u32 {
        f if f == libc::O_RDONLY as u32 => { FileMode::READ }
        f if f == libc::O_WRONLY as u32 => { FileMode::WRITE }
        f if f == libc::O_RDWR as u32 => { FileMode::READ | FileMode::WRITE }
        _ => { FileMode::empty() }
    }
}

/// Render a raw sockaddr buffer the way a human would want to read it.
pub fn format_sockaddr(address : &[u8]) -> String {
    if address.len() < 2 {
        return String::from("<unknown destination>");
    }
    let family = NativeEndian::read_u16(&address[0..2]);
    if family == libc::AF_INET as u16 && address.len() >= 16 {
        let port = BigEndian::read_u16(&address[2..4]);
        let ip = Ipv4Addr::new(address[4], address[5], address[6], address[7]);
        format!("{}:{}", ip, port)
    } else if family == libc::AF_INET6 as u16 && address.len() >= 28 {
        let port = BigEndian::read_u16(&address[2..4]);
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&address[8..24]);
        format!("[{}]:{}", Ipv6Addr::from(octets), port)
    } else {
        format!("<unknown destination, sa_family={}>", family)
    }
}

fn require_identifier(tid : Tid, identifier : Option<ProcessId>) -> Result<ProcessId, TraceError> {
    identifier.ok_or_else(|| TraceError::Invariant(format!("task {} has no sink identifier", tid)))
}

// Sub-operation selectors of the 32-bit socketcall multiplexer.
const SOCKETCALL_CONNECT : u64 = 3;
const SOCKETCALL_ACCEPT : u64 = 5;

impl<T : TraceeIo, S : EventSink> Tracer<T, S> {
    fn task(&self, tid : Tid) -> Result<&Process, TraceError> {
        self.registry.get(tid)
            .ok_or_else(|| TraceError::Invariant(format!("no record for task {}", tid)))
    }

    // Copy a path argument out of the tracee and make it absolute against
    // the task's working directory.
    fn read_path(&mut self, tid : Tid, addr : u64, wd : &Path) -> Result<PathBuf, TraceeMemoryError> {
        let bytes = memory::read_string(&mut self.io, tid, addr)?;
        Ok(paths::resolve(wd, &paths::path_from_bytes(bytes)))
    }

    /// open(), creat(), access(): record what the file was opened for.
    pub(crate) fn syscall_fileopening(&mut self, name : &'static str, tid : Tid, kind : OpenKind) -> Result<(), TraceError> {
        let (retvalue, path_addr, flags, wd, identifier) = {
            let process = self.task(tid)?;
            (process.retvalue, process.params[0].ptr(), process.params[1].unsigned() as u32,
             process.wd.clone(), process.identifier)
        };
        let pathname = match self.read_path(tid, path_addr, &wd) {
            Ok(pathname) => { pathname }
            Err(err) => {
                warn!(tid, "cannot read {} path: {}", name, err);
                return Ok(());
            }
        };
        let mode = match kind {
            OpenKind::Access => { FileMode::STAT }
            OpenKind::Creat => { flags2mode(flags | (libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC) as u32) }
            OpenKind::Open => { flags2mode(flags) }
        };
        debug!(tid, "{}(\"{}\", mode={}) = {} ({})",
               name, pathname.display(), mode, retvalue,
               if retvalue >= 0 { "success" } else { "failure" });
        if retvalue >= 0 {
            let identifier = require_identifier(tid, identifier)?;
            let is_directory = paths::path_is_dir(&pathname);
            self.sink.add_file_open(identifier, &pathname, mode, is_directory)?;
        }
        Ok(())
    }

    /// stat(), lstat() and friends: the file was inspected, not opened.
    pub(crate) fn syscall_filestat(&mut self, name : &'static str, tid : Tid) -> Result<(), TraceError> {
        let (retvalue, path_addr, wd, identifier) = {
            let process = self.task(tid)?;
            (process.retvalue, process.params[0].ptr(), process.wd.clone(), process.identifier)
        };
        let pathname = match self.read_path(tid, path_addr, &wd) {
            Ok(pathname) => { pathname }
            Err(err) => {
                warn!(tid, "cannot read {} path: {}", name, err);
                return Ok(());
            }
        };
        if retvalue >= 0 {
            let identifier = require_identifier(tid, identifier)?;
            let is_directory = paths::path_is_dir(&pathname);
            self.sink.add_file_open(identifier, &pathname, FileMode::STAT, is_directory)?;
        }
        Ok(())
    }

    /// readlink(): reported against the link itself.
    pub(crate) fn syscall_readlink(&mut self, name : &'static str, tid : Tid) -> Result<(), TraceError> {
        let (retvalue, path_addr, wd, identifier) = {
            let process = self.task(tid)?;
            (process.retvalue, process.params[0].ptr(), process.wd.clone(), process.identifier)
        };
        let pathname = match self.read_path(tid, path_addr, &wd) {
            Ok(pathname) => { pathname }
            Err(err) => {
                warn!(tid, "cannot read {} path: {}", name, err);
                return Ok(());
            }
        };
        if retvalue >= 0 {
            let identifier = require_identifier(tid, identifier)?;
            self.sink.add_file_open(identifier, &pathname, FileMode::STAT, false)?;
        }
        Ok(())
    }

    pub(crate) fn syscall_mkdir(&mut self, name : &'static str, tid : Tid) -> Result<(), TraceError> {
        let (retvalue, path_addr, wd, identifier) = {
            let process = self.task(tid)?;
            (process.retvalue, process.params[0].ptr(), process.wd.clone(), process.identifier)
        };
        let pathname = match self.read_path(tid, path_addr, &wd) {
            Ok(pathname) => { pathname }
            Err(err) => {
                warn!(tid, "cannot read {} path: {}", name, err);
                return Ok(());
            }
        };
        if retvalue >= 0 {
            let identifier = require_identifier(tid, identifier)?;
            self.sink.add_file_open(identifier, &pathname, FileMode::WRITE, true)?;
        }
        Ok(())
    }

    /// symlink() and symlinkat(): the link path is written, and it is the
    /// second (or, for symlinkat, third) argument; the first is the target
    /// string, which may not name an existing file at all.
    pub(crate) fn syscall_symlink(&mut self, name : &'static str, tid : Tid, at : bool) -> Result<(), TraceError> {
        let (retvalue, dirfd, path_addr, wd, identifier) = {
            let process = self.task(tid)?;
            let link_arg = if at { 2 } else { 1 };
            (process.retvalue, process.params[0].signed(), process.params[link_arg].ptr(),
             process.wd.clone(), process.identifier)
        };
        if at && dirfd != libc::AT_FDCWD as i64 {
            return self.syscall_unhandled_other(name, tid);
        }
        let pathname = match self.read_path(tid, path_addr, &wd) {
            Ok(pathname) => { pathname }
            Err(err) => {
                warn!(tid, "cannot read {} path: {}", name, err);
                return Ok(());
            }
        };
        if retvalue >= 0 {
            let identifier = require_identifier(tid, identifier)?;
            self.sink.add_file_open(identifier, &pathname, FileMode::WRITE, true)?;
        }
        Ok(())
    }

    /// chdir(): on success the task's recorded working directory moves too.
    pub(crate) fn syscall_chdir(&mut self, name : &'static str, tid : Tid) -> Result<(), TraceError> {
        let (retvalue, path_addr, wd, identifier) = {
            let process = self.task(tid)?;
            (process.retvalue, process.params[0].ptr(), process.wd.clone(), process.identifier)
        };
        let pathname = match self.read_path(tid, path_addr, &wd) {
            Ok(pathname) => { pathname }
            Err(err) => {
                warn!(tid, "cannot read {} path: {}", name, err);
                return Ok(());
            }
        };
        if retvalue >= 0 {
            if let Some(process) = self.registry.get_mut(tid) {
                process.wd = pathname.clone();
            }
            let identifier = require_identifier(tid, identifier)?;
            self.sink.add_file_open(identifier, &pathname, FileMode::WDIR, true)?;
        }
        Ok(())
    }

    /// execve() entry: copy out everything the exit side will need, because
    /// the kernel replaces the address space before the exit stop arrives.
    pub(crate) fn syscall_execve_in(&mut self, _name : &'static str, tid : Tid) -> Result<(), TraceError> {
        let (tgid, binary_addr, argv_addr, envp_addr, mode, wd) = {
            let process = self.task(tid)?;
            (process.tgid, process.params[0].ptr(), process.params[1].ptr(),
             process.params[2].ptr(), process.mode, process.wd.clone())
        };

        // Two calls of the same thread group mid-execve at once cannot be
        // told apart at exit; refuse rather than misattribute.
        if let Some(holder) = self.registry.execve_scratch_holder(tgid) {
            error!(tid, "task {} of the same thread group is already mid-execve", holder);
            return Err(TraceError::Invariant(format!("concurrent execve in thread group {}", tgid)));
        }

        let binary = match self.read_path(tid, binary_addr, &wd) {
            Ok(binary) => { binary }
            Err(err) => {
                warn!(tid, "cannot read execve binary path: {}", err);
                return Ok(());
            }
        };
        let argv = match memory::read_string_array(&mut self.io, tid, mode, argv_addr) {
            Ok(argv) => { argv }
            Err(err) => {
                warn!(tid, "cannot read execve argv: {}", err);
                Vec::new()
            }
        };
        let envp = match memory::read_string_array(&mut self.io, tid, mode, envp_addr) {
            Ok(envp) => { envp }
            Err(err) => {
                warn!(tid, "cannot read execve envp: {}", err);
                Vec::new()
            }
        };

        debug!(tid, "execve called: binary={} ({} args, {} env entries)",
               binary.display(), argv.len(), envp.len());

        if let Some(process) = self.registry.get_mut(tid) {
            process.scratch = Some(ExecveScratch { binary, argv, envp });
        }
        Ok(())
    }

    /// execve() exit.
    ///
    /// The task this stop was reported on is not necessarily the task that
    /// made the call: a successful exec by a non-leader thread is reported
    /// under the leader's tid, and the caller's tid is never seen again. In
    /// that case the originator is found by scanning the thread group for
    /// the one task still mid-execve with scratch attached.
    pub(crate) fn syscall_execve_out(&mut self, _name : &'static str, tid : Tid, execve_syscall : i64) -> Result<(), TraceError> {
        let (tgid, has_scratch) = {
            let process = self.task(tid)?;
            (process.tgid, process.scratch.is_some())
        };

        let originator = if has_scratch {
            tid
        } else {
            match self.registry.find_execve_originator(tgid, execve_syscall) {
                Some(originator) => { originator }
                None => {
                    error!(tid, "execve() completed but call wasn't recorded");
                    return Err(TraceError::Invariant(format!("execve exit on task {} with no originator", tid)));
                }
            }
        };

        let scratch = match self.registry.get_mut(originator).and_then(|p| p.scratch.take()) {
            Some(scratch) => { scratch }
            None => {
                error!(tid, "execve originator {} carries no scratch", originator);
                return Err(TraceError::Invariant(format!("execve scratch missing on task {}", originator)));
            }
        };

        if originator != tid {
            // The calling thread's identity was absorbed by the leader; its
            // tid disappears without a kernel-side exit event.
            let origin_identifier = self.registry.get(originator).and_then(|p| p.identifier);
            self.sink.add_exit(require_identifier(originator, origin_identifier)?, 0)?;
            self.registry.remove(originator);
        }

        let (retvalue, wd, identifier) = {
            let process = self.task(tid)?;
            (process.retvalue, process.wd.clone(), process.identifier)
        };
        if retvalue >= 0 {
            let identifier = require_identifier(tid, identifier)?;
            self.sink.add_exec(identifier, &scratch.binary, &scratch.argv, &scratch.envp, &wd)?;
            info!(tid, "successfully exec'd {}", scratch.binary.display());
            self.sink.ingest_binary_metadata(identifier, tid, &scratch.binary)?;
        }
        Ok(())
    }

    /// fork(), vfork(), clone() exit on the creator's side.
    ///
    /// The child's first stop may already have been seen (its record is
    /// parked as `Unknown`) or may still be pending (allocate ahead of it);
    /// both orders end with an adopted child carrying its creator's working
    /// directory and a fresh sink identifier.
    pub(crate) fn syscall_forking(&mut self, name : &'static str, tid : Tid, kind : ForkKind) -> Result<(), TraceError> {
        let (retvalue, parent_tgid, parent_wd, parent_identifier, flags) = {
            let process = self.task(tid)?;
            (process.retvalue, process.tgid, process.wd.clone(), process.identifier,
             process.params[0].unsigned())
        };
        if retvalue <= 0 {
            return Ok(());
        }
        let new_tid = retvalue as Tid;
        let is_thread = kind == ForkKind::Clone && flags & libc::CLONE_THREAD as u64 != 0;
        info!(tid = new_tid, "task created by {} via {} (thread: {}) (working directory: {})",
              tid, name, is_thread, parent_wd.display());

        let parent_identifier = require_identifier(tid, parent_identifier)?;
        let identifier = self.sink.add_process(Some(parent_identifier), &parent_wd)?;
        let tgid = if is_thread { parent_tgid } else { new_tid };

        if self.registry.contains(new_tid) {
            let resume = match self.registry.get_mut(new_tid) {
                Some(child) => {
                    if child.status != ProcessStatus::Unknown {
                        error!(tid = new_tid, "just created task is already running (status {:?})", child.status);
                        return Err(TraceError::Invariant(format!("created task {} already adopted", new_tid)));
                    }
                    child.status = ProcessStatus::Attached;
                    child.tgid = tgid;
                    child.wd = parent_wd;
                    child.identifier = Some(identifier);
                    true
                }
                None => { false }
            };
            if resume {
                // The child has been parked at its first stop since before
                // our creator returned; release it now that it is adopted.
                self.io.resume(new_tid)?;
            }
        } else {
            let mut child = Process::allocated(new_tid);
            child.tgid = tgid;
            child.wd = parent_wd;
            child.identifier = Some(identifier);
            self.registry.insert(child);
        }
        Ok(())
    }

    fn report_accept(&mut self, tid : Tid, addr_ptr : u64, addrlen_ptr : u64) -> Result<(), TraceError> {
        let addrlen = match memory::read_bytes(&mut self.io, tid, addrlen_ptr, 4) {
            Ok(bytes) => { NativeEndian::read_u32(bytes.as_slice()) }
            Err(err) => {
                warn!(tid, "cannot read accepted address length: {}", err);
                return Ok(());
            }
        };
        if addrlen as usize >= std::mem::size_of::<u16>() {
            match memory::read_bytes(&mut self.io, tid, addr_ptr, addrlen as usize) {
                Ok(address) => {
                    warn!(tid, "process accepted a connection from {}", format_sockaddr(&address));
                }
                Err(err) => {
                    warn!(tid, "cannot read accepted peer address: {}", err);
                }
            }
        }
        Ok(())
    }

    fn report_connect(&mut self, tid : Tid, addr_ptr : u64, addrlen : u64) -> Result<(), TraceError> {
        if addrlen as usize >= std::mem::size_of::<u16>() {
            match memory::read_bytes(&mut self.io, tid, addr_ptr, addrlen as usize) {
                Ok(address) => {
                    warn!(tid, "process connected to {}", format_sockaddr(&address));
                }
                Err(err) => {
                    warn!(tid, "cannot read connect address: {}", err);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn syscall_accept(&mut self, _name : &'static str, tid : Tid) -> Result<(), TraceError> {
        let (addr_ptr, addrlen_ptr) = {
            let process = self.task(tid)?;
            (process.params[1].ptr(), process.params[2].ptr())
        };
        self.report_accept(tid, addr_ptr, addrlen_ptr)
    }

    pub(crate) fn syscall_connect(&mut self, _name : &'static str, tid : Tid) -> Result<(), TraceError> {
        let (addr_ptr, addrlen) = {
            let process = self.task(tid)?;
            (process.params[1].ptr(), process.params[2].unsigned())
        };
        self.report_connect(tid, addr_ptr, addrlen)
    }

    /// socketcall(): the 32-bit multiplexer. The second argument points to
    /// an array of machine words holding the sub-operation's arguments.
    pub(crate) fn syscall_socketcall(&mut self, _name : &'static str, tid : Tid) -> Result<(), TraceError> {
        let (operation, args, mode) = {
            let process = self.task(tid)?;
            (process.params[0].unsigned(), process.params[1].unsigned(), process.mode)
        };
        let width = mode.word_size() as u64;
        match operation {
            SOCKETCALL_ACCEPT => {
                let addr_ptr = match memory::read_ptr(&mut self.io, tid, mode, args + width) {
                    Ok(ptr) => { ptr }
                    Err(err) => {
                        warn!(tid, "cannot read socketcall arguments: {}", err);
                        return Ok(());
                    }
                };
                let addrlen_ptr = match memory::read_ptr(&mut self.io, tid, mode, args + 2 * width) {
                    Ok(ptr) => { ptr }
                    Err(err) => {
                        warn!(tid, "cannot read socketcall arguments: {}", err);
                        return Ok(());
                    }
                };
                self.report_accept(tid, addr_ptr, addrlen_ptr)
            }
            SOCKETCALL_CONNECT => {
                let addr_ptr = match memory::read_ptr(&mut self.io, tid, mode, args + width) {
                    Ok(ptr) => { ptr }
                    Err(err) => {
                        warn!(tid, "cannot read socketcall arguments: {}", err);
                        return Ok(());
                    }
                };
                let addrlen = match memory::read_word(&mut self.io, tid, mode, args + 2 * width) {
                    Ok(word) => { word }
                    Err(err) => {
                        warn!(tid, "cannot read socketcall arguments: {}", err);
                        return Ok(());
                    }
                };
                self.report_connect(tid, addr_ptr, addrlen)
            }
            _ => { Ok(()) }
        }
    }

    /// The `*at` adapter: when the descriptor argument is AT_FDCWD the call
    /// behaves exactly like its plain counterpart, so forward to that
    /// handler with the descriptor dropped from the argument vector (and the
    /// original vector restored afterwards). Any other descriptor is out of
    /// scope and only warned about.
    pub(crate) fn syscall_xxx_at(&mut self, name : &'static str, tid : Tid, real_syscall : i64) -> Result<(), TraceError> {
        let (dirfd, mode, raw_syscall, saved) = {
            let process = self.task(tid)?;
            (process.params[0].signed(), process.mode, process.current_syscall, process.params)
        };
        if dirfd != libc::AT_FDCWD as i64 {
            return self.syscall_unhandled_other(name, tid);
        }

        let abi = Abi::of_task(mode, raw_syscall);
        let action = match self.tables.lookup(abi, real_syscall).and_then(|slot| slot.exit) {
            None | Some(ExitAction::AtAdapter { .. }) => {
                error!(tid, "invalid syscall in *at dispatch: {}", real_syscall);
                return Ok(());
            }
            Some(action) => { action }
        };

        if let Some(process) = self.registry.get_mut(tid) {
            for i in 0..PROCESS_ARGS - 1 {
                process.params[i] = saved[i + 1];
            }
        }
        let result = self.run_exit_action(name, tid, action);
        if let Some(process) = self.registry.get_mut(tid) {
            process.params = saved;
        }
        result
    }

    /// A call we do not interpret whose first argument is a path: say so, so
    /// the gap is visible in the log rather than silent.
    pub(crate) fn syscall_unhandled_path1(&mut self, name : &'static str, tid : Tid) -> Result<(), TraceError> {
        let (retvalue, path_addr, wd) = {
            let process = self.task(tid)?;
            (process.retvalue, process.params[0].ptr(), process.wd.clone())
        };
        if retvalue >= 0 {
            match self.read_path(tid, path_addr, &wd) {
                Ok(pathname) => {
                    warn!(tid, "process used unhandled system call {}(\"{}\")", name, pathname.display());
                }
                Err(err) => {
                    warn!(tid, "process used unhandled system call {} (path unreadable: {})", name, err);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn syscall_unhandled_other(&mut self, name : &'static str, tid : Tid) -> Result<(), TraceError> {
        let retvalue = self.task(tid)?.retvalue;
        if retvalue >= 0 {
            warn!(tid, "process used unhandled system call {}", name);
        }
        Ok(())
    }
}
