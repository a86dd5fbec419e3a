use std::collections::HashMap;
use std::path::{Path,PathBuf};

use provtrace::tracer::engine::{TraceError,Tracer};
use provtrace::tracer::memory::TraceeMemoryError;
use provtrace::tracer::raw::RawString;
use provtrace::tracer::registry::{Mode,Tid,PROCESS_ARGS};
use provtrace::tracer::sink::{EventSink,FileMode,ProcessId,SinkError};
use provtrace::tracer::store::TraceRecord;
use provtrace::tracer::syscalls::SyscallTables;
use provtrace::tracer::tracee::{TaskRegisters,TraceeIo,TraceeIoError};

/// Tracee I/O scripted entirely from test data: memory is a set of
/// zero-padded segments (reads past a segment's content behave like the
/// rest of a mapped page), and registers are set per task before each
/// simulated stop.
#[derive(Default)]
pub struct ScriptedIo {
    segments : HashMap<Tid, Vec<(u64, Vec<u8>)>>,
    registers : HashMap<Tid, TaskRegisters>,
    pub resumed : Vec<Tid>,
    #[allow(dead_code)] // only exercised by attach-mode tests
    pub attached : Vec<Tid>
}

impl ScriptedIo {
    pub fn new() -> ScriptedIo {
        ScriptedIo::default()
    }

    pub fn set_memory(&mut self, tid : Tid, addr : u64, bytes : Vec<u8>) {
        self.segments.entry(tid).or_default().push((addr, bytes));
    }

    pub fn set_string(&mut self, tid : Tid, addr : u64, s : &str) {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.set_memory(tid, addr, bytes);
    }

    /// A native-endian pointer array terminated by a null slot.
    pub fn set_ptr_array(&mut self, tid : Tid, addr : u64, width : usize, ptrs : &[u64]) {
        let mut bytes = Vec::new();
        for p in ptrs.iter().chain(std::iter::once(&0u64)) {
            bytes.extend_from_slice(&p.to_le_bytes()[..width]);
        }
        self.set_memory(tid, addr, bytes);
    }

    pub fn set_registers(&mut self, tid : Tid, regs : TaskRegisters) {
        self.registers.insert(tid, regs);
    }
}

impl TraceeIo for ScriptedIo {
    fn attach(&mut self, tid : Tid) -> Result<(), TraceeIoError> {
        self.attached.push(tid);
        Ok(())
    }

    fn registers(&mut self, tid : Tid) -> Result<TaskRegisters, TraceeIoError> {
        self.registers.get(&tid).copied().ok_or(TraceeIoError::UnknownTask { tid })
    }

    fn read(&mut self, tid : Tid, addr : u64, len : usize) -> Result<Vec<u8>, TraceeMemoryError> {
        if let Some(segments) = self.segments.get(&tid) {
            for (base, bytes) in segments {
                let end = base + bytes.len() as u64;
                if addr >= *base && addr < end {
                    let offset = (addr - base) as usize;
                    let available = bytes.len() - offset;
                    let mut out = bytes[offset..offset + available.min(len)].to_vec();
                    out.resize(len, 0);
                    return Ok(out);
                }
            }
        }
        Err(TraceeMemoryError::Unreadable { tid, addr, len })
    }

    fn resume(&mut self, tid : Tid) -> Result<(), TraceeIoError> {
        self.resumed.push(tid);
        Ok(())
    }
}

/// An event sink that just remembers everything it was told.
#[derive(Default)]
pub struct RecordingSink {
    pub records : Vec<TraceRecord>,
    pub ingested : Vec<(ProcessId, Tid, PathBuf)>,
    next_id : i64
}

impl RecordingSink {
    pub fn new() -> RecordingSink {
        RecordingSink::default()
    }

    #[allow(dead_code)]
    pub fn file_opens(&self) -> Vec<(ProcessId, PathBuf, FileMode, bool)> {
        self.records.iter().filter_map(|record| {
            match record {
                TraceRecord::FileOpen { id, path, mode, is_directory } => {
                    Some((*id, path.clone(), *mode, *is_directory))
                }
                _ => { None }
            }
        }).collect()
    }
}

impl EventSink for RecordingSink {
    fn add_process(&mut self, parent : Option<ProcessId>, wd : &Path) -> Result<ProcessId, SinkError> {
        let id = ProcessId(self.next_id);
        self.next_id += 1;
        self.records.push(TraceRecord::Process { id, parent, wd : wd.to_path_buf() });
        Ok(id)
    }

    fn add_exec(&mut self, id : ProcessId, binary : &Path, argv : &[RawString],
                envp : &[RawString], wd : &Path) -> Result<(), SinkError> {
        self.records.push(TraceRecord::Exec {
            id,
            binary : binary.to_path_buf(),
            argv : argv.to_vec(),
            envp : envp.to_vec(),
            wd : wd.to_path_buf()
        });
        Ok(())
    }

    fn add_file_open(&mut self, id : ProcessId, path : &Path, mode : FileMode,
                     is_directory : bool) -> Result<(), SinkError> {
        self.records.push(TraceRecord::FileOpen { id, path : path.to_path_buf(), mode, is_directory });
        Ok(())
    }

    fn add_exit(&mut self, id : ProcessId, status : i32) -> Result<(), SinkError> {
        self.records.push(TraceRecord::Exit { id, status });
        Ok(())
    }

    fn ingest_binary_metadata(&mut self, id : ProcessId, tid : Tid, binary : &Path) -> Result<(), SinkError> {
        self.ingested.push((id, tid, binary.to_path_buf()));
        Ok(())
    }
}

pub type TestTracer = Tracer<ScriptedIo, RecordingSink>;

pub fn new_tracer() -> TestTracer {
    Tracer::new(ScriptedIo::new(), RecordingSink::new(), SyscallTables::build())
}

pub fn regs(mode : Mode, syscall : i64, params : [u64; PROCESS_ARGS], retvalue : i64) -> TaskRegisters {
    TaskRegisters { syscall, params, retvalue, mode }
}

/// Drive one full syscall (entry stop then exit stop) for `tid`.
pub fn drive_syscall(tracer : &mut TestTracer, tid : Tid, mode : Mode, syscall : i64,
                     params : [u64; PROCESS_ARGS], retvalue : i64) -> Result<(), TraceError> {
    tracer.io_mut().set_registers(tid, regs(mode, syscall, params, 0));
    tracer.handle_syscall_stop(tid)?;
    tracer.io_mut().set_registers(tid, regs(mode, syscall, params, retvalue));
    tracer.handle_syscall_stop(tid)?;
    Ok(())
}
