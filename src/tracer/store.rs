use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path,PathBuf};
use std::thread;

use os_pipe::{pipe,PipeReader,PipeWriter};
use serde::{Serialize,Deserialize};
use tracing::warn;

use crate::tracer::raw::RawString;
use crate::tracer::registry::Tid;
use crate::tracer::sink::{EventSink,FileMode,ProcessId,SinkError};

/// How the records in a store file are encoded.
#[derive(Debug,Clone,Copy,PartialEq,Serialize,Deserialize)]
pub enum DataFormat {
    Trace
}

/// Leading line of every store file: names the format and version it was
/// written with, so the loader can refuse anything it would misread.
#[derive(Debug,Serialize,Deserialize)]
pub struct Header {
    pub version : u32,
    pub data_format : DataFormat
}

pub const CURRENT_VERSION : u32 = 0;

/// One persisted observation. The variants correspond one-to-one with the
/// sink operations that produce them.
#[derive(Debug,Clone,PartialEq,Serialize,Deserialize)]
pub enum TraceRecord {
    Process { id : ProcessId, parent : Option<ProcessId>, wd : PathBuf },
    Exec { id : ProcessId, binary : PathBuf, argv : Vec<RawString>, envp : Vec<RawString>, wd : PathBuf },
    FileOpen { id : ProcessId, path : PathBuf, mode : FileMode, is_directory : bool },
    Exit { id : ProcessId, status : i32 }
}

/// Line-oriented JSON store, written by a recorder thread.
///
/// The tracer side hands records off through an OS pipe as MessagePack
/// frames, so persistence I/O never runs between two ptrace operations on
/// the same stop; the recorder thread turns the frames into one JSON line
/// per record behind a version header.
pub struct JsonlStore {
    writer : PipeWriter,
    recorder : Option<thread::JoinHandle<anyhow::Result<()>>>,
    next_id : i64
}

impl JsonlStore {
    pub fn create(path : &Path) -> anyhow::Result<JsonlStore> {
        let (reader, writer) = pipe()?;
        let out_path = path.to_path_buf();
        let recorder = thread::spawn(move || { record_records(out_path, reader) });
        Ok(JsonlStore { writer, recorder : Some(recorder), next_id : 0 })
    }

    fn emit(&mut self, record : &TraceRecord) -> Result<(), SinkError> {
        let bytes = rmp_serde::encode::to_vec(&Some(record))?;
        self.writer.write_all(bytes.as_slice())?;
        Ok(())
    }

    /// Signal the recorder thread that the trace is complete and wait for it
    /// to flush the file.
    pub fn finish(mut self) -> anyhow::Result<()> {
        let bytes = rmp_serde::encode::to_vec::<Option<TraceRecord>>(&None)?;
        self.writer.write_all(bytes.as_slice())?;
        match self.recorder.take() {
            Some(handle) => {
                match handle.join() {
                    Ok(result) => { result }
                    Err(_) => { Err(anyhow::anyhow!("trace recorder thread panicked")) }
                }
            }
            None => { Ok(()) }
        }
    }
}

fn record_records(file_path : PathBuf, reader : PipeReader) -> anyhow::Result<()> {
    let mut f = std::fs::File::create(file_path.as_path())?;
    let header = Header { version : CURRENT_VERSION, data_format : DataFormat::Trace };
    serde_json::to_writer(&f, &header)?;
    f.write_all("\n".as_bytes())?;

    // The pipe gives no length up front; decode frames until the
    // end-of-trace sentinel arrives.
    loop {
        match rmp_serde::decode::from_read::<_, Option<TraceRecord>>(&reader) {
            Err(err) => {
                warn!("error recording trace event: {}", err);
                break;
            }
            Ok(None) => { break; }
            Ok(Some(record)) => {
                serde_json::to_writer(&f, &record)?;
                f.write_all("\n".as_bytes())?;
            }
        }
    }
    Ok(())
}

impl EventSink for JsonlStore {
    fn add_process(&mut self, parent : Option<ProcessId>, wd : &Path) -> Result<ProcessId, SinkError> {
        let id = ProcessId(self.next_id);
        self.next_id += 1;
        self.emit(&TraceRecord::Process { id, parent, wd : wd.to_path_buf() })?;
        Ok(id)
    }

    fn add_exec(&mut self, id : ProcessId, binary : &Path, argv : &[RawString],
                envp : &[RawString], wd : &Path) -> Result<(), SinkError> {
        self.emit(&TraceRecord::Exec {
            id,
            binary : binary.to_path_buf(),
            argv : argv.to_vec(),
            envp : envp.to_vec(),
            wd : wd.to_path_buf()
        })
    }

    fn add_file_open(&mut self, id : ProcessId, path : &Path, mode : FileMode,
                     is_directory : bool) -> Result<(), SinkError> {
        self.emit(&TraceRecord::FileOpen { id, path : path.to_path_buf(), mode, is_directory })
    }

    fn add_exit(&mut self, id : ProcessId, status : i32) -> Result<(), SinkError> {
        self.emit(&TraceRecord::Exit { id, status })
    }

    /// Record the file-backed mappings of a freshly exec'd image as reads.
    ///
    /// This consults /proc, since the dynamic loader has already pulled in
    /// the interpreter and initial libraries by the time the exec's exit
    /// stop is delivered.
    fn ingest_binary_metadata(&mut self, id : ProcessId, tid : Tid, binary : &Path) -> Result<(), SinkError> {
        let maps_path = format!("/proc/{}/maps", tid);
        let contents = match std::fs::read_to_string(&maps_path) {
            Ok(contents) => { contents }
            Err(err) => {
                warn!(tid, "cannot inspect mappings of {}: {}", binary.display(), err);
                return Ok(());
            }
        };
        let mut seen = BTreeSet::new();
        for line in contents.lines() {
            if let Some(path) = line.split_whitespace().nth(5) {
                if path.starts_with('/') {
                    seen.insert(PathBuf::from(path));
                }
            }
        }
        for path in seen {
            self.emit(&TraceRecord::FileOpen { id, path, mode : FileMode::READ, is_directory : false })?;
        }
        Ok(())
    }
}
