use std::fmt;
use std::ops::{BitOr,BitOrAssign};
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::tracer::raw::RawString;
use crate::tracer::registry::Tid;

/// Handle assigned by the event sink when a process is first recorded.
///
/// The handle survives thread grouping and exec: all threads of a process
/// share the thread leader's handle once a non-leader thread execs.
#[derive(Debug,Clone,Copy,Hash,Eq,Ord,PartialEq,PartialOrd,Serialize,Deserialize)]
pub struct ProcessId(pub i64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f : &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a process did with a file, as a bitset.
///
/// The bit values are part of the stored trace format and must not change.
#[derive(Debug,Clone,Copy,Hash,Eq,PartialEq,Serialize,Deserialize)]
pub struct FileMode(u32);

impl FileMode {
    pub const READ : FileMode = FileMode(1);
    pub const WRITE : FileMode = FileMode(2);
    pub const WDIR : FileMode = FileMode(4);
    pub const STAT : FileMode = FileMode(8);

    pub const fn empty() -> FileMode {
        FileMode(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other : FileMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FileMode {
    type Output = FileMode;
    fn bitor(self, rhs : FileMode) -> FileMode {
        FileMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for FileMode {
    fn bitor_assign(&mut self, rhs : FileMode) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f : &mut fmt::Formatter) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(FileMode::READ) { names.push("FILE_READ"); }
        if self.contains(FileMode::WRITE) { names.push("FILE_WRITE"); }
        if self.contains(FileMode::WDIR) { names.push("FILE_WDIR"); }
        if self.contains(FileMode::STAT) { names.push("FILE_STAT"); }
        if names.is_empty() {
            write!(f, "0")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

#[derive(thiserror::Error,Debug)]
pub enum SinkError {
    #[error("failed to write trace record")]
    Write(#[from] std::io::Error),
    #[error("failed to encode trace record")]
    Encode(#[from] rmp_serde::encode::Error)
}

/// The persistence side of the tracer.
///
/// The engine describes what it observed through these calls; the sink
/// decides how the observations are stored. A sink failure is fatal for the
/// trace, so implementations should only fail when the store is truly gone.
pub trait EventSink {
    /// Record a new process and return its handle. `parent` is `None` only
    /// for the root of the traced tree.
    fn add_process(&mut self, parent : Option<ProcessId>, wd : &Path) -> Result<ProcessId, SinkError>;

    /// Record a successful program replacement.
    fn add_exec(&mut self, id : ProcessId, binary : &Path, argv : &[RawString],
                envp : &[RawString], wd : &Path) -> Result<(), SinkError>;

    /// Record a file access. `is_directory` is a hint taken at observation
    /// time; the path may no longer exist when the trace is read back.
    fn add_file_open(&mut self, id : ProcessId, path : &Path, mode : FileMode,
                     is_directory : bool) -> Result<(), SinkError>;

    /// Record process termination.
    fn add_exit(&mut self, id : ProcessId, status : i32) -> Result<(), SinkError>;

    /// Record whatever can be learned about a freshly exec'd binary (loaded
    /// images, interpreter, and so on). `tid` identifies the live task to
    /// inspect.
    fn ingest_binary_metadata(&mut self, id : ProcessId, tid : Tid, binary : &Path) -> Result<(), SinkError>;
}
