use byteorder::{NativeEndian, ByteOrder};

use crate::tracer::raw::RawString;
use crate::tracer::registry::{Mode,Tid};
use crate::tracer::tracee::TraceeIo;

/// Give up scanning for a terminator after this many bytes. Nothing the
/// handlers read (paths, argv entries) legitimately gets anywhere near it.
pub const STRING_READ_LIMIT : usize = 1 << 20;

const PAGE_SIZE : u64 = 4096;

#[derive(thiserror::Error,Debug)]
pub enum TraceeMemoryError {
    #[error("cannot read {len} bytes at {addr:#x} in task {tid}")]
    Unreadable { tid : Tid, addr : u64, len : usize },
    #[error("short read at {addr:#x} in task {tid} ({got} of {want} bytes)")]
    ShortRead { tid : Tid, addr : u64, want : usize, got : usize },
    #[error("misaligned word address {addr:#x} (alignment {align})")]
    Misaligned { addr : u64, align : usize },
    #[error("unterminated string at {addr:#x} (scanned {limit} bytes)")]
    UnterminatedString { addr : u64, limit : usize }
}

/// Read a fixed-size buffer out of the tracee.
pub fn read_bytes<T : TraceeIo>(io : &mut T, tid : Tid, addr : u64, len : usize) -> Result<Vec<u8>, TraceeMemoryError> {
    io.read(tid, addr, len)
}

/// Read a NUL-terminated string from the given address in the tracee,
/// returning an owned copy without the terminator.
///
/// Reads stop at page boundaries so that a string ending just before an
/// unmapped page does not fail spuriously.
pub fn read_string<T : TraceeIo>(io : &mut T, tid : Tid, addr : u64) -> Result<Vec<u8>, TraceeMemoryError> {
    let mut out = Vec::new();
    let mut pos = addr;
    loop {
        let chunk = (PAGE_SIZE - (pos % PAGE_SIZE)) as usize;
        let bytes = io.read(tid, pos, chunk)?;
        match bytes.iter().position(|&b| b == 0) {
            Some(nul) => {
                out.extend_from_slice(&bytes[..nul]);
                return Ok(out);
            }
            None => {
                out.extend_from_slice(&bytes);
                pos += chunk as u64;
            }
        }
        if out.len() >= STRING_READ_LIMIT {
            return Err(TraceeMemoryError::UnterminatedString { addr, limit : STRING_READ_LIMIT });
        }
    }
}

/// Read one machine word at the tracee's word width.
pub fn read_word<T : TraceeIo>(io : &mut T, tid : Tid, mode : Mode, addr : u64) -> Result<u64, TraceeMemoryError> {
    let width = mode.word_size();
    if addr % width as u64 != 0 {
        return Err(TraceeMemoryError::Misaligned { addr, align : width });
    }
    let bytes = io.read(tid, addr, width)?;
    let word = if width == 4 {
        NativeEndian::read_u32(bytes.as_slice()) as u64
    } else {
        NativeEndian::read_u64(bytes.as_slice())
    };
    Ok(word)
}

/// Read one pointer at the tracee's pointer width.
pub fn read_ptr<T : TraceeIo>(io : &mut T, tid : Tid, mode : Mode, addr : u64) -> Result<u64, TraceeMemoryError> {
    read_word(io, tid, mode, addr)
}

/// Duplicate a NULL-terminated array of strings (pointer-to-pointer-to-char,
/// as execve's argv and envp) into local memory.
///
/// A slot whose pointer can be read but whose string cannot is preserved as
/// an `Unreadable` marker; an unreadable slot pointer fails the
/// whole duplication.
pub fn read_string_array<T : TraceeIo>(io : &mut T, tid : Tid, mode : Mode, addr : u64) -> Result<Vec<RawString>, TraceeMemoryError> {
    let width = mode.word_size() as u64;
    let mut out = Vec::new();
    let mut slot = addr;
    loop {
        let ptr = read_ptr(io, tid, mode, slot)?;
        if ptr == 0 {
            return Ok(out);
        }
        match read_string(io, tid, ptr) {
            Ok(bytes) => { out.push(RawString::from_bytes(bytes)) }
            Err(_) => { out.push(RawString::Unreadable(ptr)) }
        }
        slot += width;
    }
}
