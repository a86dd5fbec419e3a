use std::os::unix::ffi::OsStringExt;
use std::ffi::OsString;
use std::path::{Component,Path,PathBuf};

/// Convert raw bytes copied out of a tracee into a path without assuming
/// they are valid utf8.
pub fn path_from_bytes(bytes : Vec<u8>) -> PathBuf {
    PathBuf::from(OsString::from_vec(bytes))
}

/// Resolve a path argument against a task's working directory.
///
/// An absolute argument is returned as-is; a relative one is joined onto
/// `wd` (which is trusted to be absolute) and normalised.
pub fn resolve(wd : &Path, raw : &Path) -> PathBuf {
    if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        normalize(&wd.join(raw))
    }
}

/// Collapse `.` and `..` segments and duplicate separators, lexically.
///
/// Symlinks are deliberately not chased: the trace should record the path
/// the process named, not what the filesystem resolved it to.
pub fn normalize(path : &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir => { out.push(component.as_os_str()) }
            Component::CurDir => {}
            Component::ParentDir => { out.pop(); }
            Component::Normal(part) => { out.push(part) }
            Component::Prefix(_) => {}
        }
    }
    out
}

/// Whether the path names a directory right now. Best-effort; a path that
/// cannot be inspected is reported as not a directory.
pub fn path_is_dir(path : &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}
