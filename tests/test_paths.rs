use std::os::unix::ffi::OsStrExt;
use std::path::{Path,PathBuf};

use provtrace::tracer::paths::{normalize,path_from_bytes,resolve};

#[test]
fn test_absolute_paths_pass_through() {
    // absolute arguments are returned exactly as the process gave them
    assert_eq!(resolve(Path::new("/home/u"), Path::new("/etc/hosts")),
               PathBuf::from("/etc/hosts"));
    assert_eq!(resolve(Path::new("/anything"), Path::new("/x/../y")),
               PathBuf::from("/x/../y"));
}

#[test]
fn test_relative_paths_join_and_collapse() {
    assert_eq!(resolve(Path::new("/a/b"), Path::new("c/../d")),
               PathBuf::from("/a/b/d"));
    assert_eq!(resolve(Path::new("/home/u"), Path::new("work")),
               PathBuf::from("/home/u/work"));
    assert_eq!(resolve(Path::new("/a/b"), Path::new("./c/./d")),
               PathBuf::from("/a/b/c/d"));
    assert_eq!(resolve(Path::new("/a/b"), Path::new("../../../etc")),
               PathBuf::from("/etc"));
}

#[test]
fn test_duplicate_separators_collapse() {
    assert_eq!(resolve(Path::new("/a/b"), Path::new("c//d///e")),
               PathBuf::from("/a/b/c/d/e"));
}

#[test]
fn test_normalize_stays_at_root() {
    assert_eq!(normalize(Path::new("/../x")), PathBuf::from("/x"));
    assert_eq!(normalize(Path::new("/a/../..")), PathBuf::from("/"));
}

#[test]
fn test_path_from_bytes_keeps_non_utf8() {
    let bytes = vec![b'/', b't', b'm', b'p', b'/', 0xff, 0xfe];
    let path = path_from_bytes(bytes.clone());
    assert_eq!(path.as_os_str().as_bytes(), bytes.as_slice());
}
