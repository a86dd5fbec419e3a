use std::collections::HashSet;
use std::io::Write;
use std::path::{Path,PathBuf};

use tempfile::tempdir;

use provtrace::tracer::loader::{load_trace,LoadError};
use provtrace::tracer::raw::RawString;
use provtrace::tracer::sink::{EventSink,FileMode,ProcessId};
use provtrace::tracer::store::{JsonlStore,TraceRecord};
use provtrace::tracer::summary::summarize;

#[test]
fn test_store_round_trip() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store_path = dir.path().join("trace.jsonl");

    let mut store = JsonlStore::create(&store_path)?;
    let root = store.add_process(None, Path::new("/w"))?;
    let child = store.add_process(Some(root), Path::new("/w"))?;
    assert_ne!(root, child);

    // events from different processes interleave arbitrarily
    store.add_file_open(root, Path::new("/etc/hosts"), FileMode::READ, false)?;
    store.add_file_open(child, Path::new("/tmp/out"), FileMode::WRITE, false)?;
    store.add_exec(child, Path::new("/bin/tool"),
                   &[RawString::Text("tool".to_string()),
                     RawString::Bytes(vec![0xff, 0xfe])],
                   &[RawString::Text("HOME=/w".to_string())],
                   Path::new("/w"))?;
    store.add_file_open(root, Path::new("/w/build"), FileMode::WDIR, true)?;
    store.add_exit(child, 0)?;
    store.add_exit(root, 1)?;
    store.finish()?;

    let records = load_trace(&store_path)?;

    let opens : HashSet<(ProcessId, PathBuf, u32)> = records.iter().filter_map(|record| {
        match record {
            TraceRecord::FileOpen { id, path, mode, .. } => { Some((*id, path.clone(), mode.bits())) }
            _ => { None }
        }
    }).collect();
    let expected : HashSet<(ProcessId, PathBuf, u32)> = vec![
        (root, PathBuf::from("/etc/hosts"), FileMode::READ.bits()),
        (child, PathBuf::from("/tmp/out"), FileMode::WRITE.bits()),
        (root, PathBuf::from("/w/build"), FileMode::WDIR.bits()),
    ].into_iter().collect();
    assert_eq!(opens, expected);

    let processes = summarize(&records);
    assert_eq!(processes.len(), 2);
    assert_eq!(processes[&root].parent, None);
    assert_eq!(processes[&root].exit_status, Some(1));
    assert_eq!(processes[&child].parent, Some(root));
    assert_eq!(processes[&child].execs.len(), 1);
    assert_eq!(processes[&child].execs[0].0, PathBuf::from("/bin/tool"));
    Ok(())
}

#[test]
fn test_ingest_binary_metadata_reads_mappings() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store_path = dir.path().join("trace.jsonl");

    let mut store = JsonlStore::create(&store_path)?;
    let root = store.add_process(None, Path::new("/"))?;
    // inspect our own mappings; the test binary is certainly file-backed
    store.ingest_binary_metadata(root, std::process::id() as i32, Path::new("/proc/self/exe"))?;
    store.finish()?;

    let records = load_trace(&store_path)?;
    let opens : Vec<&TraceRecord> = records.iter()
        .filter(|r| matches!(r, TraceRecord::FileOpen { .. }))
        .collect();
    assert!(!opens.is_empty());
    for record in opens {
        if let TraceRecord::FileOpen { id, path, mode, .. } = record {
            assert_eq!(*id, root);
            assert!(path.is_absolute());
            assert_eq!(*mode, FileMode::READ);
        }
    }
    Ok(())
}

#[test]
fn test_load_rejects_empty_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store_path = dir.path().join("empty.jsonl");
    std::fs::File::create(&store_path)?;

    let err = load_trace(&store_path).unwrap_err();
    assert!(matches!(err.downcast_ref::<LoadError>(), Some(LoadError::Empty(_))));
    Ok(())
}

#[test]
fn test_load_rejects_missing_header() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store_path = dir.path().join("headerless.jsonl");
    let mut f = std::fs::File::create(&store_path)?;
    writeln!(f, "this is not a trace")?;

    let err = load_trace(&store_path).unwrap_err();
    assert!(matches!(err.downcast_ref::<LoadError>(), Some(LoadError::NoHeader(_))));
    Ok(())
}

#[test]
fn test_load_rejects_version_mismatch() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let store_path = dir.path().join("future.jsonl");
    let mut f = std::fs::File::create(&store_path)?;
    writeln!(f, "{}", r#"{"version":99,"data_format":"Trace"}"#)?;

    let err = load_trace(&store_path).unwrap_err();
    assert!(matches!(err.downcast_ref::<LoadError>(), Some(LoadError::WrongVersion { found : 99, .. })));
    Ok(())
}
