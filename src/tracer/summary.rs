use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::tracer::loader::load_trace;
use crate::tracer::options::SummaryOptions;
use crate::tracer::raw::RawString;
use crate::tracer::sink::{FileMode,ProcessId};
use crate::tracer::store::TraceRecord;

#[derive(Debug,Default)]
pub struct ProcessSummary {
    pub parent : Option<ProcessId>,
    pub wd : PathBuf,
    pub execs : Vec<(PathBuf, Vec<RawString>)>,
    pub opens : Vec<(PathBuf, FileMode, bool)>,
    pub exit_status : Option<i32>
}

/// Group a flat record stream by process.
///
/// Records from different processes interleave arbitrarily in the store;
/// only the per-process order means anything, and that is preserved here.
pub fn summarize(records : &[TraceRecord]) -> BTreeMap<ProcessId, ProcessSummary> {
    let mut processes : BTreeMap<ProcessId, ProcessSummary> = BTreeMap::new();
    for record in records {
        match record {
            TraceRecord::Process { id, parent, wd } => {
                let summary = processes.entry(*id).or_default();
                summary.parent = *parent;
                summary.wd = wd.clone();
            }
            TraceRecord::Exec { id, binary, argv, .. } => {
                processes.entry(*id).or_default().execs.push((binary.clone(), argv.clone()));
            }
            TraceRecord::FileOpen { id, path, mode, is_directory } => {
                processes.entry(*id).or_default().opens.push((path.clone(), *mode, *is_directory));
            }
            TraceRecord::Exit { id, status } => {
                processes.entry(*id).or_default().exit_status = Some(*status);
            }
        }
    }
    processes
}

/// The command-line entry point for reporting over a recorded trace.
pub fn summary_entrypoint(summary_opts : &SummaryOptions) -> anyhow::Result<()> {
    let records = load_trace(&summary_opts.input)?;
    let processes = summarize(&records);

    for (id, summary) in &processes {
        match summary.parent {
            Some(parent) => {
                println!("process {} (parent {}, working directory {})",
                         id, parent, summary.wd.display());
            }
            None => {
                println!("process {} (root, working directory {})", id, summary.wd.display());
            }
        }
        for (binary, argv) in &summary.execs {
            let args : Vec<String> = argv.iter().map(|a| a.display().into_owned()).collect();
            println!("  exec {} [{}]", binary.display(), args.join(", "));
        }
        for (path, mode, is_directory) in &summary.opens {
            let kind = if *is_directory { "dir " } else { "file" };
            println!("  {} {} {}", kind, mode, path.display());
        }
        if let Some(status) = summary.exit_status {
            println!("  exit {}", status);
        }
    }
    Ok(())
}
