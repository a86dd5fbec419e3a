use std::io::BufRead;
use std::path::{Path,PathBuf};

use crate::tracer::store::{Header,TraceRecord,CURRENT_VERSION};

#[derive(thiserror::Error,Debug)]
pub enum LoadError {
    #[error("trace file {0:?} is empty")]
    Empty(PathBuf),
    #[error("trace file {0:?} does not start with a header line")]
    NoHeader(PathBuf),
    #[error("trace file was written by version {found}, this build reads version {expected}")]
    WrongVersion { found : u32, expected : u32 }
}

/// Read a recorded trace back, validating the version header first.
pub fn load_trace(file_path : &Path) -> anyhow::Result<Vec<TraceRecord>> {
    let f = std::fs::File::open(file_path)?;
    let reader = std::io::BufReader::new(f);
    let mut line_it = reader.lines();
    check_version(file_path, line_it.next())?;

    let mut records = Vec::new();
    for line in line_it {
        let data = line?;
        let record = serde_json::from_str::<TraceRecord>(&data)?;
        records.push(record);
    }
    Ok(records)
}

// The first line of every store names the format and version it was written
// with; refuse anything we would misread.
fn check_version(file_path : &Path, first_line : Option<Result<String, std::io::Error>>) -> anyhow::Result<()> {
    let line = match first_line {
        Some(line) => { line? }
        None => { return Err(LoadError::Empty(file_path.to_path_buf()).into()); }
    };
    let header : Header = serde_json::from_str(&line)
        .map_err(|_| LoadError::NoHeader(file_path.to_path_buf()))?;
    if header.version != CURRENT_VERSION {
        return Err(LoadError::WrongVersion { found : header.version, expected : CURRENT_VERSION }.into());
    }
    Ok(())
}
