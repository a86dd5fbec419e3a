use structopt::StructOpt;
use std::path::PathBuf;

#[derive(Debug,StructOpt)]
#[structopt(version = "0.1.0", about = "Record the filesystem and exec activity of a process tree")]
pub struct Options {
    #[structopt(subcommand)]
    pub subcommand : Subcommand
}

#[derive(Debug,StructOpt)]
pub enum Subcommand {
    Trace(TraceOptions),
    Summary(SummaryOptions)
}

#[derive(Debug,StructOpt)]
#[structopt(help="Trace a command and record what it touches")]
pub struct TraceOptions {
    #[structopt(short = "o", long = "output", help = "The file to save the recorded trace to")]
    pub output : PathBuf,
    #[structopt(short = "p", long = "pid", help = "Attach to a running task instead of spawning a command")]
    pub pid : Option<i32>,
    #[structopt(last = true)]
    pub command : Vec<String>
}

#[derive(Debug,StructOpt)]
#[structopt(help="Report over a previously recorded trace")]
pub struct SummaryOptions {
    #[structopt(short = "i", long = "input", help = "A file containing a recorded trace")]
    pub input : PathBuf
}
