pub mod tracer;

use crate::tracer::options::{Options,Subcommand};
use crate::tracer::run::trace_entrypoint;
use crate::tracer::summary::summary_entrypoint;

pub fn run_provtrace(opt : Options) -> anyhow::Result<()> {
    match opt.subcommand {
        Subcommand::Trace(trace_opts) => { trace_entrypoint(&trace_opts) }
        Subcommand::Summary(summary_opts) => { summary_entrypoint(&summary_opts) }
    }
}
