use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use provtrace::run_provtrace;
use provtrace::tracer::options::Options;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let opt = Options::from_args();
    run_provtrace(opt)
}
