use std::path::PathBuf;

use clap::Parser;
use precomp::utils::logger;
use precomp::version::VERSION;
use precomp::worker;

#[derive(Parser, Debug)]
#[command(name = "precomp-worker", version = VERSION, about = "Executes precompute requests")]
struct WorkerCli {
    /// Request file written by `precomp generate`.
    #[arg(long)]
    request: PathBuf,

    /// Where to write the response.
    #[arg(long)]
    response: PathBuf,

    #[arg(long)]
    /// Enable debug logging.
    debug: bool,
}

fn main() {
    let cli = WorkerCli::parse();
    logger::init_logging(cli.debug);
    if let Err(e) = worker::run_files(&cli.request, &cli.response) {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }
}
