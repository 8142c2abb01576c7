// src/main.rs

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::error;

use vanguard_sweep::cli::Args;
use vanguard_sweep::core::sweep;
use vanguard_sweep::logging::initialize_logging;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let command = std::env::args().collect::<Vec<_>>().join(" ");
    let args = Args::parse();
    initialize_logging(args.log_level().as_deref())?;

    let scan = args.scan.clone();
    let input = args.domains.clone();
    let options = args.into_options();

    match sweep::run(&scan, &input, options, command).await {
        Ok(metadata) => {
            println!("Scan {} finished in {:.2}s.", metadata.scan_uuid, metadata.duration);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Run aborted.");
            Err(e.into())
        }
    }
}
