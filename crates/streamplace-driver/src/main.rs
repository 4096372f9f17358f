use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(about = "Place streaming-dataflow jobs onto an edge/cloud scenario")]
struct Opt {
    /// Path to the scenario document (JSON).
    #[arg(long)]
    scenario: PathBuf,

    /// Path to the job stream (one JSON document per job).
    #[arg(long)]
    jobs: PathBuf,

    /// Seed for random placement choices.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Also estimate per-job latency and back-pressure.
    #[arg(long)]
    latency: bool,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    let reports =
        streamplace_driver::run_from_files(&opt.scenario, &opt.jobs, opt.seed, opt.latency)?;
    serde_json::to_writer_pretty(std::io::stdout().lock(), &reports)?;
    println!();
    Ok(())
}
