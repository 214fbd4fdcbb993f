use std::{fs::File, io::BufReader, path::PathBuf};

use anyhow::{Context, Result};
use cachesim::{
    config::CacheConfig,
    sim::{ReplayOption, Simulator},
};
use clap::{error::ErrorKind, CommandFactory, Parser};

#[cfg(feature = "stat")]
use terminal_size::terminal_size;

/// Replays a valgrind memory trace through a set-associative LRU cache and
/// reports hits, misses and evictions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Examples:\n  csim -s 4 -E 1 -b 4 -t traces/yi.trace\n  csim -v -s 8 -E 2 -b 4 -t traces/yi.trace")]
struct Cli {
    /// Number of set index bits
    #[arg(short = 's', value_name = "num")]
    set_bits: u32,
    /// Number of lines per set
    #[arg(short = 'E', value_name = "num")]
    lines: usize,
    /// Number of block offset bits
    #[arg(short = 'b', value_name = "num")]
    block_bits: u32,
    /// Trace file
    #[arg(short = 't', value_name = "file")]
    trace: PathBuf,
    /// Print every record and the outcome of each access
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::init();
    }
    let config = match geometry(&args) {
        Ok(config) => config,
        Err(e) => e.exit(),
    };
    let trace = File::open(&args.trace)
        .with_context(|| format!("failed to open trace file {}", args.trace.display()))?;
    let mut sim = Simulator::new(config)?;
    let stats = sim
        .replay(
            BufReader::new(trace),
            &ReplayOption {
                verbose: args.verbose,
            },
        )
        .with_context(|| format!("failed to replay {}", args.trace.display()))?;
    output_stat(&sim);
    println!("{stats}");
    Ok(())
}

/// Validates the flags as a cache geometry, reporting failures the way clap
/// reports its own: diagnostic plus usage.
fn geometry(args: &Cli) -> Result<CacheConfig, clap::Error> {
    CacheConfig::new(args.set_bits, args.lines, args.block_bits)
        .map_err(|e| Cli::command().error(ErrorKind::ValueValidation, e))
}

#[cfg(not(feature = "stat"))]
fn output_stat(_: &Simulator) {}

#[cfg(feature = "stat")]
fn output_stat(sim: &Simulator) {
    let max_width = get_terminal_width().unwrap_or(120) as usize;
    log::info!("statistics:\n{}", sim.collect_stat().view(max_width));
}

#[cfg(feature = "stat")]
fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0.saturating_sub(20))
}
