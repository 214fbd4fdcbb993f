use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use cachesim::{
    eval::{self, reference_config},
    transpose::{registered, SUBMISSION},
};
use clap::Parser;

/// Checks every registered transpose for correctness and counts its misses
/// on the reference cache.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of matrix columns
    #[arg(short = 'M', value_name = "cols", default_value_t = 32)]
    cols: usize,
    /// Number of matrix rows
    #[arg(short = 'N', value_name = "rows", default_value_t = 32)]
    rows: usize,
    /// Print the results as JSON
    #[arg(long)]
    json: bool,
    /// Write the trace of the submission to this file
    #[arg(long, value_name = "file")]
    trace_out: Option<PathBuf>,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let Cli {
        cols,
        rows,
        json,
        trace_out,
        verbose,
    } = Cli::parse();
    if verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::init();
    }
    log::info!("reference cache: {}", reference_config());

    let mut evaluations = Vec::with_capacity(registered().len());
    for strategy in registered() {
        evaluations.push(eval::evaluate(strategy, rows, cols)?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&evaluations)?);
    } else {
        for (i, e) in evaluations.iter().enumerate() {
            println!("Function {i} ({}): {}x{}", e.label, e.cols, e.rows);
            println!("  correctness={} {}", u8::from(e.correct), e.statistics);
        }
    }

    if let Some(path) = trace_out {
        let recorded = eval::record(&SUBMISSION, rows, cols)?;
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        for r in &recorded.trace {
            writeln!(out, " {r}")?;
        }
        out.flush()?;
        log::info!("wrote {} records to {}", recorded.trace.len(), path.display());
    }

    if let Some(e) = evaluations.iter().find(|e| !e.correct) {
        bail!(
            "{} does not produce the transpose of a {}x{} matrix",
            e.label,
            e.rows,
            e.cols
        );
    }
    Ok(())
}
