mod utils;

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use clap::Parser;
use haulsim::prelude::*;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing_subscriber::EnvFilter;
use utils::{CLIArgs, load_input, load_options, parse_seed_range, seed_dir, with_seed};

fn run_seed(input: &serde_json::Value, options: &SimOptions, args: &CLIArgs, seed: Option<u64>) -> Result<(), String> {
    let raw = with_seed(input, seed).to_string();
    let kind = if args.batch { WriterKind::Batch } else { WriterKind::Simple };
    let output = run_simulation_with(&raw, options, kind).map_err(|e| e.chain())?;

    let dir = seed_dir(&args.output_dir, seed);
    fs::create_dir_all(&dir).map_err(|e| format!("{}: {}", dir.display(), e))?;
    write_result(&dir, &output)?;
    if args.csv {
        output.write_csv(&dir).map_err(|e| format!("{}: {}", dir.display(), e))?;
    }
    log::info!(
        "seed {:?}: {} trips, {} t, written to {}",
        seed,
        output.summary.trips,
        output.summary.weight,
        dir.display()
    );
    Ok(())
}

fn write_result(dir: &Path, output: &SimOutput) -> Result<(), String> {
    let path = dir.join("result.json");
    let file = File::create(&path).map_err(|e| format!("{}: {}", path.display(), e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), output).map_err(|e| format!("{}: {}", path.display(), e))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = CLIArgs::parse();

    let seeds: Vec<Option<u64>> = match args.seed.as_deref().map(parse_seed_range) {
        None => vec![None],
        Some(Ok(seeds)) => seeds.into_iter().map(Some).collect(),
        Some(Err(err)) => {
            eprintln!("Error parsing seed range: {}", err);
            std::process::exit(1);
        }
    };

    let input = match load_input(&args.input) {
        Ok(input) => input,
        Err(err) => {
            eprintln!("Error reading input: {}", err);
            std::process::exit(1);
        }
    };
    let mut options = match load_options(args.config.as_deref()) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("Error reading config: {}", err);
            std::process::exit(1);
        }
    };
    if let Some(mode) = &args.mode {
        options.mode = Some(mode.clone());
    }

    let failures: Vec<(Option<u64>, String)> = seeds
        .par_iter()
        .filter_map(|seed| run_seed(&input, &options, &args, *seed).err().map(|e| (*seed, e)))
        .collect();

    for (seed, err) in &failures {
        eprintln!("seed {:?} failed: {}", seed, err);
    }
    if !failures.is_empty() {
        std::process::exit(1);
    }
}
