//! gossip-simulate: Offline round-based run of the averaging process.
//!
//! Reads a 0/1 adjacency matrix, assigns random initial states and writes one
//! CSV row of node states per round.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use gossip_core::{Topology, random_states, simulate};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gossip-simulate")]
#[command(about = "Simulate push-pull gossip averaging on a graph")]
struct Args {
    /// Adjacency matrix, one comma-separated row of 0/1 per node
    #[arg(short, long)]
    graph: PathBuf,

    /// Number of rounds
    #[arg(short, long, default_value_t = 30)]
    rounds: usize,

    /// Output CSV (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seed for initial states and neighbour choice
    #[arg(long)]
    seed: Option<u64>,
}

fn write_rows<W: Write>(out: W, rows: &[Vec<f64>]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let contents = std::fs::read_to_string(&args.graph)
        .with_context(|| format!("Failed to read graph {:?}", args.graph))?;
    let topology = Topology::from_adjacency_matrix(&contents)
        .with_context(|| format!("Invalid graph {:?}", args.graph))?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let initial = random_states(topology.len(), &mut rng);
    let mean = initial.iter().sum::<f64>() / initial.len().max(1) as f64;
    info!(
        "Simulating {} rounds on {} nodes (true mean {})",
        args.rounds,
        topology.len(),
        mean
    );
    debug!("Initial states: {:?}", initial);

    let rows = simulate(&topology, initial, args.rounds, &mut rng)?;

    match &args.output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {:?}", path))?;
            write_rows(file, &rows)?;
            info!("Wrote {} rounds to {:?}", rows.len(), path);
        }
        None => write_rows(io::stdout().lock(), &rows)?,
    }

    Ok(())
}
