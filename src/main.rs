//! Epidemia command line runner
//!
//! Builds a world from a TOML config (or the defaults), runs it to the end
//! and prints a summary. The full history can be written as JSON or CSV.

use std::path::PathBuf;

use clap::Parser;
use epidemia::core::error::Result;
use epidemia::core::SimulationConfig;
use epidemia::epidemic::World;
use tracing_subscriber::EnvFilter;

/// Stochastic agent-based epidemic simulator
#[derive(Parser, Debug)]
#[command(name = "epidemia")]
#[command(about = "Simulate an epidemic across cities and nested social clusters")]
struct Args {
    /// TOML configuration file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the population size
    #[arg(long)]
    population: Option<u32>,

    /// Override the number of cities
    #[arg(long)]
    cities: Option<usize>,

    /// Write the run output as JSON
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Write the daily history as CSV
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Include a per-city breakdown in every snapshot
    #[arg(long)]
    record_cities: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("epidemia=info")),
        )
        .init();

    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => SimulationConfig::from_file(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(seed) = args.seed {
        settings.seed = seed;
    }
    if let Some(population) = args.population {
        settings.population = population;
    }
    if let Some(cities) = args.cities {
        settings.city.count = cities;
    }
    settings.run.record_cities |= args.record_cities;

    let mut world = World::build(settings.snapshot()?)?;
    world.run_with(
        |snapshot| {
            tracing::info!(
                day = snapshot.day,
                infected = snapshot.infected,
                gestating = snapshot.gestating,
                total = snapshot.total,
                "day"
            );
        },
        |_| false,
    )?;

    if let Some((start, end)) = world.interesting_window() {
        tracing::info!(start, end, "interesting window");
    }

    let output = world.into_output();
    println!("{}", output.summary());

    if let Some(path) = &args.output {
        std::fs::write(path, output.to_json()?)?;
        tracing::info!(path = %path.display(), "wrote JSON output");
    }
    if let Some(path) = &args.csv {
        std::fs::write(path, output.history.to_csv())?;
        tracing::info!(path = %path.display(), "wrote CSV history");
    }

    Ok(())
}
