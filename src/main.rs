#![warn(unused_qualifications)]

pub mod config;
pub mod initial;
pub mod runner;

use std::path::PathBuf;

use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Error,
    bail,
};
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

use crate::config::SimulationConfig;

fn main() -> Result<(), Error> {
    let _ = dotenv();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let args = Args::parse();
    match args.command {
        Command::Run(args) => {
            let mut config = SimulationConfig::read(&args.config)?;
            if let Some(steps) = args.steps {
                config.run.steps = steps;
            }
            if let Some(ranks) = args.ranks {
                config.run.ranks = ranks;
            }
            config.validate()?;

            let summaries = runner::run(&config)?;

            let energy = summaries.iter().map(|summary| summary.energy).sum::<f64>();
            let max_degeneracy = summaries
                .iter()
                .map(|summary| summary.max_degeneracy)
                .fold(0.0, f64::max);
            let (steps, time) = summaries
                .first()
                .map_or((0, 0.0), |summary| (summary.steps, summary.time));
            println!("steps:          {steps}");
            println!("time:           {time}");
            println!("energy:         {energy}");
            println!("max |D|²/|B|²:  {max_degeneracy}");
        }
        Command::DumpDefaultConfig { output, format } => {
            let config = SimulationConfig::default();
            let config = match format.as_str() {
                "toml" => toml::to_string_pretty(&config)?,
                "json" => serde_json::to_string_pretty(&config)?,
                _ => bail!("Invalid format: {format}"),
            };
            if let Some(output) = &output {
                std::fs::write(output, &config)?;
            }
            else {
                println!("{config}");
            }
        }
    }

    Ok(())
}

#[derive(Debug, Parser)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a simulation from a config file
    Run(RunArgs),
    DumpDefaultConfig {
        #[clap(short, long)]
        output: Option<PathBuf>,
        #[clap(short, long, default_value = "toml")]
        format: String,
    },
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    config: PathBuf,

    /// Override the number of steps
    #[clap(long)]
    steps: Option<usize>,

    /// Override the number of ranks
    #[clap(long)]
    ranks: Option<usize>,
}
