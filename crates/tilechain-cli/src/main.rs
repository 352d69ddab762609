//! tilechain - drive tile pipelines from the command line
//!
//! Builds synthetic source → cache → remap chains, renders them and dumps
//! stage state as YAML keyword lists.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "tilechain")]
#[command(author, version, about = "Pull-based tile pipeline driver")]
#[command(long_about = "
Runs synthetic tile pipelines: a generated 16-bit ramp feeding a tile cache
and a scalar remap stage.

Examples:
  tilechain scenario                          # 512x512 u16 -> cache 128 -> u8
  tilechain scenario --rect 0 0 300 300 -t 64
  tilechain render --size 2048 --chunk 256 -j 8
  tilechain state --tile 256 --budget 1048576 -o cache.yaml
  tilechain state --load cache.yaml
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Request one rectangle through source -> cache -> remap
    #[command(visible_alias = "s")]
    Scenario(ScenarioArgs),

    /// Render a whole synthetic extent in chunks, in parallel
    #[command(visible_alias = "r")]
    Render(RenderArgs),

    /// Print, write or load the cache stage's keyword list
    State(StateArgs),
}

/// Options shared by commands that build the synthetic chain.
#[derive(Args, Clone)]
struct ChainArgs {
    /// Width and height of the synthetic source
    #[arg(long, default_value = "512")]
    size: u32,

    /// Cache tile size
    #[arg(short, long, default_value = "128")]
    tile: u32,

    /// Scalar type produced by the remap stage
    #[arg(long = "output-type", default_value = "u8")]
    output_type: String,
}

/// Arguments for the `scenario` command.
#[derive(Args)]
struct ScenarioArgs {
    #[command(flatten)]
    chain: ChainArgs,

    /// Requested rectangle: X Y WIDTH HEIGHT
    #[arg(long, num_args = 4, value_names = ["X", "Y", "W", "H"], default_values = ["100", "100", "50", "50"], allow_hyphen_values = true)]
    rect: Vec<i64>,

    /// Resolution level
    #[arg(short, long, default_value = "0")]
    level: u32,

    /// Request the rectangle this many times (later passes hit the cache)
    #[arg(long, default_value = "1")]
    repeat: usize,
}

/// Arguments for the `render` command.
#[derive(Args)]
struct RenderArgs {
    #[command(flatten)]
    chain: ChainArgs,

    /// Size of the chunks requested from the remap stage
    #[arg(long, default_value = "256")]
    chunk: u32,

    /// Resolution level
    #[arg(short, long, default_value = "0")]
    level: u32,
}

/// Arguments for the `state` command.
#[derive(Args)]
struct StateArgs {
    /// Cache tile size
    #[arg(short, long, default_value = "64")]
    tile: u32,

    /// Per-level cache budget in bytes
    #[arg(long)]
    budget: Option<u64>,

    /// Store nothing; fetched tiles pass straight through
    #[arg(long)]
    no_cache: bool,

    /// Keyword list to load into the stage before printing
    #[arg(long)]
    load: Option<PathBuf>,

    /// Write the keyword list here instead of printing it
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Configure thread pool
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    match cli.command {
        Commands::Scenario(args) => commands::scenario::run(args, cli.verbose),
        Commands::Render(args) => commands::render::run(args, cli.verbose),
        Commands::State(args) => commands::state::run(args, cli.verbose),
    }
}
