//! Cache stage state as a YAML keyword list.

use crate::StateArgs;
use anyhow::{Context, Result};
use tilechain_core::{IRect, ISize, ScalarType};
use tilechain_filters::{CachingFilter, GeneratedSource, Keywordlist, Pipeline, PropertyValue, StageId};
use tracing::{info, trace};

/// Prefix the cache stage is saved under.
pub const PREFIX: &str = "cache";

/// Builds a ramp → cache pipeline configured from `args`.
fn configured(args: &StateArgs) -> Result<(Pipeline, StageId)> {
    let mut p = Pipeline::new();
    let src = p.add(
        "ramp",
        GeneratedSource::new(ScalarType::U16, 1, IRect::from_size(512, 512), |x, y, _| super::ramp_value(x, y)),
        &[],
    )?;
    let cache = p.chain("cache", CachingFilter::new(), src)?;
    p.set_property(cache, "tile_size", PropertyValue::Size(ISize::square(args.tile)))?;
    if let Some(budget) = args.budget {
        let budget = i64::try_from(budget).context("Budget too large")?;
        p.set_property(cache, "cache_budget_bytes", PropertyValue::Int(budget))?;
    }
    if args.no_cache {
        p.set_property(cache, "enable_cache", PropertyValue::Bool(false))?;
    }
    Ok((p, cache))
}

/// Runs the state command.
pub fn run(args: StateArgs, verbose: bool) -> Result<()> {
    trace!(tile = args.tile, load = ?args.load, "state::run");
    let (mut p, cache) = configured(&args)?;

    if let Some(path) = &args.load {
        let kwl = Keywordlist::read_file(path)
            .with_context(|| format!("Failed to load: {}", path.display()))?;
        p.load_state(cache, &kwl, PREFIX)
            .with_context(|| format!("Invalid state in {}", path.display()))?;
        info!(path = %path.display(), keys = kwl.len(), "Loaded state");
    }

    let mut kwl = Keywordlist::new();
    p.save_state(cache, &mut kwl, PREFIX)?;

    match &args.output {
        Some(path) => {
            kwl.write_file(path)
                .with_context(|| format!("Failed to save: {}", path.display()))?;
            if verbose {
                println!("Wrote {} keys to {}", kwl.len(), path.display());
            }
        }
        None => print!("{}", kwl.to_yaml()?),
    }
    Ok(())
}
