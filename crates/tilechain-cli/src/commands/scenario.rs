//! Single-request scenario: synthetic u16 ramp → cache → remap.
//!
//! With the defaults this is the 512×512 / 128×128 / (100,100,50,50) case:
//! the aligned request covers a 2×2 block of cache tiles, so the cache
//! fetches exactly 4 tiles from upstream.

use crate::ScenarioArgs;
use anyhow::{Result, bail};
use tilechain_core::{IRect, ScalarType, TileRequest};
use tracing::{debug, info, trace};

use super::{Chain, checksum, format_size, ramp_value};

/// Runs the scenario and prints fetch counts, cache counters and a checksum.
pub fn run(args: ScenarioArgs, verbose: bool) -> Result<()> {
    let &[x, y, w, h] = args.rect.as_slice() else {
        bail!("--rect takes exactly 4 values");
    };
    let (Ok(x), Ok(y), Ok(w), Ok(h)) = (i32::try_from(x), i32::try_from(y), u32::try_from(w), u32::try_from(h))
    else {
        bail!("Rectangle out of range: {x} {y} {w} {h}");
    };
    let rect = IRect::new(x, y, w, h);
    trace!(%rect, level = args.level, "scenario::run");

    let mut chain = Chain::build(&args.chain)?;
    let request = TileRequest::new(rect, args.level);

    let mut tile = None;
    for pass in 0..args.repeat.max(1) {
        let t = chain.pipeline.get_tile(chain.remap, &request)?;
        debug!(pass, fetches = chain.fetches(), "scenario pass");
        tile = Some(t);
    }
    let Some(tile) = tile else {
        bail!("No tile produced");
    };

    let (sum, nulls) = checksum(&tile);
    let stats = chain.cache_stats();
    info!(fetches = chain.fetches(), hits = stats.hits, misses = stats.misses, "Scenario complete");

    println!("Request:     {request}");
    println!("Output:      {} {}x{} ({})", tile.scalar_type(), tile.width(), tile.height(), tile.status());
    println!("Fetches:     {}", chain.fetches());
    println!(
        "Cache:       {} tiles, {}, {} hits / {} misses",
        stats.tiles,
        format_size(stats.bytes),
        stats.hits,
        stats.misses
    );
    println!("Checksum:    {sum}");
    println!("Null:        {nulls}");

    // Full-resolution 8-bit output can be checked against the ramp directly.
    if args.level == 0 && tile.scalar_type() == ScalarType::U8 {
        let extent = IRect::from_size(args.chain.size, args.chain.size);
        let mut mismatches = 0usize;
        for (o, (px, py)) in tile.rect().iter_coords().enumerate() {
            if !extent.contains(px, py) {
                continue;
            }
            let expected = (ramp_value(px, py) / 65535.0 * 255.0).round().clamp(0.0, 255.0);
            if tile.value(0, o) != expected {
                mismatches += 1;
            }
        }
        println!("Mismatches:  {mismatches}");
        if mismatches > 0 {
            bail!("{mismatches} pixels differ from round(v / 65535 * 255)");
        }
    }

    if verbose {
        if let Some(level) = chain
            .pipeline
            .stage::<tilechain_filters::CachingFilter>(chain.cache)
            .and_then(|c| c.level(args.level))
        {
            println!("Level {}:     tile {}, bounds {}", args.level, level.tile_size(), level.bounds());
        }
        println!("Hit ratio:   {:.3}", stats.hit_ratio());
    }

    Ok(())
}
