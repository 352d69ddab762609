//! Parallel render of a whole synthetic extent.
//!
//! Stages are not shareable across threads, so every rayon job builds its
//! own chain and renders a contiguous run of chunks through it.

use std::ops::Add;
use std::time::Instant;

use crate::RenderArgs;
use anyhow::{Result, bail};
use rayon::prelude::*;
use tilechain_core::{IPoint, IRect, ISize, TileRequest};
use tilechain_filters::CacheStats;
use tracing::{debug, info, trace};

use super::{Chain, checksum, format_size};

/// Totals over a set of rendered chunks.
#[derive(Debug, Clone, Copy, Default)]
struct Summary {
    chunks: usize,
    pixels: u64,
    nulls: usize,
    checksum: u64,
    fetches: usize,
    cache: CacheStats,
}

impl Add for Summary {
    type Output = Summary;

    fn add(mut self, rhs: Summary) -> Summary {
        self.chunks += rhs.chunks;
        self.pixels += rhs.pixels;
        self.nulls += rhs.nulls;
        self.checksum = self.checksum.wrapping_add(rhs.checksum);
        self.fetches += rhs.fetches;
        self.cache += rhs.cache;
        self
    }
}

/// Renders the chunks at `origins` through one private chain.
fn render_chunks(args: &RenderArgs, origins: &[IPoint], chunk: ISize, level_rect: IRect) -> Result<Summary> {
    let mut chain = Chain::build(&args.chain)?;
    let mut summary = Summary::default();
    for &origin in origins {
        let Some(rect) = IRect::from_origin_size(origin, chunk).intersect(&level_rect) else {
            continue;
        };
        let tile = chain.pipeline.get_tile(chain.remap, &TileRequest::new(rect, args.level))?;
        let (sum, nulls) = checksum(&tile);
        summary.chunks += 1;
        summary.pixels += rect.area();
        summary.nulls += nulls;
        summary.checksum = summary.checksum.wrapping_add(sum);
    }
    summary.fetches = chain.fetches();
    summary.cache = chain.cache_stats();
    debug!(chunks = summary.chunks, fetches = summary.fetches, "render job done");
    Ok(summary)
}

/// Runs the render command.
pub fn run(args: RenderArgs, verbose: bool) -> Result<()> {
    trace!(size = args.chain.size, chunk = args.chunk, level = args.level, "render::run");
    if args.chunk == 0 {
        bail!("--chunk must be positive");
    }

    let extent_chain = Chain::build(&args.chain)?;
    let Some(level_rect) = extent_chain.pipeline.bounding_rect(extent_chain.remap, args.level) else {
        bail!("Level {} is outside the source pyramid", args.level);
    };
    drop(extent_chain);

    let chunk = ISize::square(args.chunk);
    let origins: Vec<IPoint> = level_rect.stretch_to_tile(chunk).tile_origins(chunk).collect();
    let per_job = origins.len().div_ceil(rayon::current_num_threads()).max(1);
    info!(chunks = origins.len(), per_job, rect = %level_rect, "Starting render");

    let start = Instant::now();
    let summary = origins
        .par_chunks(per_job)
        .map(|run| render_chunks(&args, run, chunk, level_rect))
        .try_reduce(Summary::default, |a, b| Ok(a + b))?;
    let elapsed = start.elapsed();

    info!(chunks = summary.chunks, fetches = summary.fetches, "Render complete");
    println!("Extent:      {level_rect} (level {})", args.level);
    println!("Chunks:      {} of {chunk}", summary.chunks);
    println!("Pixels:      {}", summary.pixels);
    println!("Fetches:     {}", summary.fetches);
    println!(
        "Cache:       {} tiles, {}, {} hits / {} misses",
        summary.cache.tiles,
        format_size(summary.cache.bytes),
        summary.cache.hits,
        summary.cache.misses
    );
    println!("Checksum:    {}", summary.checksum);
    println!("Null:        {}", summary.nulls);
    if verbose {
        let secs = elapsed.as_secs_f64();
        println!("Time:        {:.3} s ({:.1} Mpix/s)", secs, summary.pixels as f64 / secs.max(1e-9) / 1e6);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChainArgs;

    fn args(size: u32, chunk: u32) -> RenderArgs {
        RenderArgs {
            chain: ChainArgs {
                size,
                tile: 64,
                output_type: "u8".into(),
            },
            chunk,
            level: 0,
        }
    }

    #[test]
    fn test_chunks_cover_extent_once() {
        let a = args(300, 128);
        let extent = IRect::from_size(300, 300);
        let chunk = ISize::square(128);
        let origins: Vec<IPoint> = extent.stretch_to_tile(chunk).tile_origins(chunk).collect();
        assert_eq!(origins.len(), 9);

        let split = render_chunks(&a, &origins[..4], chunk, extent).unwrap()
            + render_chunks(&a, &origins[4..], chunk, extent).unwrap();
        let whole = render_chunks(&a, &origins, chunk, extent).unwrap();
        assert_eq!(split.pixels, 300 * 300);
        assert_eq!(split.checksum, whole.checksum);
        assert_eq!(split.nulls, whole.nulls);
        // 5x5 cache tiles of 64 cover 300x300; each job fetches what it touches
        assert_eq!(whole.fetches, 25);
    }
}
