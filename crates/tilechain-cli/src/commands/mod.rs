//! CLI command implementations

pub mod render;
pub mod scenario;
pub mod state;

use anyhow::{Context, Result};
use tilechain_core::{IRect, ISize, PixelBuffer, ScalarType};
use tilechain_filters::{CachingFilter, CountingSource, GeneratedSource, Pipeline, ScalarRemapFilter, StageId};

use crate::ChainArgs;

/// Synthetic 16-bit ramp; never produces the null value 0.
pub fn ramp_value(x: i32, y: i32) -> f64 {
    ((x as i64 * 131 + y as i64 * 257) % 65535 + 1) as f64
}

/// Generated source → counter → cache → remap.
pub struct Chain {
    pub pipeline: Pipeline,
    pub counter: StageId,
    pub cache: StageId,
    pub remap: StageId,
}

impl Chain {
    /// Builds the chain described by `args`.
    pub fn build(args: &ChainArgs) -> Result<Self> {
        let output: ScalarType = args
            .output_type
            .parse()
            .with_context(|| format!("Invalid output type: {}", args.output_type))?;
        let extent = IRect::from_size(args.size, args.size);

        let mut pipeline = Pipeline::new();
        let source = pipeline.add(
            "ramp",
            GeneratedSource::new(ScalarType::U16, 1, extent, |x, y, _| ramp_value(x, y)),
            &[],
        )?;
        let counter = pipeline.chain("counter", CountingSource::new(), source)?;
        let cache = pipeline.chain(
            "cache",
            CachingFilter::new().with_tile_size(ISize::square(args.tile)),
            counter,
        )?;
        let remap = pipeline.chain("remap", ScalarRemapFilter::new(output), cache)?;
        Ok(Self {
            pipeline,
            counter,
            cache,
            remap,
        })
    }

    /// Upstream fetches the cache has made so far.
    pub fn fetches(&self) -> usize {
        self.pipeline
            .stage::<CountingSource>(self.counter)
            .map_or(0, CountingSource::calls)
    }

    /// Summed cache counters over all levels.
    pub fn cache_stats(&self) -> tilechain_filters::CacheStats {
        self.pipeline
            .stage::<CachingFilter>(self.cache)
            .map(CachingFilter::stats)
            .unwrap_or_default()
    }
}

/// Sum of every non-null sample, as a cheap fingerprint of a tile.
pub fn checksum(tile: &PixelBuffer) -> (u64, usize) {
    let mut sum = 0u64;
    let mut nulls = 0usize;
    for band in 0..tile.bands() {
        for o in 0..tile.plane_len() {
            if tile.is_null_sample(band, o) {
                nulls += 1;
            } else {
                sum = sum.wrapping_add(tile.value(band, o).round() as u64);
            }
        }
    }
    (sum, nulls)
}

/// Format byte count for display
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(tile: u32, output: &str) -> ChainArgs {
        ChainArgs {
            size: 512,
            tile,
            output_type: output.into(),
        }
    }

    #[test]
    fn test_ramp_never_null() {
        assert!((0..512).all(|i| ramp_value(i, 511 - i) >= 1.0));
        assert_eq!(ramp_value(0, 0), 1.0);
    }

    #[test]
    fn test_chain_builds() {
        let chain = Chain::build(&args(128, "u8")).unwrap();
        assert_eq!(chain.pipeline.output_scalar_type(chain.remap), ScalarType::U8);
        assert_eq!(chain.fetches(), 0);
        assert!(Chain::build(&args(128, "rgb")).is_err());
        assert!(Chain::build(&args(0, "u8")).is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
    }
}
