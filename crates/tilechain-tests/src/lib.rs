//! Integration tests for tilechain crates.
//!
//! End-to-end checks of the pipeline contract: cache idempotence and tile
//! size invariance, scalar remapping, compositing rules, and the
//! source → cache → remap scenario.

use tilechain_core::{IRect, ISize, ScalarType};
use tilechain_filters::{
    CachingFilter, CountingSource, FilterResult, GeneratedSource, Pipeline, ScalarRemapFilter, StageId,
};

/// 16-bit ramp used by the scenario tests; never produces the null value 0.
pub fn ramp_value(x: i32, y: i32) -> f64 {
    ((x as i64 * 97 + y as i64 * 389) % 65535 + 1) as f64
}

/// Stage ids of a source → counter → cache (→ remap) chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainIds {
    /// Synthetic source
    pub source: StageId,
    /// Upstream call counter in front of the cache
    pub counter: StageId,
    /// Caching stage
    pub cache: StageId,
    /// Remap stage, when requested
    pub remap: Option<StageId>,
}

/// Builds a `size`×`size` u16 ramp chain with a cache of `tile` and an
/// optional remap to `output`.
pub fn ramp_chain(size: u32, tile: ISize, output: Option<ScalarType>) -> FilterResult<(Pipeline, ChainIds)> {
    let mut p = Pipeline::new();
    let source = p.add(
        "ramp",
        GeneratedSource::new(ScalarType::U16, 1, IRect::from_size(size, size), |x, y, _| ramp_value(x, y)),
        &[],
    )?;
    let counter = p.chain("counter", CountingSource::new(), source)?;
    let cache = p.chain("cache", CachingFilter::new().with_tile_size(tile), counter)?;
    let remap = output
        .map(|t| p.chain("remap", ScalarRemapFilter::new(t), cache))
        .transpose()?;
    Ok((
        p,
        ChainIds {
            source,
            counter,
            cache,
            remap,
        },
    ))
}

/// Upstream calls seen by the counter stage since its last reset.
pub fn fetches(p: &Pipeline, ids: &ChainIds) -> usize {
    p.stage::<CountingSource>(ids.counter).map_or(0, CountingSource::calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::{Arc, Mutex};
    use tilechain_core::{DataObjectStatus, IPoint, PixelBuffer, TileRequest};
    use tilechain_filters::{
        BandSelector, FeatherMosaic, FilterError, Keywordlist, MajorityVoting, MemorySource, PropertyValue,
        TwoColorView,
    };

    fn reset_counter(p: &mut Pipeline, ids: &ChainIds) {
        if let Some(c) = p.stage_mut::<CountingSource>(ids.counter) {
            c.reset();
        }
    }

    // ------------------------------------------------------------------
    // Cache
    // ------------------------------------------------------------------

    /// Repeated requests are identical and the second one never reaches
    /// upstream.
    #[test]
    fn test_cache_idempotence() {
        let (mut p, ids) = ramp_chain(512, ISize::square(128), None).unwrap();
        let req = TileRequest::full_res(IRect::new(37, 201, 180, 90));

        let first = p.get_tile(ids.cache, &req).unwrap();
        assert!(fetches(&p, &ids) > 0);

        reset_counter(&mut p, &ids);
        let second = p.get_tile(ids.cache, &req).unwrap();
        assert_eq!(fetches(&p, &ids), 0);
        assert_eq!(*first, *second);
        assert_eq!(second.rect(), req.rect());
    }

    /// Cache tile size is a performance knob only.
    #[test]
    fn test_cache_tile_size_invariance() {
        let req = TileRequest::full_res(IRect::new(100, 60, 301, 177));
        let reference = {
            let (mut p, ids) = ramp_chain(512, ISize::square(64), None).unwrap();
            p.get_tile(ids.cache, &req).unwrap()
        };
        for tile in [ISize::square(256), ISize::new(100, 30), ISize::square(512)] {
            let (mut p, ids) = ramp_chain(512, tile, None).unwrap();
            let got = p.get_tile(ids.cache, &req).unwrap();
            assert_eq!(got.band_slice::<u16>(0), reference.band_slice::<u16>(0), "tile {tile}");
        }

        // and matches the source read directly
        let (mut p, ids) = ramp_chain(512, ISize::square(64), None).unwrap();
        let direct = p.get_tile(ids.source, &req).unwrap();
        assert_eq!(direct.band_slice::<u16>(0), reference.band_slice::<u16>(0));
    }

    #[test]
    fn test_cache_flush_and_disable() {
        let (mut p, ids) = ramp_chain(256, ISize::square(64), None).unwrap();
        let req = TileRequest::full_res(IRect::new(0, 0, 128, 128));
        p.get_tile(ids.cache, &req).unwrap();
        assert_eq!(fetches(&p, &ids), 4);

        // switching caching off keeps what is stored
        p.set_property(ids.cache, "enable_cache", PropertyValue::Bool(false)).unwrap();
        p.get_tile(ids.cache, &req).unwrap();
        assert_eq!(fetches(&p, &ids), 4);

        // after a flush nothing is stored any more
        p.stage_mut::<CachingFilter>(ids.cache).unwrap().flush();
        p.get_tile(ids.cache, &req).unwrap();
        p.get_tile(ids.cache, &req).unwrap();
        assert_eq!(fetches(&p, &ids), 12);
    }

    #[test]
    fn test_cache_outside_bounds() {
        let (mut p, ids) = ramp_chain(256, ISize::square(64), Some(ScalarType::U8)).unwrap();
        let remap = ids.remap.unwrap();
        let tile = p.get_tile(remap, &TileRequest::full_res(IRect::new(1000, 1000, 32, 32))).unwrap();
        assert_eq!(tile.status(), DataObjectStatus::Empty);
        assert_eq!(tile.scalar_type(), ScalarType::U8);
        assert_eq!(tile.rect(), IRect::new(1000, 1000, 32, 32));
        assert_eq!(fetches(&p, &ids), 0);
    }

    #[test]
    fn test_cache_levels() {
        let (mut p, ids) = ramp_chain(512, ISize::square(64), None).unwrap();
        assert_eq!(p.bounding_rect(ids.cache, 2), Some(IRect::from_size(128, 128)));
        let tile = p.get_tile(ids.cache, &TileRequest::new(IRect::from_size(128, 128), 2)).unwrap();
        // level 2 samples every 4th level-0 pixel
        assert_eq!(tile.sample(3, 5, 0), Some(ramp_value(12, 20)));
        assert_eq!(p.stage::<CachingFilter>(ids.cache).unwrap().cached_levels(), 1);
    }

    // ------------------------------------------------------------------
    // Scalar remap
    // ------------------------------------------------------------------

    #[test]
    fn test_remap_same_type_is_bypass() {
        let (mut p, ids) = ramp_chain(128, ISize::square(64), Some(ScalarType::U16)).unwrap();
        let remap = ids.remap.unwrap();
        let req = TileRequest::full_res(IRect::new(5, 5, 64, 64));
        let upstream = p.get_tile(ids.cache, &req).unwrap();
        let out = p.get_tile(remap, &req).unwrap();
        assert!(p.stage::<ScalarRemapFilter>(remap).unwrap().is_bypassed());
        assert_eq!(out.band_slice::<u16>(0), upstream.band_slice::<u16>(0));
    }

    /// u8 → normalized float → u8 is lossless for every value.
    #[test]
    fn test_remap_u8_normalized_round_trip() {
        let values: Vec<f64> = (0..256).map(f64::from).collect();
        let rect = IRect::from_size(16, 16);
        let image = PixelBuffer::from_values(ScalarType::U8, 1, rect, &values).unwrap();

        let mut p = Pipeline::new();
        let src = p.add("src", MemorySource::new(image), &[]).unwrap();
        let to_norm = p.chain("to_norm", ScalarRemapFilter::new(ScalarType::NormalizedF32), src).unwrap();
        let back = p.chain("back", ScalarRemapFilter::new(ScalarType::U8), to_norm).unwrap();

        let norm = p.get_tile(to_norm, &TileRequest::full_res(rect)).unwrap();
        assert_eq!(norm.scalar_type(), ScalarType::NormalizedF32);
        assert_relative_eq!(norm.sample(15, 15, 0).unwrap(), 1.0);

        let out = p.get_tile(back, &TileRequest::full_res(rect)).unwrap();
        let expected: Vec<u8> = (0..=255).collect();
        assert_eq!(out.band_slice::<u8>(0), Some(&expected[..]));
    }

    /// Values beyond the band range saturate instead of wrapping.
    #[test]
    fn test_remap_narrowing_saturates() {
        let rect = IRect::from_size(3, 1);
        let mut image = PixelBuffer::from_values(ScalarType::U32, 1, rect, &[70000.0, 65535.0, 32768.0]).unwrap();
        image.set_max_pix(0, 65535.0).unwrap();

        let mut p = Pipeline::new();
        let src = p.add("src", MemorySource::new(image), &[]).unwrap();
        let remap = p.chain("remap", ScalarRemapFilter::new(ScalarType::U8), src).unwrap();
        let out = p.get_tile(remap, &TileRequest::full_res(rect)).unwrap();
        assert_eq!(out.band_slice::<u8>(0), Some(&[255u8, 255, 128][..]));
    }

    // ------------------------------------------------------------------
    // Compositing
    // ------------------------------------------------------------------

    fn constant(rect: IRect, scalar: ScalarType, value: f64) -> MemorySource {
        let values = vec![value; rect.area() as usize];
        MemorySource::new(PixelBuffer::from_values(scalar, 1, rect, &values).unwrap())
    }

    /// Equal geometry gives equal weights, so the centre is the mean.
    #[test]
    fn test_feather_equal_geometry_is_mean() {
        let rect = IRect::new(10, 10, 21, 21);
        for scalar in [ScalarType::F32, ScalarType::U16] {
            let mut p = Pipeline::new();
            let a = p.add("a", constant(rect, scalar, 100.0), &[]).unwrap();
            let b = p.add("b", constant(rect, scalar, 300.0), &[]).unwrap();
            let m = p.add("mosaic", FeatherMosaic::new(), &[a, b]).unwrap();
            let tile = p.get_tile(m, &TileRequest::full_res(rect)).unwrap();
            assert_relative_eq!(tile.sample(20, 20, 0).unwrap(), 200.0);
        }
    }

    #[test]
    fn test_feather_missing_input_has_no_weight() {
        let mut p = Pipeline::new();
        let a = p.add("a", constant(IRect::from_size(8, 8), ScalarType::F32, 5.0), &[]).unwrap();
        let b = p.add("b", constant(IRect::new(100, 100, 8, 8), ScalarType::F32, 9.0), &[]).unwrap();
        let m = p.add("mosaic", FeatherMosaic::new(), &[a, b]).unwrap();
        let tile = p.get_tile(m, &TileRequest::full_res(IRect::from_size(8, 8))).unwrap();
        assert_relative_eq!(tile.sample(4, 4, 0).unwrap(), 5.0);
    }

    /// Two labels four times each around a third centre label.
    #[test]
    fn test_majority_tie_policy() {
        let rect = IRect::from_size(3, 3);
        let labels = [1.0, 2.0, 1.0, 2.0, 5.0, 2.0, 1.0, 2.0, 1.0];
        let image = PixelBuffer::from_values(ScalarType::U8, 1, rect, &labels).unwrap();

        let vote = |keep: bool| {
            let mut p = Pipeline::new();
            let src = p.add("labels", MemorySource::new(image.clone()), &[]).unwrap();
            let mv = MajorityVoting::new()
                .with_keep_original_label(keep)
                .with_undecided_label(200.0)
                .with_no_data_label(255.0);
            let id = p.chain("vote", mv, src).unwrap();
            p.get_tile(id, &TileRequest::full_res(rect)).unwrap().sample(1, 1, 0)
        };
        assert_eq!(vote(true), Some(5.0));
        assert_eq!(vote(false), Some(200.0));
    }

    #[test]
    fn test_two_color_view() {
        let rect = IRect::from_size(2, 1);
        let mut p = Pipeline::new();
        let new = p
            .add("new", MemorySource::new(PixelBuffer::from_values(ScalarType::U8, 1, rect, &[255.0, 0.0]).unwrap()), &[])
            .unwrap();
        let old = p
            .add("old", MemorySource::new(PixelBuffer::from_values(ScalarType::U8, 1, rect, &[0.0, 0.0]).unwrap()), &[])
            .unwrap();
        let view = p.add("view", TwoColorView::new(), &[new, old]).unwrap();
        let tile = p.get_tile(view, &TileRequest::full_res(rect)).unwrap();
        assert_eq!(tile.bands(), 3);
        // both inputs null at x=1
        assert!(tile.is_null(1, 0));
        assert_eq!(tile.sample(0, 0, 0), Some(255.0));
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    #[test]
    fn test_bad_channel_fails_loudly() {
        let (mut p, ids) = ramp_chain(64, ISize::square(64), None).unwrap();
        let err = p
            .chain("bands", BandSelector::new([0]), ids.cache)
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, FilterError::ChannelIndex { index: 0, bands: 1 }));
    }

    #[test]
    fn test_state_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");

        let (mut p, ids) = ramp_chain(256, ISize::square(64), Some(ScalarType::F32)).unwrap();
        let remap = ids.remap.unwrap();
        p.set_property(ids.cache, "tile_size", PropertyValue::Size(ISize::square(32))).unwrap();
        p.set_property(remap, "output_scalar_type", PropertyValue::Scalar(ScalarType::U8)).unwrap();

        let mut kwl = Keywordlist::new();
        p.save_state(ids.cache, &mut kwl, "cache").unwrap();
        p.save_state(remap, &mut kwl, "remap").unwrap();
        kwl.write_file(&path).unwrap();

        let (mut q, qids) = ramp_chain(256, ISize::square(64), Some(ScalarType::F32)).unwrap();
        let loaded = Keywordlist::read_file(&path).unwrap();
        q.load_state(qids.cache, &loaded, "cache").unwrap();
        q.load_state(qids.remap.unwrap(), &loaded, "remap").unwrap();
        assert_eq!(
            q.stage::<CachingFilter>(qids.cache).unwrap().fixed_tile_size(),
            ISize::square(32)
        );
        assert_eq!(q.output_scalar_type(qids.remap.unwrap()), ScalarType::U8);

        // state saved for one kind does not load into another
        assert!(q.load_state(qids.cache, &loaded, "remap").is_err());
    }

    // ------------------------------------------------------------------
    // End to end
    // ------------------------------------------------------------------

    /// 512² u16 ramp → cache 128² → remap u8, request (100,100,50,50).
    #[test]
    fn test_scenario_source_cache_remap() {
        let (mut p, ids) = ramp_chain(512, ISize::square(128), Some(ScalarType::U8)).unwrap();
        let remap = ids.remap.unwrap();

        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&progress);
        p.stage_mut::<CachingFilter>(ids.cache)
            .unwrap()
            .set_progress_sink(move |done: usize, total: usize| sink.lock().unwrap().push((done, total)));

        let rect = IRect::new(100, 100, 50, 50);
        let tile = p.get_tile(remap, &TileRequest::full_res(rect)).unwrap();

        // the aligned rect spans a 2x2 block of cache tiles
        assert_eq!(fetches(&p, &ids), 4);
        assert_eq!(*progress.lock().unwrap(), vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
        let store = p.stage::<CachingFilter>(ids.cache).and_then(|c| c.level(0)).unwrap();
        assert_eq!(store.len(), 4);
        for (x, y) in [(0, 0), (128, 0), (0, 128), (128, 128)] {
            assert!(store.contains(IPoint::new(x, y)), "tile at ({x}, {y})");
        }

        assert_eq!(tile.rect(), rect);
        assert_eq!(tile.scalar_type(), ScalarType::U8);
        for (o, (x, y)) in rect.iter_coords().enumerate() {
            let expected = (ramp_value(x, y) / 65535.0 * 255.0).round().clamp(0.0, 255.0);
            assert_eq!(tile.value(0, o), expected, "pixel ({x}, {y})");
        }

        // a second request is answered from the cache
        reset_counter(&mut p, &ids);
        let again = p.get_tile(remap, &TileRequest::full_res(rect)).unwrap();
        assert_eq!(fetches(&p, &ids), 0);
        assert_eq!(*again, *tile);
    }
}
