//! Tile-caching filter.
//!
//! [`CachingFilter`] sits between a (possibly expensive) upstream and its
//! consumers. Requests are aligned to a fixed cache-tile grid; each grid
//! tile is pulled from upstream once, stored per resolution level, and
//! stitched into the requested rectangle.
//!
//! ```text
//!   request (100,100 50x50)          cache grid 128x128
//!   +-------------------+            +--------+--------+
//!   |                   |            | (0,0)  |(128,0) |
//!   |    +-----+        |   ====>    |    +---+--+     |
//!   |    |     |        |            +----|------|-----+
//!   |    +-----+        |            |    +---+--+     |
//!   +-------------------+            +--------+--------+
//!                                     4 upstream fetches
//! ```
//!
//! Caching never changes pixel values: the same rectangle reads the same
//! samples whatever the cache-tile size.

use std::fmt;

use tracing::{debug, trace};
use tilechain_core::{IPoint, IRect, ISize, TileRef, TileRequest};

use crate::cache::{CacheStats, TileCache};
use crate::{FilterError, FilterResult, ImageSource, Inputs, OutputTile, ProgressSink, PropertyValue, Upstream};

/// Cache-tile size used unless configured otherwise.
pub const DEFAULT_CACHE_TILE_SIZE: ISize = ISize::new(64, 64);

/// Bounds for a cache-tile size derived from the upstream tile size.
pub const MIN_INPUT_TILE_SIZE: u32 = 64;
/// See [`MIN_INPUT_TILE_SIZE`].
pub const MAX_INPUT_TILE_SIZE: u32 = 1024;

/// Caches upstream tiles per resolution level.
///
/// # Properties
///
/// | Name | Type | Default |
/// |------|------|---------|
/// | `enabled` | bool | `true` (off = passthrough) |
/// | `enable_cache` | bool | `true` (off = no new tiles stored) |
/// | `use_input_tile_size` | bool | `false` |
/// | `tile_size` | size | 64 64 |
/// | `cache_budget_bytes` | int | 0 (unbounded), per level |
pub struct CachingFilter {
    enabled: bool,
    caching: bool,
    use_input_tile_size: bool,
    tile_size: ISize,
    budget: Option<u64>,
    levels: Vec<Option<TileCache>>,
    tile: OutputTile,
    progress: Option<Box<dyn ProgressSink>>,
}

impl Default for CachingFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CachingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingFilter")
            .field("enabled", &self.enabled)
            .field("caching", &self.caching)
            .field("use_input_tile_size", &self.use_input_tile_size)
            .field("tile_size", &self.tile_size)
            .field("budget", &self.budget)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl CachingFilter {
    /// Enabled filter with caching on and a 64x64 grid.
    pub fn new() -> Self {
        Self {
            enabled: true,
            caching: true,
            use_input_tile_size: false,
            tile_size: DEFAULT_CACHE_TILE_SIZE,
            budget: None,
            levels: Vec::new(),
            tile: OutputTile::new(),
            progress: None,
        }
    }

    /// Builder form of [`set_tile_size`](Self::set_tile_size).
    ///
    /// An empty size is reported when the stage is initialized.
    pub fn with_tile_size(mut self, tile_size: ISize) -> Self {
        self.tile_size = tile_size;
        self.levels.clear();
        self
    }

    /// Whether requests go through the cache at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Off turns the filter into a passthrough. Stored tiles are kept.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether fetched tiles are stored.
    pub fn is_caching_enabled(&self) -> bool {
        self.caching
    }

    /// Off stops storing new tiles; already stored tiles still serve hits
    /// until [`flush`](Self::flush).
    pub fn set_caching_enabled(&mut self, caching: bool) {
        self.caching = caching;
    }

    /// Configured cache-tile size.
    pub fn fixed_tile_size(&self) -> ISize {
        self.tile_size
    }

    /// Changes the cache-tile size; every level store is dropped.
    ///
    /// Fails for a size with a zero dimension.
    pub fn set_tile_size(&mut self, tile_size: ISize) -> FilterResult<()> {
        check_tile_size(tile_size)?;
        if tile_size != self.tile_size {
            debug!(from = %self.tile_size, to = %tile_size, "caching_filter: tile size changed");
            self.tile_size = tile_size;
            self.levels.clear();
        }
        Ok(())
    }

    /// Whether level stores size their tiles from the upstream tile size.
    pub fn uses_input_tile_size(&self) -> bool {
        self.use_input_tile_size
    }

    /// Toggles upstream-derived tile sizes; every level store is dropped.
    pub fn set_use_input_tile_size(&mut self, flag: bool) {
        if flag != self.use_input_tile_size {
            self.use_input_tile_size = flag;
            self.levels.clear();
        }
    }

    /// Per-level byte budget, `None` for unbounded.
    pub fn budget(&self) -> Option<u64> {
        self.budget
    }

    /// Sets the per-level byte budget, evicting from existing stores.
    pub fn set_budget(&mut self, budget: Option<u64>) {
        self.budget = budget;
        for store in self.levels.iter_mut().flatten() {
            store.set_budget(budget);
        }
    }

    /// Installs a sink notified after each stitched cache tile.
    pub fn set_progress_sink(&mut self, sink: impl ProgressSink + 'static) {
        self.progress = Some(Box::new(sink));
    }

    /// Removes the progress sink.
    pub fn clear_progress_sink(&mut self) {
        self.progress = None;
    }

    /// Empties every level store. Stores and their tile sizes are kept.
    pub fn flush(&mut self) {
        let stats = self.stats();
        debug!(tiles = stats.tiles, bytes = stats.bytes, "caching_filter: flush");
        for store in self.levels.iter_mut().flatten() {
            store.flush();
        }
    }

    /// Counters summed over all level stores.
    pub fn stats(&self) -> CacheStats {
        let mut total = CacheStats::default();
        for store in self.levels.iter().flatten() {
            total += store.stats();
        }
        total
    }

    /// Store of `res_level`, if that level has been requested.
    pub fn level(&self, res_level: u32) -> Option<&TileCache> {
        self.levels.get(res_level as usize)?.as_ref()
    }

    /// Cache-tile size used at `res_level`, if that level has a store.
    pub fn level_tile_size(&self, res_level: u32) -> Option<ISize> {
        self.level(res_level).map(TileCache::tile_size)
    }

    /// Number of levels with a store.
    pub fn cached_levels(&self) -> usize {
        self.levels.iter().flatten().count()
    }

    fn store_tile_size(&self, request_rect: IRect, input_tile: Option<ISize>) -> ISize {
        match input_tile {
            Some(native) if self.use_input_tile_size => {
                let fit = |v: u32, dim: u32| {
                    v.clamp(MIN_INPUT_TILE_SIZE, dim.min(MAX_INPUT_TILE_SIZE).max(MIN_INPUT_TILE_SIZE))
                };
                ISize::new(
                    fit(native.width, request_rect.width),
                    fit(native.height, request_rect.height),
                )
            }
            _ => self.tile_size,
        }
    }
}

fn check_tile_size(size: ISize) -> FilterResult<()> {
    if size.is_empty() {
        return Err(FilterError::invalid_property("tile_size", format!("tile size {size} must be non-zero")));
    }
    Ok(())
}

/// Looks up a cache tile, pulling it from upstream on a miss.
fn fetch(
    store: &mut TileCache,
    inputs: &mut Inputs<'_>,
    origin: IPoint,
    res_level: u32,
    caching: bool,
) -> FilterResult<TileRef> {
    if let Some(tile) = store.get(origin) {
        return Ok(tile);
    }
    let request = TileRequest::new(IRect::from_origin_size(origin, store.tile_size()), res_level);
    let tile = inputs.get_tile(0, &request)?;
    if caching && !tile.status().is_null_or_empty() {
        store.insert(TileRef::clone(&tile));
    }
    Ok(tile)
}

impl ImageSource for CachingFilter {
    fn name(&self) -> &'static str {
        "caching_filter"
    }

    fn initialize(&mut self, _upstream: &Upstream<'_>) -> FilterResult<()> {
        check_tile_size(self.tile_size)?;
        if !self.levels.is_empty() {
            debug!(levels = self.cached_levels(), "caching_filter: reinitialized, dropping stores");
        }
        self.levels.clear();
        self.tile.clear();
        Ok(())
    }

    fn get_tile(&mut self, request: &TileRequest, inputs: &mut Inputs<'_>) -> FilterResult<TileRef> {
        trace!(%request, "caching_filter::get_tile");
        if !self.enabled {
            return inputs.get_tile(0, request);
        }
        check_tile_size(self.tile_size)?;

        let rect = request.rect();
        let level = request.res_level();
        let (layout, bounds, input_tile) = {
            let up = inputs.upstream();
            (self.output_layout(&up), up.bounding_rect(0, level), up.tile_size(0))
        };

        let Some(bounds) = bounds else {
            return self.tile.blank(&layout, rect);
        };
        let Some(clipped) = rect.intersect(&bounds) else {
            return self.tile.blank(&layout, rect);
        };

        let idx = level as usize;
        if self.levels.len() <= idx {
            self.levels.resize_with(idx + 1, || None);
        }
        if self.levels[idx].is_none() {
            let size = self.store_tile_size(rect, input_tile);
            debug!(level, tile_size = %size, %bounds, "caching_filter: new level store");
            self.levels[idx] = Some(TileCache::new(bounds, size).with_budget(self.budget));
        }

        let Self { levels, tile, progress, caching, .. } = self;
        let Some(store) = levels[idx].as_mut() else {
            return Err(FilterError::State(format!("no cache store for level {level}")));
        };
        let tile_size = store.tile_size();
        let aligned = clipped.stretch_to_tile(tile_size);

        if aligned == rect && aligned.size() == tile_size {
            let single = fetch(store, inputs, aligned.origin(), level, *caching)?;
            if let Some(sink) = progress.as_mut() {
                sink.on_progress(1, 1);
            }
            return Ok(single);
        }

        let total = aligned.tile_count(tile_size);
        let out = tile.prepare(&layout, rect)?;
        for (i, origin) in aligned.tile_origins(tile_size).enumerate() {
            let piece = fetch(store, inputs, origin, level, *caching)?;
            out.load_tile(&piece)?;
            if let Some(sink) = progress.as_mut() {
                sink.on_progress(i + 1, total);
            }
        }
        out.validate();
        Ok(tile.share())
    }

    fn tile_size(&self, upstream: &Upstream<'_>) -> Option<ISize> {
        if self.enabled { Some(self.tile_size) } else { upstream.tile_size(0) }
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec!["enabled", "enable_cache", "use_input_tile_size", "tile_size", "cache_budget_bytes"]
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        Some(match name {
            "enabled" => PropertyValue::Bool(self.enabled),
            "enable_cache" => PropertyValue::Bool(self.caching),
            "use_input_tile_size" => PropertyValue::Bool(self.use_input_tile_size),
            "tile_size" => PropertyValue::Size(self.tile_size),
            "cache_budget_bytes" => PropertyValue::Int(self.budget.map_or(0, |b| b as i64)),
            _ => return None,
        })
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> FilterResult<()> {
        match name {
            "enabled" => self.set_enabled(value.as_bool(name)?),
            "enable_cache" => self.set_caching_enabled(value.as_bool(name)?),
            "use_input_tile_size" => self.set_use_input_tile_size(value.as_bool(name)?),
            "tile_size" => self.set_tile_size(value.as_size(name)?)?,
            "cache_budget_bytes" => {
                let bytes = value.as_int(name)?;
                if bytes < 0 {
                    return Err(FilterError::invalid_property(name, "budget must not be negative"));
                }
                self.set_budget((bytes > 0).then_some(bytes as u64));
            }
            _ => return Err(FilterError::unknown_property(self.name(), name)),
        }
        Ok(())
    }
}
