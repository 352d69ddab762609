//! Leaf sources and instrumentation stages.
//!
//! - [`MemorySource`] - Serves tiles from an in-memory level-0 buffer
//! - [`GeneratedSource`] - Computes samples from a closure
//! - [`CountingSource`] - Passthrough that counts upstream requests
//!
//! Leaf sources provide every resolution level by power-of-two
//! decimation: pixel (x, y) at level `n` samples (x·2ⁿ, y·2ⁿ) at level 0.
//! Pixels outside the image read as null.

use std::fmt;

use tracing::{trace, warn};
use tilechain_core::{DPoint, IRect, ISize, PixelBuffer, ScalarType, TileRef, TileRequest};

use crate::{FilterResult, ImageSource, Inputs, OutputTile, PropertyValue, TileLayout, Upstream};

/// Native tile size reported by leaf sources unless configured otherwise.
pub const DEFAULT_SOURCE_TILE_SIZE: ISize = ISize::new(256, 256);

/// Number of decimation levels for an extent: level `n - 1` is 1 pixel
/// along its longest side.
pub fn number_of_levels(extent: IRect) -> u32 {
    let longest = extent.width.max(extent.height);
    if longest == 0 { 0 } else { 32 - longest.leading_zeros() }
}

fn tile_size_property(current: &mut ISize, name: &str, value: &PropertyValue) -> FilterResult<()> {
    let size = value.as_size(name)?;
    if size.is_empty() {
        return Err(crate::FilterError::invalid_property(name, "tile size must be non-zero"));
    }
    *current = size;
    Ok(())
}

/// Source backed by a level-0 [`PixelBuffer`].
///
/// # Example
///
/// ```rust
/// use tilechain_core::prelude::*;
/// use tilechain_filters::{MemorySource, Pipeline};
///
/// let image = PixelBuffer::from_values(ScalarType::U8, 1, IRect::from_size(2, 2), &[1.0, 2.0, 3.0, 4.0]).unwrap();
/// let mut p = Pipeline::new();
/// let src = p.add("image", MemorySource::new(image), &[]).unwrap();
///
/// // half resolution keeps the top-left sample
/// let tile = p.get_tile(src, &TileRequest::new(IRect::from_size(1, 1), 1)).unwrap();
/// assert_eq!(tile.sample(0, 0, 0), Some(1.0));
/// ```
#[derive(Debug, Clone)]
pub struct MemorySource {
    image: PixelBuffer,
    tile_size: ISize,
    vertices: Option<[DPoint; 4]>,
    tile: OutputTile,
}

impl MemorySource {
    /// Wraps `image`; its rectangle is the level-0 extent.
    pub fn new(image: PixelBuffer) -> Self {
        Self {
            image,
            tile_size: DEFAULT_SOURCE_TILE_SIZE,
            vertices: None,
            tile: OutputTile::new(),
        }
    }

    /// Sets the native tile size.
    pub fn with_tile_size(mut self, tile_size: ISize) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Declares an explicit level-0 valid-pixel quadrilateral.
    pub fn with_valid_vertices(mut self, vertices: [DPoint; 4]) -> Self {
        self.vertices = Some(vertices);
        self
    }

    /// The level-0 image.
    pub fn image(&self) -> &PixelBuffer {
        &self.image
    }

    fn levels(&self) -> u32 {
        number_of_levels(self.image.rect())
    }
}

impl ImageSource for MemorySource {
    fn name(&self) -> &'static str {
        "memory_source"
    }

    fn accepts_inputs(&self, count: usize) -> bool {
        count == 0
    }

    fn get_tile(&mut self, request: &TileRequest, _inputs: &mut Inputs<'_>) -> FilterResult<TileRef> {
        let rect = request.rect();
        let level = request.res_level();
        trace!(%request, "memory_source::get_tile");

        let layout = self.output_layout(&Upstream::none());
        if level >= self.levels() {
            warn!(level, levels = self.levels(), "memory_source: resolution level out of range");
            return self.tile.blank(&layout, rect);
        }

        let out = self.tile.prepare(&layout, rect)?;
        if level == 0 {
            out.load_tile(&self.image)?;
        } else if let Some(overlap) = rect.intersect(&self.image.rect().decimated(level)) {
            for (x, y) in overlap.iter_coords() {
                let (sx, sy) = (x << level, y << level);
                let Some(o) = out.offset(x, y) else { continue };
                for b in 0..self.image.bands() {
                    if let Some(v) = self.image.sample(sx, sy, b) {
                        out.set_value(b, o, v);
                    }
                }
            }
        }
        out.validate();
        Ok(self.tile.share())
    }

    fn bounding_rect(&self, res_level: u32, _upstream: &Upstream<'_>) -> Option<IRect> {
        (res_level < self.levels()).then(|| self.image.rect().decimated(res_level))
    }

    fn output_scalar_type(&self, _upstream: &Upstream<'_>) -> ScalarType {
        self.image.scalar_type()
    }

    fn number_of_output_bands(&self, _upstream: &Upstream<'_>) -> usize {
        self.image.bands()
    }

    fn tile_size(&self, _upstream: &Upstream<'_>) -> Option<ISize> {
        Some(self.tile_size)
    }

    fn null_pixel(&self, band: usize, _upstream: &Upstream<'_>) -> f64 {
        self.image.null_pix(band)
    }

    fn min_pixel(&self, band: usize, _upstream: &Upstream<'_>) -> f64 {
        self.image.min_pix(band)
    }

    fn max_pixel(&self, band: usize, _upstream: &Upstream<'_>) -> f64 {
        self.image.max_pix(band)
    }

    fn valid_vertices(&self, res_level: u32, upstream: &Upstream<'_>) -> Option<[DPoint; 4]> {
        match self.vertices {
            Some(v) => {
                let f = (1u64 << res_level.min(63)) as f64;
                Some(v.map(|p| DPoint::new((p.x + 0.5) / f - 0.5, (p.y + 0.5) / f - 0.5)))
            }
            None => self.bounding_rect(res_level, upstream).map(|r| r.edge_corners()),
        }
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec!["tile_size"]
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        (name == "tile_size").then_some(PropertyValue::Size(self.tile_size))
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> FilterResult<()> {
        match name {
            "tile_size" => tile_size_property(&mut self.tile_size, name, &value),
            _ => Err(crate::FilterError::unknown_property(self.name(), name)),
        }
    }
}

/// Sample generator: `(x, y, band) -> value` in level-0 coordinates.
pub type Generator = Box<dyn Fn(i32, i32, usize) -> f64 + Send>;

/// Source whose samples come from a closure over a declared extent.
///
/// ```rust
/// use tilechain_core::prelude::*;
/// use tilechain_filters::{GeneratedSource, Pipeline};
///
/// let ramp = GeneratedSource::new(ScalarType::U16, 1, IRect::from_size(512, 512), |x, y, _| (x + y) as f64);
/// let mut p = Pipeline::new();
/// let src = p.add("ramp", ramp, &[]).unwrap();
/// let tile = p.get_tile(src, &TileRequest::full_res(IRect::new(10, 20, 4, 4))).unwrap();
/// assert_eq!(tile.sample(10, 20, 0), Some(30.0));
/// ```
pub struct GeneratedSource {
    extent: IRect,
    layout: TileLayout,
    tile_size: ISize,
    generator: Generator,
    tile: OutputTile,
}

impl GeneratedSource {
    /// Creates a source of `bands` bands of `scalar` samples over `extent`.
    pub fn new(
        scalar: ScalarType,
        bands: usize,
        extent: IRect,
        generator: impl Fn(i32, i32, usize) -> f64 + Send + 'static,
    ) -> Self {
        Self {
            extent,
            layout: TileLayout::with_defaults(scalar, bands),
            tile_size: DEFAULT_SOURCE_TILE_SIZE,
            generator: Box::new(generator),
            tile: OutputTile::new(),
        }
    }

    /// Sets the native tile size.
    pub fn with_tile_size(mut self, tile_size: ISize) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Overrides null/min/max on every band.
    pub fn with_band_range(mut self, null: f64, min: f64, max: f64) -> Self {
        self.layout.null.fill(null);
        self.layout.min.fill(min);
        self.layout.max.fill(max);
        self
    }

    /// Level-0 extent.
    pub fn extent(&self) -> IRect {
        self.extent
    }
}

impl fmt::Debug for GeneratedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedSource")
            .field("extent", &self.extent)
            .field("layout", &self.layout)
            .field("tile_size", &self.tile_size)
            .finish_non_exhaustive()
    }
}

impl ImageSource for GeneratedSource {
    fn name(&self) -> &'static str {
        "generated_source"
    }

    fn accepts_inputs(&self, count: usize) -> bool {
        count == 0
    }

    fn get_tile(&mut self, request: &TileRequest, _inputs: &mut Inputs<'_>) -> FilterResult<TileRef> {
        let rect = request.rect();
        let level = request.res_level();
        trace!(%request, "generated_source::get_tile");

        let levels = number_of_levels(self.extent);
        if level >= levels {
            warn!(level, levels, "generated_source: resolution level out of range");
            return self.tile.blank(&self.layout, rect);
        }

        let out = self.tile.prepare(&self.layout, rect)?;
        let level_extent = self.extent.decimated(level);
        if let Some(overlap) = rect.intersect(&level_extent) {
            for (x, y) in overlap.iter_coords() {
                let (sx, sy) = (x << level, y << level);
                if !self.extent.contains(sx, sy) {
                    continue;
                }
                let Some(o) = out.offset(x, y) else { continue };
                for b in 0..self.layout.bands() {
                    out.set_value(b, o, (self.generator)(sx, sy, b));
                }
            }
        }
        out.validate();
        Ok(self.tile.share())
    }

    fn bounding_rect(&self, res_level: u32, _upstream: &Upstream<'_>) -> Option<IRect> {
        (res_level < number_of_levels(self.extent)).then(|| self.extent.decimated(res_level))
    }

    fn output_scalar_type(&self, _upstream: &Upstream<'_>) -> ScalarType {
        self.layout.scalar
    }

    fn number_of_output_bands(&self, _upstream: &Upstream<'_>) -> usize {
        self.layout.bands()
    }

    fn tile_size(&self, _upstream: &Upstream<'_>) -> Option<ISize> {
        Some(self.tile_size)
    }

    fn null_pixel(&self, band: usize, _upstream: &Upstream<'_>) -> f64 {
        self.layout.null.get(band).copied().unwrap_or(0.0)
    }

    fn min_pixel(&self, band: usize, _upstream: &Upstream<'_>) -> f64 {
        self.layout.min.get(band).copied().unwrap_or(0.0)
    }

    fn max_pixel(&self, band: usize, _upstream: &Upstream<'_>) -> f64 {
        self.layout.max.get(band).copied().unwrap_or(0.0)
    }

    fn valid_vertices(&self, res_level: u32, upstream: &Upstream<'_>) -> Option<[DPoint; 4]> {
        self.bounding_rect(res_level, upstream).map(|r| r.edge_corners())
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec!["tile_size"]
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        (name == "tile_size").then_some(PropertyValue::Size(self.tile_size))
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> FilterResult<()> {
        match name {
            "tile_size" => tile_size_property(&mut self.tile_size, name, &value),
            _ => Err(crate::FilterError::unknown_property(self.name(), name)),
        }
    }
}

/// Passthrough that counts the tile requests it forwards.
#[derive(Debug, Default, Clone)]
pub struct CountingSource {
    calls: usize,
    last: Option<TileRequest>,
}

impl CountingSource {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests forwarded since creation or the last [`reset`](Self::reset).
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Most recent request.
    pub fn last_request(&self) -> Option<TileRequest> {
        self.last
    }

    /// Sets the counter back to zero.
    pub fn reset(&mut self) {
        self.calls = 0;
        self.last = None;
    }
}

impl ImageSource for CountingSource {
    fn name(&self) -> &'static str {
        "counting_source"
    }

    fn get_tile(&mut self, request: &TileRequest, inputs: &mut Inputs<'_>) -> FilterResult<TileRef> {
        self.calls += 1;
        self.last = Some(*request);
        inputs.get_tile(0, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pipeline;
    use approx::assert_relative_eq;
    use tilechain_core::DataObjectStatus;

    fn ramp_image(w: u32, h: u32) -> PixelBuffer {
        let values: Vec<f64> = (0..w * h).map(|i| (i + 1) as f64).collect();
        PixelBuffer::from_values(ScalarType::U16, 1, IRect::from_size(w, h), &values).unwrap()
    }

    #[test]
    fn test_number_of_levels() {
        assert_eq!(number_of_levels(IRect::from_size(512, 512)), 10);
        assert_eq!(number_of_levels(IRect::from_size(1, 1)), 1);
        assert_eq!(number_of_levels(IRect::from_size(3, 1)), 2);
        assert_eq!(number_of_levels(IRect::default()), 0);
    }

    #[test]
    fn test_memory_source_clips_to_image() {
        let mut p = Pipeline::new();
        let src = p.add("src", MemorySource::new(ramp_image(4, 4)), &[]).unwrap();
        let tile = p.get_tile(src, &TileRequest::full_res(IRect::new(-2, -2, 4, 4))).unwrap();
        assert_eq!(tile.rect(), IRect::new(-2, -2, 4, 4));
        assert_eq!(tile.status(), DataObjectStatus::Partial);
        assert!(tile.is_null(-1, -1));
        assert_eq!(tile.sample(1, 1, 0), Some(6.0));
    }

    #[test]
    fn test_memory_source_decimation() {
        let mut p = Pipeline::new();
        let src = p.add("src", MemorySource::new(ramp_image(4, 4)), &[]).unwrap();
        let tile = p.get_tile(src, &TileRequest::new(IRect::from_size(2, 2), 1)).unwrap();
        assert_eq!(tile.band_slice::<u16>(0), Some(&[1u16, 3, 9, 11][..]));
        assert_eq!(tile.status(), DataObjectStatus::Full);
    }

    #[test]
    fn test_memory_source_unknown_level_is_blank() {
        let mut p = Pipeline::new();
        let src = p.add("src", MemorySource::new(ramp_image(4, 4)), &[]).unwrap();
        assert_eq!(p.bounding_rect(src, 3), None);
        let tile = p.get_tile(src, &TileRequest::new(IRect::from_size(2, 2), 3)).unwrap();
        assert_eq!(tile.status(), DataObjectStatus::Empty);
    }

    #[test]
    fn test_memory_source_vertices_scale_with_level() {
        let quad = IRect::from_size(8, 8).edge_corners();
        let src = MemorySource::new(ramp_image(8, 8)).with_valid_vertices(quad);
        let v = src.valid_vertices(1, &Upstream::none()).unwrap();
        let expected = IRect::from_size(4, 4).edge_corners();
        for (a, b) in v.iter().zip(expected.iter()) {
            assert_relative_eq!(a.x, b.x);
            assert_relative_eq!(a.y, b.y);
        }
    }

    #[test]
    fn test_generated_source_levels() {
        let mut p = Pipeline::new();
        let src = p
            .add(
                "gen",
                GeneratedSource::new(ScalarType::F32, 2, IRect::from_size(8, 8), |x, y, b| {
                    (x * 10 + y) as f64 + b as f64 * 0.5
                }),
                &[],
            )
            .unwrap();
        let tile = p.get_tile(src, &TileRequest::new(IRect::new(1, 1, 2, 2), 1)).unwrap();
        assert_eq!(tile.sample(1, 1, 0), Some(22.0));
        assert_eq!(tile.sample(2, 2, 1), Some(44.5));
        assert_eq!(p.tile_size(src), Some(DEFAULT_SOURCE_TILE_SIZE));
    }

    #[test]
    fn test_counting_source() {
        let mut p = Pipeline::new();
        let src = p.add("src", MemorySource::new(ramp_image(4, 4)), &[]).unwrap();
        let count = p.chain("count", CountingSource::new(), src).unwrap();
        let req = TileRequest::full_res(IRect::from_size(4, 4));
        let a = p.get_tile(count, &req).unwrap();
        let b = p.get_tile(src, &req).unwrap();
        assert_eq!(*a, *b);
        let counter = p.stage::<CountingSource>(count).unwrap();
        assert_eq!(counter.calls(), 1);
        assert_eq!(counter.last_request(), Some(req));
        p.stage_mut::<CountingSource>(count).unwrap().reset();
        assert_eq!(p.stage::<CountingSource>(count).unwrap().calls(), 0);
    }

    #[test]
    fn test_tile_size_property() {
        let mut p = Pipeline::new();
        let src = p.add("src", MemorySource::new(ramp_image(4, 4)), &[]).unwrap();
        p.set_property(src, "tile_size", PropertyValue::Size(ISize::new(128, 64))).unwrap();
        assert_eq!(p.tile_size(src), Some(ISize::new(128, 64)));
        assert!(p.set_property(src, "tile_size", PropertyValue::Size(ISize::new(0, 64))).is_err());
        assert!(p.set_property(src, "bogus", PropertyValue::Bool(true)).is_err());
    }
}
