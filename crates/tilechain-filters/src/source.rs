//! The [`ImageSource`] capability trait and helpers shared by all stages.
//!
//! # Architecture
//!
//! ```text
//!                   +---------------+
//!                   |  ImageSource  |
//!                   +---------------+
//!                           ^
//!       +-----------+-------+-------+--------------+
//!       |           |               |              |
//! MemorySource  CachingFilter  ScalarRemapFilter  FeatherMosaic ...
//! ```
//!
//! Stages never own their inputs. A [`Pipeline`](crate::Pipeline) owns
//! every stage; while a stage runs it receives:
//!
//! - [`Inputs`](crate::Inputs) to pull tiles from its upstream stages
//! - [`Upstream`](crate::Upstream) to query upstream metadata
//!
//! # Concurrency
//!
//! `get_tile` takes `&mut self`: each stage reuses one output buffer and
//! is not re-entrant. Parallel rendering uses one pipeline per thread.

use std::any::Any;
use std::sync::Arc;

use tilechain_core::{DPoint, IRect, ISize, PixelBuffer, ScalarType, TileRef, TileRequest};

use crate::{FilterError, FilterResult, Inputs, PropertyValue, Upstream};

/// Downcasting support for stages stored as trait objects.
pub trait AsAny: Any {
    /// Borrow as [`Any`].
    fn as_any(&self) -> &dyn Any;
    /// Mutably borrow as [`Any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A pipeline stage that produces tiles on demand.
///
/// # Contract
///
/// - [`get_tile`](Self::get_tile) returns a buffer whose rectangle equals
///   the requested one exactly, with a status reflecting real coverage.
/// - Metadata methods describe the output without pulling data. Their
///   defaults forward to input 0, which suits single-input filters.
/// - Missing data yields blank tiles, never errors. Errors are reserved
///   for configuration problems.
///
/// # Implementation Notes
///
/// | Method | Default |
/// |--------|---------|
/// | `accepts_inputs` | exactly one input |
/// | `initialize` | nothing |
/// | metadata | forwarded to input 0 |
/// | properties | none |
pub trait ImageSource: AsAny + Send {
    /// Stage kind, e.g. `"caching_filter"`.
    fn name(&self) -> &'static str;

    /// Whether the stage can be wired to `count` inputs.
    fn accepts_inputs(&self, count: usize) -> bool {
        count == 1
    }

    /// Recomputes derived state after wiring or configuration changes.
    fn initialize(&mut self, _upstream: &Upstream<'_>) -> FilterResult<()> {
        Ok(())
    }

    /// Produces the tile for `request`, pulling from `inputs` as needed.
    fn get_tile(&mut self, request: &TileRequest, inputs: &mut Inputs<'_>) -> FilterResult<TileRef>;

    /// Full extent at `res_level`, `None` if unknown.
    fn bounding_rect(&self, res_level: u32, upstream: &Upstream<'_>) -> Option<IRect> {
        upstream.bounding_rect(0, res_level)
    }

    /// Scalar type of produced tiles.
    fn output_scalar_type(&self, upstream: &Upstream<'_>) -> ScalarType {
        upstream.scalar_type(0)
    }

    /// Band count of produced tiles.
    fn number_of_output_bands(&self, upstream: &Upstream<'_>) -> usize {
        upstream.bands(0)
    }

    /// Native tile size, if the stage has one.
    fn tile_size(&self, upstream: &Upstream<'_>) -> Option<ISize> {
        upstream.tile_size(0)
    }

    /// Null sample value of `band`.
    fn null_pixel(&self, band: usize, upstream: &Upstream<'_>) -> f64 {
        upstream.null_pixel(0, band)
    }

    /// Minimum valid sample value of `band`.
    fn min_pixel(&self, band: usize, upstream: &Upstream<'_>) -> f64 {
        upstream.min_pixel(0, band)
    }

    /// Maximum valid sample value of `band`.
    fn max_pixel(&self, band: usize, upstream: &Upstream<'_>) -> f64 {
        upstream.max_pixel(0, band)
    }

    /// Valid-pixel quadrilateral at `res_level`: top-left, top-right,
    /// bottom-right, bottom-left.
    fn valid_vertices(&self, res_level: u32, upstream: &Upstream<'_>) -> Option<[DPoint; 4]> {
        upstream.valid_vertices(0, res_level)
    }

    /// Names accepted by [`property`](Self::property) and
    /// [`set_property`](Self::set_property).
    fn property_names(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Current value of a named property.
    fn property(&self, _name: &str) -> Option<PropertyValue> {
        None
    }

    /// Sets a named property.
    fn set_property(&mut self, name: &str, _value: PropertyValue) -> FilterResult<()> {
        Err(FilterError::unknown_property(self.name(), name))
    }

    /// Output type, band count and per-band null/min/max, gathered from the
    /// metadata methods.
    fn output_layout(&self, upstream: &Upstream<'_>) -> TileLayout {
        let bands = self.number_of_output_bands(upstream);
        TileLayout {
            scalar: self.output_scalar_type(upstream),
            null: (0..bands).map(|b| self.null_pixel(b, upstream)).collect(),
            min: (0..bands).map(|b| self.min_pixel(b, upstream)).collect(),
            max: (0..bands).map(|b| self.max_pixel(b, upstream)).collect(),
        }
    }
}

/// Scalar type and per-band sample ranges of a stage's output.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TileLayout {
    /// Output scalar type
    pub scalar: ScalarType,
    /// Null value per band
    pub null: Vec<f64>,
    /// Minimum valid value per band
    pub min: Vec<f64>,
    /// Maximum valid value per band
    pub max: Vec<f64>,
}

impl TileLayout {
    /// Layout with the type's default null/min/max on every band.
    pub fn with_defaults(scalar: ScalarType, bands: usize) -> Self {
        Self {
            scalar,
            null: vec![scalar.default_null(); bands],
            min: vec![scalar.default_min(); bands],
            max: vec![scalar.default_max(); bands],
        }
    }

    /// Number of bands.
    #[inline]
    pub fn bands(&self) -> usize {
        self.null.len()
    }

    /// Writes type, band count and band ranges into `buf`.
    fn apply(&self, buf: &mut PixelBuffer) -> FilterResult<()> {
        buf.set_scalar_type(self.scalar);
        buf.set_bands(self.bands());
        for b in 0..self.bands() {
            buf.set_null_pix(b, self.null[b])?;
            buf.set_min_pix(b, self.min[b])?;
            buf.set_max_pix(b, self.max[b])?;
        }
        Ok(())
    }
}

/// The single reusable output buffer a stage keeps across calls.
///
/// Reused in place with [`Arc::make_mut`]; if a consumer still holds the
/// previous tile (a cache, say) the buffer is copied first.
#[derive(Debug, Default, Clone)]
pub struct OutputTile {
    tile: Option<TileRef>,
}

impl OutputTile {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reshapes the buffer to `layout` and `rect` and blanks it.
    pub fn prepare(&mut self, layout: &TileLayout, rect: IRect) -> FilterResult<&mut PixelBuffer> {
        let tile = self
            .tile
            .get_or_insert_with(|| Arc::new(PixelBuffer::new(layout.scalar, layout.bands(), rect)));
        let buf = Arc::make_mut(tile);
        layout.apply(buf)?;
        buf.set_image_rect(rect);
        buf.make_blank()?;
        Ok(buf)
    }

    /// Blank tile of `layout` covering `rect`.
    pub fn blank(&mut self, layout: &TileLayout, rect: IRect) -> FilterResult<TileRef> {
        self.prepare(layout, rect)?;
        Ok(self.share())
    }

    /// Mutable access to the current buffer, if any.
    pub fn buffer_mut(&mut self) -> Option<&mut PixelBuffer> {
        self.tile.as_mut().map(Arc::make_mut)
    }

    /// A handle to the current buffer.
    ///
    /// Call after [`prepare`](Self::prepare); before that the handle is a
    /// zero-sized null buffer.
    pub fn share(&self) -> TileRef {
        self.tile
            .clone()
            .unwrap_or_else(|| Arc::new(PixelBuffer::new(ScalarType::Unknown, 0, IRect::default())))
    }

    /// Drops the buffer.
    pub fn clear(&mut self) {
        self.tile = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilechain_core::DataObjectStatus;

    #[test]
    fn test_prepare_blanks_and_resizes() {
        let layout = TileLayout::with_defaults(ScalarType::U16, 2);
        let mut out = OutputTile::new();
        let buf = out.prepare(&layout, IRect::new(0, 0, 4, 4)).unwrap();
        buf.fill(5.0).unwrap();

        let buf = out.prepare(&layout, IRect::new(4, 0, 8, 2)).unwrap();
        assert_eq!(buf.rect(), IRect::new(4, 0, 8, 2));
        assert_eq!(buf.status(), DataObjectStatus::Empty);
        assert_eq!(buf.bands(), 2);
    }

    #[test]
    fn test_shared_tile_is_not_mutated() {
        let layout = TileLayout::with_defaults(ScalarType::U8, 1);
        let mut out = OutputTile::new();
        out.prepare(&layout, IRect::from_size(2, 2)).unwrap().fill(7.0).unwrap();
        let held = out.share();

        out.prepare(&layout, IRect::from_size(2, 2)).unwrap();
        assert_eq!(held.status(), DataObjectStatus::Full);
        assert_eq!(held.sample(0, 0, 0), Some(7.0));
        assert_eq!(out.share().status(), DataObjectStatus::Empty);
    }

    #[test]
    fn test_layout_applies_band_ranges() {
        let mut layout = TileLayout::with_defaults(ScalarType::U32, 1);
        layout.max[0] = 65535.0;
        let mut out = OutputTile::new();
        let buf = out.prepare(&layout, IRect::from_size(1, 1)).unwrap();
        assert_eq!(buf.max_pix(0), 65535.0);
        assert_eq!(buf.scalar_type(), ScalarType::U32);
    }
}
