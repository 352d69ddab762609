//! Two-color change view.
//!
//! Compares a "new" and an "old" input: each output pixel carries the
//! new value, the old value and a presence flag, in three 8-bit bands.
//! 8-bit inputs are copied as is; other types are rescaled into `[1, 255]`.
//! Where only one input has data the other band is 0; where neither has
//! data all three bands are 0.

use tracing::trace;
use tilechain_core::{DPoint, Error, IRect, ISize, PixelBuffer, ScalarType, TileRef, TileRequest};

use crate::{FilterError, FilterResult, ImageSource, Inputs, OutputTile, PropertyValue, TileLayout, Upstream};

/// Value written to the presence band.
pub const PRESENCE_VALUE: f64 = 1.0;

/// Builds a three-band U8 view from two inputs.
///
/// Input 0 is "new", input 1 is "old". `band_mapping` gives the output
/// band receiving the new value, the old value and the presence flag.
///
/// # Properties
///
/// | Name | Type | Default |
/// |------|------|---------|
/// | `enabled` | bool | `true` (off = input 0 passthrough) |
/// | `new_band` | int | 0 |
/// | `old_band` | int | 0 |
/// | `band_mapping` | indices | `0 1 2` |
#[derive(Debug, Clone)]
pub struct TwoColorView {
    enabled: bool,
    new_band: usize,
    old_band: usize,
    band_mapping: [usize; 3],
    tile: OutputTile,
}

impl Default for TwoColorView {
    fn default() -> Self {
        Self::new()
    }
}

impl TwoColorView {
    /// Band 0 of both inputs, mapping new/old/presence to bands 0/1/2.
    pub fn new() -> Self {
        Self {
            enabled: true,
            new_band: 0,
            old_band: 0,
            band_mapping: [0, 1, 2],
            tile: OutputTile::new(),
        }
    }

    /// Selects the input bands compared (0-based).
    pub fn with_bands(mut self, new_band: usize, old_band: usize) -> Self {
        self.new_band = new_band;
        self.old_band = old_band;
        self
    }

    /// Output bands for new, old and presence.
    pub fn band_mapping(&self) -> [usize; 3] {
        self.band_mapping
    }

    /// Sets the output bands for new, old and presence.
    ///
    /// Fails unless `mapping` is a permutation of `[0, 1, 2]`.
    pub fn set_band_mapping(&mut self, mapping: &[usize]) -> FilterResult<()> {
        let mut seen = [false; 3];
        let valid = mapping.len() == 3
            && mapping.iter().all(|&m| m < 3 && !std::mem::replace(&mut seen[m], true));
        if !valid {
            return Err(FilterError::InvalidBandMapping(mapping.to_vec()));
        }
        self.band_mapping = [mapping[0], mapping[1], mapping[2]];
        Ok(())
    }

    /// Whether the view is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Off passes input 0 through.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn layout() -> TileLayout {
        TileLayout {
            scalar: ScalarType::U8,
            null: vec![0.0; 3],
            min: vec![1.0; 3],
            max: vec![255.0; 3],
        }
    }

    fn check_band(band: usize, bands: usize) -> FilterResult<()> {
        if band >= bands {
            return Err(Error::band_out_of_range(band, bands).into());
        }
        Ok(())
    }
}

/// Maps a non-null sample to `[1, 255]`.
///
/// U8 samples keep their value; a non-null 0 becomes 1 since 0 is the
/// output null. Other types are rescaled using the band range.
fn band_value(tile: &PixelBuffer, band: usize, offset: usize) -> f64 {
    let v = tile.value(band, offset);
    if tile.scalar_type() == ScalarType::U8 {
        return v.max(1.0);
    }
    let (min, max) = (tile.min_pix(band), tile.max_pix(band));
    let t = if max > min { ((v - min) / (max - min)).clamp(0.0, 1.0) } else { 1.0 };
    1.0 + (t * 254.0).round()
}

fn present(tile: &PixelBuffer, band: usize, offset: usize) -> bool {
    !tile.status().is_null_or_empty() && !tile.is_null_sample(band, offset)
}

impl ImageSource for TwoColorView {
    fn name(&self) -> &'static str {
        "two_color_view"
    }

    fn accepts_inputs(&self, count: usize) -> bool {
        count == 2
    }

    fn initialize(&mut self, upstream: &Upstream<'_>) -> FilterResult<()> {
        if upstream.len() == 2 {
            Self::check_band(self.new_band, upstream.bands(0))?;
            Self::check_band(self.old_band, upstream.bands(1))?;
        }
        Ok(())
    }

    fn get_tile(&mut self, request: &TileRequest, inputs: &mut Inputs<'_>) -> FilterResult<TileRef> {
        trace!(%request, "two_color_view::get_tile");
        if !self.enabled {
            return inputs.get_tile(0, request);
        }
        let new_tile = inputs.get_tile(0, request)?;
        let old_tile = inputs.get_tile(1, request)?;
        Self::check_band(self.new_band, new_tile.bands())?;
        Self::check_band(self.old_band, old_tile.bands())?;

        let rect = request.rect();
        let out = self.tile.prepare(&Self::layout(), rect)?;
        if new_tile.status().is_null_or_empty() && old_tile.status().is_null_or_empty() {
            out.validate();
            return Ok(self.tile.share());
        }

        let [new_out, old_out, presence_out] = self.band_mapping;
        for (o, (x, y)) in rect.iter_coords().enumerate() {
            let (Some(n), Some(d)) = (new_tile.offset(x, y), old_tile.offset(x, y)) else {
                continue;
            };
            let has_new = present(&new_tile, self.new_band, n);
            let has_old = present(&old_tile, self.old_band, d);
            if !has_new && !has_old {
                continue;
            }
            if has_new {
                out.set_value(new_out, o, band_value(&new_tile, self.new_band, n));
            }
            if has_old {
                out.set_value(old_out, o, band_value(&old_tile, self.old_band, d));
            }
            out.set_value(presence_out, o, PRESENCE_VALUE);
        }
        out.validate();
        Ok(self.tile.share())
    }

    fn bounding_rect(&self, res_level: u32, upstream: &Upstream<'_>) -> Option<IRect> {
        if !self.enabled {
            return upstream.bounding_rect(0, res_level);
        }
        match (upstream.bounding_rect(0, res_level), upstream.bounding_rect(1, res_level)) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, b) => a.or(b),
        }
    }

    fn output_scalar_type(&self, upstream: &Upstream<'_>) -> ScalarType {
        if self.enabled { ScalarType::U8 } else { upstream.scalar_type(0) }
    }

    fn number_of_output_bands(&self, upstream: &Upstream<'_>) -> usize {
        if self.enabled { 3 } else { upstream.bands(0) }
    }

    fn tile_size(&self, upstream: &Upstream<'_>) -> Option<ISize> {
        upstream.tile_size(0).or_else(|| upstream.tile_size(1))
    }

    fn null_pixel(&self, band: usize, upstream: &Upstream<'_>) -> f64 {
        if self.enabled { 0.0 } else { upstream.null_pixel(0, band) }
    }

    fn min_pixel(&self, band: usize, upstream: &Upstream<'_>) -> f64 {
        if self.enabled { 1.0 } else { upstream.min_pixel(0, band) }
    }

    fn max_pixel(&self, band: usize, upstream: &Upstream<'_>) -> f64 {
        if self.enabled { 255.0 } else { upstream.max_pixel(0, band) }
    }

    fn valid_vertices(&self, res_level: u32, upstream: &Upstream<'_>) -> Option<[DPoint; 4]> {
        self.bounding_rect(res_level, upstream).map(|r| r.edge_corners())
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec!["enabled", "new_band", "old_band", "band_mapping"]
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        Some(match name {
            "enabled" => PropertyValue::Bool(self.enabled),
            "new_band" => PropertyValue::Int(self.new_band as i64),
            "old_band" => PropertyValue::Int(self.old_band as i64),
            "band_mapping" => PropertyValue::Indices(self.band_mapping.to_vec()),
            _ => return None,
        })
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> FilterResult<()> {
        let band = |v: &PropertyValue| -> FilterResult<usize> {
            usize::try_from(v.as_int(name)?)
                .map_err(|_| FilterError::invalid_property(name, "band index must not be negative"))
        };
        match name {
            "enabled" => self.set_enabled(value.as_bool(name)?),
            "new_band" => self.new_band = band(&value)?,
            "old_band" => self.old_band = band(&value)?,
            "band_mapping" => self.set_band_mapping(&value.as_indices(name)?)?,
            _ => return Err(FilterError::unknown_property(self.name(), name)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemorySource, Pipeline, StageId};
    use tilechain_core::DataObjectStatus;

    fn source(values: &[f64], bands: usize) -> MemorySource {
        let width = (values.len() / bands) as u32;
        MemorySource::new(PixelBuffer::from_values(ScalarType::U8, bands, IRect::from_size(width, 1), values).unwrap())
    }

    fn view(new: MemorySource, old: MemorySource, view: TwoColorView) -> FilterResult<(Pipeline, StageId)> {
        let mut p = Pipeline::new();
        let a = p.add("new", new, &[])?;
        let b = p.add("old", old, &[])?;
        let v = p.add("view", view, &[a, b])?;
        Ok((p, v))
    }

    fn pixel(tile: &PixelBuffer, x: i32) -> [f64; 3] {
        [0, 1, 2].map(|b| tile.sample(x, 0, b).unwrap())
    }

    #[test]
    fn test_bands_and_presence() {
        let (mut p, v) = view(
            source(&[255.0, 0.0, 0.0, 128.0], 1),
            source(&[0.0, 255.0, 0.0, 255.0], 1),
            TwoColorView::new(),
        )
        .unwrap();
        let tile = p.get_tile(v, &TileRequest::full_res(IRect::from_size(4, 1))).unwrap();
        assert_eq!(tile.scalar_type(), ScalarType::U8);
        assert_eq!(tile.bands(), 3);
        assert_eq!(pixel(&tile, 0), [255.0, 0.0, 1.0]);
        assert_eq!(pixel(&tile, 1), [0.0, 255.0, 1.0]);
        assert_eq!(pixel(&tile, 2), [0.0, 0.0, 0.0]);
        assert_eq!(pixel(&tile, 3), [128.0, 255.0, 1.0]);
        assert_eq!(tile.status(), DataObjectStatus::Partial);
    }

    #[test]
    fn test_u8_values_are_copied() {
        let (mut p, v) = view(
            source(&[128.0, 10.0, 0.0], 1),
            source(&[60.0, 0.0, 200.0], 1),
            TwoColorView::new(),
        )
        .unwrap();
        let tile = p.get_tile(v, &TileRequest::full_res(IRect::from_size(3, 1))).unwrap();
        assert_eq!(pixel(&tile, 0), [128.0, 60.0, 1.0]);
        assert_eq!(pixel(&tile, 1), [10.0, 0.0, 1.0]);
        assert_eq!(pixel(&tile, 2), [0.0, 200.0, 1.0]);
    }

    #[test]
    fn test_u8_zero_that_is_not_null() {
        let mut image = PixelBuffer::from_values(ScalarType::U8, 1, IRect::from_size(2, 1), &[0.0, 7.0]).unwrap();
        image.set_null_pix(0, 255.0).unwrap();
        let (mut p, v) = view(MemorySource::new(image), source(&[3.0, 4.0], 1), TwoColorView::new()).unwrap();
        let tile = p.get_tile(v, &TileRequest::full_res(IRect::from_size(2, 1))).unwrap();
        assert_eq!(pixel(&tile, 0), [1.0, 3.0, 1.0]);
        assert_eq!(pixel(&tile, 1), [7.0, 4.0, 1.0]);
    }

    #[test]
    fn test_wider_types_are_rescaled() {
        let rect = IRect::from_size(3, 1);
        let new = PixelBuffer::from_values(ScalarType::U16, 1, rect, &[65535.0, 32768.0, 1.0]).unwrap();
        let old = PixelBuffer::from_values(ScalarType::U16, 1, rect, &[0.0, 0.0, 65535.0]).unwrap();
        let (mut p, v) = view(MemorySource::new(new), MemorySource::new(old), TwoColorView::new()).unwrap();
        let tile = p.get_tile(v, &TileRequest::full_res(rect)).unwrap();
        assert_eq!(pixel(&tile, 0), [255.0, 0.0, 1.0]);
        assert_eq!(pixel(&tile, 1), [128.0, 0.0, 1.0]);
        assert_eq!(pixel(&tile, 2), [1.0, 255.0, 1.0]);
    }

    #[test]
    fn test_band_mapping() {
        let mut tc = TwoColorView::new();
        tc.set_band_mapping(&[2, 0, 1]).unwrap();
        let (mut p, v) = view(source(&[255.0], 1), source(&[0.0], 1), tc).unwrap();
        let tile = p.get_tile(v, &TileRequest::full_res(IRect::from_size(1, 1))).unwrap();
        assert_eq!(pixel(&tile, 0), [0.0, 1.0, 255.0]);
    }

    #[test]
    fn test_invalid_band_mapping() {
        let mut tc = TwoColorView::new();
        assert!(matches!(tc.set_band_mapping(&[0, 0, 1]), Err(FilterError::InvalidBandMapping(_))));
        assert!(tc.set_band_mapping(&[0, 1]).is_err());
        assert!(tc.set_band_mapping(&[0, 1, 3]).is_err());
        assert_eq!(tc.band_mapping(), [0, 1, 2]);
    }

    #[test]
    fn test_band_selection() {
        let (mut p, v) = view(
            source(&[10.0, 255.0], 2),
            source(&[255.0, 0.0], 2),
            TwoColorView::new().with_bands(1, 0),
        )
        .unwrap();
        let tile = p.get_tile(v, &TileRequest::full_res(IRect::from_size(1, 1))).unwrap();
        assert_eq!(pixel(&tile, 0), [255.0, 255.0, 1.0]);
    }

    #[test]
    fn test_band_out_of_range() {
        let Err(err) = view(source(&[1.0], 1), source(&[1.0], 1), TwoColorView::new().with_bands(0, 1)) else {
            panic!("old band 1 of a 1-band input was accepted");
        };
        assert!(matches!(err, FilterError::Core(ref e) if e.is_band_error()));
    }

    #[test]
    fn test_outside_both_inputs_is_empty() {
        let (mut p, v) = view(source(&[5.0], 1), source(&[5.0], 1), TwoColorView::new()).unwrap();
        let tile = p.get_tile(v, &TileRequest::full_res(IRect::new(5, 5, 2, 2))).unwrap();
        assert_eq!(tile.status(), DataObjectStatus::Empty);
        assert_eq!(p.output_layout(v).unwrap().min, vec![1.0; 3]);
    }

    #[test]
    fn test_state() {
        let (mut p, v) = view(source(&[1.0, 2.0], 2), source(&[1.0, 2.0], 2), TwoColorView::new()).unwrap();
        p.set_property(v, "band_mapping", PropertyValue::Indices(vec![1, 2, 0])).unwrap();
        p.set_property(v, "new_band", PropertyValue::Int(1)).unwrap();
        assert!(p.set_property(v, "old_band", PropertyValue::Int(-1)).is_err());
        let mut kwl = crate::Keywordlist::new();
        p.save_state(v, &mut kwl, "view").unwrap();
        assert_eq!(kwl.find("view", "band_mapping"), Some("1 2 0"));
        assert_eq!(kwl.find("view", "new_band"), Some("1"));
    }
}
