//! Scalar type conversion.
//!
//! [`ScalarRemapFilter`] converts upstream tiles to a declared output type.
//! Conversion goes through normalized `[0, 1]` values using each band's
//! null/min/max, so narrowing conversions saturate instead of wrapping:
//!
//! | Upstream | Path |
//! |----------|------|
//! | same type as output | passthrough, no copy |
//! | normalized float | un-normalized directly into the output |
//! | anything else | normalized into a scratch buffer, then un-normalized |

use tracing::{debug, trace, warn};
use tilechain_core::{ScalarType, TileRef, TileRequest};

use crate::{FilterError, FilterResult, ImageSource, Inputs, OutputTile, PropertyValue, Upstream};

/// Converts upstream samples to a declared scalar type.
///
/// # Properties
///
/// | Name | Type |
/// |------|------|
/// | `enabled` | bool |
/// | `output_scalar_type` | scalar type |
#[derive(Debug, Clone)]
pub struct ScalarRemapFilter {
    enabled: bool,
    output: ScalarType,
    bypass: bool,
    upstream_type: ScalarType,
    connected: bool,
    tile: OutputTile,
    /// Normalized scratch, one value per sample of the last converted tile.
    normalized: Vec<f64>,
}

impl ScalarRemapFilter {
    /// Converts to `output`. Bypassed until wired to an input of another type.
    pub fn new(output: ScalarType) -> Self {
        Self {
            enabled: true,
            output,
            bypass: true,
            upstream_type: ScalarType::Unknown,
            connected: false,
            tile: OutputTile::new(),
            normalized: Vec::new(),
        }
    }

    /// Declared output type.
    pub fn output_type(&self) -> ScalarType {
        self.output
    }

    /// Changes the declared output type.
    pub fn set_output_type(&mut self, output: ScalarType) {
        self.output = output;
        self.update_bypass();
    }

    /// Whether conversion is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Off passes upstream tiles through unchanged.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// True when there is no input or the input already has the output type.
    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Length of the normalized scratch buffer.
    pub fn scratch_len(&self) -> usize {
        self.normalized.len()
    }

    fn update_bypass(&mut self) {
        let bypass = !self.connected || self.upstream_type == self.output;
        if bypass != self.bypass {
            debug!(
                bypass,
                upstream = %self.upstream_type,
                output = %self.output,
                "scalar_remap_filter: bypass changed"
            );
        }
        self.bypass = bypass;
    }

    fn remapping(&self) -> bool {
        self.enabled && !self.bypass && !self.output.is_unknown()
    }
}

impl ImageSource for ScalarRemapFilter {
    fn name(&self) -> &'static str {
        "scalar_remap_filter"
    }

    fn initialize(&mut self, upstream: &Upstream<'_>) -> FilterResult<()> {
        self.connected = !upstream.is_empty();
        self.upstream_type = upstream.scalar_type(0);
        self.update_bypass();
        Ok(())
    }

    fn get_tile(&mut self, request: &TileRequest, inputs: &mut Inputs<'_>) -> FilterResult<TileRef> {
        trace!(%request, "scalar_remap_filter::get_tile");
        let input = inputs.get_tile(0, request)?;
        if !self.enabled || self.bypass {
            return Ok(input);
        }

        let layout = self.output_layout(&inputs.upstream());
        if input.status().is_null_or_empty() {
            return self.tile.blank(&layout, request.rect());
        }
        if input.scalar_type() == self.output {
            return Ok(input);
        }
        if self.output.is_unknown() || input.scalar_type().is_unknown() {
            warn!(
                from = %input.scalar_type(),
                to = %self.output,
                "scalar_remap_filter: unsupported scalar type, passing tile through"
            );
            return Ok(input);
        }

        let out = self.tile.prepare(&layout, input.rect())?;
        if input.scalar_type().is_normalized() {
            out.unnormalize_from(&input)?;
        } else {
            let count = input.sample_count();
            if self.normalized.len() != count {
                self.normalized.resize(count, 0.0);
            }
            input.copy_to_normalized(&mut self.normalized)?;
            out.copy_from_normalized(&self.normalized)?;
        }
        Ok(self.tile.share())
    }

    fn output_scalar_type(&self, upstream: &Upstream<'_>) -> ScalarType {
        if self.remapping() { self.output } else { upstream.scalar_type(0) }
    }

    fn null_pixel(&self, band: usize, upstream: &Upstream<'_>) -> f64 {
        if self.remapping() { self.output.default_null() } else { upstream.null_pixel(0, band) }
    }

    fn min_pixel(&self, band: usize, upstream: &Upstream<'_>) -> f64 {
        if self.remapping() { self.output.default_min() } else { upstream.min_pixel(0, band) }
    }

    fn max_pixel(&self, band: usize, upstream: &Upstream<'_>) -> f64 {
        if self.remapping() { self.output.default_max() } else { upstream.max_pixel(0, band) }
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec!["enabled", "output_scalar_type"]
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "enabled" => Some(PropertyValue::Bool(self.enabled)),
            "output_scalar_type" => Some(PropertyValue::Scalar(self.output)),
            _ => None,
        }
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> FilterResult<()> {
        match name {
            "enabled" => self.set_enabled(value.as_bool(name)?),
            "output_scalar_type" => self.set_output_type(value.as_scalar(name)?),
            _ => return Err(FilterError::unknown_property(self.name(), name)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::{MemorySource, Pipeline, StageId};
    use approx::assert_relative_eq;
    use tilechain_core::{DataObjectStatus, IRect, PixelBuffer};

    fn pipeline(image: PixelBuffer, output: ScalarType) -> (Pipeline, StageId, StageId) {
        let mut p = Pipeline::new();
        let src = p.add("src", MemorySource::new(image), &[]).unwrap();
        let remap = p.chain("remap", ScalarRemapFilter::new(output), src).unwrap();
        (p, src, remap)
    }

    fn full(rect: IRect) -> TileRequest {
        TileRequest::full_res(rect)
    }

    #[test]
    fn test_unknown_output_passes_tile_through() {
        let rect = IRect::from_size(3, 1);
        let image = PixelBuffer::from_values(ScalarType::U16, 1, rect, &[1.0, 300.0, 65535.0]).unwrap();
        let (mut p, _, remap) = pipeline(image, ScalarType::U8);
        p.set_property(remap, "output_scalar_type", PropertyValue::Scalar(ScalarType::Unknown))
            .unwrap();
        let filter = p.stage::<ScalarRemapFilter>(remap).unwrap();
        assert!(!filter.is_bypassed());
        assert_eq!(p.output_scalar_type(remap), ScalarType::U16);

        let tile = p.get_tile(remap, &full(rect)).unwrap();
        assert_eq!(tile.scalar_type(), ScalarType::U16);
        assert_eq!(tile.band_slice::<u16>(0), Some(&[1u16, 300, 65535][..]));
        assert_eq!(p.stage::<ScalarRemapFilter>(remap).unwrap().scratch_len(), 0);
    }

    #[test]
    fn test_same_type_is_zero_copy() {
        let image = PixelBuffer::from_values(ScalarType::I16, 1, IRect::from_size(2, 1), &[-5.0, 7.0]).unwrap();
        let (mut p, src, remap) = pipeline(image, ScalarType::I16);
        assert!(p.stage::<ScalarRemapFilter>(remap).unwrap().is_bypassed());
        let a = p.get_tile(remap, &full(IRect::from_size(2, 1))).unwrap();
        assert_eq!(a.band_slice::<i16>(0), Some(&[-5i16, 7][..]));
        // the source hands out the buffer it still owns
        let b = p.get_tile(src, &full(IRect::from_size(2, 1))).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_u16_to_u8() {
        let image =
            PixelBuffer::from_values(ScalarType::U16, 1, IRect::from_size(4, 1), &[0.0, 1.0, 32768.0, 65535.0]).unwrap();
        let (mut p, _, remap) = pipeline(image, ScalarType::U8);
        let tile = p.get_tile(remap, &full(IRect::from_size(4, 1))).unwrap();
        assert_eq!(tile.scalar_type(), ScalarType::U8);
        // small values round down onto null
        assert_eq!(tile.band_slice::<u8>(0), Some(&[0u8, 0, 128, 255][..]));
        assert_eq!(tile.status(), DataObjectStatus::Partial);
        assert_eq!(p.stage::<ScalarRemapFilter>(remap).unwrap().scratch_len(), 4);
    }

    #[test]
    fn test_to_float_uses_output_range() {
        let image = PixelBuffer::from_values(ScalarType::U8, 1, IRect::from_size(2, 1), &[255.0, 128.0]).unwrap();
        let (mut p, _, remap) = pipeline(image, ScalarType::NormalizedF64);
        let tile = p.get_tile(remap, &full(IRect::from_size(2, 1))).unwrap();
        let v = tile.band_slice::<f64>(0).unwrap();
        assert_relative_eq!(v[0], 1.0);
        assert_relative_eq!(v[1], 128.0 / 255.0);
    }

    #[test]
    fn test_normalized_source_unnormalizes_directly() {
        let image =
            PixelBuffer::from_values(ScalarType::NormalizedF32, 1, IRect::from_size(3, 1), &[0.0, 0.5, 1.0]).unwrap();
        let (mut p, _, remap) = pipeline(image, ScalarType::U8);
        let tile = p.get_tile(remap, &full(IRect::from_size(3, 1))).unwrap();
        assert_eq!(tile.band_slice::<u8>(0), Some(&[0u8, 128, 255][..]));
        assert_eq!(p.stage::<ScalarRemapFilter>(remap).unwrap().scratch_len(), 0);
    }

    #[test]
    fn test_empty_input_gives_typed_blank() {
        let image = PixelBuffer::from_values(ScalarType::U16, 1, IRect::from_size(2, 2), &[1.0; 4]).unwrap();
        let (mut p, _, remap) = pipeline(image, ScalarType::F32);
        let tile = p.get_tile(remap, &full(IRect::new(10, 10, 2, 2))).unwrap();
        assert_eq!(tile.scalar_type(), ScalarType::F32);
        assert_eq!(tile.status(), DataObjectStatus::Empty);
        assert_eq!(tile.null_pix(0), ScalarType::F32.default_null());
    }

    #[test]
    fn test_metadata_follows_state() {
        let image = PixelBuffer::from_values(ScalarType::U16, 1, IRect::from_size(1, 1), &[3.0]).unwrap();
        let (mut p, _, remap) = pipeline(image, ScalarType::U8);
        assert_eq!(p.output_scalar_type(remap), ScalarType::U8);
        assert_eq!(p.output_layout(remap).unwrap().max, vec![255.0]);

        p.set_property(remap, "enabled", PropertyValue::Bool(false)).unwrap();
        assert_eq!(p.output_scalar_type(remap), ScalarType::U16);
        assert_eq!(p.output_layout(remap).unwrap().max, vec![65535.0]);
        let tile = p.get_tile(remap, &full(IRect::from_size(1, 1))).unwrap();
        assert_eq!(tile.scalar_type(), ScalarType::U16);
    }

    #[test]
    fn test_unconnected_is_bypassed() {
        let mut remap = ScalarRemapFilter::new(ScalarType::U8);
        remap.initialize(&Upstream::none()).unwrap();
        assert!(remap.is_bypassed());
        remap.set_output_type(ScalarType::F64);
        assert!(remap.is_bypassed());
    }

    #[test]
    fn test_scratch_tracks_sample_count() {
        let image = PixelBuffer::from_values(ScalarType::U16, 2, IRect::from_size(4, 4), &[9.0; 32]).unwrap();
        let (mut p, _, remap) = pipeline(image, ScalarType::U8);
        p.get_tile(remap, &full(IRect::from_size(4, 4))).unwrap();
        assert_eq!(p.stage::<ScalarRemapFilter>(remap).unwrap().scratch_len(), 32);
        let tile = p.get_tile(remap, &full(IRect::from_size(2, 1))).unwrap();
        assert_eq!(tile.bands(), 2);
        assert_eq!(p.stage::<ScalarRemapFilter>(remap).unwrap().scratch_len(), 4);
    }

    #[test]
    fn test_held_tile_survives_next_call() {
        let image = PixelBuffer::from_values(ScalarType::U16, 1, IRect::from_size(2, 1), &[65535.0, 1.0]).unwrap();
        let (mut p, _, remap) = pipeline(image, ScalarType::U8);
        let first = p.get_tile(remap, &full(IRect::from_size(1, 1))).unwrap();
        let second = p.get_tile(remap, &full(IRect::new(1, 0, 1, 1))).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.sample(0, 0, 0), Some(255.0));
        assert_eq!(second.sample(1, 0, 0), Some(0.0));
    }
}
