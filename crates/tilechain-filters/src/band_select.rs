//! Band selection and reordering.

use tracing::trace;
use tilechain_core::{TileRef, TileRequest};

use crate::{FilterError, FilterResult, ImageSource, Inputs, OutputTile, PropertyValue, Upstream};

/// Picks input bands by 1-based channel number.
///
/// An empty channel list passes every band through. Channels outside
/// `[1, bands]` fail at initialization and again at `get_tile`.
///
/// ```rust
/// use tilechain_core::prelude::*;
/// use tilechain_filters::{BandSelector, MemorySource, Pipeline};
///
/// let rgb = PixelBuffer::from_values(ScalarType::U8, 3, IRect::from_size(1, 1), &[10.0, 20.0, 30.0]).unwrap();
/// let mut p = Pipeline::new();
/// let src = p.add("rgb", MemorySource::new(rgb), &[]).unwrap();
/// let bgr = p.chain("bgr", BandSelector::new([3, 2, 1]), src).unwrap();
///
/// let tile = p.get_tile(bgr, &TileRequest::full_res(IRect::from_size(1, 1))).unwrap();
/// assert_eq!(tile.sample(0, 0, 0), Some(30.0));
/// assert!(p.chain("bad", BandSelector::new([0]), src).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct BandSelector {
    channels: Vec<usize>,
    tile: OutputTile,
}

impl BandSelector {
    /// Selects `channels` (1-based), in output order.
    pub fn new(channels: impl Into<Vec<usize>>) -> Self {
        Self {
            channels: channels.into(),
            tile: OutputTile::new(),
        }
    }

    /// Selected channels (1-based).
    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    fn check(&self, bands: usize) -> FilterResult<()> {
        match self.channels.iter().find(|&&c| c < 1 || c > bands) {
            Some(&index) => Err(FilterError::ChannelIndex { index, bands }),
            None => Ok(()),
        }
    }

    /// Input band feeding output `band`.
    fn source_band(&self, band: usize) -> usize {
        self.channels.get(band).map_or(band, |c| c.saturating_sub(1))
    }
}

impl ImageSource for BandSelector {
    fn name(&self) -> &'static str {
        "band_selector"
    }

    fn initialize(&mut self, upstream: &Upstream<'_>) -> FilterResult<()> {
        if !upstream.is_empty() {
            self.check(upstream.bands(0))?;
        }
        Ok(())
    }

    fn get_tile(&mut self, request: &TileRequest, inputs: &mut Inputs<'_>) -> FilterResult<TileRef> {
        trace!(%request, "band_selector::get_tile");
        let input = inputs.get_tile(0, request)?;
        if self.channels.is_empty() {
            return Ok(input);
        }
        self.check(input.bands())?;

        let layout = self.output_layout(&inputs.upstream());
        if input.status().is_null_or_empty() {
            return self.tile.blank(&layout, request.rect());
        }
        let out = self.tile.prepare(&layout, input.rect())?;
        for (band, &channel) in self.channels.iter().enumerate() {
            out.copy_band_from(band, &input, channel - 1)?;
        }
        out.validate();
        Ok(self.tile.share())
    }

    fn number_of_output_bands(&self, upstream: &Upstream<'_>) -> usize {
        if self.channels.is_empty() { upstream.bands(0) } else { self.channels.len() }
    }

    fn null_pixel(&self, band: usize, upstream: &Upstream<'_>) -> f64 {
        upstream.null_pixel(0, self.source_band(band))
    }

    fn min_pixel(&self, band: usize, upstream: &Upstream<'_>) -> f64 {
        upstream.min_pixel(0, self.source_band(band))
    }

    fn max_pixel(&self, band: usize, upstream: &Upstream<'_>) -> f64 {
        upstream.max_pixel(0, self.source_band(band))
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec!["channels"]
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        (name == "channels").then(|| PropertyValue::Indices(self.channels.clone()))
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> FilterResult<()> {
        match name {
            "channels" => self.channels = value.as_indices(name)?,
            _ => return Err(FilterError::unknown_property(self.name(), name)),
        }
        Ok(())
    }
}
