//! Multi-band to palette-index conversion.

use tracing::trace;
use tilechain_core::{ScalarType, TileRef, TileRequest};

use crate::{FilterError, FilterResult, ImageSource, Inputs, OutputTile, PropertyValue, TileLayout, Upstream};

/// Largest palette an 8-bit index can address.
pub const MAX_PALETTE_ENTRIES: usize = 256;

/// Maps each multi-band pixel to the index of the nearest palette entry.
///
/// Entry 0 is reserved for null: null input pixels map to it and the
/// nearest-colour search only looks at entries `1..`. The output is a
/// single `U8` band with null 0 and range `[1, entries - 1]`.
///
/// In text form a palette is entries separated by `;`, each a
/// whitespace- or comma-separated list of band values:
/// `"0 0 0; 255 0 0; 0 255 0"`.
#[derive(Debug, Clone)]
pub struct NBandToIndex {
    palette: Vec<Vec<f64>>,
    tile: OutputTile,
}

impl NBandToIndex {
    /// Creates the filter; the palette needs 2 to 256 entries of equal,
    /// non-zero length.
    pub fn new(palette: Vec<Vec<f64>>) -> FilterResult<Self> {
        check_palette(&palette)?;
        Ok(Self {
            palette,
            tile: OutputTile::new(),
        })
    }

    /// Palette entries, entry 0 included.
    pub fn palette(&self) -> &[Vec<f64>] {
        &self.palette
    }

    /// Replaces the palette.
    pub fn set_palette(&mut self, palette: Vec<Vec<f64>>) -> FilterResult<()> {
        check_palette(&palette)?;
        self.palette = palette;
        Ok(())
    }

    /// Bands each palette entry carries.
    pub fn palette_bands(&self) -> usize {
        self.palette.first().map_or(0, Vec::len)
    }

    /// Index of the entry nearest to `pixel`, never 0.
    pub fn nearest(&self, pixel: &[f64]) -> usize {
        let mut best = (1, f64::INFINITY);
        for (i, entry) in self.palette.iter().enumerate().skip(1) {
            let d: f64 = entry.iter().zip(pixel).map(|(e, p)| (e - p) * (e - p)).sum();
            if d < best.1 {
                best = (i, d);
            }
        }
        best.0
    }

    fn check_bands(&self, bands: usize) -> FilterResult<()> {
        if bands != self.palette_bands() {
            return Err(FilterError::invalid_inputs(
                self.name(),
                format!("palette has {} band(s), input has {bands}", self.palette_bands()),
            ));
        }
        Ok(())
    }

    fn layout(&self) -> TileLayout {
        TileLayout {
            scalar: ScalarType::U8,
            null: vec![0.0],
            min: vec![1.0],
            max: vec![(self.palette.len() - 1) as f64],
        }
    }
}

fn check_palette(palette: &[Vec<f64>]) -> FilterResult<()> {
    if !(2..=MAX_PALETTE_ENTRIES).contains(&palette.len()) {
        return Err(FilterError::invalid_property(
            "palette",
            format!("needs 2 to {MAX_PALETTE_ENTRIES} entries, got {}", palette.len()),
        ));
    }
    let bands = palette[0].len();
    if bands == 0 || palette.iter().any(|e| e.len() != bands) {
        return Err(FilterError::invalid_property("palette", "entries must share a non-zero band count"));
    }
    Ok(())
}

/// Parses the `;`-separated text form of a palette.
pub fn parse_palette(text: &str) -> FilterResult<Vec<Vec<f64>>> {
    text.split(';')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|entry| {
            entry
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|v| !v.is_empty())
                .map(|v| {
                    v.parse::<f64>()
                        .map_err(|_| FilterError::invalid_property("palette", format!("bad value '{v}'")))
                })
                .collect()
        })
        .collect()
}

fn format_palette(palette: &[Vec<f64>]) -> String {
    palette
        .iter()
        .map(|e| e.iter().map(f64::to_string).collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ImageSource for NBandToIndex {
    fn name(&self) -> &'static str {
        "nband_to_index"
    }

    fn initialize(&mut self, upstream: &Upstream<'_>) -> FilterResult<()> {
        if !upstream.is_empty() {
            self.check_bands(upstream.bands(0))?;
        }
        Ok(())
    }

    fn get_tile(&mut self, request: &TileRequest, inputs: &mut Inputs<'_>) -> FilterResult<TileRef> {
        trace!(%request, "nband_to_index::get_tile");
        let input = inputs.get_tile(0, request)?;
        let layout = self.layout();
        if input.status().is_null_or_empty() {
            return self.tile.blank(&layout, request.rect());
        }
        self.check_bands(input.bands())?;

        let bands = input.bands();
        let mut pixel = vec![0.0; bands];
        let mut indices = Vec::with_capacity(input.plane_len());
        for o in 0..input.plane_len() {
            if (0..bands).all(|b| input.is_null_sample(b, o)) {
                indices.push(None);
                continue;
            }
            for (b, p) in pixel.iter_mut().enumerate() {
                *p = input.value(b, o);
            }
            indices.push(Some(self.nearest(&pixel)));
        }

        let out = self.tile.prepare(&layout, input.rect())?;
        for (o, index) in indices.into_iter().enumerate() {
            if let Some(i) = index {
                out.set_value(0, o, i as f64);
            }
        }
        out.validate();
        Ok(self.tile.share())
    }

    fn output_scalar_type(&self, _upstream: &Upstream<'_>) -> ScalarType {
        ScalarType::U8
    }

    fn number_of_output_bands(&self, _upstream: &Upstream<'_>) -> usize {
        1
    }

    fn null_pixel(&self, _band: usize, _upstream: &Upstream<'_>) -> f64 {
        0.0
    }

    fn min_pixel(&self, _band: usize, _upstream: &Upstream<'_>) -> f64 {
        1.0
    }

    fn max_pixel(&self, _band: usize, _upstream: &Upstream<'_>) -> f64 {
        (self.palette.len() - 1) as f64
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec!["palette"]
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        (name == "palette").then(|| PropertyValue::Text(format_palette(&self.palette)))
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> FilterResult<()> {
        match (name, value) {
            ("palette", PropertyValue::Text(text)) => self.set_palette(parse_palette(&text)?),
            ("palette", other) => Err(FilterError::invalid_property(name, format!("expected text, got {other}"))),
            _ => Err(FilterError::unknown_property(self.name(), name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemorySource, Pipeline, StageId};
    use tilechain_core::{DataObjectStatus, IRect, PixelBuffer};

    fn rgb_palette() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.0, 0.0],
            vec![255.0, 0.0, 0.0],
            vec![0.0, 255.0, 0.0],
            vec![0.0, 0.0, 255.0],
        ]
    }

    fn indexed(values: &[f64], width: u32) -> (Pipeline, StageId) {
        let rect = IRect::from_size(width, 1);
        let image = PixelBuffer::from_values(ScalarType::U8, 3, rect, values).unwrap();
        let mut p = Pipeline::new();
        let src = p.add("rgb", MemorySource::new(image), &[]).unwrap();
        let idx = p.chain("idx", NBandToIndex::new(rgb_palette()).unwrap(), src).unwrap();
        (p, idx)
    }

    #[test]
    fn test_nearest_entry() {
        // band-sequential: r r r, g g g, b b b
        let (mut p, idx) = indexed(&[250.0, 10.0, 200.0, 5.0, 200.0, 0.0, 0.0, 20.0, 30.0], 3);
        let tile = p.get_tile(idx, &TileRequest::full_res(IRect::from_size(3, 1))).unwrap();
        assert_eq!(tile.scalar_type(), ScalarType::U8);
        assert_eq!(tile.band_slice::<u8>(0), Some(&[1u8, 2, 1][..]));
        assert_eq!(p.output_layout(idx).unwrap().max, vec![3.0]);
    }

    #[test]
    fn test_null_pixel_maps_to_zero() {
        // entry 0 is black, but a black pixel is null in U8 and stays null
        let (mut p, idx) = indexed(&[0.0, 0.0, 0.0, 0.0, 0.0, 240.0], 2);
        let tile = p.get_tile(idx, &TileRequest::full_res(IRect::from_size(2, 1))).unwrap();
        assert_eq!(tile.band_slice::<u8>(0), Some(&[0u8, 3][..]));
        assert_eq!(tile.status(), DataObjectStatus::Partial);
    }

    #[test]
    fn test_palette_validation() {
        assert!(NBandToIndex::new(vec![vec![0.0]]).is_err());
        assert!(NBandToIndex::new(vec![vec![0.0; 2], vec![1.0]]).is_err());
        assert!(NBandToIndex::new(vec![vec![0.0]; 257]).is_err());
        assert!(NBandToIndex::new(vec![vec![0.0]; 256]).is_ok());
    }

    #[test]
    fn test_band_mismatch_fails_on_wiring() {
        let image = PixelBuffer::blank(ScalarType::U8, 1, IRect::from_size(1, 1)).unwrap();
        let mut p = Pipeline::new();
        let src = p.add("gray", MemorySource::new(image), &[]).unwrap();
        let err = p
            .chain("idx", NBandToIndex::new(rgb_palette()).unwrap(), src)
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, FilterError::InvalidInputs { .. }));
    }

    #[test]
    fn test_palette_property() {
        let (mut p, idx) = indexed(&[9.0; 3], 1);
        assert_eq!(
            p.property(idx, "palette"),
            Some(PropertyValue::Text("0 0 0; 255 0 0; 0 255 0; 0 0 255".into()))
        );
        p.set_property(idx, "palette", PropertyValue::Text("0,0,0; 9,9,9".into())).unwrap();
        assert_eq!(p.output_layout(idx).unwrap().max, vec![1.0]);
        assert!(p.set_property(idx, "palette", PropertyValue::Text("1 x 2; 3 4 5".into())).is_err());
        assert!(p.set_property(idx, "palette", PropertyValue::Int(3)).is_err());
    }
}
