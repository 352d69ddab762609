//! Feathered mosaic of two or more inputs.
//!
//! Each input gets a feather geometry from its valid-pixel quadrilateral:
//! a centre and two unit axes along the quad's top and left edges. A pixel
//! at offset `d` from the centre weighs
//!
//! ```text
//! w = max(0, 1 - max(|d·a1| / l1, |d·a2| / l2))
//! ```
//!
//! where `l1`, `l2` are the half-lengths of those edges. Output samples are
//! the weight-normalized sum over inputs with a non-null sample.

use std::collections::HashMap;

use tracing::trace;
use tilechain_core::{DPoint, IRect, TileRef, TileRequest};

use crate::{FilterError, FilterResult, ImageSource, Inputs, OutputTile, PropertyValue, Upstream};

/// Feather geometry of one input at one resolution level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatherInfo {
    /// Quad centre
    pub center: DPoint,
    /// Unit vector along the top edge
    pub axis1: DPoint,
    /// Unit vector along the left edge
    pub axis2: DPoint,
    /// Half-length of the top edge
    pub axis1_length: f64,
    /// Half-length of the left edge
    pub axis2_length: f64,
}

impl FeatherInfo {
    /// Geometry of a quad given as top-left, top-right, bottom-right,
    /// bottom-left. `None` for a degenerate quad.
    pub fn from_vertices(v: &[DPoint; 4]) -> Option<Self> {
        let center = (v[0] + v[1] + v[2] + v[3]) * 0.25;
        let edge1 = v[1] - v[0];
        let edge2 = v[3] - v[0];
        let (l1, l2) = (edge1.length() * 0.5, edge2.length() * 0.5);
        if !(l1 > 0.0 && l2 > 0.0) {
            return None;
        }
        Some(Self {
            center,
            axis1: edge1.normalized(),
            axis2: edge2.normalized(),
            axis1_length: l1,
            axis2_length: l2,
        })
    }

    /// Weight of the pixel centred at `p`, in `[0, 1]`.
    #[inline]
    pub fn weight(&self, p: DPoint) -> f64 {
        let d = p - self.center;
        let u = d.dot(self.axis1).abs() / self.axis1_length;
        let v = d.dot(self.axis2).abs() / self.axis2_length;
        (1.0 - u.max(v)).max(0.0)
    }
}

/// Blends inputs with weights falling off toward each input's edges.
///
/// Output type, bands and ranges follow input 0; the extent is the union
/// of all input extents. Disabled, it passes input 0 through.
#[derive(Debug, Clone)]
pub struct FeatherMosaic {
    enabled: bool,
    geometry: HashMap<u32, Vec<Option<FeatherInfo>>>,
    tile: OutputTile,
    sums: Vec<f64>,
    weights: Vec<f64>,
}

impl Default for FeatherMosaic {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatherMosaic {
    /// Creates an enabled mosaic.
    pub fn new() -> Self {
        Self {
            enabled: true,
            geometry: HashMap::new(),
            tile: OutputTile::new(),
            sums: Vec::new(),
            weights: Vec::new(),
        }
    }

    /// Whether blending is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Off passes input 0 through.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Feather geometry of every input at `res_level`.
    pub fn feather_info(&self, res_level: u32, upstream: &Upstream<'_>) -> Vec<Option<FeatherInfo>> {
        (0..upstream.len())
            .map(|i| {
                upstream
                    .valid_vertices(i, res_level)
                    .and_then(|v| FeatherInfo::from_vertices(&v))
            })
            .collect()
    }
}

impl ImageSource for FeatherMosaic {
    fn name(&self) -> &'static str {
        "feather_mosaic"
    }

    fn accepts_inputs(&self, count: usize) -> bool {
        count >= 2
    }

    fn initialize(&mut self, _upstream: &Upstream<'_>) -> FilterResult<()> {
        self.geometry.clear();
        Ok(())
    }

    fn get_tile(&mut self, request: &TileRequest, inputs: &mut Inputs<'_>) -> FilterResult<TileRef> {
        trace!(%request, "feather_mosaic::get_tile");
        if !self.enabled {
            return inputs.get_tile(0, request);
        }

        let rect = request.rect();
        let level = request.res_level();
        let layout = {
            let up = inputs.upstream();
            if !self.geometry.contains_key(&level) {
                let info = self.feather_info(level, &up);
                self.geometry.insert(level, info);
            }
            self.output_layout(&up)
        };
        let geometry = self.geometry.get(&level).cloned().unwrap_or_default();

        let bands = layout.bands();
        let plane = rect.area() as usize;
        self.sums.clear();
        self.sums.resize(plane * bands, 0.0);
        self.weights.clear();
        self.weights.resize(plane * bands, 0.0);

        for (i, info) in geometry.iter().enumerate() {
            let Some(info) = info else { continue };
            let tile = inputs.get_tile(i, request)?;
            if tile.status().is_null_or_empty() || tile.rect() != rect {
                continue;
            }
            let shared = bands.min(tile.bands());
            for (o, (x, y)) in rect.iter_coords().enumerate() {
                let w = info.weight(DPoint::new(x as f64, y as f64));
                if w <= 0.0 {
                    continue;
                }
                for b in 0..shared {
                    if !tile.is_null_sample(b, o) {
                        self.sums[b * plane + o] += w * tile.value(b, o);
                        self.weights[b * plane + o] += w;
                    }
                }
            }
        }

        let out = self.tile.prepare(&layout, rect)?;
        for b in 0..bands {
            for o in 0..plane {
                let w = self.weights[b * plane + o];
                if w > 0.0 {
                    out.set_value(b, o, self.sums[b * plane + o] / w);
                }
            }
        }
        out.validate();
        Ok(self.tile.share())
    }

    fn bounding_rect(&self, res_level: u32, upstream: &Upstream<'_>) -> Option<IRect> {
        (0..upstream.len())
            .filter_map(|i| upstream.bounding_rect(i, res_level))
            .reduce(|a, b| a.union(&b))
    }

    fn valid_vertices(&self, res_level: u32, upstream: &Upstream<'_>) -> Option<[DPoint; 4]> {
        self.bounding_rect(res_level, upstream).map(|r| r.edge_corners())
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec!["enabled"]
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        (name == "enabled").then_some(PropertyValue::Bool(self.enabled))
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> FilterResult<()> {
        match name {
            "enabled" => self.set_enabled(value.as_bool(name)?),
            _ => return Err(FilterError::unknown_property(self.name(), name)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemorySource, Pipeline, StageId};
    use approx::assert_relative_eq;
    use tilechain_core::{DataObjectStatus, PixelBuffer, ScalarType};

    fn constant(rect: IRect, value: f64) -> MemorySource {
        let values = vec![value; rect.area() as usize];
        MemorySource::new(PixelBuffer::from_values(ScalarType::F32, 1, rect, &values).unwrap())
    }

    fn mosaic(a: MemorySource, b: MemorySource) -> (Pipeline, StageId) {
        let mut p = Pipeline::new();
        let a = p.add("a", a, &[]).unwrap();
        let b = p.add("b", b, &[]).unwrap();
        let m = p.add("mosaic", FeatherMosaic::new(), &[a, b]).unwrap();
        (p, m)
    }

    #[test]
    fn test_weight_falls_off() {
        let info = FeatherInfo::from_vertices(&IRect::from_size(9, 9).edge_corners()).unwrap();
        assert_relative_eq!(info.center.x, 4.0);
        assert_relative_eq!(info.axis1_length, 4.5);
        assert_relative_eq!(info.weight(DPoint::new(4.0, 4.0)), 1.0);
        assert_relative_eq!(info.weight(DPoint::new(0.0, 4.0)), 1.0 - 4.0 / 4.5);
        assert_relative_eq!(info.weight(DPoint::new(2.0, 8.0)), 1.0 - 4.0 / 4.5);
        assert_eq!(info.weight(DPoint::new(20.0, 4.0)), 0.0);
    }

    #[test]
    fn test_degenerate_quad() {
        let p = DPoint::new(1.0, 1.0);
        assert!(FeatherInfo::from_vertices(&[p; 4]).is_none());
    }

    #[test]
    fn test_rotated_quad_axes() {
        let quad = [
            DPoint::new(0.0, -1.0),
            DPoint::new(1.0, 0.0),
            DPoint::new(0.0, 1.0),
            DPoint::new(-1.0, 0.0),
        ];
        let info = FeatherInfo::from_vertices(&quad).unwrap();
        assert_relative_eq!(info.axis1.dot(info.axis2), 0.0);
        assert_relative_eq!(info.weight(DPoint::new(0.0, 0.0)), 1.0);
        assert_relative_eq!(info.weight(DPoint::new(0.0, 1.0)), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_same_geometry_averages() {
        let rect = IRect::from_size(9, 9);
        let (mut p, m) = mosaic(constant(rect, 10.0), constant(rect, 20.0));
        let tile = p.get_tile(m, &TileRequest::full_res(rect)).unwrap();
        assert_relative_eq!(tile.sample(4, 4, 0).unwrap(), 15.0);
        assert_relative_eq!(tile.sample(0, 8, 0).unwrap(), 15.0);
        assert_eq!(tile.status(), DataObjectStatus::Full);
    }

    #[test]
    fn test_weights_favour_nearer_centre() {
        let (mut p, m) = mosaic(constant(IRect::from_size(8, 4), 1.0), constant(IRect::new(4, 0, 8, 4), 3.0));
        assert_eq!(p.bounding_rect(m, 0), Some(IRect::from_size(12, 4)));
        let tile = p.get_tile(m, &TileRequest::full_res(IRect::from_size(12, 4))).unwrap();
        // left of the overlap only "a" contributes, right of it only "b"
        assert_relative_eq!(tile.sample(1, 1, 0).unwrap(), 1.0);
        assert_relative_eq!(tile.sample(10, 1, 0).unwrap(), 3.0);
        let left = tile.sample(4, 1, 0).unwrap();
        let right = tile.sample(7, 1, 0).unwrap();
        assert!(left < 2.0 && right > 2.0, "{left} {right}");
    }

    #[test]
    fn test_no_coverage_is_null() {
        let (mut p, m) = mosaic(constant(IRect::from_size(4, 4), 1.0), constant(IRect::from_size(4, 4), 2.0));
        let tile = p.get_tile(m, &TileRequest::full_res(IRect::new(2, 2, 4, 4))).unwrap();
        assert_eq!(tile.status(), DataObjectStatus::Partial);
        assert!(tile.is_null(5, 5));
        assert_relative_eq!(tile.sample(2, 2, 0).unwrap(), 1.5);
    }

    #[test]
    fn test_disabled_passes_first_input() {
        let rect = IRect::from_size(2, 2);
        let (mut p, m) = mosaic(constant(rect, 1.0), constant(rect, 2.0));
        p.set_property(m, "enabled", PropertyValue::Bool(false)).unwrap();
        let tile = p.get_tile(m, &TileRequest::full_res(rect)).unwrap();
        assert_eq!(tile.sample(0, 0, 0), Some(1.0));
    }

    #[test]
    fn test_needs_two_inputs() {
        let mut p = Pipeline::new();
        let a = p.add("a", constant(IRect::from_size(2, 2), 1.0), &[]).unwrap();
        assert!(p.add("mosaic", FeatherMosaic::new(), &[a]).is_err());
    }
}
