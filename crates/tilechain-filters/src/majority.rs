//! Neighbourhood majority voting on label images.
//!
//! Every sample is replaced by the most frequent label in its
//! neighbourhood, shaped by a [`StructuringElement`]. The centre sample
//! takes part in the vote. Bands are voted independently.
//!
//! | Situation | Result |
//! |-----------|--------|
//! | centre is no-data or null | unchanged |
//! | isolated-only mode, centre label count above threshold | unchanged |
//! | unique majority | majority label |
//! | tie, `keep_original_label` | unchanged |
//! | tie, otherwise | `undecided_label` |

use std::fmt;
use std::str::FromStr;

use tracing::trace;
use tilechain_core::{PixelBuffer, TileRef, TileRequest};

use crate::{FilterError, FilterResult, ImageSource, Inputs, OutputTile, PropertyValue};

/// Neighbourhood shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StructuringElement {
    /// Full `(2r+1)²` square
    #[default]
    Box,
    /// Disc: offsets with `dx² + dy² <= r²`
    Ball,
}

impl StructuringElement {
    /// Offsets of the neighbourhood of `radius`, row-major.
    pub fn offsets(self, radius: u32) -> Vec<(i32, i32)> {
        let r = radius as i32;
        let r2 = i64::from(r) * i64::from(r);
        (-r..=r)
            .flat_map(|dy| (-r..=r).map(move |dx| (dx, dy)))
            .filter(|&(dx, dy)| match self {
                Self::Box => true,
                Self::Ball => i64::from(dx) * i64::from(dx) + i64::from(dy) * i64::from(dy) <= r2,
            })
            .collect()
    }
}

impl fmt::Display for StructuringElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Box => "box",
            Self::Ball => "ball",
        })
    }
}

impl FromStr for StructuringElement {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "box" => Ok(Self::Box),
            "ball" => Ok(Self::Ball),
            other => Err(FilterError::invalid_property(
                "structuring_element",
                format!("expected 'box' or 'ball', got '{other}'"),
            )),
        }
    }
}

/// Voting rule applied at each centre sample.
#[derive(Debug, Clone, Copy, PartialEq)]
struct VoteRule {
    no_data_label: f64,
    undecided_label: f64,
    keep_original_label: bool,
    only_isolated_pixels: bool,
    isolated_threshold: usize,
}

impl VoteRule {
    fn vote(
        &self,
        center: f64,
        input: &PixelBuffer,
        band: usize,
        (x, y): (i32, i32),
        offsets: &[(i32, i32)],
        histogram: &mut Vec<(f64, usize)>,
    ) -> f64 {
        histogram.clear();
        for &(dx, dy) in offsets {
            let Some(o) = input.offset(x + dx, y + dy) else { continue };
            if input.is_null_sample(band, o) {
                continue;
            }
            let label = input.value(band, o);
            if label == self.no_data_label {
                continue;
            }
            match histogram.iter_mut().find(|(l, _)| *l == label) {
                Some((_, count)) => *count += 1,
                None => histogram.push((label, 1)),
            }
        }

        if self.only_isolated_pixels {
            let own = histogram.iter().find(|(l, _)| *l == center).map_or(0, |&(_, c)| c);
            if own > self.isolated_threshold {
                return center;
            }
        }

        let best = histogram.iter().map(|&(_, c)| c).max().unwrap_or(0);
        let mut winners = histogram.iter().filter(|&&(_, c)| c == best);
        match (winners.next(), winners.next()) {
            (Some(&(label, _)), None) => label,
            (Some(_), Some(_)) if !self.keep_original_label => self.undecided_label,
            _ => center,
        }
    }
}

/// Largest accepted neighbourhood radius.
pub const MAX_RADIUS: u32 = 255;

/// Majority-vote smoothing of a label image.
///
/// # Properties
///
/// | Name | Type | Default |
/// |------|------|---------|
/// | `structuring_element` | text (`box`, `ball`) | `box` |
/// | `radius` | int | 1 |
/// | `no_data_label` | float | 0 |
/// | `undecided_label` | float | 0 |
/// | `keep_original_label` | bool | `true` |
/// | `only_isolated_pixels` | bool | `false` |
/// | `isolated_threshold` | int | 1 |
#[derive(Debug, Clone)]
pub struct MajorityVoting {
    element: StructuringElement,
    radius: u32,
    rule: VoteRule,
    offsets: Vec<(i32, i32)>,
    histogram: Vec<(f64, usize)>,
    tile: OutputTile,
}

impl Default for MajorityVoting {
    fn default() -> Self {
        Self::new()
    }
}

impl MajorityVoting {
    /// 3x3 box, no-data and undecided label 0, ties keep the original.
    pub fn new() -> Self {
        Self {
            element: StructuringElement::Box,
            radius: 1,
            rule: VoteRule {
                no_data_label: 0.0,
                undecided_label: 0.0,
                keep_original_label: true,
                only_isolated_pixels: false,
                isolated_threshold: 1,
            },
            offsets: StructuringElement::Box.offsets(1),
            histogram: Vec::new(),
            tile: OutputTile::new(),
        }
    }

    /// Sets the neighbourhood shape and radius, capped at [`MAX_RADIUS`].
    pub fn with_element(mut self, element: StructuringElement, radius: u32) -> Self {
        let radius = radius.min(MAX_RADIUS);
        self.element = element;
        self.radius = radius;
        self.offsets = element.offsets(radius);
        self
    }

    /// Label ignored by the vote and never replaced.
    pub fn with_no_data_label(mut self, label: f64) -> Self {
        self.rule.no_data_label = label;
        self
    }

    /// Label written on ties when originals are not kept.
    pub fn with_undecided_label(mut self, label: f64) -> Self {
        self.rule.undecided_label = label;
        self
    }

    /// Whether ties keep the centre label.
    pub fn with_keep_original_label(mut self, keep: bool) -> Self {
        self.rule.keep_original_label = keep;
        self
    }

    /// Restricts replacement to centres whose own label count is at most
    /// `threshold` (`None` votes everywhere).
    pub fn with_only_isolated(mut self, threshold: Option<usize>) -> Self {
        self.rule.only_isolated_pixels = threshold.is_some();
        if let Some(t) = threshold {
            self.rule.isolated_threshold = t;
        }
        self
    }

    /// Neighbourhood radius.
    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// Neighbourhood shape.
    pub fn element(&self) -> StructuringElement {
        self.element
    }
}

impl ImageSource for MajorityVoting {
    fn name(&self) -> &'static str {
        "majority_voting"
    }

    fn get_tile(&mut self, request: &TileRequest, inputs: &mut Inputs<'_>) -> FilterResult<TileRef> {
        trace!(%request, "majority_voting::get_tile");
        let rect = request.rect();
        let padded = request.with_rect(rect.pad(self.radius));
        let input = inputs.get_tile(0, &padded)?;
        let layout = self.output_layout(&inputs.upstream());

        if input.status().is_null_or_empty() {
            return self.tile.blank(&layout, rect);
        }

        let Self { rule, offsets, histogram, tile, .. } = self;
        let out = tile.prepare(&layout, rect)?;
        let bands = layout.bands().min(input.bands());
        for (o, (x, y)) in rect.iter_coords().enumerate() {
            let Some(c) = input.offset(x, y) else { continue };
            for b in 0..bands {
                if input.is_null_sample(b, c) {
                    continue;
                }
                let center = input.value(b, c);
                let label = if center == rule.no_data_label {
                    center
                } else {
                    rule.vote(center, &input, b, (x, y), offsets, histogram)
                };
                out.set_value(b, o, label);
            }
        }
        out.validate();
        Ok(tile.share())
    }

    fn property_names(&self) -> Vec<&'static str> {
        vec![
            "structuring_element",
            "radius",
            "no_data_label",
            "undecided_label",
            "keep_original_label",
            "only_isolated_pixels",
            "isolated_threshold",
        ]
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        Some(match name {
            "structuring_element" => PropertyValue::Text(self.element.to_string()),
            "radius" => PropertyValue::Int(i64::from(self.radius)),
            "no_data_label" => PropertyValue::Float(self.rule.no_data_label),
            "undecided_label" => PropertyValue::Float(self.rule.undecided_label),
            "keep_original_label" => PropertyValue::Bool(self.rule.keep_original_label),
            "only_isolated_pixels" => PropertyValue::Bool(self.rule.only_isolated_pixels),
            "isolated_threshold" => PropertyValue::Int(self.rule.isolated_threshold as i64),
            _ => return None,
        })
    }

    fn set_property(&mut self, name: &str, value: PropertyValue) -> FilterResult<()> {
        let non_negative = |v: &PropertyValue| -> FilterResult<i64> {
            let n = v.as_int(name)?;
            if n < 0 {
                return Err(FilterError::invalid_property(name, "must not be negative"));
            }
            Ok(n)
        };
        match name {
            "structuring_element" => {
                let PropertyValue::Text(text) = &value else {
                    return Err(FilterError::invalid_property(name, "expected 'box' or 'ball'"));
                };
                self.element = text.parse()?;
                self.offsets = self.element.offsets(self.radius);
            }
            "radius" => {
                self.radius = u32::try_from(non_negative(&value)?)
                    .ok()
                    .filter(|&r| r <= MAX_RADIUS)
                    .ok_or_else(|| FilterError::invalid_property(name, format!("radius above {MAX_RADIUS}")))?;
                self.offsets = self.element.offsets(self.radius);
            }
            "no_data_label" => self.rule.no_data_label = value.as_float(name)?,
            "undecided_label" => self.rule.undecided_label = value.as_float(name)?,
            "keep_original_label" => self.rule.keep_original_label = value.as_bool(name)?,
            "only_isolated_pixels" => self.rule.only_isolated_pixels = value.as_bool(name)?,
            "isolated_threshold" => self.rule.isolated_threshold = non_negative(&value)? as usize,
            _ => return Err(FilterError::unknown_property(self.name(), name)),
        }
        Ok(())
    }
}
