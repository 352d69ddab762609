//! Multi-band pixel buffers exchanged between pipeline stages.
//!
//! # Overview
//!
//! A [`PixelBuffer`] is a rectangle of samples in image space:
//! - A runtime [`ScalarType`] backed by a [`Samples`] vector
//! - `bands` planes stored band-sequentially (all of band 0, then band 1, ...)
//! - Per-band null, min and max sample values
//! - A [`DataObjectStatus`] describing how much of it holds real data
//!
//! # Memory Layout
//!
//! ```text
//! Samples: [b0 row0][b0 row1]...[b0 rowH-1][b1 row0]...[bN-1 rowH-1]
//! ```
//!
//! The backing store is optional. A freshly constructed buffer has none
//! and reports [`DataObjectStatus::Null`]; [`PixelBuffer::initialize`] or
//! [`PixelBuffer::make_blank`] allocate it.
//!
//! # Normalized Conversion
//!
//! [`copy_to_normalized`](PixelBuffer::copy_to_normalized) maps each
//! sample into `[0, 1]` using its band's min/max: null becomes `0`, the
//! band minimum becomes a tiny positive value, everything else
//! `(p - min) / (max - min)`. [`copy_from_normalized`](PixelBuffer::copy_from_normalized)
//! is the inverse: `0` becomes null, other values `min + range * p`,
//! rounded half away from zero for integer types and clamped to the band
//! range.
//!
//! # Usage
//!
//! ```rust
//! use tilechain_core::{DataObjectStatus, IRect, PixelBuffer, ScalarType};
//!
//! let mut buf = PixelBuffer::blank(ScalarType::U8, 1, IRect::new(10, 10, 4, 4)).unwrap();
//! assert_eq!(buf.status(), DataObjectStatus::Empty);
//!
//! buf.set_sample(11, 12, 0, 200.0);
//! assert_eq!(buf.validate(), DataObjectStatus::Partial);
//! assert_eq!(buf.sample(11, 12, 0), Some(200.0));
//! ```

use std::fmt;
use std::sync::Arc;

use crate::{dispatch_samples, Error, IPoint, IRect, Result, Sample, Samples, ScalarType};

/// Normalized value used for samples sitting exactly on the band minimum.
///
/// Keeps them distinct from `0`, which encodes null.
pub const NORMALIZED_MIN: f64 = f64::EPSILON;

/// Shared handle to a produced tile.
///
/// Stages keep one and reuse it with [`Arc::make_mut`], so holding a tile
/// across calls costs a copy on the producer side instead of aliasing.
pub type TileRef = Arc<PixelBuffer>;

/// How much of a buffer holds meaningful (non-null) data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataObjectStatus {
    /// No backing store.
    #[default]
    Null,
    /// Backing store present, every sample null.
    Empty,
    /// Some samples null, some not.
    Partial,
    /// No sample equals its band's null value.
    Full,
}

impl DataObjectStatus {
    /// `true` for [`Null`](Self::Null) and [`Empty`](Self::Empty).
    #[inline]
    pub const fn is_null_or_empty(&self) -> bool {
        matches!(self, Self::Null | Self::Empty)
    }
}

impl fmt::Display for DataObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Null => "null",
            Self::Empty => "empty",
            Self::Partial => "partial",
            Self::Full => "full",
        })
    }
}

/// Typed, multi-band rectangle of samples.
///
/// # Example
///
/// ```rust
/// use tilechain_core::{IRect, PixelBuffer, ScalarType};
///
/// let values: Vec<f64> = (0..6).map(f64::from).collect();
/// let buf = PixelBuffer::from_values(ScalarType::U16, 2, IRect::from_size(3, 1), &values).unwrap();
/// assert_eq!(buf.value(1, 0), 3.0);
/// assert_eq!(buf.band_slice::<u16>(1), Some(&[3u16, 4, 5][..]));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    scalar: ScalarType,
    bands: usize,
    rect: IRect,
    null: Vec<f64>,
    min: Vec<f64>,
    max: Vec<f64>,
    samples: Option<Samples>,
    status: DataObjectStatus,
}

impl PixelBuffer {
    /// Creates a buffer without backing store, using the type's default
    /// null/min/max for every band.
    pub fn new(scalar: ScalarType, bands: usize, rect: IRect) -> Self {
        Self {
            scalar,
            bands,
            rect,
            null: vec![scalar.default_null(); bands],
            min: vec![scalar.default_min(); bands],
            max: vec![scalar.default_max(); bands],
            samples: None,
            status: DataObjectStatus::Null,
        }
    }

    /// Creates an allocated buffer with every sample null.
    pub fn blank(scalar: ScalarType, bands: usize, rect: IRect) -> Result<Self> {
        let mut buf = Self::new(scalar, bands, rect);
        buf.make_blank()?;
        Ok(buf)
    }

    /// Creates a buffer from band-sequential values and validates it.
    pub fn from_values(
        scalar: ScalarType,
        bands: usize,
        rect: IRect,
        values: &[f64],
    ) -> Result<Self> {
        let mut buf = Self::new(scalar, bands, rect);
        let expected = buf.checked_sample_count()?;
        if values.len() != expected {
            return Err(Error::size_mismatch(expected, values.len()));
        }
        let mut samples = Samples::filled(scalar, expected, 0.0)?;
        for (i, &v) in values.iter().enumerate() {
            samples.set(i, v);
        }
        buf.samples = Some(samples);
        buf.validate();
        Ok(buf)
    }

    // ------------------------------------------------------------------
    // Geometry and metadata
    // ------------------------------------------------------------------

    /// Scalar type.
    #[inline]
    pub fn scalar_type(&self) -> ScalarType {
        self.scalar
    }

    /// Number of bands.
    #[inline]
    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Image-space rectangle.
    #[inline]
    pub fn rect(&self) -> IRect {
        self.rect
    }

    /// Top-left corner in image space.
    #[inline]
    pub fn origin(&self) -> IPoint {
        self.rect.origin()
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.rect.width
    }

    /// Height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.rect.height
    }

    /// Samples per band.
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.rect.width as usize * self.rect.height as usize
    }

    /// Samples across all bands.
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.plane_len() * self.bands
    }

    /// Backing store size in bytes (0 when unallocated).
    pub fn size_in_bytes(&self) -> usize {
        self.samples
            .as_ref()
            .map_or(0, |s| s.len() * s.storage_type().bytes_per_sample())
    }

    /// Current status flag. See [`validate`](Self::validate).
    #[inline]
    pub fn status(&self) -> DataObjectStatus {
        self.status
    }

    /// Overrides the status flag without inspecting samples.
    #[inline]
    pub fn set_status(&mut self, status: DataObjectStatus) {
        self.status = status;
    }

    /// Whether a backing store is allocated.
    #[inline]
    pub fn has_storage(&self) -> bool {
        self.samples.is_some()
    }

    /// Null sample value of `band`. Panics if `band` is out of range.
    #[inline]
    pub fn null_pix(&self, band: usize) -> f64 {
        self.null[band]
    }

    /// Minimum valid sample value of `band`. Panics if `band` is out of range.
    #[inline]
    pub fn min_pix(&self, band: usize) -> f64 {
        self.min[band]
    }

    /// Maximum valid sample value of `band`. Panics if `band` is out of range.
    #[inline]
    pub fn max_pix(&self, band: usize) -> f64 {
        self.max[band]
    }

    /// Sets the null value of `band`.
    pub fn set_null_pix(&mut self, band: usize, value: f64) -> Result<()> {
        self.check_band(band)?;
        self.null[band] = value;
        Ok(())
    }

    /// Sets the minimum valid value of `band`.
    pub fn set_min_pix(&mut self, band: usize, value: f64) -> Result<()> {
        self.check_band(band)?;
        self.min[band] = value;
        Ok(())
    }

    /// Sets the maximum valid value of `band`.
    pub fn set_max_pix(&mut self, band: usize, value: f64) -> Result<()> {
        self.check_band(band)?;
        self.max[band] = value;
        Ok(())
    }

    /// Moves the buffer without touching its samples.
    #[inline]
    pub fn set_origin(&mut self, origin: IPoint) {
        self.rect.x = origin.x;
        self.rect.y = origin.y;
    }

    /// Repositions and resizes the buffer.
    ///
    /// A size change drops the backing store (status becomes
    /// [`Null`](DataObjectStatus::Null)); the next
    /// [`initialize`](Self::initialize) or [`make_blank`](Self::make_blank)
    /// reallocates it.
    pub fn set_image_rect(&mut self, rect: IRect) {
        if rect.size() != self.rect.size() {
            self.samples = None;
            self.status = DataObjectStatus::Null;
        }
        self.rect = rect;
    }

    /// Changes the band count, resetting per-band values to the type defaults.
    pub fn set_bands(&mut self, bands: usize) {
        if bands != self.bands {
            *self = Self::new(self.scalar, bands, self.rect);
        }
    }

    /// Changes the scalar type, resetting per-band values to its defaults.
    pub fn set_scalar_type(&mut self, scalar: ScalarType) {
        if scalar != self.scalar {
            *self = Self::new(scalar, self.bands, self.rect);
        }
    }

    /// Allocates the backing store if absent, filled with null values.
    pub fn initialize(&mut self) -> Result<()> {
        if self.samples.is_none() {
            self.make_blank()?;
        }
        Ok(())
    }

    /// Sets every sample to its band's null value and marks the buffer
    /// [`Empty`](DataObjectStatus::Empty), allocating if needed.
    pub fn make_blank(&mut self) -> Result<()> {
        let count = self.checked_sample_count()?;
        let plane = self.plane_len();
        let storage = self.scalar.storage();
        let reusable = matches!(
            &self.samples,
            Some(s) if s.len() == count && s.storage_type() == storage
        );
        if !reusable {
            self.samples = Some(Samples::filled(self.scalar, count, 0.0)?);
        }
        if let Some(s) = &mut self.samples {
            for (b, &np) in self.null.iter().enumerate() {
                s.fill_range(b * plane..(b + 1) * plane, np);
            }
        }
        self.status = DataObjectStatus::Empty;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sample access
    // ------------------------------------------------------------------

    /// Local offset of absolute pixel (x, y) inside a band plane.
    #[inline]
    pub fn offset(&self, x: i32, y: i32) -> Option<usize> {
        if !self.rect.contains(x, y) {
            return None;
        }
        let lx = (x as i64 - self.rect.x as i64) as usize;
        let ly = (y as i64 - self.rect.y as i64) as usize;
        Some(ly * self.rect.width as usize + lx)
    }

    /// Sample at plane `offset` of `band`.
    ///
    /// Reads the band's null value when unallocated. Panics if `band` or
    /// `offset` is out of range.
    #[inline]
    pub fn value(&self, band: usize, offset: usize) -> f64 {
        match &self.samples {
            Some(s) => s.get(band * self.plane_len() + offset),
            None => self.null[band],
        }
    }

    /// Writes the sample at plane `offset` of `band`.
    ///
    /// Ignored when unallocated. Does not update the status flag.
    #[inline]
    pub fn set_value(&mut self, band: usize, offset: usize, value: f64) {
        let plane = self.plane_len();
        if let Some(s) = &mut self.samples {
            s.set(band * plane + offset, value);
        }
    }

    /// Sample at absolute pixel (x, y), `None` outside the buffer, for a bad
    /// band, or when unallocated.
    pub fn sample(&self, x: i32, y: i32, band: usize) -> Option<f64> {
        if band >= self.bands || self.samples.is_none() {
            return None;
        }
        self.offset(x, y).map(|o| self.value(band, o))
    }

    /// Writes the sample at absolute pixel (x, y). Returns `false` if
    /// nothing was written.
    pub fn set_sample(&mut self, x: i32, y: i32, band: usize, value: f64) -> bool {
        if band >= self.bands || self.samples.is_none() {
            return false;
        }
        match self.offset(x, y) {
            Some(o) => {
                self.set_value(band, o, value);
                true
            }
            None => false,
        }
    }

    /// Whether the sample at plane `offset` of `band` equals the band's null.
    #[inline]
    pub fn is_null_sample(&self, band: usize, offset: usize) -> bool {
        self.value(band, offset) == self.null_as_stored(band)
    }

    /// Whether every band is null at absolute pixel (x, y).
    ///
    /// Pixels outside the buffer count as null.
    pub fn is_null(&self, x: i32, y: i32) -> bool {
        match self.offset(x, y) {
            Some(o) => (0..self.bands).all(|b| self.is_null_sample(b, o)),
            None => true,
        }
    }

    /// Sets every sample of every band to `value`.
    pub fn fill(&mut self, value: f64) -> Result<()> {
        self.initialize()?;
        let count = self.sample_count();
        if let Some(s) = &mut self.samples {
            s.fill_range(0..count, value);
        }
        self.validate();
        Ok(())
    }

    /// Sets every sample of `band` to `value`.
    pub fn fill_band(&mut self, band: usize, value: f64) -> Result<()> {
        self.check_band(band)?;
        self.initialize()?;
        let plane = self.plane_len();
        if let Some(s) = &mut self.samples {
            s.fill_range(band * plane..(band + 1) * plane, value);
        }
        self.validate();
        Ok(())
    }

    /// Typed view of one band, `None` if `T` is not the storage type.
    pub fn band_slice<T: Sample>(&self, band: usize) -> Option<&[T]> {
        if band >= self.bands {
            return None;
        }
        let plane = self.plane_len();
        self.samples
            .as_ref()
            .and_then(T::slice)
            .map(|s| &s[band * plane..(band + 1) * plane])
    }

    /// Mutable typed view of one band.
    pub fn band_slice_mut<T: Sample>(&mut self, band: usize) -> Option<&mut [T]> {
        if band >= self.bands {
            return None;
        }
        let plane = self.plane_len();
        self.samples
            .as_mut()
            .and_then(T::slice_mut)
            .map(|s| &mut s[band * plane..(band + 1) * plane])
    }

    /// Backing store, if allocated.
    #[inline]
    pub fn samples(&self) -> Option<&Samples> {
        self.samples.as_ref()
    }

    /// Raw sample bytes in native byte order; empty when unallocated.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.samples {
            Some(s) => s.as_bytes(),
            None => &[],
        }
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Recomputes the status flag from sample content and returns it.
    ///
    /// - No backing store: [`Null`](DataObjectStatus::Null)
    /// - All samples null: [`Empty`](DataObjectStatus::Empty)
    /// - No samples null: [`Full`](DataObjectStatus::Full)
    /// - Otherwise: [`Partial`](DataObjectStatus::Partial)
    pub fn validate(&mut self) -> DataObjectStatus {
        fn count_nulls<T: Sample>(v: &[T], nulls: &[f64], plane: usize) -> usize {
            let mut count = 0;
            for (b, &np) in nulls.iter().enumerate() {
                let np = T::from_f64(np);
                count += v[b * plane..(b + 1) * plane]
                    .iter()
                    .filter(|&&s| s == np)
                    .count();
            }
            count
        }

        let plane = self.plane_len();
        self.status = match &self.samples {
            None => DataObjectStatus::Null,
            Some(samples) => {
                let total = self.sample_count();
                let nulls = dispatch_samples!(samples, v => count_nulls(v, &self.null, plane));
                if nulls == total {
                    DataObjectStatus::Empty
                } else if nulls == 0 {
                    DataObjectStatus::Full
                } else {
                    DataObjectStatus::Partial
                }
            }
        };
        self.status
    }

    // ------------------------------------------------------------------
    // Copies and conversions
    // ------------------------------------------------------------------

    /// Copies the overlap of `src` into this buffer.
    ///
    /// A straight sample copy over the intersecting region of both
    /// rectangles, converting through `f64` when scalar types differ. Null
    /// samples in `src` overwrite as well. Only the first
    /// `min(self.bands, src.bands)` bands are touched. The status flag is
    /// left for the caller to [`validate`](Self::validate).
    pub fn load_tile(&mut self, src: &PixelBuffer) -> Result<()> {
        self.initialize()?;
        let Some(overlap) = self.rect.intersect(&src.rect) else {
            return Ok(());
        };
        let (Some(dst), Some(from)) = (self.samples.as_mut(), src.samples.as_ref()) else {
            return Ok(());
        };

        let bands = self.bands.min(src.bands);
        let dst_plane = self.rect.width as usize * self.rect.height as usize;
        let src_plane = src.plane_len();
        let len = overlap.width as usize;
        let dx = (overlap.x as i64 - self.rect.x as i64) as usize;
        let sx = (overlap.x as i64 - src.rect.x as i64) as usize;

        for b in 0..bands {
            for row in 0..overlap.height as usize {
                let y = overlap.y as i64 + row as i64;
                let dy = (y - self.rect.y as i64) as usize;
                let sy = (y - src.rect.y as i64) as usize;
                let d = b * dst_plane + dy * self.rect.width as usize + dx;
                let s = b * src_plane + sy * src.rect.width as usize + sx;
                dst.copy_converted(d, from, s, len);
            }
        }
        Ok(())
    }

    /// Copies band `src_band` of `src` into band `dst_band` of this buffer.
    ///
    /// Both buffers must have the same dimensions. An unallocated `src`
    /// copies its null value.
    pub fn copy_band_from(&mut self, dst_band: usize, src: &PixelBuffer, src_band: usize) -> Result<()> {
        self.check_band(dst_band)?;
        src.check_band(src_band)?;
        if src.rect.size() != self.rect.size() {
            return Err(Error::size_mismatch(self.plane_len(), src.plane_len()));
        }
        self.initialize()?;
        let plane = self.plane_len();
        match (self.samples.as_mut(), src.samples.as_ref()) {
            (Some(dst), Some(from)) => dst.copy_converted(dst_band * plane, from, src_band * plane, plane),
            (Some(dst), None) => dst.fill_range(dst_band * plane..(dst_band + 1) * plane, src.null[src_band]),
            _ => {}
        }
        Ok(())
    }

    /// Writes every sample, normalized to `[0, 1]`, into `out`.
    ///
    /// `out` must hold exactly [`sample_count`](Self::sample_count) values,
    /// in the buffer's band-sequential order. An unallocated buffer writes
    /// all zeros.
    pub fn copy_to_normalized(&self, out: &mut [f64]) -> Result<()> {
        fn normalize<T: Sample>(src: &[T], np: f64, min: f64, max: f64, out: &mut [f64]) {
            let np = T::from_f64(np);
            let range = max - min;
            for (d, &s) in out.iter_mut().zip(src) {
                let p = s.to_f64();
                *d = if s == np {
                    0.0
                } else if p <= min {
                    NORMALIZED_MIN
                } else if p >= max {
                    1.0
                } else {
                    (p - min) / range
                };
            }
        }

        let count = self.sample_count();
        if out.len() != count {
            return Err(Error::size_mismatch(count, out.len()));
        }
        let Some(samples) = &self.samples else {
            out.fill(0.0);
            return Ok(());
        };
        let plane = self.plane_len();
        for b in 0..self.bands {
            let r = b * plane..(b + 1) * plane;
            let (np, min, max) = (self.null[b], self.min[b], self.max[b]);
            dispatch_samples!(samples, v => normalize(&v[r.clone()], np, min, max, &mut out[r]));
        }
        Ok(())
    }

    /// Fills this buffer from normalized values, allocating if needed.
    ///
    /// `0` maps to null; other values to `min + (max - min) * p`, rounded
    /// for integer types and clamped to `[min, max]`. Normalized scalar
    /// types store `p` clamped to `[0, 1]`. The status is revalidated.
    pub fn copy_from_normalized(&mut self, input: &[f64]) -> Result<()> {
        let count = self.checked_sample_count()?;
        if input.len() != count {
            return Err(Error::size_mismatch(count, input.len()));
        }
        self.initialize()?;
        let plane = self.plane_len();
        let direct = self.scalar.is_normalized();
        if let Some(samples) = &mut self.samples {
            for b in 0..self.bands {
                let r = b * plane..(b + 1) * plane;
                let (np, min, max) = (self.null[b], self.min[b], self.max[b]);
                let src = input[r.clone()].iter().copied();
                dispatch_samples!(samples, v => unnormalize(src, np, min, max, direct, &mut v[r]));
            }
        }
        self.validate();
        Ok(())
    }

    /// Un-normalizes a normalized-float buffer directly into this one.
    ///
    /// Same mapping as [`copy_from_normalized`](Self::copy_from_normalized)
    /// with `src` samples as input; no scratch buffer is involved. The two
    /// buffers must have the same dimensions and band count.
    pub fn unnormalize_from(&mut self, src: &PixelBuffer) -> Result<()> {
        if !src.scalar.is_normalized() {
            return Err(Error::unsupported_scalar(src.scalar, "unnormalize source"));
        }
        if src.sample_count() != self.sample_count() || src.bands != self.bands {
            return Err(Error::size_mismatch(self.sample_count(), src.sample_count()));
        }
        if !src.has_storage() {
            return self.make_blank();
        }
        self.initialize()?;
        let plane = self.plane_len();
        let direct = self.scalar.is_normalized();
        let (Some(dst), Some(from)) = (self.samples.as_mut(), src.samples.as_ref()) else {
            return Ok(());
        };
        for b in 0..self.bands {
            let r = b * plane..(b + 1) * plane;
            let (np, min, max) = (self.null[b], self.min[b], self.max[b]);
            dispatch_samples!(from, s => {
                let input = s[r.clone()].iter().map(|v| v.to_f64());
                dispatch_samples!(&mut *dst, d => unnormalize(input, np, min, max, direct, &mut d[r.clone()]))
            });
        }
        self.validate();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Band null value after a round trip through the storage type.
    #[inline]
    fn null_as_stored(&self, band: usize) -> f64 {
        match &self.samples {
            Some(s) => dispatch_samples!(s, v => null_round_trip(v, self.null[band])),
            None => self.null[band],
        }
    }

    fn check_band(&self, band: usize) -> Result<()> {
        if band >= self.bands {
            Err(Error::band_out_of_range(band, self.bands))
        } else {
            Ok(())
        }
    }

    fn checked_sample_count(&self) -> Result<usize> {
        let (w, h, b) = (self.rect.width, self.rect.height, self.bands);
        if w == 0 || h == 0 || b == 0 {
            return Err(Error::invalid_dimensions(w, h, b, "zero extent"));
        }
        (w as usize)
            .checked_mul(h as usize)
            .and_then(|n| n.checked_mul(b))
            .ok_or_else(|| Error::invalid_dimensions(w, h, b, "sample count overflow"))
    }
}

#[inline]
fn null_round_trip<T: Sample>(_witness: &[T], np: f64) -> f64 {
    T::from_f64(np).to_f64()
}

fn unnormalize<T: Sample>(
    input: impl Iterator<Item = f64>,
    np: f64,
    min: f64,
    max: f64,
    direct: bool,
    dst: &mut [T],
) {
    let null = T::from_f64(np);
    let range = max - min;
    for (d, p) in dst.iter_mut().zip(input) {
        *d = if p == 0.0 {
            null
        } else if direct {
            T::from_f64(p.clamp(0.0, 1.0))
        } else if p <= NORMALIZED_MIN {
            T::from_f64(min)
        } else {
            T::from_f64((min + range * p).clamp(min, max))
        };
    }
}
