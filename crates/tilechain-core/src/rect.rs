//! Integer rectangles, points and tile-grid arithmetic in image space.
//!
//! # Overview
//!
//! - [`IPoint`] - Signed integer pixel coordinate
//! - [`ISize`] - Unsigned width/height pair (tile sizes)
//! - [`IRect`] - Rectangle with signed origin and unsigned dimensions
//! - [`DPoint`] - Floating-point coordinate used for valid-pixel polygons
//!
//! # Coordinate System
//!
//! Standard image convention, origin top-left, X right, Y down. Origins
//! may be negative: a request may start left of or above an image.
//!
//! ```text
//! (0,0) ────────► X
//!   │   ┌────┬────┐
//!   │   │ t0 │ t1 │   tiles of an aligned rect,
//!   │   ├────┼────┤   visited row-major
//!   │   │ t2 │ t3 │
//!   ▼   └────┴────┘
//!   Y
//! ```
//!
//! # Usage
//!
//! ```rust
//! use tilechain_core::{IRect, ISize};
//!
//! let req = IRect::new(100, 100, 50, 50);
//! let aligned = req.stretch_to_tile(ISize::new(128, 128));
//! assert_eq!(aligned, IRect::new(0, 0, 256, 256));
//! assert_eq!(aligned.tile_origins(ISize::new(128, 128)).count(), 4);
//! ```

use std::fmt;
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Integer pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct IPoint {
    /// Column
    pub x: i32,
    /// Row
    pub y: i32,
}

impl IPoint {
    /// Creates a point.
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for IPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Width and height, used for tile sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ISize {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl ISize {
    /// Creates a size.
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Square size.
    #[inline]
    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    /// Returns `true` if either dimension is zero.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for ISize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A rectangle defined by a signed origin and unsigned dimensions.
///
/// Right and bottom edges are exclusive.
///
/// # Example
///
/// ```rust
/// use tilechain_core::IRect;
///
/// let rect = IRect::new(-10, 20, 100, 50);
/// assert_eq!(rect.right(), 90);
/// assert_eq!(rect.bottom(), 70);
/// assert_eq!(rect.area(), 5000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IRect {
    /// X coordinate of the left edge (inclusive)
    pub x: i32,
    /// Y coordinate of the top edge (inclusive)
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl IRect {
    /// Creates a new rectangle with the given origin and dimensions.
    #[inline]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Creates a rectangle at origin (0, 0).
    #[inline]
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Creates a rectangle from an origin and a size.
    #[inline]
    pub const fn from_origin_size(origin: IPoint, size: ISize) -> Self {
        Self::new(origin.x, origin.y, size.width, size.height)
    }

    /// Creates a rectangle spanning `[x0, x1) x [y0, y1)`.
    ///
    /// Inverted spans produce an empty rectangle.
    pub fn from_edges(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        let w = (x1 - x0).max(0);
        let h = (y1 - y0).max(0);
        Self::new(x0 as i32, y0 as i32, w as u32, h as u32)
    }

    /// Top-left corner.
    #[inline]
    pub const fn origin(&self) -> IPoint {
        IPoint::new(self.x, self.y)
    }

    /// Dimensions.
    #[inline]
    pub const fn size(&self) -> ISize {
        ISize::new(self.width, self.height)
    }

    /// X coordinate of the right edge (exclusive).
    #[inline]
    pub const fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Y coordinate of the bottom edge (exclusive).
    #[inline]
    pub const fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Area in pixels.
    #[inline]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns `true` if the rectangle has zero area.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns `true` if the pixel (px, py) is inside.
    #[inline]
    pub const fn contains(&self, px: i32, py: i32) -> bool {
        (px as i64) >= self.x as i64
            && (px as i64) < self.right()
            && (py as i64) >= self.y as i64
            && (py as i64) < self.bottom()
    }

    /// Returns `true` if `other` lies entirely inside this rectangle.
    #[inline]
    pub const fn contains_rect(&self, other: &IRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Intersection with another rectangle, `None` if they don't overlap.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tilechain_core::IRect;
    ///
    /// let a = IRect::new(0, 0, 100, 100);
    /// let b = IRect::new(50, -20, 100, 100);
    /// assert_eq!(a.intersect(&b), Some(IRect::new(50, 0, 50, 80)));
    /// ```
    pub fn intersect(&self, other: &IRect) -> Option<IRect> {
        let x0 = (self.x as i64).max(other.x as i64);
        let y0 = (self.y as i64).max(other.y as i64);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 > x0 && y1 > y0 {
            Some(Self::from_edges(x0, y0, x1, y1))
        } else {
            None
        }
    }

    /// Smallest rectangle enclosing both.
    pub fn union(&self, other: &IRect) -> IRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::from_edges(
            (self.x as i64).min(other.x as i64),
            (self.y as i64).min(other.y as i64),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Returns the rectangle moved by (dx, dy).
    #[inline]
    pub const fn translate(&self, dx: i32, dy: i32) -> IRect {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Grows the rectangle by `amount` pixels on every side.
    ///
    /// Coordinates and dimensions saturate instead of overflowing.
    #[inline]
    pub const fn pad(&self, amount: u32) -> IRect {
        let shift = if amount > i32::MAX as u32 { i32::MAX } else { amount as i32 };
        let grow = amount.saturating_mul(2);
        Self::new(
            self.x.saturating_sub(shift),
            self.y.saturating_sub(shift),
            self.width.saturating_add(grow),
            self.height.saturating_add(grow),
        )
    }

    /// Stretches the rectangle outward to the enclosing multiple of `tile`.
    ///
    /// The tile grid is anchored at (0, 0); negative origins round toward
    /// negative infinity.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tilechain_core::{IRect, ISize};
    ///
    /// let r = IRect::new(-5, 70, 10, 10).stretch_to_tile(ISize::new(64, 64));
    /// assert_eq!(r, IRect::new(-64, 64, 128, 64));
    /// ```
    pub fn stretch_to_tile(&self, tile: ISize) -> IRect {
        if tile.is_empty() {
            return *self;
        }
        let tw = tile.width as i64;
        let th = tile.height as i64;
        let x0 = (self.x as i64).div_euclid(tw) * tw;
        let y0 = (self.y as i64).div_euclid(th) * th;
        let x1 = ceil_to(self.right(), tw);
        let y1 = ceil_to(self.bottom(), th);
        Self::from_edges(x0, y0, x1, y1)
    }

    /// Tile origins covering this rectangle, row-major.
    ///
    /// The rectangle is expected to be aligned with
    /// [`stretch_to_tile`](Self::stretch_to_tile); a ragged right or bottom
    /// edge still yields a (partial) last tile.
    pub fn tile_origins(&self, tile: ISize) -> impl Iterator<Item = IPoint> + use<> {
        let cols = div_ceil(self.width, tile.width);
        let rows = div_ceil(self.height, tile.height);
        let (x, y) = (self.x, self.y);
        let (tw, th) = (tile.width as i32, tile.height as i32);
        (0..rows).flat_map(move |r| {
            (0..cols).map(move |c| IPoint::new(x + c as i32 * tw, y + r as i32 * th))
        })
    }

    /// Number of tiles [`tile_origins`](Self::tile_origins) yields.
    pub fn tile_count(&self, tile: ISize) -> usize {
        div_ceil(self.width, tile.width) as usize * div_ceil(self.height, tile.height) as usize
    }

    /// Rectangle at a decimated resolution level.
    ///
    /// Level `n` divides coordinates by `2^n`, rounding the origin down and
    /// the far edge up so no source pixel is lost.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tilechain_core::IRect;
    ///
    /// assert_eq!(IRect::from_size(513, 512).decimated(1), IRect::from_size(257, 256));
    /// ```
    pub fn decimated(&self, level: u32) -> IRect {
        if level == 0 {
            return *self;
        }
        let f = 1i64 << level.min(31);
        Self::from_edges(
            (self.x as i64).div_euclid(f),
            (self.y as i64).div_euclid(f),
            ceil_to(self.right(), f) / f,
            ceil_to(self.bottom(), f) / f,
        )
    }

    /// All pixel coordinates, row-major.
    pub fn iter_coords(&self) -> impl Iterator<Item = (i32, i32)> + use<> {
        let (x, y, w, h) = (self.x, self.y, self.width as i32, self.height as i32);
        (y..y + h).flat_map(move |py| (x..x + w).map(move |px| (px, py)))
    }

    /// Pixel-edge corners: top-left, top-right, bottom-right, bottom-left.
    ///
    /// Pixel centres sit on integer coordinates, so edges are offset by
    /// half a pixel.
    pub fn edge_corners(&self) -> [DPoint; 4] {
        let x0 = self.x as f64 - 0.5;
        let y0 = self.y as f64 - 0.5;
        let x1 = self.right() as f64 - 0.5;
        let y1 = self.bottom() as f64 - 0.5;
        [
            DPoint::new(x0, y0),
            DPoint::new(x1, y0),
            DPoint::new(x1, y1),
            DPoint::new(x0, y1),
        ]
    }
}

impl fmt::Display for IRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{} {}x{}]", self.x, self.y, self.width, self.height)
    }
}

#[inline]
fn ceil_to(v: i64, step: i64) -> i64 {
    let q = v.div_euclid(step);
    if v.rem_euclid(step) == 0 { q * step } else { (q + 1) * step }
}

#[inline]
fn div_ceil(v: u32, step: u32) -> u32 {
    if step == 0 { 0 } else { v.div_ceil(step) }
}

/// Floating-point image coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DPoint {
    /// Column
    pub x: f64,
    /// Row
    pub y: f64,
}

impl DPoint {
    /// Creates a point.
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Dot product.
    #[inline]
    pub fn dot(self, other: DPoint) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Euclidean length.
    #[inline]
    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, or zero for a zero vector.
    pub fn normalized(self) -> DPoint {
        let len = self.length();
        if len > 0.0 { self * (1.0 / len) } else { DPoint::default() }
    }
}

impl Add for DPoint {
    type Output = DPoint;
    fn add(self, rhs: DPoint) -> DPoint {
        DPoint::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for DPoint {
    type Output = DPoint;
    fn sub(self, rhs: DPoint) -> DPoint {
        DPoint::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for DPoint {
    type Output = DPoint;
    fn mul(self, rhs: f64) -> DPoint {
        DPoint::new(self.x * rhs, self.y * rhs)
    }
}
