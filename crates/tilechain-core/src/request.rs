//! Tile requests: what rectangle, at what resolution level.

use std::fmt;

use crate::IRect;

/// Immutable request for one tile.
///
/// Level 0 is full resolution; each higher level halves both dimensions.
/// Equality and hashing are structural.
///
/// # Example
///
/// ```rust
/// use tilechain_core::{IRect, TileRequest};
///
/// let req = TileRequest::new(IRect::new(100, 100, 50, 50), 0);
/// let coarser = req.at_level(2);
/// assert_eq!(coarser.rect(), req.rect());
/// assert_ne!(req, coarser);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileRequest {
    rect: IRect,
    res_level: u32,
}

impl TileRequest {
    /// Creates a request.
    #[inline]
    pub const fn new(rect: IRect, res_level: u32) -> Self {
        Self { rect, res_level }
    }

    /// Full-resolution request.
    #[inline]
    pub const fn full_res(rect: IRect) -> Self {
        Self::new(rect, 0)
    }

    /// Requested rectangle.
    #[inline]
    pub const fn rect(&self) -> IRect {
        self.rect
    }

    /// Requested resolution level.
    #[inline]
    pub const fn res_level(&self) -> u32 {
        self.res_level
    }

    /// Same level, different rectangle.
    #[inline]
    pub const fn with_rect(&self, rect: IRect) -> Self {
        Self::new(rect, self.res_level)
    }

    /// Same rectangle, different level.
    #[inline]
    pub const fn at_level(&self, res_level: u32) -> Self {
        Self::new(self.rect, res_level)
    }
}

impl fmt::Display for TileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@L{}", self.rect, self.res_level)
    }
}
