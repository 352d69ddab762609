//! # tilechain-core
//!
//! Core types for tiled, pull-based raster pipelines.
//!
//! This crate provides the data exchanged between pipeline stages:
//!
//! - [`PixelBuffer`] - Typed multi-band tile with per-band null/min/max and
//!   a [`DataObjectStatus`]
//! - [`ScalarType`], [`Sample`], [`Samples`] - Runtime scalar tagging and
//!   generic dispatch over the concrete storage types
//! - [`IRect`], [`IPoint`], [`ISize`], [`DPoint`] - Image-space geometry and
//!   tile-grid arithmetic
//! - [`TileRequest`] - Immutable (rectangle, resolution level) pair
//!
//! ## Crate Structure
//!
//! ```text
//! tilechain-core (this crate)
//!    ^
//!    |
//!    +-- tilechain-filters (ImageSource, cache, remap, compositing)
//!    +-- tilechain-cli
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tilechain_core::prelude::*;
//!
//! let req = TileRequest::full_res(IRect::new(0, 0, 2, 2));
//! let buf = PixelBuffer::from_values(ScalarType::U8, 1, req.rect(), &[1.0, 2.0, 3.0, 4.0]).unwrap();
//! assert_eq!(buf.status(), DataObjectStatus::Full);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod buffer;
pub mod error;
pub mod rect;
pub mod request;
pub mod scalar;

pub use buffer::*;
pub use error::*;
pub use rect::*;
pub use request::*;
pub use scalar::*;

/// Prelude module for convenient imports.
///
/// ```
/// use tilechain_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::buffer::{DataObjectStatus, PixelBuffer, TileRef};
    pub use crate::error::{Error, Result};
    pub use crate::rect::{DPoint, IPoint, IRect, ISize};
    pub use crate::request::TileRequest;
    pub use crate::scalar::{Sample, Samples, ScalarType};
}
