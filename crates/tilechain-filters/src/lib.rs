//! # tilechain-filters
//!
//! Pull-based tile pipeline for raster imagery.
//!
//! Stages implement [`ImageSource`] and live in a [`Pipeline`] that owns
//! them and their wiring. A tile request at the end of the chain pulls
//! tiles from upstream stages on demand.
//!
//! # Modules
//!
//! - [`pipeline`] - Stage graph, tile evaluation, metadata queries
//! - [`caching`] - Tile cache stage with per-level stores
//! - [`remap`] - Scalar type conversion through normalized space
//! - [`feather`], [`two_color`], [`majority`] - Compositing and classification
//! - [`band_select`], [`index`] - Band selection and palette indexing
//! - [`sources`] - In-memory and generated image sources
//!
//! # Example
//!
//! ```rust
//! use tilechain_core::prelude::*;
//! use tilechain_filters::{CachingFilter, MemorySource, Pipeline, ScalarRemapFilter};
//!
//! let image = PixelBuffer::from_values(ScalarType::U16, 1, IRect::from_size(2, 1), &[0.0, 65535.0]).unwrap();
//!
//! let mut p = Pipeline::new();
//! let src = p.add("image", MemorySource::new(image), &[]).unwrap();
//! let cache = p.chain("cache", CachingFilter::new(), src).unwrap();
//! let remap = p.chain("remap", ScalarRemapFilter::new(ScalarType::U8), cache).unwrap();
//!
//! let tile = p.get_tile(remap, &TileRequest::full_res(IRect::from_size(2, 1))).unwrap();
//! assert_eq!(tile.band_slice::<u8>(0), Some(&[0u8, 255][..]));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod error;
pub mod band_select;
pub mod cache;
pub mod caching;
pub mod feather;
pub mod index;
pub mod majority;
pub mod pipeline;
pub mod progress;
pub mod property;
pub mod remap;
pub mod source;
pub mod sources;
pub mod two_color;

pub use band_select::BandSelector;
pub use cache::{CacheStats, TileCache};
pub use caching::CachingFilter;
pub use error::{FilterError, FilterResult};
pub use feather::{FeatherInfo, FeatherMosaic};
pub use index::NBandToIndex;
pub use majority::{MajorityVoting, StructuringElement};
pub use pipeline::{Inputs, Pipeline, StageId, Upstream};
pub use progress::{ProgressSink, TraceProgress, percent};
pub use property::{Keywordlist, PropertyValue, TYPE_KEY, load_state, save_state};
pub use remap::ScalarRemapFilter;
pub use source::{AsAny, ImageSource, OutputTile, TileLayout};
pub use sources::{CountingSource, GeneratedSource, MemorySource};
pub use two_color::TwoColorView;
