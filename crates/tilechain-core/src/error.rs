//! Error types for tilechain-core operations.
//!
//! # Overview
//!
//! The [`Error`] enum covers the failure modes of the buffer layer:
//! - Buffer allocation for a scalar type that has no storage
//! - Band indices outside the buffer's band count
//! - Raw sample slices whose length disagrees with the buffer geometry
//!
//! Missing data is never an error at this level. A buffer without backing
//! store simply reports [`DataObjectStatus::Null`](crate::DataObjectStatus::Null).
//!
//! # Usage
//!
//! ```rust
//! use tilechain_core::{Error, Result};
//!
//! fn check_band(band: usize, bands: usize) -> Result<()> {
//!     if band >= bands {
//!         return Err(Error::band_out_of_range(band, bands));
//!     }
//!     Ok(())
//! }
//! assert!(check_band(3, 3).is_err());
//! ```

use thiserror::Error;

use crate::ScalarType;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by pixel-buffer and geometry operations.
///
/// # Categories
///
/// - **Type errors**: [`UnsupportedScalarType`](Error::UnsupportedScalarType)
/// - **Shape errors**: [`InvalidDimensions`](Error::InvalidDimensions),
///   [`BufferSizeMismatch`](Error::BufferSizeMismatch)
/// - **Band errors**: [`BandOutOfRange`](Error::BandOutOfRange)
#[derive(Debug, Error)]
pub enum Error {
    /// The scalar type has no sample storage (e.g. `ScalarType::Unknown`).
    ///
    /// # Example
    ///
    /// ```rust
    /// use tilechain_core::{Error, ScalarType};
    ///
    /// let err = Error::unsupported_scalar(ScalarType::Unknown, "allocate");
    /// assert!(err.to_string().contains("unknown"));
    /// ```
    #[error("unsupported scalar type {scalar} for {operation}")]
    UnsupportedScalarType {
        /// Offending scalar type
        scalar: ScalarType,
        /// Operation that was attempted
        operation: String,
    },

    /// Invalid buffer dimensions.
    ///
    /// Returned when width, height or band count is zero, or the sample
    /// count would overflow `usize`.
    #[error("invalid dimensions: {width}x{height}x{bands} ({reason})")]
    InvalidDimensions {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
        /// Requested band count
        bands: usize,
        /// Reason why dimensions are invalid
        reason: String,
    },

    /// Band index is outside the buffer's band count.
    #[error("band {band} out of range for {bands}-band buffer")]
    BandOutOfRange {
        /// Requested band
        band: usize,
        /// Number of bands in the buffer
        bands: usize,
    },

    /// Raw sample data length does not match the buffer geometry.
    #[error("buffer size mismatch: expected {expected} samples, got {actual}")]
    BufferSizeMismatch {
        /// Expected sample count
        expected: usize,
        /// Provided sample count
        actual: usize,
    },

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Creates an [`Error::UnsupportedScalarType`] error.
    #[inline]
    pub fn unsupported_scalar(scalar: ScalarType, operation: impl Into<String>) -> Self {
        Self::UnsupportedScalarType {
            scalar,
            operation: operation.into(),
        }
    }

    /// Creates an [`Error::InvalidDimensions`] error.
    #[inline]
    pub fn invalid_dimensions(
        width: u32,
        height: u32,
        bands: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidDimensions {
            width,
            height,
            bands,
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::BandOutOfRange`] error.
    #[inline]
    pub fn band_out_of_range(band: usize, bands: usize) -> Self {
        Self::BandOutOfRange { band, bands }
    }

    /// Creates an [`Error::BufferSizeMismatch`] error.
    #[inline]
    pub fn size_mismatch(expected: usize, actual: usize) -> Self {
        Self::BufferSizeMismatch { expected, actual }
    }

    /// Creates an [`Error::Other`] error.
    #[inline]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Returns `true` if this is a scalar-type error.
    #[inline]
    pub fn is_type_error(&self) -> bool {
        matches!(self, Self::UnsupportedScalarType { .. })
    }

    /// Returns `true` if this is a band-index error.
    #[inline]
    pub fn is_band_error(&self) -> bool {
        matches!(self, Self::BandOutOfRange { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_scalar() {
        let err = Error::unsupported_scalar(ScalarType::Unknown, "allocate");
        let msg = err.to_string();
        assert!(msg.contains("unknown"));
        assert!(msg.contains("allocate"));
        assert!(err.is_type_error());
    }

    #[test]
    fn test_band_out_of_range() {
        let err = Error::band_out_of_range(4, 3);
        assert!(err.to_string().contains("band 4"));
        assert!(err.is_band_error());
        assert!(!err.is_type_error());
    }

    #[test]
    fn test_size_mismatch() {
        let err = Error::size_mismatch(100, 99);
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("99"));
    }
}
