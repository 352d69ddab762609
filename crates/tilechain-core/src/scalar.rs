//! Scalar sample types and runtime dispatch over sample storage.
//!
//! # Types
//!
//! - [`ScalarType`] - Runtime tag for the numeric type of a pixel buffer
//! - [`Sample`] - Trait implemented by every concrete storage type
//! - [`Samples`] - Tagged union holding the actual sample vector
//!
//! Two scalar types are "normalized" floats: they share `f32`/`f64` storage
//! with the plain float types, but their samples live in `[0, 1]` and their
//! null value is `0`.
//!
//! # Usage
//!
//! ```rust
//! use tilechain_core::{Samples, ScalarType};
//!
//! let mut samples = Samples::filled(ScalarType::U16, 4, 0.0).unwrap();
//! samples.set(2, 70000.0);
//! assert_eq!(samples.get(2), 65535.0); // saturates
//! assert_eq!(samples.storage_type(), ScalarType::U16);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Runtime pixel scalar type.
///
/// # Variants
///
/// Integer formats:
/// - `U8`, `I8` - 8-bit unsigned / signed
/// - `U16`, `I16` - 16-bit unsigned / signed
/// - `U32`, `I32` - 32-bit unsigned / signed
///
/// Floating-point formats:
/// - `F32`, `F64` - IEEE 754 single / double precision
/// - `NormalizedF32`, `NormalizedF64` - floats restricted to `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Unknown or unset; has no storage.
    #[default]
    Unknown,
    /// 8-bit unsigned integer.
    U8,
    /// 8-bit signed integer.
    I8,
    /// 16-bit unsigned integer.
    U16,
    /// 16-bit signed integer.
    I16,
    /// 32-bit unsigned integer.
    U32,
    /// 32-bit signed integer.
    I32,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// 32-bit float with samples in `[0, 1]`.
    NormalizedF32,
    /// 64-bit float with samples in `[0, 1]`.
    NormalizedF64,
}

impl ScalarType {
    /// All types that carry storage, in declaration order.
    pub const ALL: [ScalarType; 10] = [
        Self::U8,
        Self::I8,
        Self::U16,
        Self::I16,
        Self::U32,
        Self::I32,
        Self::F32,
        Self::F64,
        Self::NormalizedF32,
        Self::NormalizedF64,
    ];

    /// Bytes per sample. Returns 0 for Unknown.
    #[inline]
    pub const fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Unknown => 0,
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 | Self::NormalizedF32 => 4,
            Self::F64 | Self::NormalizedF64 => 8,
        }
    }

    /// Whether this is a floating-point format (normalized included).
    #[inline]
    pub const fn is_float(&self) -> bool {
        matches!(
            self,
            Self::F32 | Self::F64 | Self::NormalizedF32 | Self::NormalizedF64
        )
    }

    /// Whether this is one of the `[0, 1]` normalized formats.
    #[inline]
    pub const fn is_normalized(&self) -> bool {
        matches!(self, Self::NormalizedF32 | Self::NormalizedF64)
    }

    /// Whether this is a signed integer format.
    #[inline]
    pub const fn is_signed_integer(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32)
    }

    /// Whether this is unknown.
    #[inline]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// The type whose storage backs this one.
    ///
    /// Normalized floats are stored as their plain float counterparts.
    #[inline]
    pub const fn storage(&self) -> ScalarType {
        match self {
            Self::NormalizedF32 => Self::F32,
            Self::NormalizedF64 => Self::F64,
            other => *other,
        }
    }

    /// Default null sample value.
    ///
    /// Unsigned and normalized types use 0, signed types their minimum,
    /// plain floats `-1/ε`.
    pub fn default_null(&self) -> f64 {
        match self {
            Self::Unknown => 0.0,
            Self::U8 | Self::U16 | Self::U32 => 0.0,
            Self::I8 => i8::MIN as f64,
            Self::I16 => i16::MIN as f64,
            Self::I32 => i32::MIN as f64,
            Self::F32 => -1.0 / f32::EPSILON as f64,
            Self::F64 => -1.0 / f64::EPSILON,
            Self::NormalizedF32 | Self::NormalizedF64 => 0.0,
        }
    }

    /// Default minimum valid sample value.
    pub fn default_min(&self) -> f64 {
        match self {
            Self::Unknown => 0.0,
            Self::U8 | Self::U16 | Self::U32 => 0.0,
            Self::I8 => i8::MIN as f64 + 1.0,
            Self::I16 => i16::MIN as f64 + 1.0,
            Self::I32 => i32::MIN as f64 + 1.0,
            Self::F32 => -1.0 / f32::EPSILON as f64 + 1.0,
            Self::F64 => -1.0 / f64::EPSILON + 1.0,
            Self::NormalizedF32 | Self::NormalizedF64 => 0.0,
        }
    }

    /// Default maximum valid sample value.
    pub fn default_max(&self) -> f64 {
        match self {
            Self::Unknown => 0.0,
            Self::U8 => u8::MAX as f64,
            Self::U16 => u16::MAX as f64,
            Self::U32 => u32::MAX as f64,
            Self::I8 => i8::MAX as f64,
            Self::I16 => i16::MAX as f64,
            Self::I32 => i32::MAX as f64,
            Self::F32 => 1.0 / f32::EPSILON as f64,
            Self::F64 => 1.0 / f64::EPSILON,
            Self::NormalizedF32 | Self::NormalizedF64 => 1.0,
        }
    }

    /// Short lowercase name, as used in property lists.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::NormalizedF32 => "normalized_f32",
            Self::NormalizedF64 => "normalized_f64",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScalarType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let found = match lower.as_str() {
            "unknown" => Some(Self::Unknown),
            "u8" | "uint8" | "uchar" => Some(Self::U8),
            "i8" | "sint8" => Some(Self::I8),
            "u16" | "uint16" | "ushort" => Some(Self::U16),
            "i16" | "sint16" | "short" => Some(Self::I16),
            "u32" | "uint32" => Some(Self::U32),
            "i32" | "sint32" => Some(Self::I32),
            "f32" | "float" => Some(Self::F32),
            "f64" | "double" => Some(Self::F64),
            "normalized_f32" | "normalized_float" => Some(Self::NormalizedF32),
            "normalized_f64" | "normalized_double" => Some(Self::NormalizedF64),
            _ => None,
        };
        found.ok_or_else(|| Error::other(format!("unknown scalar type '{s}'")))
    }
}

/// A concrete sample storage type.
///
/// Conversions go through `f64`. [`from_f64`](Sample::from_f64) rounds half
/// away from zero for integer types and saturates to the type's range.
///
/// # Example
///
/// ```rust
/// use tilechain_core::Sample;
///
/// assert_eq!(<u8 as Sample>::from_f64(127.5), 128);
/// assert_eq!(<u8 as Sample>::from_f64(300.0), 255);
/// assert_eq!(<i16 as Sample>::from_f64(-2.5), -3);
/// ```
pub trait Sample: bytemuck::Pod + Default + PartialEq + Send + Sync + 'static {
    /// Storage scalar type for this Rust type.
    const SCALAR: ScalarType;

    /// Widen to `f64`.
    fn to_f64(self) -> f64;

    /// Narrow from `f64`.
    fn from_f64(v: f64) -> Self;

    /// Borrow the storage vector if `samples` holds this type.
    fn slice(samples: &Samples) -> Option<&[Self]>;

    /// Mutably borrow the storage vector if `samples` holds this type.
    fn slice_mut(samples: &mut Samples) -> Option<&mut [Self]>;
}

macro_rules! impl_sample {
    ($ty:ty, $variant:ident, int) => {
        impl_sample!(@impl $ty, $variant, |v: f64| v.round() as $ty);
    };
    ($ty:ty, $variant:ident, float) => {
        impl_sample!(@impl $ty, $variant, |v: f64| v as $ty);
    };
    (@impl $ty:ty, $variant:ident, $narrow:expr) => {
        impl Sample for $ty {
            const SCALAR: ScalarType = ScalarType::$variant;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                // `as` saturates and maps NaN to zero
                ($narrow)(v)
            }

            #[inline]
            fn slice(samples: &Samples) -> Option<&[Self]> {
                match samples {
                    Samples::$variant(v) => Some(v),
                    _ => None,
                }
            }

            #[inline]
            fn slice_mut(samples: &mut Samples) -> Option<&mut [Self]> {
                match samples {
                    Samples::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_sample!(u8, U8, int);
impl_sample!(i8, I8, int);
impl_sample!(u16, U16, int);
impl_sample!(i16, I16, int);
impl_sample!(u32, U32, int);
impl_sample!(i32, I32, int);
impl_sample!(f32, F32, float);
impl_sample!(f64, F64, float);

/// Sample storage, one variant per storage type.
///
/// Normalized scalar types use the `F32`/`F64` variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    /// 8-bit unsigned samples.
    U8(Vec<u8>),
    /// 8-bit signed samples.
    I8(Vec<i8>),
    /// 16-bit unsigned samples.
    U16(Vec<u16>),
    /// 16-bit signed samples.
    I16(Vec<i16>),
    /// 32-bit unsigned samples.
    U32(Vec<u32>),
    /// 32-bit signed samples.
    I32(Vec<i32>),
    /// 32-bit float samples.
    F32(Vec<f32>),
    /// 64-bit float samples.
    F64(Vec<f64>),
}

/// Runs `$body` with `$v` bound to the inner vector of a [`Samples`] value.
///
/// Works on owned values and on shared or mutable references alike; the
/// binding mode follows the matched expression.
#[macro_export]
macro_rules! dispatch_samples {
    ($samples:expr, $v:ident => $body:expr) => {
        match $samples {
            $crate::Samples::U8($v) => $body,
            $crate::Samples::I8($v) => $body,
            $crate::Samples::U16($v) => $body,
            $crate::Samples::I16($v) => $body,
            $crate::Samples::U32($v) => $body,
            $crate::Samples::I32($v) => $body,
            $crate::Samples::F32($v) => $body,
            $crate::Samples::F64($v) => $body,
        }
    };
}

impl Samples {
    /// Allocates `len` samples of `scalar`, all set to `value`.
    pub fn filled(scalar: ScalarType, len: usize, value: f64) -> Result<Self> {
        fn make<T: Sample>(len: usize, value: f64) -> Vec<T> {
            vec![T::from_f64(value); len]
        }
        Ok(match scalar.storage() {
            ScalarType::U8 => Self::U8(make(len, value)),
            ScalarType::I8 => Self::I8(make(len, value)),
            ScalarType::U16 => Self::U16(make(len, value)),
            ScalarType::I16 => Self::I16(make(len, value)),
            ScalarType::U32 => Self::U32(make(len, value)),
            ScalarType::I32 => Self::I32(make(len, value)),
            ScalarType::F32 => Self::F32(make(len, value)),
            ScalarType::F64 => Self::F64(make(len, value)),
            other => return Err(Error::unsupported_scalar(other, "allocate samples")),
        })
    }

    /// Storage type of this vector (never a normalized type).
    pub fn storage_type(&self) -> ScalarType {
        match self {
            Self::U8(_) => ScalarType::U8,
            Self::I8(_) => ScalarType::I8,
            Self::U16(_) => ScalarType::U16,
            Self::I16(_) => ScalarType::I16,
            Self::U32(_) => ScalarType::U32,
            Self::I32(_) => ScalarType::I32,
            Self::F32(_) => ScalarType::F32,
            Self::F64(_) => ScalarType::F64,
        }
    }

    /// Number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        dispatch_samples!(self, v => v.len())
    }

    /// Returns `true` if there are no samples.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads sample `i` widened to `f64`. Panics if `i` is out of bounds.
    #[inline]
    pub fn get(&self, i: usize) -> f64 {
        dispatch_samples!(self, v => v[i].to_f64())
    }

    /// Writes sample `i`, rounding and saturating to the storage type.
    /// Panics if `i` is out of bounds.
    #[inline]
    pub fn set(&mut self, i: usize, value: f64) {
        dispatch_samples!(self, v => v[i] = Sample::from_f64(value))
    }

    /// Sets samples in `range` to `value`.
    pub fn fill_range(&mut self, range: std::ops::Range<usize>, value: f64) {
        dispatch_samples!(self, v => v[range].fill(Sample::from_f64(value)))
    }

    /// Raw bytes of the sample vector in native byte order.
    pub fn as_bytes(&self) -> &[u8] {
        dispatch_samples!(self, v => bytemuck::cast_slice(v))
    }

    /// Copies `src` sample by sample, converting through `f64`.
    ///
    /// `src` and `self` index ranges are given as `(start, len)` pairs.
    pub(crate) fn copy_converted(&mut self, dst_start: usize, src: &Samples, src_start: usize, len: usize) {
        match (self, src) {
            (Self::U8(d), Self::U8(s)) => d[dst_start..dst_start + len].copy_from_slice(&s[src_start..src_start + len]),
            (Self::I8(d), Self::I8(s)) => d[dst_start..dst_start + len].copy_from_slice(&s[src_start..src_start + len]),
            (Self::U16(d), Self::U16(s)) => d[dst_start..dst_start + len].copy_from_slice(&s[src_start..src_start + len]),
            (Self::I16(d), Self::I16(s)) => d[dst_start..dst_start + len].copy_from_slice(&s[src_start..src_start + len]),
            (Self::U32(d), Self::U32(s)) => d[dst_start..dst_start + len].copy_from_slice(&s[src_start..src_start + len]),
            (Self::I32(d), Self::I32(s)) => d[dst_start..dst_start + len].copy_from_slice(&s[src_start..src_start + len]),
            (Self::F32(d), Self::F32(s)) => d[dst_start..dst_start + len].copy_from_slice(&s[src_start..src_start + len]),
            (Self::F64(d), Self::F64(s)) => d[dst_start..dst_start + len].copy_from_slice(&s[src_start..src_start + len]),
            (dst, src) => {
                for i in 0..len {
                    dst.set(dst_start + i, src.get(src_start + i));
                }
            }
        }
    }
}
