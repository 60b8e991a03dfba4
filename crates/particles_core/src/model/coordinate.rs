//! Pixel-space-tagged coordinate values.
//!
//! # Responsibility
//! - Tag every stored coordinate/radius with the pixel space it lives in.
//! - Provide the only sanctioned conversions between binned and unbinned space.
//!
//! # Invariants
//! - Float values are always finite; construction and deserialization reject
//!   NaN and infinities.
//! - `BinningFactor` is always `>= 1`.
//! - Conversions never wrap: integer overflow surfaces as an error.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Pixel space a coordinate value is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSpace {
    /// Full-resolution acquired image pixels.
    Unbinned,
    /// Pixels of a representation downsampled by some integer factor.
    Binned,
}

impl CoordinateSpace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unbinned => "unbinned",
            Self::Binned => "binned",
        }
    }
}

impl Display for CoordinateSpace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised when constructing or converting coordinate values.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinateError {
    /// Value is NaN or infinite.
    NonFinite(f64),
    /// Binning factors must be at least 1.
    ZeroBinningFactor,
    /// Integer scaling overflowed `i64`.
    Overflow { value: i64, factor: u32 },
}

impl Display for CoordinateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFinite(value) => write!(f, "coordinate value `{value}` is not finite"),
            Self::ZeroBinningFactor => write!(f, "binning factor must be at least 1"),
            Self::Overflow { value, factor } => {
                write!(f, "scaling coordinate {value} by {factor} overflows")
            }
        }
    }
}

impl Error for CoordinateError {}

/// Integer downsampling factor between two pixel spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BinningFactor(u32);

impl BinningFactor {
    /// Identity factor.
    pub const ONE: Self = Self(1);

    pub fn new(value: u32) -> Result<Self, CoordinateError> {
        if value == 0 {
            return Err(CoordinateError::ZeroBinningFactor);
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for BinningFactor {
    type Error = CoordinateError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BinningFactor> for u32 {
    fn from(value: BinningFactor) -> Self {
        value.0
    }
}

/// Common view over the four leaf coordinate value types.
pub trait CoordinateValue: Copy {
    /// Scalar representation (`i64` or `f64`).
    type Scalar: Copy;
    /// Space every value of this type lives in.
    const SPACE: CoordinateSpace;

    fn get(self) -> Self::Scalar;
}

fn scale_int(value: i64, factor: BinningFactor) -> Result<i64, CoordinateError> {
    value
        .checked_mul(i64::from(factor.get()))
        .ok_or(CoordinateError::Overflow {
            value,
            factor: factor.get(),
        })
}

fn scale_float(value: f64, factor: BinningFactor) -> Result<f64, CoordinateError> {
    finite(value * f64::from(factor.get()))
}

fn finite(value: f64) -> Result<f64, CoordinateError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CoordinateError::NonFinite(value))
    }
}

/// Integer coordinate in unbinned pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnbinnedInt(i64);

impl UnbinnedInt {
    pub fn new(value: i64) -> Self {
        Self(value)
    }
}

impl CoordinateValue for UnbinnedInt {
    type Scalar = i64;
    const SPACE: CoordinateSpace = CoordinateSpace::Unbinned;

    fn get(self) -> i64 {
        self.0
    }
}

/// Integer coordinate in binned pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BinnedInt(i64);

impl BinnedInt {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Removes one extra binning layer; the result is still binned.
    pub fn without_extra_binning(self, factor: BinningFactor) -> Result<Self, CoordinateError> {
        scale_int(self.0, factor).map(Self)
    }

    pub fn to_unbinned(self, factor: BinningFactor) -> Result<UnbinnedInt, CoordinateError> {
        scale_int(self.0, factor).map(UnbinnedInt)
    }
}

impl CoordinateValue for BinnedInt {
    type Scalar = i64;
    const SPACE: CoordinateSpace = CoordinateSpace::Binned;

    fn get(self) -> i64 {
        self.0
    }
}

/// Float quantity (usually a radius) in unbinned pixel space.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct UnbinnedFloat(f64);

impl UnbinnedFloat {
    pub fn new(value: f64) -> Result<Self, CoordinateError> {
        finite(value).map(Self)
    }
}

impl CoordinateValue for UnbinnedFloat {
    type Scalar = f64;
    const SPACE: CoordinateSpace = CoordinateSpace::Unbinned;

    fn get(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for UnbinnedFloat {
    type Error = CoordinateError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UnbinnedFloat> for f64 {
    fn from(value: UnbinnedFloat) -> Self {
        value.0
    }
}

/// Float quantity (usually a radius) in binned pixel space.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct BinnedFloat(f64);

impl BinnedFloat {
    pub fn new(value: f64) -> Result<Self, CoordinateError> {
        finite(value).map(Self)
    }

    /// Removes one extra binning layer; the result is still binned.
    pub fn without_extra_binning(self, factor: BinningFactor) -> Result<Self, CoordinateError> {
        scale_float(self.0, factor).map(Self)
    }

    pub fn to_unbinned(self, factor: BinningFactor) -> Result<UnbinnedFloat, CoordinateError> {
        scale_float(self.0, factor).map(UnbinnedFloat)
    }
}

impl CoordinateValue for BinnedFloat {
    type Scalar = f64;
    const SPACE: CoordinateSpace = CoordinateSpace::Binned;

    fn get(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for BinnedFloat {
    type Error = CoordinateError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BinnedFloat> for f64 {
    fn from(value: BinnedFloat) -> Self {
        value.0
    }
}

/// Integer coordinate carrying its space tag in the persisted form.
///
/// Serialized as `{"space": "binned", "value": 100}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "space", content = "value", rename_all = "snake_case")]
pub enum CoordinateInt {
    Unbinned(UnbinnedInt),
    Binned(BinnedInt),
}

impl CoordinateInt {
    pub fn space(self) -> CoordinateSpace {
        match self {
            Self::Unbinned(_) => UnbinnedInt::SPACE,
            Self::Binned(_) => BinnedInt::SPACE,
        }
    }

    pub fn value(self) -> i64 {
        match self {
            Self::Unbinned(value) => value.get(),
            Self::Binned(value) => value.get(),
        }
    }
}

impl From<UnbinnedInt> for CoordinateInt {
    fn from(value: UnbinnedInt) -> Self {
        Self::Unbinned(value)
    }
}

impl From<BinnedInt> for CoordinateInt {
    fn from(value: BinnedInt) -> Self {
        Self::Binned(value)
    }
}

/// Float quantity carrying its space tag in the persisted form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "space", content = "value", rename_all = "snake_case")]
pub enum CoordinateFloat {
    Unbinned(UnbinnedFloat),
    Binned(BinnedFloat),
}

impl CoordinateFloat {
    pub fn space(self) -> CoordinateSpace {
        match self {
            Self::Unbinned(_) => UnbinnedFloat::SPACE,
            Self::Binned(_) => BinnedFloat::SPACE,
        }
    }

    pub fn value(self) -> f64 {
        match self {
            Self::Unbinned(value) => value.get(),
            Self::Binned(value) => value.get(),
        }
    }
}

impl From<UnbinnedFloat> for CoordinateFloat {
    fn from(value: UnbinnedFloat) -> Self {
        Self::Unbinned(value)
    }
}

impl From<BinnedFloat> for CoordinateFloat {
    fn from(value: BinnedFloat) -> Self {
        Self::Binned(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factor(value: u32) -> BinningFactor {
        BinningFactor::new(value).expect("factor should be valid")
    }

    #[test]
    fn binning_factor_rejects_zero() {
        assert_eq!(
            BinningFactor::new(0).unwrap_err(),
            CoordinateError::ZeroBinningFactor
        );
        assert_eq!(BinningFactor::ONE.get(), 1);
    }

    #[test]
    fn binned_int_scales_through_extra_binning_then_unbins() {
        let value = BinnedInt::new(100)
            .without_extra_binning(factor(4))
            .unwrap()
            .to_unbinned(factor(2))
            .unwrap();
        assert_eq!(value.get(), 800);
    }

    #[test]
    fn binned_int_overflow_is_reported() {
        let err = BinnedInt::new(i64::MAX).to_unbinned(factor(2)).unwrap_err();
        assert!(matches!(err, CoordinateError::Overflow { factor: 2, .. }));
    }

    #[test]
    fn floats_reject_non_finite_values() {
        assert!(UnbinnedFloat::new(f64::NAN).is_err());
        assert!(BinnedFloat::new(f64::INFINITY).is_err());
        assert!(BinnedFloat::new(f64::MAX)
            .unwrap()
            .to_unbinned(factor(2))
            .is_err());
    }

    #[test]
    fn tagged_values_serialize_with_space() {
        let value = CoordinateInt::from(BinnedInt::new(7));
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"space":"binned","value":7}"#);

        let parsed: CoordinateFloat =
            serde_json::from_str(r#"{"space":"unbinned","value":2.5}"#).unwrap();
        assert_eq!(parsed.space(), CoordinateSpace::Unbinned);
        assert_eq!(parsed.value(), 2.5);
    }

    #[test]
    fn tagged_values_reject_unknown_space() {
        let err = serde_json::from_str::<CoordinateInt>(r#"{"space":"half","value":1}"#);
        assert!(err.is_err());
    }
}
