//! Fixed-point USD amounts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// USD amount as a fixed-point number with 8 decimal places.
/// Avoids floating-point drift in the cumulative liquidity bookkeeping.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UsdValue(pub u64);

impl UsdValue {
    /// Number of decimal places.
    pub const DECIMALS: u32 = 8;
    /// Scale factor: 10^8.
    pub const SCALE: u64 = 100_000_000;

    pub const ZERO: UsdValue = UsdValue(0);

    /// Create from f64. Negative inputs clamp to zero.
    pub fn from_f64(value: f64) -> Self {
        if value <= 0.0 || !value.is_finite() {
            return Self(0);
        }
        Self((value * Self::SCALE as f64) as u64)
    }

    /// Convert to f64 (for display and ratio math).
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Ratio of self to `base`, or None when the base is zero.
    pub fn ratio_to(self, base: UsdValue) -> Option<f64> {
        if base.0 == 0 {
            return None;
        }
        Some(self.0 as f64 / base.0 as f64)
    }

    /// Fraction of self relative to `total` (e.g. trade size vs pool size),
    /// or None when the total is zero.
    pub fn fraction_of(self, total: UsdValue) -> Option<f64> {
        self.ratio_to(total)
    }
}

impl Add for UsdValue {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for UsdValue {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for UsdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.to_f64();
        if v >= 1_000_000.0 {
            write!(f, "${:.2}M", v / 1_000_000.0)
        } else if v >= 1_000.0 {
            write!(f, "${:.1}K", v / 1_000.0)
        } else {
            write!(f, "${:.2}", v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion() {
        let one = UsdValue::from_f64(1.0);
        assert_eq!(one.0, 100_000_000u64);

        let v = UsdValue::from_f64(50_000.5);
        assert_eq!(v.to_f64(), 50_000.5);
    }

    #[test]
    fn test_negative_clamps_to_zero() {
        assert_eq!(UsdValue::from_f64(-12.5), UsdValue::ZERO);
        assert_eq!(UsdValue::from_f64(f64::NAN), UsdValue::ZERO);
    }

    #[test]
    fn test_arithmetic_saturates() {
        let a = UsdValue::from_f64(100.0);
        let b = UsdValue::from_f64(150.0);

        assert_eq!((a + b).to_f64(), 250.0);
        // Subtraction below zero floors at zero
        assert_eq!(a - b, UsdValue::ZERO);
    }

    #[test]
    fn test_ratio_to() {
        let liq = UsdValue::from_f64(620.0);
        let base = UsdValue::from_f64(100.0);
        assert_eq!(liq.ratio_to(base), Some(6.2));
        assert_eq!(liq.ratio_to(UsdValue::ZERO), None);
    }

    #[test]
    fn test_fraction_of() {
        let trade = UsdValue::from_f64(80.0);
        let pool = UsdValue::from_f64(10_000.0);
        assert_eq!(trade.fraction_of(pool), Some(0.008));
    }

    #[test]
    fn test_display_scaling() {
        assert_eq!(UsdValue::from_f64(12.3).to_string(), "$12.30");
        assert_eq!(UsdValue::from_f64(45_200.0).to_string(), "$45.2K");
        assert_eq!(UsdValue::from_f64(3_400_000.0).to_string(), "$3.40M");
    }
}
