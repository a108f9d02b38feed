//! Fixed-precision vote arithmetic.
//!
//! All tallies, thresholds, and transfer fractions are [`FixedWeight`]
//! values: non-negative decimals carried at the scale configured by
//! `decimalPlacesForVoteArithmetic`. Addition is exact; multiplication and
//! division truncate toward zero at the configured scale. The engine never
//! touches native floating point.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use snafu::OptionExt;

use crate::errors::{ArithmeticOutOfRangeSnafu, TabResult};

/// A non-negative fixed-precision vote weight.
///
/// Ordering and equality are total and value-based (`1.00 == 1`). The type
/// serializes as its decimal string so report writers never re-parse floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedWeight(Decimal);

impl FixedWeight {
    pub const ZERO: FixedWeight = FixedWeight(Decimal::ZERO);
    pub const ONE: FixedWeight = FixedWeight(Decimal::ONE);

    pub fn from_count(count: u64) -> FixedWeight {
        FixedWeight(Decimal::from(count))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for FixedWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for FixedWeight {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s).map(FixedWeight)
    }
}

impl Serialize for FixedWeight {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// The arithmetic context for one tabulation: a scale in `1..=20` plus the
/// truncation rules of the contest.
///
/// Sums are order-independent because addition is exact at this scale, so
/// ballot iteration order never changes a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteArithmetic {
    scale: u32,
}

impl VoteArithmetic {
    pub fn new(scale: u32) -> VoteArithmetic {
        VoteArithmetic { scale }
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Exact addition.
    pub fn add(&self, a: FixedWeight, b: FixedWeight) -> TabResult<FixedWeight> {
        a.0.checked_add(b.0)
            .map(FixedWeight)
            .context(ArithmeticOutOfRangeSnafu { scale: self.scale })
    }

    /// Exact subtraction. The result must be non-negative.
    pub fn sub(&self, a: FixedWeight, b: FixedWeight) -> TabResult<FixedWeight> {
        a.0.checked_sub(b.0)
            .filter(|d| !d.is_sign_negative())
            .map(FixedWeight)
            .context(ArithmeticOutOfRangeSnafu { scale: self.scale })
    }

    /// Multiplication truncated toward zero at the configured scale.
    pub fn mul(&self, a: FixedWeight, b: FixedWeight) -> TabResult<FixedWeight> {
        a.0.checked_mul(b.0)
            .map(|d| FixedWeight(d.trunc_with_scale(self.scale)))
            .context(ArithmeticOutOfRangeSnafu { scale: self.scale })
    }

    /// Division truncated toward zero at the configured scale.
    pub fn div(&self, a: FixedWeight, b: FixedWeight) -> TabResult<FixedWeight> {
        a.0.checked_div(b.0)
            .map(|d| FixedWeight(d.trunc_with_scale(self.scale)))
            .context(ArithmeticOutOfRangeSnafu { scale: self.scale })
    }

    /// Largest integer value not above `a`.
    pub fn floor(&self, a: FixedWeight) -> FixedWeight {
        FixedWeight(a.0.floor())
    }

    /// Exact sum of a sequence of weights.
    pub fn sum<I: IntoIterator<Item = FixedWeight>>(&self, weights: I) -> TabResult<FixedWeight> {
        let mut acc = FixedWeight::ZERO;
        for w in weights {
            acc = self.add(acc, w)?;
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(s: &str) -> FixedWeight {
        s.parse().unwrap()
    }

    #[test]
    fn division_truncates_at_scale() {
        let arith = VoteArithmetic::new(4);
        let f = arith.div(FixedWeight::from_count(2), FixedWeight::from_count(6)).unwrap();
        assert_eq!(f, w("0.3333"));
        assert_eq!(f.to_string(), "0.3333");
    }

    #[test]
    fn multiplication_truncates_at_scale() {
        let arith = VoteArithmetic::new(4);
        let f = arith.mul(w("0.0001"), w("0.0001")).unwrap();
        assert!(f.is_zero());
        let g = arith.mul(FixedWeight::from_count(6), w("0.3333")).unwrap();
        assert_eq!(g, w("1.9998"));
    }

    #[test]
    fn majority_threshold_math() {
        let arith = VoteArithmetic::new(4);
        let half = arith.div(FixedWeight::from_count(7), FixedWeight::from_count(2)).unwrap();
        let t = arith.add(arith.floor(half), FixedWeight::ONE).unwrap();
        assert_eq!(t, FixedWeight::from_count(4));
    }

    #[test]
    fn sums_are_order_independent() {
        let arith = VoteArithmetic::new(2);
        let values = vec![w("0.01"), w("3"), w("1.99"), w("0.33")];
        let forward = arith.sum(values.iter().copied()).unwrap();
        let backward = arith.sum(values.iter().rev().copied()).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward, w("5.33"));
    }

    #[test]
    fn subtraction_rejects_negative_results() {
        let arith = VoteArithmetic::new(4);
        assert!(arith.sub(w("1"), w("2")).is_err());
        assert_eq!(arith.sub(w("2"), w("2")).unwrap(), FixedWeight::ZERO);
    }

    #[test]
    fn value_equality_ignores_trailing_zeros() {
        assert_eq!(w("1.00"), w("1"));
        assert!(w("0.3333") < w("0.34"));
    }
}
