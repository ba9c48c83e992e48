//! Exact rational time.
//!
//! Frame times in an editor are ratios of the timebase (1001/30000 s and
//! friends), so floating point would drift when ranges are merged or shifted.
//! `Rational` is always stored reduced with a positive denominator; the one
//! exception is [`Rational::INFINITY`] (`1/0`), used as the open end of an
//! unbounded [`TimeRange`](crate::core::time_range::TimeRange).
//!
//! Ordering uses `i128` cross-multiplication, which also orders `INFINITY`
//! above every finite value without special cases.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(i64, i64)", into = "(i64, i64)")]
pub struct Rational {
    num: i64,
    den: i64,
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, den: 1 };
    pub const ONE: Rational = Rational { num: 1, den: 1 };
    /// Positive infinity. There is no negative counterpart.
    pub const INFINITY: Rational = Rational { num: 1, den: 0 };

    /// Build a reduced rational. A zero denominator yields `INFINITY`.
    pub fn new(num: i64, den: i64) -> Self {
        Self::reduce(num as i128, den as i128)
    }

    pub fn from_int(value: i64) -> Self {
        Self { num: value, den: 1 }
    }

    /// Approximate a float with a fixed denominator (used for CLI input only).
    pub fn from_f64(value: f64) -> Self {
        const DEN: i64 = 1_000_000;
        Self::new((value * DEN as f64).round() as i64, DEN)
    }

    pub fn num(&self) -> i64 {
        self.num
    }

    pub fn den(&self) -> i64 {
        self.den
    }

    pub fn is_infinite(&self) -> bool {
        self.den == 0
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    pub fn to_f64(&self) -> f64 {
        if self.is_infinite() {
            f64::INFINITY
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// Largest integer not greater than this value (`i64::MAX` for infinity).
    pub fn floor(&self) -> i64 {
        if self.is_infinite() {
            i64::MAX
        } else {
            self.num.div_euclid(self.den)
        }
    }

    pub fn min(self, other: Self) -> Self {
        if self <= other { self } else { other }
    }

    pub fn max(self, other: Self) -> Self {
        if self >= other { self } else { other }
    }

    fn reduce(num: i128, den: i128) -> Self {
        if den == 0 {
            return Self::INFINITY;
        }
        if num == 0 {
            return Self::ZERO;
        }
        let sign = if den < 0 { -1 } else { 1 };
        let g = gcd(num.abs(), den.abs());
        let num = sign * num / g;
        let den = sign * den / g;
        Self {
            num: num.clamp(i64::MIN as i128, i64::MAX as i128) as i64,
            den: den.min(i64::MAX as i128) as i64,
        }
    }
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

impl Default for Rational {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<(i64, i64)> for Rational {
    fn from((num, den): (i64, i64)) -> Self {
        Self::new(num, den)
    }
}

impl From<Rational> for (i64, i64) {
    fn from(r: Rational) -> Self {
        (r.num, r.den)
    }
}

impl From<i64> for Rational {
    fn from(value: i64) -> Self {
        Self::from_int(value)
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as i128 * other.den as i128;
        let rhs = other.num as i128 * self.den as i128;
        lhs.cmp(&rhs)
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for Rational {
    type Output = Rational;

    fn add(self, rhs: Rational) -> Rational {
        if self.is_infinite() || rhs.is_infinite() {
            return Rational::INFINITY;
        }
        Rational::reduce(
            self.num as i128 * rhs.den as i128 + rhs.num as i128 * self.den as i128,
            self.den as i128 * rhs.den as i128,
        )
    }
}

impl Sub for Rational {
    type Output = Rational;

    /// Infinity absorbs subtraction in both directions.
    fn sub(self, rhs: Rational) -> Rational {
        if self.is_infinite() || rhs.is_infinite() {
            return Rational::INFINITY;
        }
        self + (-rhs)
    }
}

impl Neg for Rational {
    type Output = Rational;

    fn neg(self) -> Rational {
        if self.is_infinite() {
            return self;
        }
        Rational { num: -self.num, den: self.den }
    }
}

impl Mul for Rational {
    type Output = Rational;

    fn mul(self, rhs: Rational) -> Rational {
        if self.is_infinite() || rhs.is_infinite() {
            return Rational::INFINITY;
        }
        Rational::reduce(self.num as i128 * rhs.num as i128, self.den as i128 * rhs.den as i128)
    }
}

impl Div for Rational {
    type Output = Rational;

    fn div(self, rhs: Rational) -> Rational {
        if self.is_infinite() || rhs.is_zero() {
            return Rational::INFINITY;
        }
        if rhs.is_infinite() {
            return Rational::ZERO;
        }
        Rational::reduce(self.num as i128 * rhs.den as i128, self.den as i128 * rhs.num as i128)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf")
        } else if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Convert an integer timestamp in `timebase` units to a time.
pub fn timestamp_to_time(timestamp: i64, timebase: Rational) -> Rational {
    Rational::from_int(timestamp) * timebase
}

/// Convert a time to the timestamp of the frame containing it.
pub fn time_to_timestamp(time: Rational, timebase: Rational) -> i64 {
    (time / timebase).floor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduction_and_sign() {
        let r = Rational::new(6, -8);
        assert_eq!(r.num(), -3);
        assert_eq!(r.den(), 4);
        assert_eq!(Rational::new(0, 5), Rational::ZERO);
    }

    #[test]
    fn test_ordering_with_infinity() {
        assert!(Rational::new(1, 3) < Rational::new(1, 2));
        assert!(Rational::from_int(i64::MAX / 2) < Rational::INFINITY);
        assert_eq!(Rational::INFINITY.cmp(&Rational::INFINITY), Ordering::Equal);
    }

    #[test]
    fn test_arithmetic() {
        let a = Rational::new(1, 24);
        let b = Rational::new(1, 25);
        assert_eq!(a + b, Rational::new(49, 600));
        assert_eq!(a - a, Rational::ZERO);
        assert_eq!(a * Rational::from_int(24), Rational::ONE);
        assert_eq!(Rational::ONE / a, Rational::from_int(24));
        assert!((Rational::INFINITY + a).is_infinite());
    }

    #[test]
    fn test_timestamp_conversion() {
        let tb = Rational::new(1001, 30000);
        let t = timestamp_to_time(300, tb);
        assert_eq!(time_to_timestamp(t, tb), 300);
        assert_eq!(time_to_timestamp(Rational::new(-1, 2), Rational::ONE), -1);
        assert_eq!(time_to_timestamp(Rational::INFINITY, tb), i64::MAX);
    }
}
