/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub, SubAssign};

/// Divisors below this magnitude are treated as zero
const EPSILON: f64 = 1e-12;

/// A non-negative cost dimension that may be unbounded.
///
/// The default value is infinity, meaning "not estimated yet".
#[derive(Clone, Copy)]
pub struct CostValue {
    value: f64,
    infinity: bool,
}

impl CostValue {
    pub const INFINITY: CostValue = CostValue {
        value: 0.0,
        infinity: true,
    };
    pub const ZERO: CostValue = CostValue {
        value: 0.0,
        infinity: false,
    };
    pub const ONE: CostValue = CostValue {
        value: 1.0,
        infinity: false,
    };

    /// Negative input is clamped to zero, non-finite input becomes infinity
    pub fn new(value: f64) -> Self {
        if !value.is_finite() {
            Self::INFINITY
        } else {
            Self {
                value: value.max(0.0),
                infinity: false,
            }
        }
    }

    pub fn is_infinity(&self) -> bool {
        self.infinity
    }

    pub fn is_zero(&self) -> bool {
        !self.infinity && self.value < EPSILON
    }

    /// Finite and strictly positive
    pub fn is_positive(&self) -> bool {
        !self.infinity && self.value >= EPSILON
    }

    /// Magnitude as a float, `f64::INFINITY` when unbounded
    pub fn get(&self) -> f64 {
        if self.infinity {
            f64::INFINITY
        } else {
            self.value
        }
    }

    /// `ln(v + 1)`, infinite stays infinite
    pub fn log(&self) -> Self {
        if self.infinity {
            Self::INFINITY
        } else {
            Self::new((self.value + 1.0).ln())
        }
    }

    pub fn min(self, other: Self) -> Self {
        if self <= other {
            self
        } else {
            other
        }
    }

    pub fn max(self, other: Self) -> Self {
        if self >= other {
            self
        } else {
            other
        }
    }

    /// Total order where two infinities are equal
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self.infinity, other.infinity) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.value.total_cmp(&other.value),
        }
    }
}

impl Default for CostValue {
    fn default() -> Self {
        Self::INFINITY
    }
}

impl From<f64> for CostValue {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl PartialEq for CostValue {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for CostValue {}

impl PartialOrd for CostValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for CostValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialEq<f64> for CostValue {
    fn eq(&self, other: &f64) -> bool {
        *self == CostValue::new(*other)
    }
}

impl PartialOrd<f64> for CostValue {
    fn partial_cmp(&self, other: &f64) -> Option<Ordering> {
        Some(self.compare(&CostValue::new(*other)))
    }
}

impl Add for CostValue {
    type Output = CostValue;
    fn add(self, rhs: Self) -> Self {
        if self.infinity || rhs.infinity {
            Self::INFINITY
        } else {
            Self::new(self.value + rhs.value)
        }
    }
}

impl Sub for CostValue {
    type Output = CostValue;
    fn sub(self, rhs: Self) -> Self {
        match (self.infinity, rhs.infinity) {
            (true, _) => Self::INFINITY,
            (false, true) => Self::ZERO,
            (false, false) => Self::new(self.value - rhs.value),
        }
    }
}

impl Mul for CostValue {
    type Output = CostValue;
    fn mul(self, rhs: Self) -> Self {
        // zero annihilates finite factors only
        if self.infinity || rhs.infinity {
            Self::INFINITY
        } else {
            Self::new(self.value * rhs.value)
        }
    }
}

impl Div for CostValue {
    type Output = CostValue;
    fn div(self, rhs: Self) -> Self {
        if self.infinity {
            return Self::INFINITY;
        }
        if self.is_zero() && !rhs.infinity {
            return Self::ZERO;
        }
        if rhs.infinity || rhs.value < EPSILON {
            return Self::INFINITY;
        }
        Self::new(self.value / rhs.value)
    }
}

macro_rules! scalar_operators {
    ($($trait:ident $method:ident $assign_trait:ident $assign_method:ident),*) => {
        $(
            impl $trait<f64> for CostValue {
                type Output = CostValue;
                fn $method(self, rhs: f64) -> CostValue {
                    $trait::$method(self, CostValue::new(rhs))
                }
            }

            impl $assign_trait for CostValue {
                fn $assign_method(&mut self, rhs: CostValue) {
                    *self = $trait::$method(*self, rhs);
                }
            }

            impl $assign_trait<f64> for CostValue {
                fn $assign_method(&mut self, rhs: f64) {
                    *self = $trait::$method(*self, CostValue::new(rhs));
                }
            }
        )*
    };
}

scalar_operators!(
    Add add AddAssign add_assign,
    Sub sub SubAssign sub_assign,
    Mul mul MulAssign mul_assign,
    Div div DivAssign div_assign
);

impl fmt::Display for CostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.infinity {
            write!(f, "inf")
        } else {
            write!(f, "{:.4}", self.value)
        }
    }
}

impl fmt::Debug for CostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for CostValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.infinity {
            serializer.serialize_none()
        } else {
            serializer.serialize_some(&self.value)
        }
    }
}
