/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::cost::CostValue;
use serde::Serialize;
use shared::config::PlannerConfig;
use std::fmt;

/// A LIMIT or OFFSET operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LimitValue {
    Literal(u64),
    /// `?` placeholder, bound at execution time
    Parameter(usize),
}

impl LimitValue {
    fn estimate(&self, config: &PlannerConfig) -> f64 {
        match self {
            LimitValue::Literal(value) => *value as f64,
            LimitValue::Parameter(_) => config.limit_parameter_estimate,
        }
    }

    pub fn literal(&self) -> Option<u64> {
        match self {
            LimitValue::Literal(value) => Some(*value),
            LimitValue::Parameter(_) => None,
        }
    }
}

impl fmt::Display for LimitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitValue::Literal(value) => write!(f, "{}", value),
            LimitValue::Parameter(_) => write!(f, "?"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Limit {
    pub count: Option<LimitValue>,
    pub offset: Option<LimitValue>,
}

impl Limit {
    pub fn new(count: u64) -> Self {
        Self {
            count: Some(LimitValue::Literal(count)),
            offset: None,
        }
    }

    pub fn with_offset(count: u64, offset: u64) -> Self {
        Self {
            count: Some(LimitValue::Literal(count)),
            offset: Some(LimitValue::Literal(offset)),
        }
    }

    pub fn parameter(position: usize) -> Self {
        Self {
            count: Some(LimitValue::Parameter(position)),
            offset: None,
        }
    }

    pub fn is_specified(&self) -> bool {
        self.count.is_some()
    }

    /// Tuples the operand has to deliver, offset included
    pub fn estimate_count(&self, config: &PlannerConfig) -> CostValue {
        match self.count {
            Some(count) => {
                let offset = self.offset.map_or(0.0, |offset| offset.estimate(config));
                CostValue::new(count.estimate(config) + offset)
            }
            None => CostValue::INFINITY,
        }
    }

    /// Upper bound on the tuples to keep, when it is known before execution.
    /// A bound past `u64::MAX` is no bound at all.
    pub fn bound(&self) -> Option<u64> {
        let count = self.count?.literal()?;
        let offset = match self.offset {
            Some(offset) => offset.literal()?,
            None => 0,
        };
        count.checked_add(offset)
    }

    /// Limit every cascade has to apply so that the merged result can still
    /// honor the offset.
    pub fn pushed(&self) -> Limit {
        match (self.count, self.offset) {
            (Some(LimitValue::Literal(count)), Some(LimitValue::Literal(offset))) => count
                .checked_add(offset)
                .map_or_else(Limit::default, Limit::new),
            (Some(count), None) => Limit {
                count: Some(count),
                offset: None,
            },
            _ => Limit::default(),
        }
    }

    pub fn to_sql(&self) -> String {
        match (self.count, self.offset) {
            (Some(count), Some(offset)) => format!(" limit {} offset {}", count, offset),
            (Some(count), None) => format!(" limit {}", count),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_count() {
        let config = PlannerConfig::default();
        assert!(Limit::default().estimate_count(&config).is_infinity());
        assert_eq!(Limit::new(10).estimate_count(&config), 10.0);
        assert_eq!(Limit::with_offset(10, 5).estimate_count(&config), 15.0);
        assert_eq!(
            Limit::parameter(1).estimate_count(&config),
            config.limit_parameter_estimate
        );
    }

    #[test]
    fn test_sql_text() {
        assert_eq!(Limit::new(3).to_sql(), " limit 3");
        assert_eq!(Limit::with_offset(3, 2).to_sql(), " limit 3 offset 2");
        assert_eq!(Limit::default().to_sql(), "");
    }

    #[test]
    fn test_pushed_limit_includes_offset() {
        assert_eq!(Limit::with_offset(3, 2).pushed(), Limit::new(5));
        assert_eq!(Limit::parameter(1).pushed(), Limit::parameter(1));
        assert!(!Limit::default().pushed().is_specified());
    }

    #[test]
    fn test_overflowing_bound_is_unbounded() {
        let limit = Limit::with_offset(u64::MAX, 1);
        assert_eq!(limit.bound(), None);
        assert!(!limit.pushed().is_specified());
        assert_eq!(Limit::with_offset(u64::MAX - 1, 1).bound(), Some(u64::MAX));
    }
}
