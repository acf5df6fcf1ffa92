/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Cost model.
//!
//! A [`Cost`] aggregates several [`CostValue`] dimensions. Candidates compare
//! through [`Cost::calculate_value`], which folds the dimensions into one
//! number: overhead plus the cost of producing every result tuple.

pub mod estimator;
pub mod value;

pub use estimator::{CostConstants, CostEstimator};
pub use value::CostValue;

use serde::Serialize;
use shared::config::PlannerConfig;
use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Serialize)]
pub struct Cost {
    overhead: CostValue,
    startup: CostValue,
    total_cost: CostValue,
    tuple_count: CostValue,
    tuple_size: CostValue,
    retrieve_cost: CostValue,
    limit_count: CostValue,
    rate: CostValue,
    table_count: CostValue,
    is_fetch: bool,
    #[serde(skip)]
    is_set_rate: bool,
    #[serde(skip)]
    is_set_count: bool,
}

impl Default for Cost {
    fn default() -> Self {
        Self::new()
    }
}

impl Cost {
    pub fn new() -> Self {
        Self {
            overhead: CostValue::INFINITY,
            startup: CostValue::ZERO,
            total_cost: CostValue::INFINITY,
            tuple_count: CostValue::INFINITY,
            tuple_size: CostValue::INFINITY,
            retrieve_cost: CostValue::ZERO,
            limit_count: CostValue::INFINITY,
            rate: CostValue::INFINITY,
            table_count: CostValue::INFINITY,
            is_fetch: false,
            is_set_rate: false,
            is_set_count: false,
        }
    }

    /// Zero cost for pass-through candidates
    pub fn reset(&mut self) {
        self.overhead = CostValue::ZERO;
        self.startup = CostValue::ZERO;
        self.total_cost = CostValue::ZERO;
        self.tuple_count = CostValue::ZERO;
        self.tuple_size = CostValue::ZERO;
        self.retrieve_cost = CostValue::ZERO;
        self.limit_count = CostValue::INFINITY;
        self.rate = CostValue::INFINITY;
        self.table_count = CostValue::INFINITY;
        self.is_fetch = false;
    }

    /// Copies every dimension; the set-rate and set-count flags stay as they are
    pub fn assign_from(&mut self, other: &Cost) {
        self.overhead = other.overhead;
        self.startup = other.startup;
        self.total_cost = other.total_cost;
        self.tuple_count = other.tuple_count;
        self.tuple_size = other.tuple_size;
        self.retrieve_cost = other.retrieve_cost;
        self.limit_count = other.limit_count;
        self.rate = other.rate;
        self.table_count = other.table_count;
        self.is_fetch = other.is_fetch;
    }

    pub fn is_infinity(&self) -> bool {
        self.calculate_value().is_infinity()
    }

    pub fn overhead(&self) -> CostValue {
        self.overhead
    }
    pub fn startup(&self) -> CostValue {
        self.startup
    }
    pub fn total_cost(&self) -> CostValue {
        self.total_cost
    }
    pub fn tuple_count(&self) -> CostValue {
        self.tuple_count
    }
    pub fn tuple_size(&self) -> CostValue {
        self.tuple_size
    }
    pub fn retrieve_cost(&self) -> CostValue {
        self.retrieve_cost
    }
    pub fn limit_count(&self) -> CostValue {
        self.limit_count
    }
    pub fn rate(&self) -> CostValue {
        self.rate
    }
    pub fn table_count(&self) -> CostValue {
        self.table_count
    }
    pub fn is_fetch(&self) -> bool {
        self.is_fetch
    }
    pub fn is_set_rate(&self) -> bool {
        self.is_set_rate
    }
    pub fn is_set_count(&self) -> bool {
        self.is_set_count
    }

    pub fn set_overhead(&mut self, value: impl Into<CostValue>) {
        self.overhead = value.into();
    }
    pub fn set_startup(&mut self, value: impl Into<CostValue>) {
        self.startup = value.into();
    }
    pub fn set_total_cost(&mut self, value: impl Into<CostValue>) {
        self.total_cost = value.into();
    }
    pub fn set_tuple_count(&mut self, value: impl Into<CostValue>) {
        self.tuple_count = value.into();
    }
    pub fn set_tuple_size(&mut self, value: impl Into<CostValue>) {
        self.tuple_size = value.into();
    }
    pub fn set_retrieve_cost(&mut self, value: impl Into<CostValue>) {
        self.retrieve_cost = value.into();
    }
    pub fn set_rate(&mut self, value: impl Into<CostValue>) {
        self.rate = value.into();
    }
    pub fn set_table_count(&mut self, value: impl Into<CostValue>) {
        self.table_count = value.into();
    }
    pub fn set_is_fetch(&mut self, value: bool) {
        self.is_fetch = value;
    }
    pub fn set_is_set_rate(&mut self) {
        self.is_set_rate = true;
    }
    pub fn set_is_set_count(&mut self) {
        self.is_set_count = true;
    }

    pub fn add_startup(&mut self, value: impl Into<CostValue>) {
        self.startup += value.into();
    }

    pub fn add_retrieve_cost(&mut self, value: impl Into<CostValue>) {
        self.retrieve_cost += value.into();
    }

    /// Number of tuples needed to obtain `count` results.
    ///
    /// With a known selectivity the limit is scaled up by the rate.
    pub fn set_limit_count(&mut self, count: impl Into<CostValue>) {
        let count = count.into();
        self.limit_count = if !self.rate.is_infinity() && self.rate.is_positive() {
            count / self.rate
        } else {
            count
        };
    }

    pub fn clear_limit_count(&mut self) {
        self.limit_count = CostValue::INFINITY;
    }

    /// Cost of processing one tuple
    pub fn process_cost(&self) -> CostValue {
        if self.tuple_count.is_positive() {
            self.total_cost / self.tuple_count
        } else {
            self.total_cost
        }
    }

    pub fn result_count(&self) -> CostValue {
        self.limit_count.min(self.tuple_count)
    }

    /// Cost of one full evaluation, excluding the overhead
    pub fn repeat_cost(&self) -> CostValue {
        let per_tuple = self.process_cost() + self.retrieve_cost;
        let count = self.result_count();
        if self.is_set_count && count.is_positive() {
            self.startup + per_tuple * count
        } else {
            self.startup + per_tuple
        }
    }

    /// The single comparable total
    pub fn calculate_value(&self) -> CostValue {
        self.overhead + self.repeat_cost()
    }

    /// Adds the cost of sorting the tuples this cost produces
    pub fn add_sorting_cost(&mut self, config: &PlannerConfig) {
        let count = self.tuple_count.min(self.limit_count);
        let per_tuple = self.process_cost() + self.retrieve_cost;
        self.startup += per_tuple * count;

        let size = if self.tuple_size.is_infinity() {
            CostValue::new(CostConstants::DEFAULT_TUPLE_SIZE)
        } else {
            self.tuple_size
        };
        let speed = if (count * size).get() > config.collection_threshold {
            config.file_transfer_speed
        } else {
            config.memory_transfer_speed
        };
        let read_cost = size / speed;
        self.startup += read_cost * count * count.log();
        // sorted tuples are read back from the collection
        self.total_cost = read_cost * self.tuple_count.max(CostValue::ONE);
        self.retrieve_cost = read_cost;
    }

    /// Deduplication can drop tuples, so more of them are read to fill a limit
    pub fn add_distinct_cost(&mut self) {
        self.limit_count *= CostConstants::DISTINCT_LIMIT_FACTOR;
    }
}

impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cost {}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cost {
    fn cmp(&self, other: &Self) -> Ordering {
        self.calculate_value()
            .compare(&other.calculate_value())
            .then_with(|| self.tuple_count.compare(&other.tuple_count))
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[value:{} overhead:{} startup:{} total:{} tuple:{} size:{} retrieve:{} limit:{} rate:{} table:{}{}]",
            self.calculate_value(),
            self.overhead,
            self.startup,
            self.total_cost,
            self.tuple_count,
            self.tuple_size,
            self.retrieve_cost,
            self.limit_count,
            self.rate,
            self.table_count,
            if self.is_fetch { " fetch" } else { "" }
        )
    }
}

impl fmt::Debug for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
