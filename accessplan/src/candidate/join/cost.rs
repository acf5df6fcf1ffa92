/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Cost formulas of nested-loop joins

use crate::cost::{Cost, CostValue};

#[derive(Debug, Clone, Copy)]
pub struct JoinRates {
    /// Estimate of the whole join predicate
    pub join: CostValue,
    /// Conjuncts the join checks itself
    pub residual: CostValue,
}

fn is_usable(rate: CostValue) -> bool {
    !rate.is_infinity() && rate.is_positive()
}

/// `total = total0 + repeat_cost1 * t0 * repeat`, where `repeat` undoes the
/// selectivity an inner scan already folded into its tuple count.
pub fn nested_loop(
    outer: &Cost,
    inner: &Cost,
    rates: JoinRates,
    is_outer_join: bool,
    estimate_limit: CostValue,
    order_ok: bool,
) -> Cost {
    let t0 = outer.tuple_count();
    let t1 = inner.tuple_count();
    let mut tuple = if is_outer_join {
        t0 * t1.max(CostValue::ONE)
    } else {
        t0 * t1
    };
    if is_usable(rates.residual) {
        tuple *= rates.residual;
    }
    let repeat = if !inner.is_fetch() && is_usable(inner.rate()) {
        CostValue::ONE / inner.rate()
    } else {
        CostValue::ONE
    };

    let mut cost = Cost::new();
    cost.set_overhead(outer.overhead() + inner.overhead());
    cost.set_startup(outer.startup());
    cost.set_total_cost(outer.total_cost() + inner.repeat_cost() * t0.max(CostValue::ONE) * repeat);
    cost.set_tuple_count(tuple);
    cost.set_tuple_size(outer.tuple_size() + inner.tuple_size());
    cost.set_retrieve_cost(outer.retrieve_cost());
    cost.set_table_count(outer.table_count());
    let rate = if is_usable(rates.join) {
        rates.join
    } else {
        CostValue::ONE
    };
    if inner.is_fetch() && order_ok && !estimate_limit.is_infinity() {
        cost.set_limit_count(estimate_limit);
    }
    cost.set_rate(rate);
    cost.set_is_set_rate();
    cost.set_is_fetch(outer.is_fetch());
    cost.set_is_set_count();
    cost
}

/// Semi-join: an inner fetch stops at its first match
pub fn exists(
    outer: &Cost,
    inner: &Cost,
    rates: JoinRates,
    estimate_limit: CostValue,
    order_ok: bool,
) -> Cost {
    let mut probe = inner.clone();
    if probe.is_fetch() {
        let rate = probe.rate();
        probe.set_rate(CostValue::INFINITY);
        probe.set_limit_count(1.0);
        probe.set_rate(rate);
    }
    let mut cost = nested_loop(outer, &probe, rates, false, estimate_limit, order_ok);

    let mut tuple = outer.tuple_count();
    if is_usable(outer.rate()) {
        tuple *= outer.rate();
    }
    let inner_rate = if is_usable(inner.rate()) {
        inner.rate()
    } else {
        CostValue::ONE
    };
    let matches = inner.tuple_count() * inner_rate;
    if matches < CostValue::ONE {
        tuple *= matches;
    }
    cost.set_tuple_count(tuple);
    cost.set_tuple_size(outer.tuple_size());
    cost
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_cost(overhead: f64, total: f64, tuple: f64, is_fetch: bool) -> Cost {
        let mut cost = Cost::new();
        cost.set_overhead(overhead);
        cost.set_startup(0.0);
        cost.set_total_cost(total);
        cost.set_tuple_count(tuple);
        cost.set_tuple_size(8.0);
        cost.set_retrieve_cost(0.0);
        cost.set_rate(1.0);
        cost.set_is_fetch(is_fetch);
        cost.set_is_set_count();
        cost
    }

    fn no_rates() -> JoinRates {
        JoinRates {
            join: CostValue::ONE,
            residual: CostValue::ONE,
        }
    }

    #[test]
    fn test_inner_runs_once_per_outer_tuple() {
        let outer = create_test_cost(1.0, 100.0, 100.0, false);
        let inner = create_test_cost(2.0, 3.0, 1.0, true);
        let cost = nested_loop(&outer, &inner, no_rates(), false, CostValue::INFINITY, true);
        assert_eq!(cost.overhead(), 3.0);
        assert_eq!(cost.total_cost(), 100.0 + 3.0 * 100.0);
        assert_eq!(cost.tuple_count(), 100.0);
    }

    #[test]
    fn test_inner_scan_rate_is_undone() {
        let outer = create_test_cost(1.0, 10.0, 10.0, false);
        let mut inner = create_test_cost(1.0, 50.0, 50.0, false);
        inner.set_rate(0.5);
        let cost = nested_loop(&outer, &inner, no_rates(), false, CostValue::INFINITY, true);
        assert_eq!(cost.total_cost(), 10.0 + 50.0 * 10.0 * 2.0);
    }

    #[test]
    fn test_outer_join_keeps_unmatched_tuples() {
        let outer = create_test_cost(1.0, 10.0, 10.0, false);
        let inner = create_test_cost(1.0, 1.0, 0.1, true);
        let cost = nested_loop(&outer, &inner, no_rates(), true, CostValue::INFINITY, true);
        assert_eq!(cost.tuple_count(), 10.0);
    }

    #[test]
    fn test_exists_limits_a_fetch_to_one_match() {
        let outer = create_test_cost(1.0, 10.0, 10.0, false);
        let inner = create_test_cost(1.0, 20.0, 20.0, true);
        let joined = nested_loop(&outer, &inner, no_rates(), false, CostValue::INFINITY, true);
        let semi = exists(&outer, &inner, no_rates(), CostValue::INFINITY, true);
        assert!(semi.total_cost() < joined.total_cost());
        assert_eq!(semi.tuple_count(), 10.0);
    }
}
