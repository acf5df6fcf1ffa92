/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Top-down planning context.
//!
//! A [`PlanSource`] is handed from a relation node to its operands. Each
//! operand gets its own copy: erasing the limit or adding a predicate for one
//! operand never changes what the caller or a sibling sees.

use crate::cost::CostValue;
use crate::environment::{CandidateId, Environment, InstanceSet, OrderId, PredicateId, ScalarId};
use crate::error::PlanResult;
use crate::limit::Limit;
use crate::predicate;
use shared::config::PlannerConfig;

#[derive(Debug, Clone)]
pub struct PlanSource {
    preceding: Vec<CandidateId>,
    predicate: Option<PredicateId>,
    order: Option<OrderId>,
    limit: Limit,
    estimate_limit: CostValue,
    join_max_candidates: Option<u32>,
    is_simple: bool,
    is_exists: bool,
    is_top: bool,
    check_partial: bool,
    is_grouping: bool,
    distinct_keys: Vec<ScalarId>,
}

impl PlanSource {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            preceding: Vec::new(),
            predicate: None,
            order: None,
            limit: Limit::default(),
            estimate_limit: CostValue::INFINITY,
            join_max_candidates: config.join_budget(),
            is_simple: false,
            is_exists: false,
            is_top: false,
            check_partial: false,
            is_grouping: false,
            distinct_keys: Vec::new(),
        }
    }

    /// Source of the query root
    pub fn top(config: &PlannerConfig) -> Self {
        let mut source = Self::new(config);
        source.is_top = true;
        source
    }

    // ----- predicate -----

    pub fn predicate(&self) -> Option<PredicateId> {
        self.predicate
    }

    /// AND-combines the predicate with the one already required
    pub fn add_predicate(
        &mut self,
        env: &mut Environment<'_>,
        added: PredicateId,
    ) -> PlanResult<()> {
        self.predicate = predicate::merge(env, self.predicate, Some(added))?;
        Ok(())
    }

    pub fn erase_predicate(&mut self) {
        self.predicate = None;
    }

    // ----- preceding candidates -----

    pub fn preceding(&self) -> &[CandidateId] {
        &self.preceding
    }

    pub fn add_preceding_candidate(&mut self, candidate: CandidateId) {
        if !self.preceding.contains(&candidate) {
            self.preceding.push(candidate);
        }
    }

    /// Tables whose values are bound by the preceding candidates
    pub fn preceding_instances(&self, env: &Environment<'_>) -> PlanResult<InstanceSet> {
        let mut instances = InstanceSet::default();
        for candidate in &self.preceding {
            instances.extend(env.candidate(*candidate)?.base.instances.iter().copied());
        }
        Ok(instances)
    }

    /// How many times a candidate planned under this source is evaluated
    pub fn repeat_count(&self, env: &Environment<'_>) -> PlanResult<CostValue> {
        let mut count = CostValue::ONE;
        for candidate in &self.preceding {
            count *= env.candidate(*candidate)?.base.cost.tuple_count();
        }
        Ok(count)
    }

    // ----- order -----

    pub fn order(&self) -> Option<OrderId> {
        self.order
    }

    pub fn set_order(&mut self, order: OrderId) {
        self.order = Some(order);
    }

    pub fn erase_order(&mut self) {
        self.order = None;
    }

    // ----- limit -----

    pub fn limit(&self) -> Limit {
        self.limit
    }

    pub fn set_limit(&mut self, limit: Limit) {
        self.limit = limit;
    }

    /// Derives the estimated row count from the limit
    pub fn estimate_limit(&mut self, config: &PlannerConfig) {
        self.estimate_limit = self.limit.estimate_count(config);
    }

    pub fn get_estimate_limit(&self) -> CostValue {
        self.estimate_limit
    }

    pub fn set_estimate_limit(&mut self, value: CostValue) {
        self.estimate_limit = value;
    }

    pub fn erase_limit(&mut self) {
        self.limit = Limit::default();
        self.estimate_limit = CostValue::INFINITY;
    }

    pub fn erase_estimate_limit(&mut self) {
        self.estimate_limit = CostValue::INFINITY;
    }

    // ----- join search budget -----

    /// Consumes one join-order candidate; true once the budget is exhausted
    pub fn check_join_max_candidates(&mut self) -> bool {
        match self.join_max_candidates.as_mut() {
            None => false,
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
        }
    }

    pub fn join_max_candidates(&self) -> Option<u32> {
        self.join_max_candidates
    }

    pub fn is_join_budget_exhausted(&self) -> bool {
        self.join_max_candidates == Some(0)
    }

    // ----- flags -----

    pub fn is_simple(&self) -> bool {
        self.is_simple
    }

    pub fn set_simple(&mut self, value: bool) {
        self.is_simple = value;
    }

    pub fn is_exists(&self) -> bool {
        self.is_exists
    }

    pub fn set_exists(&mut self, value: bool) {
        self.is_exists = value;
    }

    pub fn is_top(&self) -> bool {
        self.is_top
    }

    pub fn set_top(&mut self, value: bool) {
        self.is_top = value;
    }

    pub fn check_partial(&self) -> bool {
        self.check_partial
    }

    pub fn set_check_partial(&mut self, value: bool) {
        self.check_partial = value;
    }

    pub fn is_grouping(&self) -> bool {
        self.is_grouping
    }

    pub fn set_grouping(&mut self, value: bool) {
        self.is_grouping = value;
    }

    pub fn distinct_keys(&self) -> &[ScalarId] {
        &self.distinct_keys
    }

    pub fn set_distinct_keys(&mut self, keys: Vec<ScalarId>) {
        self.distinct_keys = keys;
    }

    /// Copy handed to an operand: the operand is never the query root
    pub fn for_operand(&self) -> Self {
        let mut source = self.clone();
        source.is_top = false;
        source
    }
}
