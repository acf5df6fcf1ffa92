/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::sort::copy_row;
use super::{
    add_check_predicate, copy_order, AdoptArgument, Candidate, CandidateBase, CandidateKind,
    TableVariant,
};
use crate::cost::{Cost, CostConstants};
use crate::environment::{CandidateId, Environment, ScalarId};
use crate::error::PlanResult;
use crate::row::Row;
use crate::scalar;
use log::debug;
use shared::catalog::Distribution;
use shared::config::TraceTopic;
use shared::program::{Action, CollectionKind, IteratorId, Program, Target};

#[derive(Debug, Clone)]
pub struct DistinctCandidate {
    pub operand: CandidateId,
    pub keys: Vec<ScalarId>,
    /// Duplicates arrive next to each other, only the last key is kept
    pub sorted: bool,
}

impl DistinctCandidate {
    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let iterator = super::adopt(env, program, self.operand, &argument.for_operand())?;
        let bound = if self.sorted { Some(1) } else { None };
        let collection = program.add_collection(CollectionKind::Distinct, bound);
        let key = scalar::array_variable(env, program, iterator, &self.keys)?;
        program.add_action(iterator, Target::Execution, Action::Distinct { collection, key });
        add_check_predicate(env, program, iterator, base.predicate)?;
        Ok(iterator)
    }
}

/// Whether the operand never produces two tuples with the same keys
pub fn is_unique(
    env: &Environment<'_>,
    operand: CandidateId,
    keys: &[ScalarId],
) -> PlanResult<bool> {
    let candidate = env.candidate(operand)?;
    if candidate.base.distribution == Distribution::Replicated {
        return Ok(true);
    }
    Ok(match &candidate.kind {
        // without keys there is a single group
        CandidateKind::Grouping(grouping) => grouping.keys.iter().all(|key| keys.contains(key)),
        CandidateKind::Distinct(distinct) => distinct.keys.iter().all(|key| keys.contains(key)),
        CandidateKind::Table(table) => match &table.variant {
            TableVariant::Retrieve(retrieve) => {
                retrieve.row_id.map_or(false, |row_id| keys.contains(&row_id))
            }
            _ => false,
        },
        CandidateKind::Sort(sort) => is_unique(env, sort.operand, keys)?,
        CandidateKind::Filter(filter) => is_unique(env, filter.operand, keys)?,
        CandidateKind::Limit(limit) => is_unique(env, limit.operand, keys)?,
        _ => false,
    })
}

/// Cost of removing duplicates from what the operand produces
pub fn distinct_cost(operand: &Cost, sorted: bool) -> Cost {
    let mut cost = Cost::new();
    cost.assign_from(operand);
    cost.set_is_set_count();
    if operand.is_set_rate() {
        cost.set_is_set_rate();
    }
    let process = cost.tuple_count().max(crate::cost::CostValue::ONE)
        * CostConstants::COLLECTION_PROCESS_COST;
    cost.set_total_cost(cost.total_cost() + process);
    if !sorted {
        cost.set_overhead(cost.overhead() + CostConstants::COLLECTION_OVERHEAD);
        cost.add_distinct_cost();
    }
    cost
}

/// Wraps an operand in a duplicate removal on `keys`
pub fn create(
    env: &mut Environment<'_>,
    operand: CandidateId,
    keys: Vec<ScalarId>,
    sorted: bool,
) -> PlanResult<CandidateId> {
    let operand_base = env.candidate(operand)?.base.clone();
    let cost = distinct_cost(&operand_base.cost, sorted);
    if env.traced(TraceTopic::Cost) {
        debug!(
            "{} distinct on {} keys over {}: {}",
            if sorted { "sorted" } else { "hashed" },
            keys.len(),
            env.candidate(operand)?.name(),
            cost
        );
    }
    let key = env.add_row(Row::from_scalars(keys.iter().copied()));
    let base = CandidateBase {
        cost,
        order: copy_order(env, operand_base.order)?,
        row: copy_row(env, operand_base.row)?,
        key: Some(key),
        unchecked: operand_base.unchecked.clone(),
        instances: operand_base.instances.clone(),
        distribution: operand_base.distribution,
        ..CandidateBase::default()
    };
    Ok(env.register_candidate(Candidate::new(
        base,
        CandidateKind::Distinct(DistinctCandidate {
            operand,
            keys,
            sorted,
        }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_cost() -> Cost {
        let mut cost = Cost::new();
        cost.set_overhead(1.0);
        cost.set_total_cost(100.0);
        cost.set_tuple_count(100.0);
        cost.set_tuple_size(8.0);
        cost.set_limit_count(10.0);
        cost.set_is_set_count();
        cost
    }

    #[test]
    fn test_hashed_distinct_reads_more_for_a_limit() {
        let operand = create_test_cost();
        let hashed = distinct_cost(&operand, false);
        let sorted = distinct_cost(&operand, true);
        assert_eq!(hashed.limit_count(), 1000.0);
        assert_eq!(sorted.limit_count(), 10.0);
        assert_eq!(hashed.overhead(), 2.0);
        assert!(sorted < hashed);
    }
}
