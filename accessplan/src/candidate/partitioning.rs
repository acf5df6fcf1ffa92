/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! PARTITION BY with a per-partition limit.
//!
//! Partitions are told apart by comparing the partition keys of adjacent
//! tuples, so the input has to arrive ordered by them. There is no file
//! doing this, the partition step is always explicit.

use super::sort::{copy_row, raw_order, sort_iterator, sorted_cost};
use super::{
    add_check_predicate, copy_order, row_scalars, AdoptArgument, Candidate, CandidateBase,
    CandidateKind,
};
use crate::cost::{Cost, CostConstants, CostValue};
use crate::environment::{CandidateId, Environment, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::limit::Limit;
use crate::order::Specification;
use crate::scalar;
use shared::program::{Action, CollectionKind, IteratorId, Program, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMode {
    /// The operand delivers the order, tuples beyond the limit are dropped
    /// while streaming
    Streaming,
    /// The operand is sorted first, the limit applies to the sorted tuples
    AfterSort,
}

#[derive(Debug, Clone)]
pub struct PartitioningCandidate {
    pub operand: CandidateId,
    pub partition_keys: Vec<ScalarId>,
    /// Tuples kept per partition
    pub limit: Limit,
    pub mode: PartitionMode,
}

impl PartitioningCandidate {
    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let mut iterator = super::adopt(env, program, self.operand, &argument.for_operand())?;
        if self.mode == PartitionMode::AfterSort {
            let order = match base.order {
                Some(order) => env.order(order)?,
                None => return Err(PlanError::unexpected("partitioning without an order")),
            };
            let row = row_scalars(env, self.operand)?;
            iterator = sort_iterator(
                env,
                program,
                iterator,
                &row,
                order,
                argument.delay.as_ref(),
                None,
            )?;
        }
        let bound = self.limit.bound();
        let collection = program.add_collection(CollectionKind::Partition, bound);
        let keys = scalar::array_variable(env, program, iterator, &self.partition_keys)?;
        program.add_action(
            iterator,
            Target::Execution,
            Action::Partition {
                collection,
                keys,
                bound,
            },
        );
        add_check_predicate(env, program, iterator, base.predicate)?;
        Ok(iterator)
    }
}

/// Tuples left after keeping `limit` tuples of every partition
fn partitioned_count(env: &Environment<'_>, tuple_count: CostValue, limit: &Limit) -> CostValue {
    let estimate = limit.estimate_count(env.config());
    if estimate.is_infinity() {
        return tuple_count;
    }
    let partitions = env.estimator().grouping_count(tuple_count, true);
    tuple_count.min(partitions * estimate)
}

pub fn partitioned_cost(
    env: &Environment<'_>,
    operand: &Cost,
    limit: &Limit,
    mode: PartitionMode,
) -> Cost {
    let mut cost = match mode {
        PartitionMode::Streaming => {
            let mut cost = Cost::new();
            cost.assign_from(operand);
            cost.set_is_set_count();
            cost.clear_limit_count();
            cost
        }
        PartitionMode::AfterSort => sorted_cost(env, operand, None),
    };
    let input = cost.tuple_count();
    cost.set_overhead(cost.overhead() + CostConstants::COLLECTION_OVERHEAD);
    cost.set_total_cost(
        cost.total_cost() + input.max(CostValue::ONE) * CostConstants::COLLECTION_PROCESS_COST,
    );
    let output = partitioned_count(env, input, limit);
    if input.is_positive() && !input.is_infinity() {
        // per-tuple cost stays the same, fewer tuples come out
        cost.set_total_cost(cost.total_cost() / input * output.max(CostValue::ONE));
    }
    cost.set_tuple_count(output);
    cost
}

/// Wraps an operand in a partition step over `order`, whose leading keys are
/// the partition keys
pub fn create(
    env: &mut Environment<'_>,
    operand: CandidateId,
    order: &Specification,
    limit: Limit,
    mode: PartitionMode,
) -> PlanResult<CandidateId> {
    let operand_base = env.candidate(operand)?.base.clone();
    let cost = partitioned_cost(env, &operand_base.cost, &limit, mode);
    let partition_keys = order.partition_keys().to_vec();
    let order = match mode {
        PartitionMode::Streaming => copy_order(env, operand_base.order)?,
        PartitionMode::AfterSort => Some(raw_order(env, order)),
    };
    let base = CandidateBase {
        cost,
        order,
        row: copy_row(env, operand_base.row)?,
        key: copy_row(env, operand_base.key)?,
        unchecked: operand_base.unchecked.clone(),
        instances: operand_base.instances.clone(),
        distribution: operand_base.distribution,
        ..CandidateBase::default()
    };
    Ok(env.register_candidate(Candidate::new(
        base,
        CandidateKind::Partitioning(PartitioningCandidate {
            operand,
            partition_keys,
            limit,
            mode,
        }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::catalog::Catalog;
    use shared::config::PlannerConfig;

    fn create_test_cost(tuples: f64) -> Cost {
        let mut cost = Cost::new();
        cost.set_overhead(1.0);
        cost.set_total_cost(tuples);
        cost.set_tuple_count(tuples);
        cost.set_tuple_size(16.0);
        cost.set_is_set_count();
        cost
    }

    #[test]
    fn test_partition_limit_reduces_the_output() {
        let catalog = Catalog::new();
        let config = PlannerConfig::default();
        let env = Environment::new(&catalog, &config);
        let operand = create_test_cost(10_000.0);
        let cost = partitioned_cost(&env, &operand, &Limit::new(2), PartitionMode::Streaming);
        // 100 partitions of 2 tuples
        assert_eq!(cost.tuple_count(), 200.0);
        let unlimited = partitioned_cost(
            &env,
            &operand,
            &Limit::default(),
            PartitionMode::Streaming,
        );
        assert_eq!(unlimited.tuple_count(), 10_000.0);
    }

    #[test]
    fn test_streaming_is_cheaper_than_sorting_first() {
        let catalog = Catalog::new();
        let config = PlannerConfig::default();
        let env = Environment::new(&catalog, &config);
        let operand = create_test_cost(10_000.0);
        let streaming = partitioned_cost(&env, &operand, &Limit::new(1), PartitionMode::Streaming);
        let sorted = partitioned_cost(&env, &operand, &Limit::new(1), PartitionMode::AfterSort);
        assert!(streaming < sorted);
    }
}
