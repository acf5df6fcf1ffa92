/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Concatenation of index scans, one per OR branch, deduplicated by row id

use super::{
    add_check_predicate, row_scalars, AdoptArgument, Candidate, CandidateBase, CandidateKind,
};
use crate::cost::{Cost, CostConstants, CostValue};
use crate::environment::{CandidateId, Environment, ScalarId};
use crate::error::{PlanError, PlanResult};
use crate::row::Row;
use crate::scalar;
use log::debug;
use shared::config::TraceTopic;
use shared::program::{Action, CollectionKind, IteratorId, IteratorKind, Program, Target};

#[derive(Debug, Clone, Default)]
pub struct UnionCandidate {
    pub operands: Vec<CandidateId>,
    /// Row ids telling the same tuple apart across branches
    pub keys: Vec<ScalarId>,
}

impl UnionCandidate {
    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let row: Vec<ScalarId> = match base.row {
            Some(row) => env.row(row)?.iter().collect(),
            None => return Err(PlanError::unexpected("union candidate without a row")),
        };
        let store = program.add_collection(CollectionKind::Store, None);
        let iterator = program.add_iterator(IteratorKind::Input);
        if let Some(outer) = argument.outer {
            program.copy_node_variables(outer, iterator);
        }
        let operand_argument = AdoptArgument {
            outer: argument.outer,
            ..AdoptArgument::default()
        };
        for operand in &self.operands {
            let branch = super::adopt(env, program, *operand, &operand_argument)?;
            let data = scalar::array_variable(env, program, branch, &row)?;
            program.add_action(
                branch,
                Target::Execution,
                Action::Output { collection: store, data },
            );
            program.add_action(iterator, Target::StartUp, Action::Iterate { operand: branch });
        }
        let data = scalar::array_variable(env, program, iterator, &row)?;
        program.add_action(iterator, Target::Execution, Action::Input { collection: store, data });

        let distinct = program.add_collection(CollectionKind::Distinct, None);
        let key = scalar::array_variable(env, program, iterator, &self.keys)?;
        program.add_action(
            iterator,
            Target::Execution,
            Action::Distinct { collection: distinct, key },
        );
        add_check_predicate(env, program, iterator, base.predicate)?;
        Ok(iterator)
    }
}

/// Every branch runs to the end before the first tuple is read back
pub fn union_cost(branches: &[&Cost]) -> Cost {
    let mut overhead = CostValue::new(CostConstants::COLLECTION_OVERHEAD);
    let mut startup = CostValue::ZERO;
    let mut tuple = CostValue::ZERO;
    let mut size = CostValue::ZERO;
    let mut table_count = CostValue::ZERO;
    for branch in branches {
        overhead += branch.overhead();
        startup += branch.repeat_cost();
        tuple += branch.tuple_count();
        size = size.max(branch.tuple_size());
        table_count = table_count.max(branch.table_count());
    }
    let mut cost = Cost::new();
    cost.set_overhead(overhead);
    cost.set_startup(startup);
    cost.set_total_cost(tuple.max(CostValue::ONE) * CostConstants::COLLECTION_PROCESS_COST);
    cost.set_tuple_count(tuple);
    cost.set_tuple_size(size);
    cost.set_table_count(table_count);
    if !table_count.is_infinity() && table_count.is_positive() {
        cost.set_rate((tuple / table_count).min(CostValue::ONE));
        cost.set_is_set_rate();
    }
    cost.set_is_set_count();
    cost.add_distinct_cost();
    cost
}

/// Unions branches reading the same tables; `keys` identify a tuple
pub fn create(
    env: &mut Environment<'_>,
    operands: Vec<CandidateId>,
    keys: Vec<ScalarId>,
) -> PlanResult<CandidateId> {
    if operands.len() < 2 {
        return Err(PlanError::unexpected("union of fewer than two branches"));
    }
    let mut costs = Vec::with_capacity(operands.len());
    let mut row = Row::new();
    let mut instances = Vec::new();
    let mut unchecked = Vec::new();
    for operand in &operands {
        let candidate = env.candidate(*operand)?;
        costs.push(candidate.base.cost.clone());
        for instance in &candidate.base.instances {
            if !instances.contains(instance) {
                instances.push(*instance);
            }
        }
        for conjunct in &candidate.base.unchecked {
            if !unchecked.contains(conjunct) {
                unchecked.push(*conjunct);
            }
        }
        row.merge(&Row::from_scalars(row_scalars(env, *operand)?));
    }
    for key in &keys {
        row.add(*key);
    }
    let cost = union_cost(&costs.iter().collect::<Vec<_>>());
    if env.traced(TraceTopic::Cost) {
        debug!("union of {} branches: {}", operands.len(), cost);
    }
    let row = env.add_row(row);
    let key = env.add_row(Row::from_scalars(keys.iter().copied()));
    let base = CandidateBase {
        cost,
        row: Some(row),
        key: Some(key),
        unchecked,
        instances,
        ..CandidateBase::default()
    };
    Ok(env.register_candidate(Candidate::new(
        base,
        CandidateKind::Union(UnionCandidate { operands, keys }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_cost(tuples: f64) -> Cost {
        let mut cost = Cost::new();
        cost.set_overhead(1.0);
        cost.set_total_cost(tuples * 2.0);
        cost.set_tuple_count(tuples);
        cost.set_tuple_size(8.0);
        cost.set_table_count(1000.0);
        cost.set_is_set_count();
        cost
    }

    #[test]
    fn test_union_adds_up_branches() {
        let first = create_test_cost(10.0);
        let second = create_test_cost(30.0);
        let cost = union_cost(&[&first, &second]);
        assert_eq!(cost.overhead(), 3.0);
        assert_eq!(cost.startup(), 80.0);
        assert_eq!(cost.tuple_count(), 40.0);
        assert_eq!(cost.rate(), 0.04);
    }
}
