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
    add_check_predicate, copy_order, split_bound, AdoptArgument, Candidate, CandidateBase,
    CandidateKind,
};
use crate::cost::{Cost, CostValue};
use crate::environment::{CandidateId, Environment, PredicateId};
use crate::error::PlanResult;
use crate::predicate;
use crate::source::PlanSource;
use shared::program::{IteratorId, Program};

/// Conditions of a selection the operand could not absorb
#[derive(Debug, Clone)]
pub struct FilterCandidate {
    pub operand: CandidateId,
}

impl FilterCandidate {
    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let iterator = super::adopt(env, program, self.operand, &argument.for_operand())?;
        add_check_predicate(env, program, iterator, base.predicate)?;
        Ok(iterator)
    }
}

/// Checks `conditions` over the operand's tuples.
///
/// Conditions on tables that are neither produced by the operand nor bound
/// by a preceding candidate stay unchecked.
pub fn create(
    env: &mut Environment<'_>,
    source: &PlanSource,
    operand: CandidateId,
    conditions: &[PredicateId],
) -> PlanResult<CandidateId> {
    let operand_base = env.candidate(operand)?.base.clone();
    let mut available = source.preceding_instances(env)?;
    available.extend(operand_base.instances.iter().copied());
    let mut pending = operand_base.unchecked.clone();
    pending.extend(conditions.iter().copied());
    let (residual, unchecked) = split_bound(env, &pending, &available)?;

    let mut rate = CostValue::ONE;
    for conjunct in &residual {
        rate *= predicate::estimate_rate(env, *conjunct)?;
    }
    let mut cost = Cost::new();
    cost.assign_from(&operand_base.cost);
    cost.set_is_set_count();
    cost.set_tuple_count(operand_base.cost.tuple_count() * rate);
    let operand_rate = if operand_base.cost.rate().is_infinity() {
        CostValue::ONE
    } else {
        operand_base.cost.rate()
    };
    cost.set_rate(operand_rate * rate);
    cost.set_is_set_rate();

    let residual = predicate::combine(env, residual);
    let base = CandidateBase {
        cost,
        order: copy_order(env, operand_base.order)?,
        row: copy_row(env, operand_base.row)?,
        key: copy_row(env, operand_base.key)?,
        predicate: residual,
        unchecked,
        instances: operand_base.instances.clone(),
        distribution: operand_base.distribution,
        ..CandidateBase::default()
    };
    Ok(env.register_candidate(Candidate::new(
        base,
        CandidateKind::Filter(FilterCandidate { operand }),
    )))
}
