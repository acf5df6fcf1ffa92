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
use super::{copy_order, AdoptArgument, Candidate, CandidateBase, CandidateKind};
use crate::cost::{Cost, CostValue};
use crate::environment::{CandidateId, Environment};
use crate::error::PlanResult;
use crate::limit::Limit;
use shared::program::{Action, IteratorId, Program, Target};

#[derive(Debug, Clone)]
pub struct LimitCandidate {
    pub operand: CandidateId,
    pub limit: Limit,
}

impl LimitCandidate {
    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let iterator = super::adopt(env, program, self.operand, &argument.for_operand())?;
        if let Some(count) = self.limit.count {
            program.add_action(
                iterator,
                Target::Execution,
                Action::Limit {
                    count: count.to_string(),
                    offset: self.limit.offset.map(|offset| offset.to_string()),
                },
            );
        }
        Ok(iterator)
    }
}

/// Stops the operand once `estimate` result tuples are produced
pub fn limited_cost(operand: &Cost, estimate: CostValue) -> Cost {
    let mut cost = Cost::new();
    cost.assign_from(operand);
    cost.set_is_set_count();
    let rate = cost.rate();
    cost.set_rate(CostValue::INFINITY);
    cost.set_limit_count(estimate);
    cost.set_rate(rate);
    if operand.is_set_rate() {
        cost.set_is_set_rate();
    }
    cost
}

/// Wraps an operand whose files cannot process the limit
pub fn create(
    env: &mut Environment<'_>,
    operand: CandidateId,
    limit: Limit,
) -> PlanResult<CandidateId> {
    let operand_base = env.candidate(operand)?.base.clone();
    let estimate = limit.estimate_count(env.config());
    let base = CandidateBase {
        cost: limited_cost(&operand_base.cost, estimate),
        order: copy_order(env, operand_base.order)?,
        row: copy_row(env, operand_base.row)?,
        key: copy_row(env, operand_base.key)?,
        unchecked: operand_base.unchecked.clone(),
        limit,
        is_limited: true,
        instances: operand_base.instances.clone(),
        distribution: operand_base.distribution,
        ..CandidateBase::default()
    };
    Ok(env.register_candidate(Candidate::new(
        base,
        CandidateKind::Limit(LimitCandidate { operand, limit }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_caps_the_result_count() {
        let mut operand = Cost::new();
        operand.set_overhead(0.0);
        operand.set_total_cost(1000.0);
        operand.set_tuple_count(1000.0);
        operand.set_rate(0.5);
        operand.set_is_set_count();
        let cost = limited_cost(&operand, CostValue::new(10.0));
        assert_eq!(cost.limit_count(), 10.0);
        assert_eq!(cost.result_count(), 10.0);
        assert_eq!(cost.rate(), 0.5);
        assert!(cost < operand);
    }
}
