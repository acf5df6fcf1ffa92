/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{JoinCandidate, JoinKind};
use crate::candidate::{self, add_check_predicate, AdoptArgument, CandidateBase};
use crate::error::PlanResult;
use crate::environment::Environment;
use crate::scalar;
use shared::program::{Action, IteratorId, Program, Target};

impl JoinCandidate {
    /// The outer iterator iterates the inner one per tuple; the result is
    /// the outer iterator.
    pub(crate) fn adopt(
        &self,
        env: &Environment<'_>,
        program: &mut Program,
        base: &CandidateBase,
        argument: &AdoptArgument,
    ) -> PlanResult<IteratorId> {
        let operand_argument = argument.for_operand();
        let outer = candidate::adopt(env, program, self.outer(), &operand_argument)?;
        let inner_argument = operand_argument.with_outer(outer);
        let inner = candidate::adopt(env, program, self.inner(), &inner_argument)?;

        match self.kind {
            JoinKind::Inner => {
                program.add_action(outer, Target::Execution, Action::Iterate { operand: inner });
                program.copy_node_variables(inner, outer);
                add_check_predicate(env, program, outer, base.predicate)?;
            }
            JoinKind::LeftOuter => {
                add_check_predicate(env, program, inner, base.predicate)?;
                let padded = candidate::row_scalars(env, self.inner())?;
                let nulls = scalar::array_variable(env, program, inner, &padded)?;
                program.add_action(
                    outer,
                    Target::Execution,
                    Action::OuterJoin {
                        operand: inner,
                        nulls,
                    },
                );
                program.copy_node_variables(inner, outer);
            }
            JoinKind::Exists | JoinKind::NotExists => {
                add_check_predicate(env, program, inner, base.predicate)?;
                program.add_action(
                    outer,
                    Target::Execution,
                    Action::Exists {
                        operand: inner,
                        negated: self.kind == JoinKind::NotExists,
                    },
                );
            }
        }
        program.add_action(outer, Target::Execution, Action::CheckCancel);
        Ok(outer)
    }
}
