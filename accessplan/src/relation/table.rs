/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::candidate::{self, table};
use crate::environment::{CandidateId, Environment, InstanceId};
use crate::error::PlanResult;
use crate::source::PlanSource;
use log::debug;
use shared::config::TraceTopic;

/// Plans the read of one table instance.
///
/// Conjuncts of the source that need other instances come back unchecked;
/// an enclosing join or filter evaluates them.
pub fn create_access_plan(
    env: &mut Environment<'_>,
    source: &PlanSource,
    instance: InstanceId,
) -> PlanResult<CandidateId> {
    let id = if !source.is_simple() && table::simple::is_row_id_lookup(env, source, instance)? {
        let mut direct = source.for_operand();
        direct.set_simple(true);
        table::create(env, &direct, instance)?
    } else {
        table::create(env, source, instance)?
    };
    if env.traced(TraceTopic::Cost) {
        let candidate = env.candidate(id)?;
        debug!(
            "{} {}: {} ({} unchecked)",
            candidate.name(),
            env.instance(instance)?.alias,
            candidate.base.cost,
            candidate.base.unchecked.len()
        );
    }
    if let Some(required) = source.order() {
        if !candidate::satisfies_order(env, id, Some(required))? {
            debug!("{} cannot deliver the order", env.instance(instance)?.alias);
        }
    }
    Ok(id)
}
