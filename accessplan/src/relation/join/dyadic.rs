/*
 * Copyright © 2024 Volodymyr Kadzhaia
 * Copyright © 2024 Pieter Bonte
 * KU Leuven — Stream Intelligence Lab, Belgium
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this file,
 * you can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Two-operand inner join

use super::{create_plan, join_conjuncts, standalone_source};
use crate::candidate;
use crate::cost::CostValue;
use crate::environment::{CandidateId, Environment, PredicateId, RelationId};
use crate::error::PlanResult;
use crate::predicate;
use crate::relation;
use crate::source::PlanSource;
use log::debug;
use shared::config::TraceTopic;
use std::cmp::Ordering;

/// Joins two relations, trying both operand orders unless one is forced
pub fn create_access_plan(
    env: &mut Environment<'_>,
    source: &PlanSource,
    first: RelationId,
    second: RelationId,
    join_predicate: Option<PredicateId>,
) -> PlanResult<CandidateId> {
    let mut search = source.for_operand();
    let conjuncts = join_conjuncts(env, source, join_predicate)?;
    let exhausted = search.check_join_max_candidates();

    if relation::depends_on(env, second, first)? {
        return create_fixed(env, &search, &conjuncts, first, second, join_predicate);
    }
    if relation::depends_on(env, first, second)? {
        return create_fixed(env, &search, &conjuncts, second, first, join_predicate);
    }

    let (first, second) = if reduces_more(env, &search, &conjuncts, second, first)? {
        if env.traced(TraceTopic::Join) {
            debug!("second join operand is reduced more, read it first");
        }
        (second, first)
    } else {
        (first, second)
    };

    let first_source = standalone_source(env, &search, &conjuncts, first)?;
    let candidate0 = relation::create_access_plan(env, first, &first_source)?;
    if exhausted || delivers_order(env, &search, candidate0)? {
        return create_plan(env, &search, &conjuncts, candidate0, second, join_predicate);
    }
    let second_source = standalone_source(env, &search, &conjuncts, second)?;
    let candidate1 = relation::create_access_plan(env, second, &second_source)?;
    if delivers_order(env, &search, candidate1)? {
        candidate::discard(env, candidate0, candidate1)?;
        return create_plan(env, &search, &conjuncts, candidate1, first, join_predicate);
    }

    let ((outer, outer_relation), (other, other_relation)) =
        if outer_first(env, join_predicate, candidate1, candidate0)? {
            ((candidate1, second), (candidate0, first))
        } else {
            ((candidate0, first), (candidate1, second))
        };
    let forward = create_plan(env, &search, &conjuncts, outer, other_relation, join_predicate)?;
    let winner = if env.candidate(forward)?.base.cost < env.candidate(other)?.base.cost {
        // reading the other side alone already costs more
        if env.traced(TraceTopic::Join) {
            debug!("skip reversed join order, {}", env.candidate(forward)?.base.cost);
        }
        forward
    } else {
        let backward = create_plan(
            env,
            &search,
            &conjuncts,
            other,
            outer_relation,
            join_predicate,
        )?;
        candidate::keep_cheaper(env, forward, backward)?
    };
    for standalone in [outer, other] {
        if env.contains_candidate(standalone) {
            candidate::discard(env, standalone, winner)?;
        }
    }
    Ok(winner)
}

/// Joins with `outer` fixed as the outer operand
fn create_fixed(
    env: &mut Environment<'_>,
    source: &PlanSource,
    conjuncts: &[PredicateId],
    outer: RelationId,
    inner: RelationId,
    join_predicate: Option<PredicateId>,
) -> PlanResult<CandidateId> {
    if env.traced(TraceTopic::Join) {
        debug!("join order fixed by dependency");
    }
    let outer_source = standalone_source(env, source, conjuncts, outer)?;
    let outer = relation::create_access_plan(env, outer, &outer_source)?;
    create_plan(env, source, conjuncts, outer, inner, join_predicate)
}

/// Whether the conjuncts touching `challenger` keep fewer tuples than those
/// touching `incumbent`; the tables of preceding candidates count for both
fn reduces_more(
    env: &Environment<'_>,
    source: &PlanSource,
    conjuncts: &[PredicateId],
    challenger: RelationId,
    incumbent: RelationId,
) -> PlanResult<bool> {
    if conjuncts.is_empty() {
        return Ok(false);
    }
    let preceding = source.preceding_instances(env)?;
    let mut rates = [CostValue::ONE; 2];
    for (rate, operand) in rates.iter_mut().zip([challenger, incumbent]) {
        let mut tables = preceding.clone();
        relation::used_tables(env, operand, &mut tables)?;
        for conjunct in conjuncts {
            if let Some(reduced) = predicate::check_rate(env, *conjunct, &tables)? {
                *rate *= reduced;
            }
        }
    }
    Ok(rates[0] < rates[1])
}

fn delivers_order(env: &Environment<'_>, source: &PlanSource, id: CandidateId) -> PlanResult<bool> {
    match source.order() {
        Some(required) => candidate::satisfies_order(env, id, Some(required)),
        None => Ok(false),
    }
}

/// Whether `challenger` should be read before `incumbent`: the cheaper side
/// first, and on equal cost the side the join predicate reduces more
fn outer_first(
    env: &Environment<'_>,
    join_predicate: Option<PredicateId>,
    challenger: CandidateId,
    incumbent: CandidateId,
) -> PlanResult<bool> {
    let challenger_cost = &env.candidate(challenger)?.base.cost;
    let incumbent_cost = &env.candidate(incumbent)?.base.cost;
    match challenger_cost.cmp(incumbent_cost) {
        Ordering::Less => return Ok(true),
        Ordering::Greater => return Ok(false),
        Ordering::Equal => {}
    }
    let predicate = match join_predicate {
        Some(predicate) => predicate,
        None => return Ok(false),
    };
    let challenger_rate =
        predicate::check_rate(env, predicate, &candidate::instance_set(env, challenger)?)?;
    let incumbent_rate =
        predicate::check_rate(env, predicate, &candidate::instance_set(env, incumbent)?)?;
    Ok(match (challenger_rate, incumbent_rate) {
        (Some(challenger), Some(incumbent)) => challenger < incumbent,
        (Some(_), None) => true,
        _ => false,
    })
}
